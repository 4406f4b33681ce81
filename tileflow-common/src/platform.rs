/// Scheduling and timing services the pipeline needs from the host platform.
///
/// The presentation task is the only caller of `wait`, `yield_now` and
/// `delay`; `wake` must be callable from any context (including the producer
/// core) and must never block.
pub trait Platform: Send + Sync {
    /// Monotonic milliseconds since an arbitrary epoch.
    fn now(&self) -> u64;

    /// Blocks the calling task until `wake` is called or `timeout_ms`
    /// elapses, whichever comes first. Spurious returns are permitted.
    fn wait(&self, timeout_ms: u64);

    /// Wakes a task blocked in `wait`. Never blocks; if no task is waiting
    /// the wake is lost (the pipeline's level flag covers that case).
    fn wake(&self);

    /// Offers the scheduler a chance to run other tasks mid-redraw.
    fn yield_now(&self) {}

    /// Puts the calling task to sleep for at least `ms`.
    fn delay(&self, ms: u64);
}
