//! The owned pipeline object tying the pieces together: the frame buffer
//! the producer writes into, the dirty tracker, the palette store, the frame
//! signal, and the mode descriptor. One instance is shared between the
//! producer core and the presentation task; every producer-facing call is
//! O(1)-ish, lock-free and non-blocking, since it sits on the producer's
//! critical path.

use crate::compositor::FrameView;
use crate::dirty::DirtyTracker;
use crate::palette::PaletteStore;
use crate::scheduler::{PresentConfig, Presenter};
use crate::signal::FrameSignal;
use crate::tile::TileGrid;
use alloc::boxed::Box;
use alloc::vec;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use log::{debug, info, warn};
use spin::RwLock;
use tileflow_common::color::Color;
use tileflow_common::display::DisplayController;
use tileflow_common::mode::{PixelDepth, VideoMode};
use tileflow_common::platform::Platform;

pub const MAX_MODES: usize = 8;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sizes the worst case: the frame buffer and dirty bitmaps are
    /// allocated once for the largest of these modes, so the producer-visible
    /// base pointer never moves. `set_mode` accepts any mode that validates
    /// and fits that allocation, listed here or not.
    pub modes: heapless::Vec<VideoMode, MAX_MODES>,
    pub initial_mode: usize,
    /// Index the frame buffer is filled with at creation, so the first
    /// presented frame shows a defined background rather than garbage.
    pub background_index: u8,
    pub present: PresentConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut modes = heapless::Vec::new();
        let _ = modes.push(VideoMode::packed(640, 360, PixelDepth::Bpp8));
        Self {
            modes,
            initial_mode: 0,
            background_index: 0x80,
            present: PresentConfig::default(),
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum ModeError {
    /// `bytes_per_row` cannot hold a row, or a dimension is zero.
    InvalidGeometry,
    /// No tile edge length divides both dimensions.
    NoTileGranularity,
    /// The mode needs more frame buffer than was allocated at creation.
    TooLarge,
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum CreateError {
    NoModes,
    BadInitialMode,
    Mode(ModeError),
}

/// Counters exposed for diagnostics.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub presented: u64,
    pub rate_limited: u64,
    pub idle: u64,
    pub tiles: u64,
    pub full_redraws: u64,
}

#[derive(Default)]
pub(crate) struct Stats {
    pub(crate) cycles: AtomicU64,
    pub(crate) presented: AtomicU64,
    pub(crate) rate_limited: AtomicU64,
    pub(crate) idle: AtomicU64,
    pub(crate) tiles: AtomicU64,
    pub(crate) full_redraws: AtomicU64,
}

/// The shared pixel memory. The producer is the only writer (through the
/// raw pointer or `Pipeline::write`); the presentation task is the only
/// reader, through `FrameView`. All access goes through raw pointers: a
/// reference over the whole buffer on either side would alias the other
/// side's concurrent access, which is undefined behavior even under the
/// byte-atomicity assumption.
struct FrameMemory {
    base: *mut u8,
    len: usize,
}

unsafe impl Send for FrameMemory {}
unsafe impl Sync for FrameMemory {}

impl FrameMemory {
    fn new(len: usize, fill: u8) -> Self {
        let base = Box::into_raw(vec![fill; len].into_boxed_slice());
        Self {
            base: base as *mut u8,
            len,
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    fn view(&self) -> FrameView {
        // The view never outlives the pipeline; reads are raw-pointer copies.
        unsafe { FrameView::new(self.base, self.len) }
    }

    /// Caller must be the producer context. Out-of-range ranges are ignored.
    unsafe fn write(&self, offset: usize, bytes: &[u8]) {
        let Some(end) = offset.checked_add(bytes.len()) else {
            return;
        };
        if end > self.len {
            return;
        }
        ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(offset), bytes.len());
    }
}

impl Drop for FrameMemory {
    fn drop(&mut self) {
        unsafe { drop(Box::from_raw(ptr::slice_from_raw_parts_mut(self.base, self.len))) };
    }
}

#[derive(Clone, Copy)]
pub(crate) struct ModeState {
    pub(crate) mode: VideoMode,
    pub(crate) grid: TileGrid,
}

pub struct Pipeline<P: Platform> {
    config: PipelineConfig,
    platform: P,
    frame: FrameMemory,
    mode: RwLock<ModeState>,
    mode_generation: AtomicU32,
    dirty: DirtyTracker,
    palette: PaletteStore,
    signal: FrameSignal,
    pending_full: AtomicBool,
    running: AtomicBool,
    consumer_active: AtomicBool,
    max_tiles: usize,
    pub(crate) stats: Stats,
}

impl<P: Platform> Pipeline<P> {
    /// Allocates the frame buffer, dirty bitmaps and palette, sized for the
    /// worst case over the configured modes. Allocation failure is fatal to
    /// the pipeline; the caller decides whether to run without a display.
    pub fn create(config: PipelineConfig, platform: P) -> Result<Self, CreateError> {
        if config.modes.is_empty() {
            return Err(CreateError::NoModes);
        }
        let initial = *config
            .modes
            .get(config.initial_mode)
            .ok_or(CreateError::BadInitialMode)?;

        let mut max_bytes = 0;
        let mut max_tiles = 0;
        for mode in &config.modes {
            let grid = validate_mode(mode).map_err(CreateError::Mode)?;
            max_bytes = max_bytes.max(mode.frame_bytes());
            max_tiles = max_tiles.max(grid.tile_count());
        }

        let grid = validate_mode(&initial).map_err(CreateError::Mode)?;
        let dirty = DirtyTracker::with_capacity(max_tiles);
        dirty.reset(grid.tile_count());
        let palette = PaletteStore::new();
        palette.install_defaults(initial.depth);

        info!(
            "pipeline: created, {}x{} at {:?}, {} byte frame buffer, {} tiles",
            initial.width,
            initial.height,
            initial.depth,
            max_bytes,
            grid.tile_count()
        );

        Ok(Self {
            frame: FrameMemory::new(max_bytes, config.background_index),
            config,
            platform,
            mode: RwLock::new(ModeState { mode: initial, grid }),
            mode_generation: AtomicU32::new(0),
            dirty,
            palette,
            signal: FrameSignal::new(),
            pending_full: AtomicBool::new(true),
            running: AtomicBool::new(false),
            consumer_active: AtomicBool::new(false),
            max_tiles,
            stats: Stats::default(),
        })
    }

    // ---- producer-facing API ----

    /// Marks the tile(s) covered by the pixel(s) a single written byte
    /// represents. Out-of-range offsets are silently ignored.
    pub fn mark_dirty_at(&self, offset: u32) {
        // A mark racing a mode switch may be dropped; the switch forces a
        // full redraw, which supersedes it.
        let Some(ms) = self.mode.try_read() else {
            return;
        };
        self.mark_offset(&ms, offset as usize);
    }

    /// Marks the tiles covered by a multi-byte write. Small single-row
    /// ranges delegate to the first and last byte; multi-row ranges
    /// conservatively mark every tile column on each affected tile-row.
    pub fn mark_dirty_range(&self, offset: u32, length: u32) {
        if length == 0 {
            return;
        }
        let Some(ms) = self.mode.try_read() else {
            return;
        };
        let frame_bytes = ms.mode.frame_bytes();
        let offset = offset as usize;
        if offset >= frame_bytes {
            return;
        }
        let end = (offset + length as usize - 1).min(frame_bytes - 1);
        let bpr = ms.mode.bytes_per_row as usize;
        let (row0, row1) = (offset / bpr, end / bpr);

        if row0 != row1 {
            let (tr0, tr1) = (ms.grid.row_of(row0 as u32), ms.grid.row_of(row1 as u32));
            for tr in tr0..=tr1 {
                for c in 0..ms.grid.cols() {
                    self.dirty.mark(ms.grid.index(c, tr));
                }
            }
        } else if length <= 4 {
            self.mark_offset(&ms, offset);
            self.mark_offset(&ms, end);
        } else {
            let ppb = ms.mode.depth.pixels_per_byte() as usize;
            let width = ms.mode.width as usize;
            let px0 = (offset % bpr) * ppb;
            if px0 >= width {
                return;
            }
            let px1 = ((end % bpr) * ppb + ppb - 1).min(width - 1);
            let tr = ms.grid.row_of(row0 as u32);
            for c in ms.grid.col_of(px0 as u32)..=ms.grid.col_of(px1 as u32) {
                self.dirty.mark(ms.grid.index(c, tr));
            }
        }
    }

    /// Convenience producer write: copies `bytes` into the frame buffer at
    /// `offset` and marks the range dirty. The emulator's fast path writes
    /// through `frame_buffer_ptr` and calls `mark_dirty_*` itself.
    pub fn write(&self, offset: u32, bytes: &[u8]) {
        let end = offset as usize + bytes.len();
        if bytes.is_empty() || end > self.frame_buffer_size() {
            return;
        }
        unsafe { self.frame.write(offset as usize, bytes) };
        self.mark_dirty_range(offset, bytes.len() as u32);
    }

    /// Overwrites palette entries from packed RGB triples, starting at
    /// entry 0. Forces a full redraw on the next presentation cycle.
    pub fn set_palette(&self, rgb_triples: &[u8]) {
        self.set_palette_range(0, rgb_triples);
    }

    /// Sub-range palette update.
    pub fn set_palette_range(&self, first: usize, rgb_triples: &[u8]) {
        debug!("pipeline: palette update of {} entries", rgb_triples.len() / 3);
        self.palette.set_entries(
            first,
            rgb_triples
                .chunks_exact(3)
                .map(|c| Color::new(c[0], c[1], c[2])),
        );
    }

    /// Gamma is applied through the palette for indexed modes; the raw
    /// table is accepted and ignored.
    pub fn set_gamma(&self, _gamma: &[u8]) {
        debug!("pipeline: gamma table ignored for indexed modes");
    }

    /// Switches the video mode. Invalidates palette defaults and dirty
    /// state and forces a full redraw; tiles already composited under the
    /// old mode in the current cycle are still presented (stale for at most
    /// one cycle).
    pub fn set_mode(&self, width: u32, height: u32, depth: PixelDepth) -> Result<(), ModeError> {
        let mode = self
            .config
            .modes
            .iter()
            .find(|m| m.width == width && m.height == height && m.depth == depth)
            .copied()
            .unwrap_or(VideoMode::packed(width, height, depth));
        let grid = validate_mode(&mode)?;
        if mode.frame_bytes() > self.frame.len() {
            return Err(ModeError::TooLarge);
        }

        {
            let mut ms = self.mode.write();
            *ms = ModeState { mode, grid };
            self.dirty.reset(grid.tile_count());
        }
        self.mode_generation.fetch_add(1, Ordering::AcqRel);
        self.palette.install_defaults(depth);
        self.pending_full.store(true, Ordering::Release);
        info!(
            "pipeline: mode switch to {}x{} at {:?} ({} tiles)",
            width,
            height,
            depth,
            grid.tile_count()
        );
        self.signal_frame_ready();
        Ok(())
    }

    /// Hints that accumulated writes should be presented soon. Never
    /// blocks; signals collapse until the presentation task consumes them.
    pub fn signal_frame_ready(&self) {
        if self.signal.raise() {
            self.platform.wake();
        }
    }

    // ---- consumer-facing API ----

    pub fn frame_buffer_ptr(&self) -> *mut u8 {
        self.frame.as_ptr()
    }

    /// Size of the frame buffer under the current mode.
    pub fn frame_buffer_size(&self) -> usize {
        self.mode.read().mode.frame_bytes()
    }

    pub fn mode(&self) -> VideoMode {
        self.mode.read().mode
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The presentation task body. Call from a long-lived task pinned to
    /// the core not shared with the producer; returns after `stop`.
    pub fn run(&self, ctrl: &mut dyn DisplayController) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("pipeline: presentation task already running");
            return;
        }
        self.consumer_active.store(true, Ordering::Release);
        info!("pipeline: presentation task started");

        let mut presenter = Presenter::new(self);
        while self.is_running() {
            self.platform.wait(self.config.present.min_frame_interval_ms);
            self.signal.consume(); // timeout alone is also sufficient to proceed
            if !self.is_running() {
                break;
            }
            presenter.run_cycle(ctrl);
        }

        info!("pipeline: presentation task exiting");
        self.consumer_active.store(false, Ordering::Release);
    }

    /// Requests shutdown and waits up to `grace_ms` for the presentation
    /// task to finish its current cycle. No in-flight transfer is aborted.
    pub fn stop(&self, grace_ms: u64) {
        self.running.store(false, Ordering::Release);
        self.platform.wake();
        let deadline = self.platform.now() + grace_ms;
        while self.consumer_active.load(Ordering::Acquire) {
            if self.platform.now() >= deadline {
                warn!("pipeline: presentation task did not stop within grace period");
                break;
            }
            self.platform.delay(1);
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.stats.cycles.load(Ordering::Relaxed),
            presented: self.stats.presented.load(Ordering::Relaxed),
            rate_limited: self.stats.rate_limited.load(Ordering::Relaxed),
            idle: self.stats.idle.load(Ordering::Relaxed),
            tiles: self.stats.tiles.load(Ordering::Relaxed),
            full_redraws: self.stats.full_redraws.load(Ordering::Relaxed),
        }
    }

    // ---- shared with the presentation task ----

    pub(crate) fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub(crate) fn platform(&self) -> &P {
        &self.platform
    }

    pub(crate) fn dirty(&self) -> &DirtyTracker {
        &self.dirty
    }

    pub(crate) fn palette(&self) -> &PaletteStore {
        &self.palette
    }

    pub(crate) fn mode_state(&self) -> ModeState {
        *self.mode.read()
    }

    pub(crate) fn mode_generation(&self) -> u32 {
        self.mode_generation.load(Ordering::Acquire)
    }

    pub(crate) fn take_pending_full(&self) -> bool {
        self.pending_full.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn max_tiles(&self) -> usize {
        self.max_tiles
    }

    pub(crate) fn frame_view(&self) -> FrameView {
        self.frame.view()
    }

    fn mark_offset(&self, ms: &ModeState, offset: usize) {
        let mode = &ms.mode;
        if offset >= mode.frame_bytes() {
            return;
        }
        let bpr = mode.bytes_per_row as usize;
        let (row, byte) = (offset / bpr, offset % bpr);
        let ppb = mode.depth.pixels_per_byte() as usize;
        let px0 = byte * ppb;
        if px0 >= mode.width as usize {
            return; // row padding beyond the logical width
        }
        let px1 = (px0 + ppb - 1).min(mode.width as usize - 1);
        let tr = ms.grid.row_of(row as u32);
        for c in ms.grid.col_of(px0 as u32)..=ms.grid.col_of(px1 as u32) {
            self.dirty.mark(ms.grid.index(c, tr));
        }
    }
}

fn validate_mode(mode: &VideoMode) -> Result<TileGrid, ModeError> {
    if !mode.is_valid() {
        return Err(ModeError::InvalidGeometry);
    }
    TileGrid::for_mode(mode).ok_or(ModeError::NoTileGranularity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirty::RenderBitmap;

    pub(crate) struct NoopPlatform;

    impl Platform for NoopPlatform {
        fn now(&self) -> u64 {
            0
        }
        fn wait(&self, _timeout_ms: u64) {}
        fn wake(&self) {}
        fn delay(&self, _ms: u64) {}
    }

    fn pipeline_with_mode(mode: VideoMode) -> Pipeline<NoopPlatform> {
        let mut config = PipelineConfig::default();
        config.modes.clear();
        config.modes.push(mode).unwrap();
        Pipeline::create(config, NoopPlatform).unwrap()
    }

    fn drained(p: &Pipeline<NoopPlatform>) -> Vec<usize> {
        let mut render = RenderBitmap::with_capacity(p.max_tiles());
        render.reset(p.dirty().tile_count());
        p.dirty().drain_into(&mut render);
        render.iter_set().collect()
    }

    #[test]
    fn single_pixel_write_marks_one_tile() {
        // 640x360 at 8-bit, 40x40 tiles (16x9 grid): (123, 77) is tile 19.
        let p = pipeline_with_mode(VideoMode::packed(640, 360, PixelDepth::Bpp8));
        p.mark_dirty_at(77 * 640 + 123);
        assert_eq!(drained(&p), vec![19]);
    }

    #[test]
    fn packed_depth_offsets_map_through_pixels_per_byte() {
        // 2-bit depth, bytes_per_row = 160: byte 10 covers pixel columns
        // 40..=43 of row 0, which is tile (col 1, row 0).
        let p = pipeline_with_mode(VideoMode::packed(640, 360, PixelDepth::Bpp2));
        p.mark_dirty_at(10);
        assert_eq!(drained(&p), vec![1]);

        // A byte straddling a tile boundary marks both tiles: at 1-bit
        // depth byte 4 covers pixels 32..=39, byte 5 covers 40..=47.
        let p = pipeline_with_mode(VideoMode::packed(640, 360, PixelDepth::Bpp1));
        p.mark_dirty_at(4);
        assert_eq!(drained(&p), vec![0]);
        p.mark_dirty_at(5);
        assert_eq!(drained(&p), vec![1]);
    }

    #[test]
    fn four_bit_depth_mapping() {
        // 4-bit, bytes_per_row = 320; byte 20 of row 41 covers pixel
        // columns 40..=41: tile (col 1, row 1) = index 17.
        let p = pipeline_with_mode(VideoMode::packed(640, 360, PixelDepth::Bpp4));
        p.mark_dirty_at(41 * 320 + 20);
        assert_eq!(drained(&p), vec![17]);
    }

    #[test]
    fn small_range_marks_first_and_last_byte() {
        let p = pipeline_with_mode(VideoMode::packed(640, 360, PixelDepth::Bpp8));
        // 4 bytes crossing the tile boundary at pixel column 40.
        p.mark_dirty_range(38, 4);
        assert_eq!(drained(&p), vec![0, 1]);
    }

    #[test]
    fn long_single_row_range_marks_column_span() {
        let p = pipeline_with_mode(VideoMode::packed(640, 360, PixelDepth::Bpp8));
        p.mark_dirty_range(10, 200); // columns 10..=209: tiles 0..=5
        assert_eq!(drained(&p), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn multi_row_range_marks_full_tile_rows() {
        let p = pipeline_with_mode(VideoMode::packed(640, 360, PixelDepth::Bpp8));
        // From row 39 into row 41 crosses the tile-row boundary at 40.
        p.mark_dirty_range(39 * 640 + 600, 2 * 640);
        let tiles = drained(&p);
        assert_eq!(tiles, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn out_of_range_input_is_ignored() {
        let p = pipeline_with_mode(VideoMode::packed(640, 360, PixelDepth::Bpp8));
        p.mark_dirty_at(640 * 360);
        p.mark_dirty_range(640 * 360, 16);
        p.mark_dirty_range(100, 0);
        p.write(640 * 360 - 1, &[1, 2]); // would run past the end
        assert_eq!(drained(&p), vec![]);

        // A range starting inside and running past the end is clamped.
        p.mark_dirty_range(360 * 640 - 4, 1000);
        assert_eq!(drained(&p), vec![143]);
    }

    #[test]
    fn write_copies_and_marks() {
        let p = pipeline_with_mode(VideoMode::packed(640, 360, PixelDepth::Bpp8));
        p.write(77 * 640 + 123, &[7]);
        assert_eq!(drained(&p), vec![19]);
        let byte_at = |offset: usize| unsafe { *p.frame_buffer_ptr().add(offset) };
        assert_eq!(byte_at(77 * 640 + 123), 7);
        assert_eq!(byte_at(0), 0x80); // background fill
    }

    #[test]
    fn rejects_unusable_modes() {
        let p = pipeline_with_mode(VideoMode::packed(640, 360, PixelDepth::Bpp8));
        assert_eq!(
            p.set_mode(641, 360, PixelDepth::Bpp8),
            Err(ModeError::NoTileGranularity)
        );
        assert_eq!(
            p.set_mode(1280, 720, PixelDepth::Bpp8),
            Err(ModeError::TooLarge)
        );
        assert_eq!(p.mode(), VideoMode::packed(640, 360, PixelDepth::Bpp8));

        let mut config = PipelineConfig::default();
        config.modes.clear();
        config
            .modes
            .push(VideoMode::new(640, 360, PixelDepth::Bpp8, 320))
            .unwrap();
        assert_eq!(
            Pipeline::create(config, NoopPlatform).err(),
            Some(CreateError::Mode(ModeError::InvalidGeometry))
        );
    }

    #[test]
    fn mode_switch_resets_dirty_state() {
        let p = pipeline_with_mode(VideoMode::packed(640, 360, PixelDepth::Bpp8));
        assert!(p.take_pending_full()); // initial full redraw
        p.mark_dirty_at(0);
        let generation = p.mode_generation();

        p.set_mode(320, 240, PixelDepth::Bpp4).unwrap();
        assert_eq!(p.mode_generation(), generation + 1);
        assert!(p.take_pending_full());
        assert_eq!(p.frame_buffer_size(), 160 * 240);
        assert_eq!(p.dirty().tile_count(), 8 * 6);
        assert_eq!(drained(&p), vec![]); // pre-switch marks discarded
        assert!(p.signal_raised_for_test());
    }

    impl Pipeline<NoopPlatform> {
        fn signal_raised_for_test(&self) -> bool {
            self.signal.is_raised()
        }
    }

    #[test]
    fn base_pointer_is_stable_across_mode_switches() {
        let mut config = PipelineConfig::default();
        config
            .modes
            .push(VideoMode::packed(320, 240, PixelDepth::Bpp4))
            .unwrap();
        let p = Pipeline::create(config, NoopPlatform).unwrap();
        let ptr = p.frame_buffer_ptr();
        p.set_mode(320, 240, PixelDepth::Bpp4).unwrap();
        assert_eq!(p.frame_buffer_ptr(), ptr);
        p.set_mode(640, 360, PixelDepth::Bpp8).unwrap();
        assert_eq!(p.frame_buffer_ptr(), ptr);
    }
}
