use crate::color::Rgb565;

/// The transfer primitive of the display controller. The pipeline needs
/// nothing else from the device: a destination window, and a way to push a
/// block of native-encoded pixels into it, optionally overlapped with the
/// next block's preparation.
pub trait DisplayController {
    /// Selects the destination rectangle (in physical display pixels) for
    /// subsequent pixel blocks.
    fn set_transfer_window(&mut self, x: u32, y: u32, width: u32, height: u32);

    /// Pushes `pixels` into the current window, row-major. Blocks until the
    /// transfer is complete.
    fn write_pixel_block(&mut self, pixels: &[Rgb565]);

    /// As `write_pixel_block`, but may return while the transfer is still in
    /// flight. The caller must not touch `pixels` again before
    /// `wait_transfer_complete`. Controllers without asynchronous transfer
    /// fall back to the blocking form.
    fn write_pixel_block_async(&mut self, pixels: &[Rgb565]) {
        self.write_pixel_block(pixels);
    }

    /// Waits for the last asynchronous transfer to retire. A no-op if none
    /// is in flight.
    fn wait_transfer_complete(&mut self) {}
}
