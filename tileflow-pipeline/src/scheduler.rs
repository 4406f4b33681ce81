//! The presentation cycle: wait for a frame signal (or the pacing timeout),
//! drain the dirty state, snapshot and composite each dirty tile, and
//! transfer the composited blocks to the display controller. Runs inside
//! the long-lived task body in `Pipeline::run`, on the core not shared with
//! the producer.

use crate::compositor::{self, DoublePixelBuffer};
use crate::dirty::RenderBitmap;
use crate::palette::PALETTE_SIZE;
use crate::pipeline::{ModeState, Pipeline};
use crate::tile::TileGrid;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use log::trace;
use tileflow_common::color::Rgb565;
use tileflow_common::display::DisplayController;
use tileflow_common::mode::VideoMode;
use tileflow_common::platform::Platform;

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum UpdateStrategy {
    /// Snapshot and transfer dirty tiles only. Preferred even for
    /// whole-screen updates: the double-buffered transfer makes it no
    /// slower and it reuses the dirty-tracking path.
    Tiles,
    /// Stream full frames in row bands when a full redraw is due. A
    /// fallback for transfer primitives with low per-call overhead;
    /// partial updates still go through the tile path.
    Streaming,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct PresentConfig {
    /// Pacing floor: cycles closer together than this are skipped, and the
    /// bounded signal wait uses it as the timeout so a static screen is
    /// still refreshed periodically.
    pub min_frame_interval_ms: u64,
    /// Nearest-neighbor integer upscale to the physical display.
    pub scale: u32,
    pub strategy: UpdateStrategy,
    /// Yield cooperative slack every this many tiles during a long redraw.
    pub yield_every: usize,
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            min_frame_interval_ms: 16, // ~60Hz ceiling
            scale: 2,
            strategy: UpdateStrategy::Tiles,
            yield_every: 16,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub(crate) enum CycleOutcome {
    /// Under the minimum frame interval; dirty state kept for later.
    RateLimited,
    /// Nothing dirty and no full redraw pending; no transfer at all.
    Idle,
    Presented { tiles: usize },
}

/// Consumer-task state. Owned by the task body; everything shared lives in
/// the `Pipeline`.
pub(crate) struct Presenter<'a, P: Platform> {
    pipeline: &'a Pipeline<P>,
    render: RenderBitmap,
    mode: VideoMode,
    grid: TileGrid,
    seen_generation: u32,
    palette: [Rgb565; PALETTE_SIZE],
    snapshot: Vec<u8>,
    row_bytes: Vec<u8>,
    row_indices: Vec<u8>,
    out: DoublePixelBuffer,
    last_present: Option<u64>,
}

impl<'a, P: Platform> Presenter<'a, P> {
    pub(crate) fn new(pipeline: &'a Pipeline<P>) -> Self {
        let ms = pipeline.mode_state();
        let mut presenter = Self {
            render: RenderBitmap::with_capacity(pipeline.max_tiles()),
            mode: ms.mode,
            grid: ms.grid,
            seen_generation: pipeline.mode_generation(),
            palette: [Rgb565(0); PALETTE_SIZE],
            snapshot: Vec::new(),
            row_bytes: Vec::new(),
            row_indices: Vec::new(),
            out: DoublePixelBuffer::new(),
            last_present: None,
            pipeline,
        };
        presenter.apply_mode(ms);
        presenter
    }

    fn apply_mode(&mut self, ms: ModeState) {
        let scale = self.pipeline.config().present.scale as usize;
        let tile = ms.grid.tile_size() as usize;
        self.mode = ms.mode;
        self.grid = ms.grid;
        self.render.reset(ms.grid.tile_count());
        self.snapshot.clear();
        self.snapshot.resize(tile * tile, 0);
        self.row_bytes.clear();
        self.row_bytes.resize(ms.mode.bytes_per_row as usize, 0);
        self.row_indices.clear();
        self.row_indices.resize(ms.mode.width as usize, 0);
        self.out.resize(tile * scale * tile * scale);
    }

    /// One pass of the Draining -> Compositing -> Presenting sequence.
    pub(crate) fn run_cycle(&mut self, ctrl: &mut dyn DisplayController) -> CycleOutcome {
        let stats = &self.pipeline.stats;
        stats.cycles.fetch_add(1, Ordering::Relaxed);

        let now = self.pipeline.platform().now();
        if let Some(last) = self.last_present {
            if now.saturating_sub(last) < self.pipeline.config().present.min_frame_interval_ms {
                stats.rate_limited.fetch_add(1, Ordering::Relaxed);
                return CycleOutcome::RateLimited;
            }
        }

        // A mode switch invalidates everything derived; tiles composited
        // under the old mode were presented last cycle at worst.
        let generation = self.pipeline.mode_generation();
        if generation != self.seen_generation {
            self.seen_generation = generation;
            self.apply_mode(self.pipeline.mode_state());
        }

        let drained = self.pipeline.dirty().drain_into(&mut self.render);
        let mut full = self.pipeline.take_pending_full();
        if self.pipeline.palette().snapshot_if_changed(&mut self.palette) {
            // Every drawn pixel's effective color is stale.
            full = true;
        }
        let count = if full {
            stats.full_redraws.fetch_add(1, Ordering::Relaxed);
            self.render.force_full()
        } else {
            drained
        };
        if count == 0 {
            stats.idle.fetch_add(1, Ordering::Relaxed);
            return CycleOutcome::Idle;
        }
        trace!("scheduler: presenting {} dirty tiles (full={})", count, full);

        let strategy = self.pipeline.config().present.strategy;
        let tiles = if full && strategy == UpdateStrategy::Streaming {
            self.present_streaming(ctrl)
        } else {
            self.present_tiles(ctrl)
        };

        stats.presented.fetch_add(1, Ordering::Relaxed);
        stats.tiles.fetch_add(tiles as u64, Ordering::Relaxed);
        self.last_present = Some(self.pipeline.platform().now());
        CycleOutcome::Presented { tiles }
    }

    /// Snapshot, composite and transfer every render-side dirty tile,
    /// clearing its bit once transferred. Tiles with no dirty bit cost
    /// nothing. The two tile output buffers alternate so composing the
    /// next tile overlaps transferring the previous one.
    fn present_tiles(&mut self, ctrl: &mut dyn DisplayController) -> usize {
        let config = self.pipeline.config().present;
        let scale = config.scale as usize;
        let tile = self.grid.tile_size() as usize;
        let out_len = tile * scale * tile * scale;
        let fb = self.pipeline.frame_view();

        let mut drawn = 0;
        let mut cursor = 0;
        while let Some(index) = self.render.first_set_from(cursor) {
            cursor = index + 1;
            let rect = self.grid.tile_rect(index);
            compositor::snapshot_tile(fb, &self.mode, rect, &mut self.snapshot);
            compositor::render_block(
                &self.snapshot[..tile * tile],
                &self.palette,
                tile,
                tile,
                scale,
                &mut self.out.compose()[..out_len],
            );

            // The previous tile's transfer must retire before its buffer
            // is reused on the next iteration.
            ctrl.wait_transfer_complete();
            let dst = rect.scaled(config.scale);
            ctrl.set_transfer_window(dst.x, dst.y, dst.w, dst.h);
            ctrl.write_pixel_block_async(&self.out.compose()[..out_len]);
            self.out.flip();

            self.render.clear(index);
            drawn += 1;
            if config.yield_every != 0 && drawn % config.yield_every == 0 {
                self.pipeline.platform().yield_now();
            }
        }
        ctrl.wait_transfer_complete();
        drawn
    }

    fn present_streaming(&mut self, ctrl: &mut dyn DisplayController) -> usize {
        let scale = self.pipeline.config().present.scale;
        let fb = self.pipeline.frame_view();
        compositor::render_full_streaming(
            fb,
            &self.mode,
            &self.palette,
            scale,
            &mut self.out,
            &mut self.row_bytes,
            &mut self.row_indices,
            ctrl,
        );
        let tiles = self.grid.tile_count();
        self.render.reset(tiles);
        // The band buffers were resized for streaming; restore tile sizing.
        let tile = self.grid.tile_size() as usize;
        self.out.resize(tile * scale as usize * tile * scale as usize);
        tiles
    }
}
