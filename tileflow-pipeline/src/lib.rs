//! Dirty-region frame synchronization between an emulated indexed-color
//! frame buffer and a bandwidth-limited display, split across two cores:
//! the producer (the emulation core) writes pixels and marks tiles dirty
//! without ever blocking, and the presentation task drains the dirty state,
//! snapshots and composites the affected tiles, and transfers them to the
//! display controller.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod compositor;
pub mod dirty;
pub mod palette;
pub mod pipeline;
pub mod pixel;
pub mod rect;
pub mod scheduler;
pub mod signal;
pub mod tile;

pub use pipeline::{CreateError, ModeError, Pipeline, PipelineConfig, StatsSnapshot};
pub use scheduler::{PresentConfig, UpdateStrategy};
pub use tileflow_common::color::{Color, Rgb565};
pub use tileflow_common::display::DisplayController;
pub use tileflow_common::mode::{PixelDepth, VideoMode};
pub use tileflow_common::platform::Platform;
