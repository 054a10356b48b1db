//! Day/night camera selection with anti-flicker hysteresis and safe in-process
//! frame publication.
//!
//! The [CameraSwitchController] is driven by a single capture-loop thread per
//! camera pair: brightness samples and frames come in, switch decisions and
//! published frames go out. It performs no internal threading and owns all of
//! its state; concurrency exists only at the shared-memory boundary handled
//! by its publish callback.

mod brightness;
mod config;
mod controller;
mod double_buffer;
mod luma;

pub use brightness::{BrightnessSnapshot, BrightnessStat};
pub use config::{CameraSwitchConfig, ConfigError};
pub use controller::{CameraSwitchController, ControllerStatus, SwitchDecision, SwitchMode};
pub use double_buffer::{FrameDoubleBuffer, FramePublisher, PublishError};
pub use luma::{mean_luma, ImageJpegDecoder, JpegLumaDecoder, LumaError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The caller supplied no publisher. Rejected before any state change.
    #[error("no frame publisher supplied")]
    NoPublisher,
    #[error(transparent)]
    Publish(#[from] PublishError),
}
