mod annotator;
mod camera;
mod display;
mod snapshot;
mod state;

pub mod app;
pub mod config;
pub mod session;
pub mod telemetry;

pub use annotator::{AnnotateError, Annotator, Overlay};
pub use app::start_app;
pub use camera::{Camera, CaptureError, CaptureLoop, FrameSource};
pub use display::{Display, DisplayError, KeyCommand, Window};
pub use snapshot::{SnapshotError, SnapshotWriter};
pub use state::SessionState;
