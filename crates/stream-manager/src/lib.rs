//! Stream orchestration for the camera bridge
//!
//! Holds every camera [`Stream`] in a registry, paces periodic snapshots
//! through an external capture program and routes commands from the
//! automation bridge and HTTP API to the right camera.

mod camera;
mod event;
mod manager;
mod periodic;
mod publisher;
mod snapshot;
mod stream;

pub use camera::{CameraStream, Quality, StreamOptions};
pub use event::{EventKind, StreamEvent};
pub use manager::{ManagerConfig, StreamInfo, StreamManager};
pub use periodic::PeriodicTask;
pub use publisher::{CommandSink, HealthCheck, NullPublisher, Publisher};
pub use snapshot::{SnapshotCommand, SnapshotError, SnapshotSupervisor};
pub use stream::{CommandResult, ResultStatus, Stream, StreamStatus, UPDATE_SNAPSHOT};
