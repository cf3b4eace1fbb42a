//! pressroom daemon: build registry, generator runs, publish cycle and the
//! Unix-socket server that triggers them.

pub mod builds;
mod error;
pub mod generator;
pub mod paths;
pub mod protocol;
pub mod publish;
mod runtime;

use std::time::{SystemTime, UNIX_EPOCH};

pub use builds::{ActiveBuild, BuildGuard, BuildHandle, BuildRegistry};
pub use error::{BuildError, DaemonError, ProcessError, PublishError};
pub use generator::{build_site, BuildOptions};
pub use protocol::{
    request_cancel, request_publish, request_status, request_stop, send_request, DaemonRequest,
    DaemonResponse,
};
pub use publish::{DeploymentSummary, PublishSummary, Publisher};
pub use runtime::{run, serve, start_blocking, PublishTimestamps};

pub(crate) fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
