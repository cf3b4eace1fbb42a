//! # pressroom-deploy
//!
//! Deployment synchronization engine.
//!
//! A [`DeploymentSession`] snapshots a locally built site, lists the remote
//! tree through a [`RemoteTransport`], plans with [`diff`] or
//! [`replace_all`] and applies the plan.

pub mod diff;
pub mod error;
pub mod session;
pub mod snapshot;
pub mod transport;

pub use diff::{diff, replace_all, FileOperation, OperationKind};
pub use error::DeployError;
pub use session::{DeployPlan, DeployReport, DeploymentSession};
pub use snapshot::{local_snapshot, FileRecord, FileTreeSnapshot};
pub use transport::{RemoteTransport, SyncStrategy, TransportRegistry};
