//! Domain model (lease, run identity, lifecycle state, errors).

pub mod errors;
pub mod ids;
pub mod lease;
pub mod state;

pub use self::errors::{LeaseError, RunError};
pub use self::ids::{RunId, RunIdentity};
pub use self::lease::{Lease, PoolKind};
pub use self::state::{LifecycleState, Phase};
