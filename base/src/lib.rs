//! The `base` crate defines the simulator-boundary things which are
//! useful both in the scheduler core and in the hosts which drive it.
//! The idea is that a frontend (a terminal host, or a web page) would
//! depend on the base crate for the shapes of the data it displays,
//! but would not need to depend on the scheduler library itself.

mod snapshot;
mod status;
mod types;

pub mod prelude;

pub use snapshot::*;
pub use status::ExecutionStatus;
pub use types::{Address, ContextId};
