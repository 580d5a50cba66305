//! The minimal built-in executor set: enough to define the contract and
//! exercise the engine end-to-end. Richer node libraries live outside the
//! core.

mod router;
mod start;
mod transform;

pub use router::RouterExecutor;
pub use start::StartExecutor;
pub use transform::TransformExecutor;
