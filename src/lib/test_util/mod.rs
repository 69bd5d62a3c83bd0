#[macro_use]
mod macros;
mod log;
mod snapshot;

pub use log::{ScriptedLog, ScriptedSource};
pub use snapshot::SnapshotStub;
