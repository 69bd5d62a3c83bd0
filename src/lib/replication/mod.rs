mod binlog;
mod capture;
mod columns;
mod position;
mod source;
mod value;

pub use binlog::{BinlogEventSource, BinlogLog, CheckpointMode};
pub use capture::ChangeCapture;
pub use columns::ColumnNames;
pub use position::BinlogPosition;
pub use source::{ReplicationLog, RowEventSource};
pub use value::normalize;
