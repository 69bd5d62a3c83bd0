use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Coordinate inside the source binary log.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BinlogPosition {
    file: Arc<str>,
    position: u64,
}

impl BinlogPosition {
    pub fn new(file: impl Into<Arc<str>>, position: u64) -> Self {
        Self {
            file: file.into(),
            position,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn with_position(self, position: u64) -> Self {
        Self { position, ..self }
    }

    pub fn with_file(self, file: impl Into<Arc<str>>) -> Self {
        Self {
            file: file.into(),
            ..self
        }
    }
}

impl Display for BinlogPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.position)
    }
}
