//! One-time loading of schema and rows before live capture starts.

mod bulk;
mod dump;
mod fragment;
mod mysqldump;
mod scanner;
mod tsv;

pub use crate::checkpoint::ParsePass as DumpPass;
pub use bulk::{BulkLoader, SourceSnapshot, TableLoad};
pub use dump::{DumpBootstrapper, DumpReport};
pub use fragment::{decode_entities, parse_fragment, Element};
pub use mysqldump::{remove_dump, BootstrapMode, MysqlDump};
pub use scanner::{DumpItem, DumpScanner};
pub use tsv::{format_line, parse_line};
