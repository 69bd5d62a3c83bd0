//! Line-oriented scanner cutting an XML dump into the blocks the bootstrapper consumes.

use crate::bootstrap::fragment::parse_fragment;
use crate::bootstrap::DumpPass;
use crate::replication::BinlogPosition;

const DATABASE_OPEN: &str = "<database name";
const STRUCTURE_OPEN: &str = "<table_structure";
const STRUCTURE_CLOSE: &str = "</table_structure";
const TABLE_DATA_OPEN: &str = "<table_data";
const ROW_OPEN: &str = "<row>";
const ROW_CLOSE: &str = "</row>";
const CHANGE_MASTER: &str = "change master";

#[derive(Clone, Debug, PartialEq)]
pub enum DumpItem {
    Database(String),
    TableData(String),
    Structure { table: String, fragment: String },
    Row(String),
    LogPosition(BinlogPosition),
}

#[derive(Debug)]
enum ScanState {
    Idle,
    InSchemaBlock { table: String, buffer: String },
    InDataRow { buffer: String },
}

/// Feeds dump lines one at a time, never holding more than one block.
#[derive(Debug)]
pub struct DumpScanner {
    pass: DumpPass,
    state: ScanState,
}

impl DumpScanner {
    pub fn new(pass: DumpPass) -> Self {
        Self {
            pass,
            state: ScanState::Idle,
        }
    }

    pub fn feed(&mut self, line: &str) -> Option<DumpItem> {
        let lowercase = line.to_ascii_lowercase();

        match &mut self.state {
            ScanState::InSchemaBlock { buffer, .. } => {
                push_line(buffer, line);

                if !lowercase.contains(STRUCTURE_CLOSE) {
                    return None;
                }

                match std::mem::replace(&mut self.state, ScanState::Idle) {
                    ScanState::InSchemaBlock { table, buffer } => Some(DumpItem::Structure {
                        table,
                        fragment: buffer,
                    }),
                    _ => None,
                }
            }
            ScanState::InDataRow { buffer } => {
                push_line(buffer, line);

                if !lowercase.contains(ROW_CLOSE) {
                    return None;
                }

                match std::mem::replace(&mut self.state, ScanState::Idle) {
                    ScanState::InDataRow { buffer } => Some(DumpItem::Row(buffer)),
                    _ => None,
                }
            }
            ScanState::Idle => self.feed_idle(line, &lowercase),
        }
    }

    fn feed_idle(&mut self, line: &str, lowercase: &str) -> Option<DumpItem> {
        match self.pass {
            DumpPass::Data if lowercase.contains(ROW_OPEN) => {
                if lowercase.contains(ROW_CLOSE) {
                    return Some(DumpItem::Row(line.to_owned()));
                }

                self.state = ScanState::InDataRow {
                    buffer: line.to_owned(),
                };
                None
            }
            DumpPass::Schema if lowercase.contains(STRUCTURE_OPEN) => {
                let table = name_attribute(line).unwrap_or_default();

                if lowercase.contains(STRUCTURE_CLOSE) {
                    return Some(DumpItem::Structure {
                        table,
                        fragment: line.to_owned(),
                    });
                }

                self.state = ScanState::InSchemaBlock {
                    table,
                    buffer: line.to_owned(),
                };
                None
            }
            _ if lowercase.contains(DATABASE_OPEN) => name_attribute(line).map(DumpItem::Database),
            DumpPass::Data if lowercase.contains(TABLE_DATA_OPEN) => {
                name_attribute(line).map(DumpItem::TableData)
            }
            _ if lowercase.contains(CHANGE_MASTER) => {
                log_position(line, lowercase).map(DumpItem::LogPosition)
            }
            _ => None,
        }
    }

    /// Whether the dump ended in the middle of a block.
    pub fn is_inside_block(&self) -> bool {
        !matches!(self.state, ScanState::Idle)
    }
}

fn push_line(buffer: &mut String, line: &str) {
    buffer.push('\n');
    buffer.push_str(line);
}

fn name_attribute(line: &str) -> Option<String> {
    parse_fragment(line)
        .into_iter()
        .find_map(|element| element.attribute("name").map(str::to_owned))
}

/// Reads `MASTER_LOG_FILE='…', MASTER_LOG_POS=…;` out of a change master directive.
fn log_position(line: &str, lowercase: &str) -> Option<BinlogPosition> {
    const FILE: &str = "master_log_file='";
    const POSITION: &str = "master_log_pos=";

    let file_start = lowercase.find(FILE)? + FILE.len();
    let file_end = file_start + lowercase[file_start..].find('\'')?;

    let position_start = lowercase.find(POSITION)? + POSITION.len();
    let position: String = lowercase[position_start..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();

    Some(BinlogPosition::new(
        &line[file_start..file_end],
        position.parse().ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(pass: DumpPass, dump: &str) -> Vec<DumpItem> {
        let mut scanner = DumpScanner::new(pass);
        dump.lines().filter_map(|line| scanner.feed(line)).collect()
    }

    const DUMP: &str = r#"<?xml version="1.0"?>
<mysqldump xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<!--
CHANGE MASTER TO MASTER_LOG_FILE='bin.000025', MASTER_LOG_POS=250160467;
-->
<database name="shop">
	<table_structure name="orders">
		<field Field="id" Type="int(11)" Null="NO" Key="PRI" Extra="auto_increment" Comment="" />
	</table_structure>
	<table_data name="orders">
	<row>
		<field name="id">1</field>
	</row>
	</table_data>
</database>
</mysqldump>"#;

    #[test]
    fn emits_schema_blocks_on_schema_pass() {
        assert_eq!(
            scan(DumpPass::Schema, DUMP),
            vec![
                DumpItem::LogPosition(BinlogPosition::new("bin.000025", 250160467)),
                DumpItem::Database("shop".into()),
                DumpItem::Structure {
                    table: "orders".into(),
                    fragment: "\t<table_structure name=\"orders\">\n\t\t<field Field=\"id\" Type=\"int(11)\" Null=\"NO\" Key=\"PRI\" Extra=\"auto_increment\" Comment=\"\" />\n\t</table_structure>".into()
                },
            ]
        );
    }

    #[test]
    fn emits_rows_on_data_pass() {
        assert_eq!(
            scan(DumpPass::Data, DUMP),
            vec![
                DumpItem::LogPosition(BinlogPosition::new("bin.000025", 250160467)),
                DumpItem::Database("shop".into()),
                DumpItem::TableData("orders".into()),
                DumpItem::Row("\t<row>\n\t\t<field name=\"id\">1</field>\n\t</row>".into()),
            ]
        );
    }

    #[test]
    fn matches_markers_case_insensitively() {
        assert_eq!(
            scan(
                DumpPass::Data,
                "-- change master to master_log_file='mysql-bin.000003', master_log_pos=154;\n<ROW><field name=\"id\">2</field></ROW>"
            ),
            vec![
                DumpItem::LogPosition(BinlogPosition::new("mysql-bin.000003", 154)),
                DumpItem::Row("<ROW><field name=\"id\">2</field></ROW>".into()),
            ]
        );
    }

    #[test]
    fn reports_unterminated_block() {
        let mut scanner = DumpScanner::new(DumpPass::Data);

        scanner.feed("<row>");

        assert!(scanner.is_inside_block());
    }
}
