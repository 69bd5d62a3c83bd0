use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Error};
use mysql_common::params::Params;
use std::collections::HashMap;

/// Column names by ordinal position, for servers that do not log column metadata.
#[derive(Debug, Default)]
pub struct ColumnNames {
    tables: HashMap<(String, String), Vec<String>>,
}

impl ColumnNames {
    pub async fn populate(&mut self, connection: &mut Conn, databases: &[String]) -> Result<(), Error> {
        if databases.is_empty() {
            return Ok(());
        }

        let query = format!(
            "SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, ORDINAL_POSITION - 1 FROM information_schema.COLUMNS WHERE TABLE_SCHEMA IN ({}) ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION",
            vec!["?"; databases.len()].join(", ")
        );

        let columns = connection
            .exec_map(
                query,
                Params::Positional(databases.iter().map(|db| db.as_str().into()).collect()),
                |(db, table, column, position): (String, String, String, usize)| {
                    (db, table, column, position)
                },
            )
            .await?;

        self.clear();
        self.populate_columns(columns);

        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.tables.clear();
    }

    pub(crate) fn populate_columns(
        &mut self,
        source: impl IntoIterator<Item = (String, String, String, usize)>,
    ) {
        for (db, table, column, position) in source {
            let columns = self.tables.entry((db, table)).or_default();

            if columns.len() <= position {
                columns.resize(position + 1, String::new());
            }

            columns[position] = column;
        }
    }

    pub fn has_table(&self, db: &str, table: &str) -> bool {
        self.tables
            .contains_key(&(db.to_owned(), table.to_owned()))
    }

    pub fn column_name(&self, db: &str, table: &str, position: usize) -> Option<&str> {
        self.tables
            .get(&(db.to_owned(), table.to_owned()))
            .and_then(|columns| columns.get(position))
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}
