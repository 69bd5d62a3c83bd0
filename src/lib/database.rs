use crate::error::Error;
use crate::replication::BinlogPosition;
use std::cmp::max;

use mysql_async::prelude::Queryable;
use mysql_async::{BinlogStream, Conn, Opts, Pool};
use mysql_common::packets::binlog_request::BinlogRequest;
use mysql_common::row::Row;

/// Source server handle shared by capture, bulk export and status commands.
#[derive(Clone, Debug)]
pub struct Database {
    pool: Pool,
    server_id: Option<u32>,
}

impl Database {
    pub fn new<O>(opts: O) -> Self
    where
        Opts: From<O>,
    {
        Self::from_pool(Pool::new(opts))
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self {
            pool,
            server_id: None,
        }
    }

    /// Replica identity announced to the source instead of a generated one.
    pub fn with_server_id(self, server_id: Option<u32>) -> Self {
        Self { server_id, ..self }
    }

    pub async fn acquire_connection(&self) -> Result<Conn, Error> {
        self.pool.get_conn().await.map_err(Error::MySQLError)
    }

    pub async fn binlog_stream(&self, position: &BinlogPosition) -> Result<BinlogStream, Error> {
        let mut connection = self.acquire_connection().await?;

        let server_id = match self.server_id {
            Some(server_id) => server_id,
            None => Self::next_free_server_id(&mut connection).await?,
        };

        Ok(connection
            .get_binlog_stream(
                BinlogRequest::new(server_id)
                    .with_filename(position.file().as_bytes())
                    .with_pos(position.position()),
            )
            .await?)
    }

    async fn next_free_server_id(connection: &mut Conn) -> Result<u32, Error> {
        let server_id = connection
            .query_first("SELECT @@server_id")
            .await?
            .unwrap_or(1);

        let server_id = connection
            .query_fold("SHOW SLAVE HOSTS", server_id, |init, row: Row| {
                max(init, row.get::<u32, _>(0).unwrap_or(0))
            })
            .await
            .map_err(|_| Error::BinlogPositionMissing)?;

        Ok(server_id + 1)
    }

    /// Current end of the binary log, as reported by `SHOW MASTER STATUS`.
    pub async fn binlog_position(&self) -> Result<BinlogPosition, Error> {
        let row: Row = self
            .acquire_connection()
            .await?
            .query_first("SHOW MASTER STATUS")
            .await?
            .ok_or(Error::BinlogPositionMissing)?;

        Ok(BinlogPosition::new(
            row.get::<String, _>(0)
                .ok_or(Error::BinlogPositionMissing)?,
            row.get(1).ok_or(Error::BinlogPositionMissing)?,
        ))
    }

    pub async fn disconnect(self) -> Result<(), Error> {
        Ok(self.pool.disconnect().await?)
    }
}
