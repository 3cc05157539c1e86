//! A single tokio-postgres connection used for one invocation.
//!
//! DDL runs in autocommit. Backfill chunks run inside an explicit
//! transaction opened by `prepare`, committed by `commit` and rolled back by
//! `close` when the chunk never reached the commit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, error, info, warn};

use crate::config::DatabaseConfig;
use crate::core::traits::{ChunkStatement, Connection};
use crate::dialect::DatabaseKind;
use crate::drivers::common::SslMode;
use crate::error::{Result, ZdError};

/// Bytes read from a load file per COPY message.
const COPY_BUFFER_SIZE: usize = 256 * 1024;

pub struct PgSession {
    client: Arc<Client>,
    in_transaction: Arc<AtomicBool>,
    connection_task: JoinHandle<()>,
}

impl PgSession {
    /// Open a session and check it with `SELECT 1`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pg_config = config.pg_config();
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;

        let (client, connection_task) = match ssl_mode.connector()? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let (client, connection) = pg_config.connect(NoTls).await?;
                let task = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("PostgreSQL connection error: {}", e);
                    }
                });
                (client, task)
            }
            Some(connector) => {
                let (client, connection) = pg_config.connect(connector).await?;
                let task = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("PostgreSQL connection error: {}", e);
                    }
                });
                (client, task)
            }
        };

        client.simple_query("SELECT 1").await?;
        info!(
            "Connected to PostgreSQL: {}:{}/{} (ssl_mode={})",
            config.host, config.port, config.database, ssl_mode
        );

        Ok(Self {
            client: Arc::new(client),
            in_transaction: Arc::new(AtomicBool::new(false)),
            connection_task,
        })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// `SELECT version()`, for health checks.
    pub async fn server_version(&self) -> Result<String> {
        let row = self.client.query_one("SELECT version()", &[]).await?;
        Ok(row.get(0))
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        // An open chunk transaction is rolled back by the server.
        self.connection_task.abort();
    }
}

#[async_trait]
impl Connection for PgSession {
    fn database_kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        if self.is_closed() {
            return Err(ZdError::NotConnected);
        }
        let messages = self.client.simple_query(sql).await?;
        Ok(messages
            .iter()
            .map(|m| match m {
                SimpleQueryMessage::CommandComplete(rows) => *rows,
                _ => 0,
            })
            .sum())
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn ChunkStatement>> {
        if self.is_closed() {
            return Err(ZdError::NotConnected);
        }
        self.client.batch_execute("BEGIN").await?;
        self.in_transaction.store(true, Ordering::SeqCst);

        let statement = match self.client.prepare(sql).await {
            Ok(statement) => statement,
            Err(e) => {
                rollback(&self.client, &self.in_transaction).await;
                return Err(e.into());
            }
        };
        Ok(Box::new(PgChunk {
            client: Arc::clone(&self.client),
            in_transaction: Arc::clone(&self.in_transaction),
            statement,
        }))
    }

    async fn commit(&self) -> Result<()> {
        if self.in_transaction.swap(false, Ordering::SeqCst) {
            self.client.batch_execute("COMMIT").await?;
        }
        Ok(())
    }

    async fn copy_in(&self, sql: &str, mut source: Box<dyn AsyncRead + Send + Unpin>) -> Result<u64> {
        if self.is_closed() {
            return Err(ZdError::NotConnected);
        }
        let sink = self.client.copy_in::<str, Bytes>(sql).await?;
        tokio::pin!(sink);

        let mut buf = BytesMut::with_capacity(COPY_BUFFER_SIZE);
        let mut sent = 0usize;
        loop {
            buf.reserve(COPY_BUFFER_SIZE);
            if source.read_buf(&mut buf).await? == 0 {
                break;
            }
            sent += buf.len();
            sink.send(buf.split().freeze()).await?;
        }
        let rows = sink.finish().await?;
        debug!("COPY sent {} bytes, {} rows", sent, rows);
        Ok(rows)
    }
}

async fn rollback(client: &Client, in_transaction: &AtomicBool) {
    if in_transaction.swap(false, Ordering::SeqCst) {
        if let Err(e) = client.batch_execute("ROLLBACK").await {
            debug!("ROLLBACK failed: {}", e);
        }
    }
}

struct PgChunk {
    client: Arc<Client>,
    in_transaction: Arc<AtomicBool>,
    statement: tokio_postgres::Statement,
}

#[async_trait]
impl ChunkStatement for PgChunk {
    async fn execute(&mut self) -> Result<u64> {
        Ok(self.client.execute(&self.statement, &[]).await?)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        rollback(&self.client, &self.in_transaction).await;
        Ok(())
    }
}
