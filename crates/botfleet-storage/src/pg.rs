// Postgres backing store over raw sqlx connections
//
// The pool owns plain `PgConnection` handles, not a sqlx pool; validation,
// retry, and the live-count bound are handled one layer up.
//
// Expected table (bootstrap is operational, not part of this crate):
//
//   CREATE TABLE worker_subjects (
//       worker_id     TEXT        NOT NULL,
//       subject_id    BIGINT      NOT NULL,
//       subject_label TEXT        NOT NULL,
//       first_seen    TIMESTAMPTZ NOT NULL,
//       last_seen     TIMESTAMPTZ NOT NULL,
//       PRIMARY KEY (worker_id, subject_id)
//   );

use async_trait::async_trait;
use sqlx::{Connection, PgConnection};

use crate::connection::{ConnectionFactory, StoreConnection};
use crate::error::StoreError;
use crate::models::SubjectUpsert;

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(io) => StoreError::ConnectionLost(io.to_string()),
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                StoreError::ConnectionLost(e.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Creates Postgres connections from a database URL
#[derive(Clone)]
pub struct PgConnectionFactory {
    database_url: String,
}

impl PgConnectionFactory {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    type Conn = PgStoreConnection;

    async fn connect(&self) -> Result<PgStoreConnection, StoreError> {
        let conn = PgConnection::connect(&self.database_url).await?;
        Ok(PgStoreConnection { conn })
    }
}

/// One raw Postgres connection
pub struct PgStoreConnection {
    conn: PgConnection,
}

#[async_trait]
impl StoreConnection for PgStoreConnection {
    async fn ping(&mut self) -> Result<(), StoreError> {
        self.conn.ping().await.map_err(Into::into)
    }

    async fn begin(&mut self) -> Result<(), StoreError> {
        sqlx::query("BEGIN").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        sqlx::query("COMMIT").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        sqlx::query("ROLLBACK").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn upsert_subject(&mut self, row: &SubjectUpsert) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO worker_subjects (worker_id, subject_id, subject_label, first_seen, last_seen)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (worker_id, subject_id)
            DO UPDATE SET subject_label = EXCLUDED.subject_label, last_seen = EXCLUDED.last_seen
            "#,
        )
        .bind(&row.worker_id)
        .bind(row.subject_id)
        .bind(&row.subject_label)
        .bind(row.seen_at)
        .execute(&mut self.conn)
        .await?;

        Ok(())
    }

    async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await.map_err(Into::into)
    }
}
