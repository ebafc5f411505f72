//! Connection-lifecycle persistence (§10.5). Purely a bookkeeping trail for
//! operators ("who was connected, from where, for how long") — it never
//! gates in-memory correctness. The [`Hub`](crate::realtime::hub::Hub) and
//! [`Connection`](crate::realtime::connection) state machine are the source
//! of truth for "is this connection live right now"; a write failure here is
//! logged and counted, never propagated back to the socket.

use chrono::Utc;
use diesel::prelude::*;

use crate::models::{ConnectionRecord, NewConnectionRecord};
use crate::realtime::connection::{ConnectionId, ConnectionMeta};
use crate::schema::connections;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Persistence collaborator for connection lifecycle events. Async to match
/// the shape the dispatcher invokes collaborators with, even though the
/// Diesel implementation below does its work on a blocking thread.
#[salvo::async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn create_connection(
        &self,
        connection_id: ConnectionId,
        user_id: i32,
        device_id: &str,
        meta: &ConnectionMeta,
    ) -> Result<(), RepositoryError>;

    async fn update_connection_status(
        &self,
        connection_id: ConnectionId,
        status: ConnectionStatus,
    ) -> Result<(), RepositoryError>;

    async fn delete_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<(), RepositoryError>;

    async fn get_active_connections(
        &self,
        user_id: i32,
    ) -> Result<Vec<ConnectionRecord>, RepositoryError>;

    async fn cleanup_stale_connections(
        &self,
        older_than: chrono::Duration,
    ) -> Result<usize, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),
    #[error("blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Diesel/SQLite implementation. Mirrors `db::connect()`'s pattern of a
/// fresh connection per call rather than a pool — this repository sees at
/// most one call per connection lifecycle transition, far below the volume
/// that would justify pooling here.
pub struct DieselConnectionRepository;

impl DieselConnectionRepository {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DieselConnectionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[salvo::async_trait]
impl ConnectionRepository for DieselConnectionRepository {
    async fn create_connection(
        &self,
        connection_id: ConnectionId,
        user_id: i32,
        device_id: &str,
        meta: &ConnectionMeta,
    ) -> Result<(), RepositoryError> {
        let device_id = device_id.to_string();
        let meta = meta.clone();
        tokio::task::spawn_blocking(move || -> Result<(), RepositoryError> {
            let mut conn = crate::db::connect()?;
            let now = Utc::now().naive_utc();
            let record = NewConnectionRecord {
                connection_id: connection_id as i64,
                user_id,
                device_id: &device_id,
                remote_addr: meta.ip.as_deref(),
                user_agent: meta.user_agent.as_deref(),
                platform: meta.platform.as_deref(),
                app_version: meta.app_version.as_deref(),
                status: ConnectionStatus::Connected.as_str(),
                connected_at: now,
                last_activity_at: now,
            };
            diesel::insert_into(connections::table)
                .values(&record)
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    async fn update_connection_status(
        &self,
        connection_id: ConnectionId,
        status: ConnectionStatus,
    ) -> Result<(), RepositoryError> {
        tokio::task::spawn_blocking(move || -> Result<(), RepositoryError> {
            let mut conn = crate::db::connect()?;
            diesel::update(
                connections::table.filter(connections::connection_id.eq(connection_id as i64)),
            )
            .set((
                connections::status.eq(status.as_str()),
                connections::last_activity_at.eq(Utc::now().naive_utc()),
            ))
            .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    async fn delete_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<(), RepositoryError> {
        tokio::task::spawn_blocking(move || -> Result<(), RepositoryError> {
            let mut conn = crate::db::connect()?;
            let now = Utc::now().naive_utc();
            diesel::update(
                connections::table.filter(connections::connection_id.eq(connection_id as i64)),
            )
            .set((
                connections::status.eq(ConnectionStatus::Disconnected.as_str()),
                connections::disconnected_at.eq(Some(now)),
                connections::last_activity_at.eq(now),
            ))
            .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    async fn get_active_connections(
        &self,
        user_id: i32,
    ) -> Result<Vec<ConnectionRecord>, RepositoryError> {
        tokio::task::spawn_blocking(move || -> Result<Vec<ConnectionRecord>, RepositoryError> {
            let mut conn = crate::db::connect()?;
            let rows = connections::table
                .filter(connections::user_id.eq(user_id))
                .filter(connections::status.eq(ConnectionStatus::Connected.as_str()))
                .select(ConnectionRecord::as_select())
                .load(&mut conn)?;
            Ok(rows)
        })
        .await?
    }

    async fn cleanup_stale_connections(
        &self,
        older_than: chrono::Duration,
    ) -> Result<usize, RepositoryError> {
        tokio::task::spawn_blocking(move || -> Result<usize, RepositoryError> {
            let mut conn = crate::db::connect()?;
            let cutoff = Utc::now().naive_utc() - older_than;
            let now = Utc::now().naive_utc();
            let affected = diesel::update(
                connections::table
                    .filter(connections::status.eq(ConnectionStatus::Connected.as_str()))
                    .filter(connections::last_activity_at.lt(cutoff)),
            )
            .set((
                connections::status.eq(ConnectionStatus::Disconnected.as_str()),
                connections::disconnected_at.eq(Some(now)),
            ))
            .execute(&mut conn)?;
            Ok(affected)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_match_column_values() {
        assert_eq!(ConnectionStatus::Connected.as_str(), "connected");
        assert_eq!(ConnectionStatus::Disconnected.as_str(), "disconnected");
    }
}
