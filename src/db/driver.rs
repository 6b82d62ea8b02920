//! Backend driver abstraction.
//!
//! A driver knows how to open a client-level connection, open a session on
//! top of it, run one statement on a session and close both layers. It holds
//! no state of its own: caching and recovery belong to the
//! [`Connector`](crate::db::Connector).

use crate::error::DbResult;
use crate::models::{BackendKind, Row};
use std::future::Future;

/// Low-level operations against one analytical store.
pub trait WarehouseDriver: Send + Sync + 'static {
    /// Client-level connection (HTTP client, connection pool, ...).
    type Client: Send + Sync + 'static;
    /// Session opened on a client; statements run on a session.
    type Session: Send + Sync + 'static;

    /// Backend this driver talks to.
    fn kind(&self) -> BackendKind;

    /// Open the client-level connection.
    fn connect(&self) -> impl Future<Output = DbResult<Self::Client>> + Send;

    /// Open a session on a connected client.
    fn open_session(
        &self,
        client: &Self::Client,
    ) -> impl Future<Output = DbResult<Self::Session>> + Send;

    /// Submit a statement, wait for completion, fetch every row and close the
    /// per-statement operation. The session stays open.
    fn execute(
        &self,
        session: &Self::Session,
        sql: &str,
    ) -> impl Future<Output = DbResult<Vec<Row>>> + Send;

    /// Close a session.
    fn close_session(&self, session: &Self::Session) -> impl Future<Output = DbResult<()>> + Send;

    /// Close a client.
    fn close_client(&self, client: &Self::Client) -> impl Future<Output = DbResult<()>> + Send;
}
