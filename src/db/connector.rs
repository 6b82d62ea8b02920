//! Cached backend session with stale-session recovery.
//!
//! A [`Connector`] owns at most one live client/session pair. The first
//! statement connects lazily; later statements reuse the cached session.
//! When a statement fails with an error that looks like an expired session,
//! the connector tears the pair down, reconnects and retries the statement
//! exactly once.
//!
//! Reconnects are single-flight: every handle carries a generation number and
//! a caller only rebuilds the session if the cached generation is still the
//! one that failed for it. Callers that lost the race reuse the fresh session.

use crate::db::driver::WarehouseDriver;
use crate::error::DbResult;
use crate::models::{BackendKind, Row};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Observable connector lifecycle.
///
/// `Connecting` and `Resetting` are only visible while a transition holds the
/// slot lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectorState {
    Uninitialized,
    Connecting,
    Ready { generation: u64 },
    Resetting,
}

impl ConnectorState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Connecting => write!(f, "connecting"),
            Self::Ready { generation } => write!(f, "ready (generation {})", generation),
            Self::Resetting => write!(f, "resetting"),
        }
    }
}

/// A connected client together with the session opened on it.
struct Handle<D: WarehouseDriver> {
    generation: u64,
    client: D::Client,
    session: D::Session,
}

struct Slot<D: WarehouseDriver> {
    handle: Option<Arc<Handle<D>>>,
    generations: u64,
}

const IDLE: u8 = 0;
const CONNECTING: u8 = 1;
const RESETTING: u8 = 2;

/// Marks a transition for `state()`; cleared on drop so a cancelled
/// transition does not leave a stale marker.
struct Transition<'a>(&'a AtomicU8);

impl<'a> Transition<'a> {
    fn begin(phase: &'a AtomicU8, value: u8) -> Self {
        phase.store(value, Ordering::SeqCst);
        Self(phase)
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        self.0.store(IDLE, Ordering::SeqCst);
    }
}

/// Lazily connected, self-healing session cache for one backend.
pub struct Connector<D: WarehouseDriver> {
    driver: D,
    slot: Mutex<Slot<D>>,
    phase: AtomicU8,
}

impl<D: WarehouseDriver> Connector<D> {
    /// Create an uninitialized connector. Nothing is opened until first use.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            slot: Mutex::new(Slot {
                handle: None,
                generations: 0,
            }),
            phase: AtomicU8::new(IDLE),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn kind(&self) -> BackendKind {
        self.driver.kind()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ConnectorState {
        match self.phase.load(Ordering::SeqCst) {
            CONNECTING => return ConnectorState::Connecting,
            RESETTING => return ConnectorState::Resetting,
            _ => {}
        }
        let slot = self.slot.lock().await;
        match &slot.handle {
            Some(handle) => ConnectorState::Ready {
                generation: handle.generation,
            },
            None => ConnectorState::Uninitialized,
        }
    }

    /// Connect if no session is cached.
    pub async fn ensure_ready(&self) -> DbResult<()> {
        self.ready_handle().await.map(|_| ())
    }

    /// Run a statement on the cached session.
    ///
    /// Failures that look like an expired session trigger one reconnect and
    /// one retry. Any other failure is retried once on the current session
    /// only if the failing session was replaced meanwhile, since a reset
    /// closes sessions still in use by other callers. A failed retry is
    /// returned as-is.
    pub async fn execute(&self, sql: &str) -> DbResult<Vec<Row>> {
        let handle = self.ready_handle().await?;

        match self.driver.execute(&handle.session, sql).await {
            Ok(rows) => Ok(rows),
            Err(err) if err.is_stale_session() => {
                warn!(
                    backend = %self.kind(),
                    generation = handle.generation,
                    error = %err,
                    "Session looks stale, reconnecting"
                );
                let fresh = self.recover(handle.generation).await?;
                self.driver.execute(&fresh.session, sql).await
            }
            Err(err) => {
                if !self.superseded(handle.generation).await {
                    return Err(err);
                }
                debug!(
                    backend = %self.kind(),
                    generation = handle.generation,
                    error = %err,
                    "Session was replaced while the statement ran, retrying"
                );
                let fresh = self.ready_handle().await?;
                self.driver.execute(&fresh.session, sql).await
            }
        }
    }

    /// Close the cached session and client, if any. The next statement reconnects.
    pub async fn reset(&self) {
        let mut slot = self.slot.lock().await;
        self.teardown(&mut slot).await;
    }

    /// Release backend resources on shutdown.
    pub async fn close(&self) {
        info!(backend = %self.kind(), "Closing backend connection");
        self.reset().await;
    }

    async fn ready_handle(&self) -> DbResult<Arc<Handle<D>>> {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = &slot.handle {
            return Ok(Arc::clone(handle));
        }
        self.connect(&mut slot).await
    }

    /// Whether the session of `generation` was torn down by another caller.
    async fn superseded(&self, generation: u64) -> bool {
        let slot = self.slot.lock().await;
        slot.handle
            .as_ref()
            .is_none_or(|current| current.generation != generation)
    }

    /// Replace the session that failed for the caller, unless someone already did.
    async fn recover(&self, stale_generation: u64) -> DbResult<Arc<Handle<D>>> {
        let mut slot = self.slot.lock().await;
        if let Some(current) = slot.handle.as_ref().filter(|h| h.generation != stale_generation) {
            debug!(
                stale = stale_generation,
                current = current.generation,
                "Session already replaced"
            );
            return Ok(Arc::clone(current));
        }
        self.teardown(&mut slot).await;
        self.connect(&mut slot).await
    }

    async fn connect(&self, slot: &mut Slot<D>) -> DbResult<Arc<Handle<D>>> {
        let backend = self.kind();
        let _transition = Transition::begin(&self.phase, CONNECTING);
        debug!(backend = %backend, "Opening backend connection");

        let client = self.driver.connect().await?;
        let session = match self.driver.open_session(&client).await {
            Ok(session) => session,
            Err(err) => {
                if let Err(close_err) = self.driver.close_client(&client).await {
                    debug!(error = %close_err, "Ignoring error while closing client");
                }
                return Err(err);
            }
        };

        slot.generations += 1;
        let handle = Arc::new(Handle {
            generation: slot.generations,
            client,
            session,
        });
        slot.handle = Some(Arc::clone(&handle));

        info!(backend = %backend, generation = handle.generation, "Backend session ready");
        Ok(handle)
    }

    /// Best-effort close of session then client; the slot is cleared either way.
    async fn teardown(&self, slot: &mut Slot<D>) {
        let _transition = Transition::begin(&self.phase, RESETTING);
        if let Some(handle) = &slot.handle {
            if let Err(err) = self.driver.close_session(&handle.session).await {
                debug!(error = %err, "Ignoring error while closing session");
            }
            if let Err(err) = self.driver.close_client(&handle.client).await {
                debug!(error = %err, "Ignoring error while closing client");
            }
        }
        slot.handle = None;
    }
}

impl<D: WarehouseDriver + fmt::Debug> fmt::Debug for Connector<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("driver", &self.driver)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedDriver {
        connects: AtomicUsize,
        session_opens: AtomicUsize,
        session_closes: AtomicUsize,
        client_closes: AtomicUsize,
        executes: AtomicUsize,
        fail_open_session: StdMutex<VecDeque<String>>,
        results: StdMutex<VecDeque<Result<Vec<Row>, String>>>,
    }

    impl ScriptedDriver {
        fn with_results(results: Vec<Result<Vec<Row>, String>>) -> Self {
            Self {
                results: StdMutex::new(results.into()),
                ..Default::default()
            }
        }
    }

    fn row(n: i64) -> Row {
        let mut row = Row::new();
        row.insert("n".to_string(), n.into());
        row
    }

    impl WarehouseDriver for ScriptedDriver {
        type Client = u64;
        type Session = u64;

        fn kind(&self) -> BackendKind {
            BackendKind::Warehouse
        }

        async fn connect(&self) -> DbResult<u64> {
            Ok(self.connects.fetch_add(1, Ordering::SeqCst) as u64 + 1)
        }

        async fn open_session(&self, client: &u64) -> DbResult<u64> {
            self.session_opens.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = self.fail_open_session.lock().unwrap().pop_front() {
                return Err(DbError::connection(message, "retry"));
            }
            Ok(*client)
        }

        async fn execute(&self, _session: &u64, _sql: &str) -> DbResult<Vec<Row>> {
            self.executes.fetch_add(1, Ordering::SeqCst);
            match self.results.lock().unwrap().pop_front() {
                Some(Ok(rows)) => Ok(rows),
                Some(Err(message)) => Err(DbError::execution(message, None)),
                None => Ok(vec![row(1)]),
            }
        }

        async fn close_session(&self, _session: &u64) -> DbResult<()> {
            self.session_closes.fetch_add(1, Ordering::SeqCst);
            Err(DbError::execution("session already gone", None))
        }

        async fn close_client(&self, _client: &u64) -> DbResult<()> {
            self.client_closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_connects_lazily_and_reuses_session() {
        let connector = Connector::new(ScriptedDriver::default());
        assert_eq!(connector.state().await, ConnectorState::Uninitialized);

        connector.execute("select 1").await.unwrap();
        connector.execute("select 1").await.unwrap();

        assert_eq!(connector.driver().connects.load(Ordering::SeqCst), 1);
        assert_eq!(
            connector.state().await,
            ConnectorState::Ready { generation: 1 }
        );
    }

    #[tokio::test]
    async fn test_stale_session_reconnects_and_retries_once() {
        let driver = ScriptedDriver::with_results(vec![
            Err("Request failed with status code 400".to_string()),
            Ok(vec![row(7)]),
        ]);
        let connector = Connector::new(driver);

        let rows = connector.execute("select 1").await.unwrap();
        assert_eq!(rows, vec![row(7)]);

        let driver = connector.driver();
        assert_eq!(driver.connects.load(Ordering::SeqCst), 2);
        assert_eq!(driver.executes.load(Ordering::SeqCst), 2);
        // Close errors are swallowed
        assert_eq!(driver.session_closes.load(Ordering::SeqCst), 1);
        assert_eq!(driver.client_closes.load(Ordering::SeqCst), 1);
        assert_eq!(
            connector.state().await,
            ConnectorState::Ready { generation: 2 }
        );
    }

    #[tokio::test]
    async fn test_other_errors_do_not_reconnect() {
        let driver = ScriptedDriver::with_results(vec![Err("permission denied".to_string())]);
        let connector = Connector::new(driver);

        let err = connector.execute("select 1").await.unwrap_err();
        assert_eq!(err.to_string(), "permission denied");
        assert_eq!(connector.driver().connects.load(Ordering::SeqCst), 1);
        assert_eq!(connector.driver().executes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_retry_propagates_without_second_retry() {
        let driver = ScriptedDriver::with_results(vec![
            Err("Invalid SessionHandle".to_string()),
            Err("Invalid SessionHandle".to_string()),
        ]);
        let connector = Connector::new(driver);

        let err = connector.execute("select 1").await.unwrap_err();
        assert!(err.to_string().contains("SessionHandle"));
        assert_eq!(connector.driver().executes.load(Ordering::SeqCst), 2);
        assert_eq!(connector.driver().connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_session_failure_closes_client_and_stays_uninitialized() {
        let driver = ScriptedDriver::default();
        driver
            .fail_open_session
            .lock()
            .unwrap()
            .push_back("warehouse is starting".to_string());
        let connector = Connector::new(driver);

        assert!(connector.ensure_ready().await.is_err());
        assert_eq!(connector.state().await, ConnectorState::Uninitialized);
        assert_eq!(connector.driver().client_closes.load(Ordering::SeqCst), 1);

        // Next call connects from scratch
        connector.ensure_ready().await.unwrap();
        assert_eq!(
            connector.state().await,
            ConnectorState::Ready { generation: 1 }
        );
    }

    #[tokio::test]
    async fn test_recover_reuses_newer_generation() {
        let connector = Connector::new(ScriptedDriver::default());
        connector.ensure_ready().await.unwrap();

        let first = connector.recover(1).await.unwrap();
        assert_eq!(first.generation, 2);

        // A caller still holding generation 1 gets the new session
        let second = connector.recover(1).await.unwrap();
        assert_eq!(second.generation, 2);
        assert_eq!(connector.driver().connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reset_and_close() {
        let connector = Connector::new(ScriptedDriver::default());
        connector.ensure_ready().await.unwrap();
        connector.reset().await;
        assert_eq!(connector.state().await, ConnectorState::Uninitialized);

        connector.execute("select 1").await.unwrap();
        connector.close().await;
        assert!(!connector.state().await.is_ready());
        assert_eq!(connector.driver().client_closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_value(ConnectorState::Ready { generation: 3 }).unwrap();
        assert_eq!(json["state"], "ready");
        assert_eq!(json["generation"], 3);
        let json = serde_json::to_value(ConnectorState::Uninitialized).unwrap();
        assert_eq!(json["state"], "uninitialized");
    }
}
