//! Session registry: the table of live sessions and their lifecycle.
//!
//! Lookups share a read lock; create, delete and rehydration take the write
//! lock so the table is never observed mid-mutation. Per-session state is
//! written by the session's event router and read freely through `Arc<Session>`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use waku_core::error::{Result, WakuError};
use waku_core::protocol::ClientFactory;
use waku_core::session::{Session, CREDENTIAL_STORE_FILE};

use crate::router::start_session_router;
use crate::webhook::WebhookDispatcher;

struct Entry {
    session: Arc<Session>,
    router: JoinHandle<()>,
}

pub struct SessionRegistry {
    root: PathBuf,
    pairing_capacity: usize,
    factory: Arc<dyn ClientFactory>,
    dispatcher: Arc<WebhookDispatcher>,
    sessions: RwLock<HashMap<String, Entry>>,
}

impl SessionRegistry {
    pub fn new(
        root: impl Into<PathBuf>,
        pairing_capacity: usize,
        factory: Arc<dyn ClientFactory>,
        dispatcher: Arc<WebhookDispatcher>,
    ) -> Self {
        Self {
            root: root.into(),
            pairing_capacity,
            factory,
            dispatcher,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn store_dir(&self, device_id: &str) -> PathBuf {
        self.root.join(device_id)
    }

    /// Provision storage, open a client and start the session's router.
    async fn open_entry(&self, device_id: &str) -> Result<Entry> {
        let store_dir = self.store_dir(device_id);
        let existed = tokio::fs::try_exists(&store_dir).await.unwrap_or(false);
        tokio::fs::create_dir_all(&store_dir).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = match self.factory.open(device_id, &store_dir, events_tx) {
            Ok(client) => client,
            Err(e) => {
                if !existed {
                    if let Err(cleanup) = tokio::fs::remove_dir_all(&store_dir).await {
                        warn!(%device_id, %cleanup, "Failed to remove unused session directory");
                    }
                }
                return Err(WakuError::upstream("open session", e));
            }
        };

        let session = Arc::new(Session::new(
            device_id,
            store_dir,
            client,
            self.pairing_capacity,
        ));
        let router = start_session_router(session.clone(), events_rx, self.dispatcher.clone());
        Ok(Entry { session, router })
    }

    /// Register a new session in `AwaitingPairing` and start connecting in
    /// the background. Fails with `AlreadyExists` without touching the
    /// existing session.
    pub async fn create(&self, device_id: &str) -> Result<Arc<Session>> {
        validate_device_id(device_id)?;

        let session = {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(device_id) {
                return Err(WakuError::AlreadyExists(device_id.to_string()));
            }
            let entry = self.open_entry(device_id).await?;
            let session = entry.session.clone();
            sessions.insert(device_id.to_string(), entry);

            #[cfg(feature = "metrics")]
            crate::metrics::record_sessions(sessions.len());

            session
        };

        let resume = session.client().has_credentials();
        let connecting = session.clone();
        tokio::spawn(async move {
            let device_id = connecting.device_id();
            match connecting.client().connect().await {
                Ok(()) if resume => info!(%device_id, "Reconnect initiated"),
                Ok(()) => info!(%device_id, "Pairing connection initiated"),
                Err(e) => error!(%device_id, error = %format!("{e:#}"), "Failed to connect"),
            }
        });

        info!(%device_id, resume, "Session created");
        Ok(session)
    }

    pub async fn get(&self, device_id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(device_id)
            .map(|e| e.session.clone())
            .ok_or_else(|| WakuError::NotFound(device_id.to_string()))
    }

    /// Snapshot of all sessions, ordered by device id.
    pub async fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .map(|e| e.session.clone())
            .collect();
        sessions.sort_by(|a, b| a.device_id().cmp(b.device_id()));
        sessions
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Disconnect but keep credentials, so the device reconnects without pairing.
    pub async fn logout(&self, device_id: &str) -> Result<()> {
        let session = self.get(device_id).await?;
        session.client().disconnect().await;
        session.mark_disconnected();
        info!(%device_id, "Session logged out");
        Ok(())
    }

    /// Disconnect, forget the session and destroy its credential store.
    ///
    /// The write lock is held until the store is gone, so a `create` for the
    /// same id waits for the delete instead of losing its fresh store to it.
    pub async fn delete(&self, device_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .remove(device_id)
            .ok_or_else(|| WakuError::NotFound(device_id.to_string()))?;

        #[cfg(feature = "metrics")]
        crate::metrics::record_sessions(sessions.len());

        entry.session.client().disconnect().await;
        entry.session.mark_disconnected();
        entry.router.abort();

        match tokio::fs::remove_dir_all(entry.session.store_dir()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(%device_id, %e, "Failed to delete session directory");
                return Err(e.into());
            }
        }
        drop(sessions);

        info!(%device_id, "Session deleted");
        Ok(())
    }

    /// Rehydrate sessions from the session directory. Startup only.
    ///
    /// Directories without a credential store are skipped, and a device that
    /// fails to load never stops the others. Returns how many were loaded.
    pub async fn load_persisted(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(root = %self.root.display(), "Session directory does not exist, skipping session loading");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let mut loaded = 0;
        while let Some(dir) = entries.next_entry().await? {
            if !dir.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let Some(device_id) = dir.file_name().to_str().map(str::to_string) else {
                warn!(path = %dir.path().display(), "Skipping non UTF-8 session directory");
                continue;
            };

            if !dir.path().join(CREDENTIAL_STORE_FILE).is_file() {
                warn!(%device_id, "Session database not found, skipping");
                continue;
            }

            match self.restore(&device_id).await {
                Ok(_) => loaded += 1,
                Err(e) => error!(%device_id, %e, "Failed to load session"),
            }
        }

        if loaded > 0 {
            info!(count = loaded, "Loaded existing sessions");
        } else {
            info!("No existing sessions found");
        }
        Ok(loaded)
    }

    async fn restore(&self, device_id: &str) -> Result<Arc<Session>> {
        validate_device_id(device_id)?;
        if self.sessions.read().await.contains_key(device_id) {
            return Err(WakuError::AlreadyExists(device_id.to_string()));
        }

        let entry = self.open_entry(device_id).await?;
        let session = entry.session.clone();

        if let Err(e) = session.client().connect().await {
            entry.router.abort();
            return Err(WakuError::upstream("connect", e));
        }

        if session.client().is_logged_in().await {
            session.mark_connected(session.client().identity());
            info!(%device_id, phone = ?session.status().phone, "Device already logged in");
        } else {
            info!(%device_id, "Device loaded but not logged in, waiting for pairing");
        }

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(device_id) {
            entry.router.abort();
            return Err(WakuError::AlreadyExists(device_id.to_string()));
        }
        sessions.insert(device_id.to_string(), entry);

        #[cfg(feature = "metrics")]
        crate::metrics::record_sessions(sessions.len());

        Ok(session)
    }

    /// Best-effort disconnect of every session within `deadline`, then tear
    /// the table down. Returns false when the deadline cut it short.
    pub async fn shutdown(&self, deadline: Duration) -> bool {
        let entries: Vec<Entry> = self.sessions.write().await.drain().map(|(_, e)| e).collect();
        if entries.is_empty() {
            return true;
        }

        info!(count = entries.len(), "Disconnecting sessions");
        let disconnects = entries.iter().map(|entry| async move {
            entry.session.client().disconnect().await;
            entry.session.mark_disconnected();
        });

        let completed = tokio::time::timeout(deadline, futures::future::join_all(disconnects))
            .await
            .is_ok();
        if !completed {
            warn!(?deadline, "Shutdown deadline reached, abandoning remaining sessions");
        }

        for entry in &entries {
            entry.router.abort();
        }
        completed
    }
}

/// A device id names a directory under the session root.
fn validate_device_id(device_id: &str) -> Result<()> {
    let valid = !device_id.is_empty()
        && device_id != "."
        && device_id != ".."
        && !device_id.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(WakuError::InvalidDeviceId(device_id.to_string()))
    }
}
