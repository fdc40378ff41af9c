//! Session model: per-device state and the handle to its protocol connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, WakuError};
use crate::media::{self, MediaKind};
use crate::pairing::{PairingRelay, PairingTimeouts, RelayWait};
use crate::protocol::ProtocolClient;
use crate::types::{Contact, GroupSummary, Jid, MediaMessage, MediaReceipt, SendReceipt};

/// File inside a device directory holding the collaborator's credentials.
pub const CREDENTIAL_STORE_FILE: &str = "session.db";

/// Connection lifecycle of a session.
///
/// `AwaitingPairing` is initial. `Connected` and `Disconnected` cycle through
/// reconnects; deletion removes the session instead of transitioning it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    AwaitingPairing,
    Connected,
    Disconnected,
}

impl SessionState {
    /// Status label exposed over HTTP.
    pub fn label(self) -> &'static str {
        match self {
            Self::AwaitingPairing => "waiting_for_qr_scan",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Observable state of a session. `phone` and `connected_at` are written
/// together on every transition into `Connected`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub phone: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
}

/// Result of polling a session for a pairing code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingPoll {
    Code(String),
    Connected { phone: Option<String> },
    TimedOut,
}

/// One device: its connection handle, status, and pending pairing codes.
pub struct Session {
    device_id: String,
    store_dir: PathBuf,
    client: Arc<dyn ProtocolClient>,
    status: watch::Sender<SessionStatus>,
    pairing: PairingRelay,
}

impl Session {
    pub fn new(
        device_id: impl Into<String>,
        store_dir: PathBuf,
        client: Arc<dyn ProtocolClient>,
        pairing_capacity: usize,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        Self {
            device_id: device_id.into(),
            store_dir,
            client,
            status,
            pairing: PairingRelay::new(pairing_capacity),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Directory holding this device's credential store.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.client
    }

    pub fn pairing(&self) -> &PairingRelay {
        &self.pairing
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Watch status transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Transition into `Connected`. A missing identity keeps the last known one.
    pub fn mark_connected(&self, identity: Option<String>) {
        let now = Utc::now();
        self.status.send_modify(|s| {
            s.state = SessionState::Connected;
            if identity.is_some() {
                s.phone = identity;
            }
            s.connected_at = Some(now);
        });
        debug!(device_id = %self.device_id, "Session connected");
    }

    /// Link loss. Only a connected session becomes `Disconnected`; the last
    /// known identity and connect time are kept for the next reconnect.
    pub fn mark_connection_lost(&self) -> bool {
        self.status.send_if_modified(|s| {
            if s.state == SessionState::Connected {
                s.state = SessionState::Disconnected;
                true
            } else {
                false
            }
        })
    }

    /// Explicit logout or shutdown: `Disconnected` from any state.
    pub fn mark_disconnected(&self) {
        self.status.send_if_modified(|s| {
            let changed = s.state != SessionState::Disconnected;
            s.state = SessionState::Disconnected;
            changed
        });
    }

    /// Wait for a pairing code.
    ///
    /// Connected sessions answer immediately. Otherwise the first wait applies;
    /// when it passes without a code, devices that already hold credentials are
    /// reported as connected and the rest get the extended wait.
    pub async fn poll_pairing_code(&self, timeouts: PairingTimeouts) -> PairingPoll {
        let current = self.status();
        if current.state == SessionState::Connected {
            return PairingPoll::Connected {
                phone: current.phone,
            };
        }

        let mut status_rx = self.subscribe();
        let start = Instant::now();

        match self
            .pairing
            .wait(start + timeouts.initial, &mut status_rx)
            .await
        {
            RelayWait::Code(code) => return PairingPoll::Code(code),
            RelayWait::Connected => return self.connected_poll(),
            RelayWait::Elapsed => {}
        }

        if self.client.has_credentials() {
            return self.connected_poll();
        }

        match self
            .pairing
            .wait(start + timeouts.initial + timeouts.extended, &mut status_rx)
            .await
        {
            RelayWait::Code(code) => PairingPoll::Code(code),
            RelayWait::Connected => self.connected_poll(),
            RelayWait::Elapsed if self.client.has_credentials() => self.connected_poll(),
            RelayWait::Elapsed => PairingPoll::TimedOut,
        }
    }

    fn connected_poll(&self) -> PairingPoll {
        PairingPoll::Connected {
            phone: self.status().phone.or_else(|| self.client.identity()),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(WakuError::NotConnected(self.device_id.clone()))
        }
    }

    pub async fn send_text(&self, recipient: &Jid, body: &str) -> Result<SendReceipt> {
        self.ensure_connected()?;
        self.client
            .send_text(recipient, body)
            .await
            .map_err(|e| WakuError::upstream("send message", e))
    }

    /// Upload a file and send it as the media kind its name implies.
    pub async fn send_media(
        &self,
        recipient: &Jid,
        file_name: &str,
        data: Vec<u8>,
        caption: Option<String>,
    ) -> Result<MediaReceipt> {
        let kind = MediaKind::from_file_name(file_name);
        let file_size = data.len() as u64;
        kind.check_size(file_size)?;
        self.ensure_connected()?;

        let upload = self
            .client
            .upload_media(data, kind)
            .await
            .map_err(|e| WakuError::upstream("upload media", e))?;

        let message = MediaMessage {
            kind,
            mime_type: media::mime_type(file_name),
            // Audio messages carry no caption.
            caption: caption.filter(|_| kind != MediaKind::Audio),
            file_name: (kind == MediaKind::Document).then(|| file_name.to_string()),
        };

        let receipt = self
            .client
            .send_media(recipient, &upload, &message)
            .await
            .map_err(|e| WakuError::upstream("send media", e))?;

        Ok(MediaReceipt {
            message_id: receipt.message_id,
            media_type: kind,
            file_size,
        })
    }

    pub async fn contacts(&self) -> Result<Vec<Contact>> {
        self.ensure_connected()?;
        self.client
            .contacts()
            .await
            .map_err(|e| WakuError::upstream("get contacts", e))
    }

    pub async fn groups(&self) -> Result<Vec<GroupSummary>> {
        self.ensure_connected()?;
        self.client
            .groups()
            .await
            .map_err(|e| WakuError::upstream("get groups", e))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device_id", &self.device_id)
            .field("store_dir", &self.store_dir)
            .field("status", &*self.status.borrow())
            .finish()
    }
}
