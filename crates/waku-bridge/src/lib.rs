//! Protocol client backed by an external multi-device bridge over REST.
//!
//! The bridge owns pairing, encryption and the wire protocol. This crate
//! drives it per device and polls its event feed onto the session's event
//! channel.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use waku_core::media::MediaKind;
use waku_core::protocol::{ClientFactory, EventSender, ProtocolClient, ProtocolEvent};
use waku_core::session::CREDENTIAL_STORE_FILE;
use waku_core::types::{
    Contact, GroupSummary, Jid, MediaMessage, SendReceipt, UploadedMedia,
};

/// Login state reported by `GET /v1/devices/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub identity: Option<String>,
}

/// Opens [`BridgeClient`]s against one bridge endpoint.
pub struct BridgeClientFactory {
    api_url: String,
    poll_interval: Duration,
    http: reqwest::Client,
}

impl BridgeClientFactory {
    pub fn new(
        api_url: impl Into<String>,
        poll_interval: Duration,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build bridge HTTP client")?;
        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            poll_interval,
            http,
        })
    }
}

impl ClientFactory for BridgeClientFactory {
    fn open(
        &self,
        device_id: &str,
        store_path: &Path,
        events: EventSender,
    ) -> anyhow::Result<Arc<dyn ProtocolClient>> {
        if device_id.is_empty() {
            anyhow::bail!("device id must not be empty");
        }
        Ok(Arc::new(BridgeClient {
            device_url: format!("{}/v1/devices/{device_id}", self.api_url),
            device_id: device_id.to_string(),
            store_path: store_path.to_path_buf(),
            poll_interval: self.poll_interval,
            http: self.http.clone(),
            events,
            identity: Arc::new(RwLock::new(None)),
            poller: Mutex::new(None),
        }))
    }
}

/// One device connection, proxied through the bridge.
pub struct BridgeClient {
    device_id: String,
    device_url: String,
    store_path: PathBuf,
    poll_interval: Duration,
    http: reqwest::Client,
    events: EventSender,
    identity: Arc<RwLock<Option<String>>>,
    poller: Mutex<Option<oneshot::Sender<()>>>,
}

impl BridgeClient {
    fn credential_store(&self) -> PathBuf {
        self.store_path.join(CREDENTIAL_STORE_FILE)
    }

    fn set_identity(&self, identity: Option<String>) {
        if identity.is_some() {
            *self.identity.write().unwrap_or_else(PoisonError::into_inner) = identity;
        }
    }

    /// Start polling the bridge's event feed unless a poller is already running.
    fn start_poller(&self) {
        let mut slot = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *slot = Some(shutdown_tx);

        let poller = EventPoller {
            device_id: self.device_id.clone(),
            url: format!("{}/events", self.device_url),
            interval: self.poll_interval,
            http: self.http.clone(),
            events: self.events.clone(),
            identity: self.identity.clone(),
        };
        tokio::spawn(poller.run(shutdown_rx));
    }

    fn stop_poller(&self) {
        let tx = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, op: &str) -> anyhow::Result<T> {
        let resp = self
            .http
            .get(format!("{}{path}", self.device_url))
            .send()
            .await
            .with_context(|| format!("bridge {op} request failed"))?;
        read_json(resp, op).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        op: &str,
    ) -> anyhow::Result<T> {
        let resp = self
            .http
            .post(format!("{}{path}", self.device_url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("bridge {op} request failed"))?;
        read_json(resp, op).await
    }
}

/// Decode a 2xx JSON body; any other status becomes an error carrying the body.
async fn read_json<T: DeserializeOwned>(resp: reqwest::Response, op: &str) -> anyhow::Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("bridge {op} returned {status}: {body}");
    }
    resp.json::<T>()
        .await
        .with_context(|| format!("bridge {op} returned malformed JSON"))
}

async fn expect_success(resp: reqwest::Response, op: &str) -> anyhow::Result<()> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("bridge {op} returned {status}: {body}");
    }
    Ok(())
}

#[async_trait]
impl ProtocolClient for BridgeClient {
    async fn connect(&self) -> anyhow::Result<()> {
        let resume = self.has_credentials();
        let store = self.credential_store();
        let resp = self
            .http
            .post(format!("{}/connect", self.device_url))
            .json(&serde_json::json!({
                "store_path": store.to_string_lossy(),
                "resume": resume,
            }))
            .send()
            .await
            .context("bridge connect request failed")?;
        expect_success(resp, "connect").await?;

        info!(device_id = %self.device_id, resume, "Bridge connection requested");
        self.start_poller();
        Ok(())
    }

    async fn disconnect(&self) {
        self.stop_poller();
        let result = self
            .http
            .post(format!("{}/disconnect", self.device_url))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(device_id = %self.device_id, "Bridge disconnected");
            }
            Ok(resp) => {
                warn!(device_id = %self.device_id, status = %resp.status(), "Bridge disconnect non-success");
            }
            Err(e) => {
                warn!(device_id = %self.device_id, %e, "Bridge disconnect error");
            }
        }
    }

    async fn is_logged_in(&self) -> bool {
        match self.get_json::<DeviceInfo>("", "device info").await {
            Ok(info) => {
                self.set_identity(info.identity);
                info.logged_in
            }
            Err(e) => {
                debug!(device_id = %self.device_id, error = %format!("{e:#}"), "Login check failed");
                false
            }
        }
    }

    fn identity(&self) -> Option<String> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn has_credentials(&self) -> bool {
        self.credential_store().is_file()
    }

    async fn send_text(&self, recipient: &Jid, body: &str) -> anyhow::Result<SendReceipt> {
        self.post_json(
            "/messages",
            &serde_json::json!({ "to": recipient, "text": body }),
            "send message",
        )
        .await
    }

    async fn upload_media(&self, data: Vec<u8>, kind: MediaKind) -> anyhow::Result<UploadedMedia> {
        let resp = self
            .http
            .post(format!("{}/uploads?kind={kind}", self.device_url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .context("bridge upload request failed")?;
        read_json(resp, "upload").await
    }

    async fn send_media(
        &self,
        recipient: &Jid,
        upload: &UploadedMedia,
        message: &MediaMessage,
    ) -> anyhow::Result<SendReceipt> {
        self.post_json(
            "/media-messages",
            &serde_json::json!({
                "to": recipient,
                "upload": upload,
                "message": message,
            }),
            "send media",
        )
        .await
    }

    async fn contacts(&self) -> anyhow::Result<Vec<Contact>> {
        self.get_json("/contacts", "contacts").await
    }

    async fn groups(&self) -> anyhow::Result<Vec<GroupSummary>> {
        self.get_json("/groups", "groups").await
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.stop_poller();
    }
}

/// Background loop forwarding the bridge's event feed for one device.
struct EventPoller {
    device_id: String,
    url: String,
    interval: Duration,
    http: reqwest::Client,
    events: EventSender,
    identity: Arc<RwLock<Option<String>>>,
}

impl EventPoller {
    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) {
        debug!(device_id = %self.device_id, "Bridge event poller started, polling every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!(device_id = %self.device_id, "Bridge event poller stopped");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    match self.http.get(&self.url).send().await {
                        Ok(resp) if resp.status().is_success() => {
                            match resp.json::<Vec<ProtocolEvent>>().await {
                                Ok(events) => {
                                    if !self.forward(events) {
                                        debug!(device_id = %self.device_id, "Event channel closed, poller exiting");
                                        break;
                                    }
                                }
                                Err(e) => warn!(device_id = %self.device_id, %e, "Malformed bridge events"),
                            }
                        }
                        Ok(resp) => {
                            warn!(device_id = %self.device_id, status = %resp.status(), "Bridge poll non-success");
                        }
                        Err(e) => {
                            warn!(device_id = %self.device_id, %e, "Bridge poll error");
                        }
                    }
                }
            }
        }
    }

    /// Returns false once the receiving side is gone.
    fn forward(&self, events: Vec<ProtocolEvent>) -> bool {
        for event in events {
            if let ProtocolEvent::AuthSuccess { identity: Some(id) }
            | ProtocolEvent::ConnectionEstablished { identity: Some(id) } = &event
            {
                *self.identity.write().unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
            }
            if self.events.send(event).is_err() {
                return false;
            }
        }
        true
    }
}
