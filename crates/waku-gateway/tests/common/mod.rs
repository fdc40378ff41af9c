//! Scripted protocol collaborator shared by the gateway test suites.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use waku_core::media::MediaKind;
use waku_core::protocol::{ClientFactory, EventSender, ProtocolClient, ProtocolEvent};
use waku_core::session::CREDENTIAL_STORE_FILE;
use waku_core::types::{
    Contact, GroupSummary, Jid, MediaMessage, SendReceipt, UploadedMedia,
};
use waku_gateway::{SessionRegistry, WebhookDispatcher};

/// Opens [`FakeClient`]s and keeps them reachable for event injection.
#[derive(Default)]
pub struct FakeFactory {
    clients: Mutex<HashMap<String, Arc<FakeClient>>>,
    /// Devices already authenticated when opened, with their phone identity.
    logged_in: Mutex<HashMap<String, String>>,
    /// Devices whose `connect` fails.
    failing: Mutex<HashSet<String>>,
    /// Devices the factory refuses to open.
    unopenable: Mutex<HashSet<String>>,
    /// Make `disconnect` never return.
    pub hang_disconnect: AtomicBool,
    /// Delay every `disconnect` by this many milliseconds.
    pub disconnect_delay_ms: AtomicU64,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_logged_in(&self, device_id: &str, phone: &str) {
        self.logged_in
            .lock()
            .unwrap()
            .insert(device_id.to_string(), phone.to_string());
    }

    pub fn fail_connect(&self, device_id: &str) {
        self.failing.lock().unwrap().insert(device_id.to_string());
    }

    pub fn fail_open(&self, device_id: &str) {
        self.unopenable.lock().unwrap().insert(device_id.to_string());
    }

    /// Most recently opened client for a device.
    pub fn client(&self, device_id: &str) -> Arc<FakeClient> {
        self.clients
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| panic!("no client opened for {device_id}"))
    }
}

impl ClientFactory for FakeFactory {
    fn open(
        &self,
        device_id: &str,
        store_path: &Path,
        events: EventSender,
    ) -> anyhow::Result<Arc<dyn ProtocolClient>> {
        if self.unopenable.lock().unwrap().contains(device_id) {
            anyhow::bail!("cannot open {device_id}");
        }
        let identity = self.logged_in.lock().unwrap().get(device_id).cloned();
        let client = Arc::new(FakeClient {
            store_path: store_path.to_path_buf(),
            events,
            logged_in: AtomicBool::new(identity.is_some()),
            identity: Mutex::new(identity),
            fail_connect: self.failing.lock().unwrap().contains(device_id),
            hang_disconnect: self.hang_disconnect.load(Ordering::SeqCst),
            disconnect_delay: Duration::from_millis(self.disconnect_delay_ms.load(Ordering::SeqCst)),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            media: Mutex::new(Vec::new()),
        });
        self.clients
            .lock()
            .unwrap()
            .insert(device_id.to_string(), client.clone());
        Ok(client)
    }
}

pub struct FakeClient {
    pub store_path: PathBuf,
    events: EventSender,
    logged_in: AtomicBool,
    identity: Mutex<Option<String>>,
    fail_connect: bool,
    hang_disconnect: bool,
    disconnect_delay: Duration,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    /// (recipient, body) of every text sent.
    pub sent: Mutex<Vec<(String, String)>>,
    pub media: Mutex<Vec<(String, MediaMessage, u64)>>,
}

impl FakeClient {
    /// Push an event as the protocol connection would.
    pub fn emit(&self, event: ProtocolEvent) {
        if let ProtocolEvent::ConnectionEstablished { identity: Some(id) } = &event {
            *self.identity.lock().unwrap() = Some(id.clone());
            self.logged_in.store(true, Ordering::SeqCst);
        }
        self.events.send(event).expect("router is running");
    }

    /// Write the credential store the way a successful pairing would.
    pub fn persist_credentials(&self) {
        std::fs::write(self.store_path.join(CREDENTIAL_STORE_FILE), b"creds").unwrap();
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    async fn connect(&self) -> anyhow::Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            anyhow::bail!("bridge unreachable");
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if self.hang_disconnect {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.disconnect_delay).await;
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.logged_in.store(false, Ordering::SeqCst);
    }

    async fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    fn identity(&self) -> Option<String> {
        self.identity.lock().unwrap().clone()
    }

    fn has_credentials(&self) -> bool {
        self.store_path.join(CREDENTIAL_STORE_FILE).is_file()
    }

    async fn send_text(&self, recipient: &Jid, body: &str) -> anyhow::Result<SendReceipt> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((recipient.to_string(), body.to_string()));
        Ok(SendReceipt {
            message_id: format!("MSG{}", sent.len()),
            timestamp: 1_700_000_000,
        })
    }

    async fn upload_media(&self, data: Vec<u8>, _kind: MediaKind) -> anyhow::Result<UploadedMedia> {
        Ok(UploadedMedia {
            handle: "upload-1".into(),
            url: Some("https://mmg.example/upload-1".into()),
            file_length: data.len() as u64,
        })
    }

    async fn send_media(
        &self,
        recipient: &Jid,
        upload: &UploadedMedia,
        message: &MediaMessage,
    ) -> anyhow::Result<SendReceipt> {
        self.media.lock().unwrap().push((
            recipient.to_string(),
            message.clone(),
            upload.file_length,
        ));
        Ok(SendReceipt {
            message_id: "MEDIA1".into(),
            timestamp: 1_700_000_000,
        })
    }

    async fn contacts(&self) -> anyhow::Result<Vec<Contact>> {
        Ok(vec![Contact {
            jid: "628111222333@s.whatsapp.net".into(),
            name: "Sari".into(),
            notify: "Sari".into(),
            is_business: false,
        }])
    }

    async fn groups(&self) -> anyhow::Result<Vec<GroupSummary>> {
        Ok(vec![GroupSummary {
            jid: "120363025246125486@g.us".into(),
            name: "Warung".into(),
            participants: 12,
            is_admin: true,
        }])
    }
}

pub fn registry(root: &Path, factory: Arc<FakeFactory>) -> Arc<SessionRegistry> {
    registry_with(root, factory, Arc::new(WebhookDispatcher::disabled()))
}

pub fn registry_with(
    root: &Path,
    factory: Arc<FakeFactory>,
    dispatcher: Arc<WebhookDispatcher>,
) -> Arc<SessionRegistry> {
    Arc::new(SessionRegistry::new(root, 5, factory, dispatcher))
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_for<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
