//! Boundary to the messaging-protocol collaborator.
//!
//! Pairing, encryption, wire framing and contact/group sync live behind
//! [`ProtocolClient`]. Each client reports what happens on its connection by
//! pushing [`ProtocolEvent`]s into the [`EventSender`] it was opened with.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::media::MediaKind;
use crate::types::{
    Contact, GroupSummary, InboundMessage, Jid, MediaMessage, SendReceipt, UploadedMedia,
};

/// Events emitted by a protocol connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// A fresh batch of pairing codes, oldest first.
    PairingCodes { codes: Vec<String> },
    /// The phone accepted the pairing request.
    AuthSuccess {
        #[serde(default)]
        identity: Option<String>,
    },
    /// The connection is up and authenticated.
    ConnectionEstablished {
        #[serde(default)]
        identity: Option<String>,
    },
    /// The link to the network dropped.
    ConnectionLost {
        #[serde(default)]
        reason: Option<String>,
    },
    InboundMessage(InboundMessage),
}

/// Receiver for protocol events of one connection.
pub type EventReceiver = mpsc::UnboundedReceiver<ProtocolEvent>;

/// Sender for protocol events (used by client implementations).
pub type EventSender = mpsc::UnboundedSender<ProtocolEvent>;

/// One connection to the messaging network.
#[async_trait]
pub trait ProtocolClient: Send + Sync + 'static {
    /// Open the connection. Pairs by code when no credentials are stored,
    /// otherwise resumes with the stored credentials.
    async fn connect(&self) -> anyhow::Result<()>;

    /// Close the connection. Stored credentials are left untouched.
    async fn disconnect(&self);

    /// Whether the connection is currently authenticated.
    async fn is_logged_in(&self) -> bool;

    /// Authenticated phone identity, if known.
    fn identity(&self) -> Option<String>;

    /// Whether a credential store exists for this device.
    fn has_credentials(&self) -> bool;

    async fn send_text(&self, recipient: &Jid, body: &str) -> anyhow::Result<SendReceipt>;

    async fn upload_media(&self, data: Vec<u8>, kind: MediaKind) -> anyhow::Result<UploadedMedia>;

    async fn send_media(
        &self,
        recipient: &Jid,
        upload: &UploadedMedia,
        message: &MediaMessage,
    ) -> anyhow::Result<SendReceipt>;

    async fn contacts(&self) -> anyhow::Result<Vec<Contact>>;

    async fn groups(&self) -> anyhow::Result<Vec<GroupSummary>>;
}

/// Creates protocol clients bound to a device's credential store.
pub trait ClientFactory: Send + Sync + 'static {
    fn open(
        &self,
        device_id: &str,
        store_path: &Path,
        events: EventSender,
    ) -> anyhow::Result<Arc<dyn ProtocolClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event: ProtocolEvent = serde_json::from_value(serde_json::json!({
            "type": "pairing_codes",
            "codes": ["2@abc", "2@def"],
        }))
        .unwrap();
        assert!(matches!(event, ProtocolEvent::PairingCodes { ref codes } if codes.len() == 2));

        let event: ProtocolEvent =
            serde_json::from_value(serde_json::json!({ "type": "connection_lost" })).unwrap();
        assert!(matches!(event, ProtocolEvent::ConnectionLost { reason: None }));
    }

    #[test]
    fn test_inbound_message_event() {
        let event: ProtocolEvent = serde_json::from_value(serde_json::json!({
            "type": "inbound_message",
            "id": "3EB0C767D26A",
            "chat": "628111222333@s.whatsapp.net",
            "sender": "628111222333@s.whatsapp.net",
            "push_name": "Sari",
            "timestamp": 1_700_000_000,
            "content": { "conversation": "halo" }
        }))
        .unwrap();
        match event {
            ProtocolEvent::InboundMessage(msg) => {
                assert_eq!(msg.push_name, "Sari");
                assert!(!msg.is_from_me);
                assert_eq!(msg.timestamp.timestamp(), 1_700_000_000);
                assert_eq!(msg.content.conversation.as_deref(), Some("halo"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
