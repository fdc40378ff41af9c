//! Routes protocol events of one session onto its state and the webhook.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use waku_core::protocol::{EventReceiver, ProtocolEvent};
use waku_core::session::Session;
use waku_core::types::{InboundMessage, WebhookNotification};

use crate::webhook::WebhookDispatcher;

/// Display name used for messages sent from the paired device itself.
const SELF_DISPLAY_NAME: &str = "Me";

/// Drain a session's event channel until every sender is gone.
///
/// One task per session keeps callbacks of a connection in order.
pub fn start_session_router(
    session: Arc<Session>,
    mut events: EventReceiver,
    dispatcher: Arc<WebhookDispatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(device_id = %session.device_id(), "Event router started");

        while let Some(event) = events.recv().await {
            handle_event(&session, &dispatcher, event);
        }

        debug!(device_id = %session.device_id(), "Event router stopped");
    })
}

/// Apply one event. Never waits on webhook delivery.
pub fn handle_event(session: &Session, dispatcher: &Arc<WebhookDispatcher>, event: ProtocolEvent) {
    let device_id = session.device_id();
    match event {
        ProtocolEvent::PairingCodes { codes } => {
            let received = codes.len();
            let evicted = session.pairing().push_codes(codes);
            debug!(%device_id, received, evicted, "Pairing codes queued");
        }
        ProtocolEvent::AuthSuccess { identity } => {
            // State only moves on ConnectionEstablished.
            info!(%device_id, identity = ?identity, "Pairing accepted, waiting for connection");
        }
        ProtocolEvent::ConnectionEstablished { identity } => {
            let identity = identity.or_else(|| session.client().identity());
            session.mark_connected(identity.clone());
            session.pairing().clear();
            info!(%device_id, phone = ?identity, "Device connected");
        }
        ProtocolEvent::ConnectionLost { reason } => {
            if session.mark_connection_lost() {
                warn!(%device_id, reason = ?reason, "Device disconnected");
            } else {
                debug!(%device_id, reason = ?reason, "Connection lost before authentication");
            }
        }
        ProtocolEvent::InboundMessage(message) => {
            let notification = build_notification(device_id, &message);
            debug!(
                %device_id,
                message_id = %notification.message_id,
                from = %notification.from,
                is_group = notification.is_group,
                "Inbound message"
            );
            dispatcher.dispatch(notification);
        }
    }
}

/// Normalize an inbound message into the webhook payload.
///
/// Self-sent echoes report the author in `sender`; everything else reports
/// the peer in `chat`.
pub fn build_notification(device_id: &str, message: &InboundMessage) -> WebhookNotification {
    let (from, from_name) = if message.is_from_me {
        (message.sender.user.clone(), SELF_DISPLAY_NAME.to_string())
    } else {
        (message.chat.user.clone(), message.push_name.clone())
    };
    let (body, kind) = message.content.body_and_kind();

    WebhookNotification {
        device_id: device_id.to_string(),
        message_id: message.id.clone(),
        from,
        from_name,
        message: body,
        message_type: kind,
        timestamp: message.timestamp.timestamp(),
        is_group: message.is_group,
        group_jid: message.is_group.then(|| message.chat.user.clone()),
        group_name: None,
        media_url: message.content.media_url(),
        quoted_message: None,
    }
}
