use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WakuError};
use crate::media::MediaKind;

/// Server part of a personal (phone number) address.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Server part of a group address.
pub const GROUP_SERVER: &str = "g.us";

/// Minimum length of a phone number or group address accepted as a recipient.
const MIN_RECIPIENT_LEN: usize = 10;

/// Messaging-network address (`user@server`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    pub user: String,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    /// Personal recipient from a phone number in `country_code + number` form.
    pub fn for_phone(phone: &str) -> Result<Self> {
        let digits = phone.strip_prefix('+').unwrap_or(phone);
        if digits.len() < MIN_RECIPIENT_LEN || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(WakuError::InvalidRecipient(format!(
                "invalid phone number format '{phone}'. Use: country_code + number (e.g., 628123456789)"
            )));
        }
        Ok(Self::new(digits, USER_SERVER))
    }

    /// Group recipient; the address must end with `@g.us`.
    pub fn for_group(group_jid: &str) -> Result<Self> {
        let group_suffix = group_jid
            .strip_suffix(GROUP_SERVER)
            .is_some_and(|rest| rest.ends_with('@'));
        if group_jid.len() < MIN_RECIPIENT_LEN || !group_suffix {
            return Err(WakuError::InvalidRecipient(format!(
                "invalid group JID format '{group_jid}'. Should end with @g.us"
            )));
        }
        group_jid.parse()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

impl FromStr for Jid {
    type Err = WakuError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('@') {
            Some((user, server)) if !server.is_empty() && !server.contains('@') => {
                Ok(Self::new(user, server))
            }
            _ => Err(WakuError::InvalidRecipient(format!("malformed JID '{s}'"))),
        }
    }
}

impl TryFrom<String> for Jid {
    type Error = WakuError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

/// Kind of message carried in a webhook notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    Document,
}

/// Inbound message as reported by the protocol collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    /// Conversation the message belongs to (the peer for DMs, the group otherwise).
    pub chat: Jid,
    /// Author of the message as reported by the network.
    pub sender: Jid,
    #[serde(default)]
    pub push_name: String,
    #[serde(default)]
    pub is_from_me: bool,
    #[serde(default)]
    pub is_group: bool,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub content: MessageContent,
}

/// Payload variants of a message. Exactly one is expected to be populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_text: Option<ExtendedText>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<MediaContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<MediaContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<MediaContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<MediaContent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendedText {
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl MessageContent {
    /// Body text and kind, taken from the first populated variant.
    ///
    /// Falls back to an empty text body when nothing matches. Audio carries no
    /// body.
    pub fn body_and_kind(&self) -> (String, MessageKind) {
        let caption = |m: &MediaContent| m.caption.clone().unwrap_or_default();

        if let Some(text) = self.conversation.as_deref().filter(|t| !t.is_empty()) {
            (text.to_string(), MessageKind::Text)
        } else if let Some(ext) = &self.extended_text {
            (ext.text.clone(), MessageKind::Text)
        } else if let Some(image) = &self.image {
            (caption(image), MessageKind::Image)
        } else if let Some(video) = &self.video {
            (caption(video), MessageKind::Video)
        } else if self.audio.is_some() {
            (String::new(), MessageKind::Audio)
        } else if let Some(doc) = &self.document {
            (caption(doc), MessageKind::Document)
        } else {
            (String::new(), MessageKind::Text)
        }
    }

    /// Download URL of the media variant, if the message carries one.
    pub fn media_url(&self) -> Option<String> {
        [&self.image, &self.video, &self.audio, &self.document]
            .into_iter()
            .flatten()
            .find_map(|m| m.url.clone())
    }
}

/// JSON body POSTed to the webhook endpoint for every inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookNotification {
    pub device_id: String,
    pub message_id: String,
    pub from: String,
    pub from_name: String,
    pub message: String,
    pub message_type: MessageKind,
    pub timestamp: i64,
    pub is_group: bool,
    pub group_jid: Option<String>,
    pub group_name: Option<String>,
    pub media_url: Option<String>,
    pub quoted_message: Option<serde_json::Value>,
}

/// Result of a successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub timestamp: i64,
}

/// Result of a successful media send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaReceipt {
    pub message_id: String,
    pub media_type: MediaKind,
    pub file_size: u64,
}

/// Handle to media already uploaded to the network's media servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedMedia {
    pub handle: String,
    #[serde(default)]
    pub url: Option<String>,
    pub file_length: u64,
}

/// Descriptor for a media message built around an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaMessage {
    pub kind: MediaKind,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub jid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notify: String,
    #[serde(default)]
    pub is_business: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    pub jid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub participants: usize,
    #[serde(default)]
    pub is_admin: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_recipient() {
        let jid = Jid::for_phone("628123456789").unwrap();
        assert_eq!(jid.to_string(), "628123456789@s.whatsapp.net");
        assert_eq!(jid.server, USER_SERVER);

        let plus = Jid::for_phone("+628123456789").unwrap();
        assert_eq!(plus.user, "628123456789");
    }

    #[test]
    fn test_phone_recipient_rejected() {
        assert!(matches!(
            Jid::for_phone("12345"),
            Err(WakuError::InvalidRecipient(_))
        ));
        assert!(matches!(
            Jid::for_phone("62812345abcd"),
            Err(WakuError::InvalidRecipient(_))
        ));
    }

    #[test]
    fn test_group_recipient() {
        let jid = Jid::for_group("120363025246125486@g.us").unwrap();
        assert_eq!(jid.server, GROUP_SERVER);
        assert_eq!(jid.user, "120363025246125486");

        assert!(Jid::for_group("120363025246125486@s.whatsapp.net").is_err());
        assert!(Jid::for_group("1@g.us").is_err());
    }

    #[test]
    fn test_jid_serde_as_string() {
        let jid: Jid = serde_json::from_str("\"628123456789@s.whatsapp.net\"").unwrap();
        assert_eq!(jid.server, USER_SERVER);
        assert_eq!(
            serde_json::to_string(&jid).unwrap(),
            "\"628123456789@s.whatsapp.net\""
        );
        assert!(serde_json::from_str::<Jid>("\"no-server\"").is_err());
    }

    #[test]
    fn test_body_and_kind_first_match_wins() {
        let content = MessageContent {
            conversation: Some("hello".into()),
            image: Some(MediaContent {
                caption: Some("ignored".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            content.body_and_kind(),
            ("hello".to_string(), MessageKind::Text)
        );
    }

    #[test]
    fn test_body_and_kind_variants() {
        let empty_conversation = MessageContent {
            conversation: Some(String::new()),
            extended_text: Some(ExtendedText {
                text: "quoted reply".into(),
            }),
            ..Default::default()
        };
        assert_eq!(
            empty_conversation.body_and_kind(),
            ("quoted reply".to_string(), MessageKind::Text)
        );

        let video = MessageContent {
            video: Some(MediaContent {
                caption: Some("clip".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(video.body_and_kind(), ("clip".into(), MessageKind::Video));

        let audio = MessageContent {
            audio: Some(MediaContent {
                caption: Some("never surfaced".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(audio.body_and_kind(), (String::new(), MessageKind::Audio));

        let document = MessageContent {
            document: Some(MediaContent::default()),
            ..Default::default()
        };
        assert_eq!(
            document.body_and_kind(),
            (String::new(), MessageKind::Document)
        );
    }

    #[test]
    fn test_body_and_kind_default() {
        assert_eq!(
            MessageContent::default().body_and_kind(),
            (String::new(), MessageKind::Text)
        );
    }

    #[test]
    fn test_notification_nulls_serialized() {
        let n = WebhookNotification {
            device_id: "dev".into(),
            message_id: "m1".into(),
            from: "628123456789".into(),
            from_name: "Budi".into(),
            message: "hi".into(),
            message_type: MessageKind::Text,
            timestamp: 1_700_000_000,
            is_group: false,
            group_jid: None,
            group_name: None,
            media_url: None,
            quoted_message: None,
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["message_type"], "text");
        assert!(json["group_jid"].is_null());
        assert!(json["group_name"].is_null());
        assert!(json["media_url"].is_null());
        assert!(json.as_object().unwrap().contains_key("quoted_message"));
    }
}
