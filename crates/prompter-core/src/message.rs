//! Universal message model shared by all messenger interfaces.
//!
//! Only types and properties compatible with most messaging services are
//! represented as first-class fields; anything transport-specific travels
//! in `original_message` as an opaque byte blob.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A media payload referenced by URL, local path, or transport-side id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaAttachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Transport-side cached file id, when the messenger supports re-use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl MediaAttachment {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    #[serde(default)]
    pub votes: u32,
}

/// Structured message attachment.
///
/// Serialized internally tagged so stored blobs are self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    Image(MediaAttachment),
    Audio(MediaAttachment),
    Video(MediaAttachment),
    Document(MediaAttachment),
    Sticker(MediaAttachment),
    VoiceMessage(MediaAttachment),
    VideoMessage(MediaAttachment),
    Location {
        longitude: f64,
        latitude: f64,
    },
    Contact {
        phone_number: String,
        first_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_name: Option<String>,
    },
    Poll {
        question: String,
        options: Vec<PollOption>,
    },
    /// Sent in response to non-message events, e.g. keyboard UI interactions.
    CallbackQuery {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query_string: Option<String>,
    },
    MediaGroup {
        group: Vec<Attachment>,
    },
}

/// A command the messenger should execute alongside (or instead of) text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// One user request or bot response.
///
/// An all-default `Message` is the "empty message" used when response
/// generation fails; it is a valid turn outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misc: Option<HashMap<String, serde_json::Value>>,
    /// Escape hatch for transport payloads with no JSON mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_message: Option<Vec<u8>>,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// True when no field carries content.
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.attachments.is_empty()
            && self.commands.is_empty()
            && self.annotations.is_none()
            && self.misc.is_none()
            && self.original_message.is_none()
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.text {
            Some(text) => f.write_str(text),
            None if self.attachments.is_empty() => f.write_str(""),
            None => write!(f, "[{} attachment(s)]", self.attachments.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_round_trip() {
        let msg = Message::text("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"text":"hello"}"#);
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn attachment_blobs_are_self_describing() {
        let msg = Message {
            text: Some("where are you?".into()),
            attachments: vec![Attachment::Location {
                longitude: 37.62,
                latitude: 55.75,
            }],
            ..Message::default()
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"location""#));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn media_group_nests_attachments() {
        let msg = Message {
            attachments: vec![Attachment::MediaGroup {
                group: vec![
                    Attachment::Image(MediaAttachment::url("https://example.com/a.png")),
                    Attachment::Video(MediaAttachment::url("https://example.com/b.mp4")),
                ],
            }],
            ..Message::default()
        };
        let back: Message = serde_json::from_slice(&serde_json::to_vec(&msg).unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn default_message_is_empty() {
        assert!(Message::default().is_empty());
        assert!(!Message::text("x").is_empty());
    }

    #[test]
    fn original_message_blob_survives() {
        let msg = Message {
            original_message: Some(vec![0xde, 0xad, 0xbe, 0xef]),
            ..Message::default()
        };
        let back: Message = serde_json::from_slice(&serde_json::to_vec(&msg).unwrap()).unwrap();
        assert_eq!(back.original_message, Some(vec![0xde, 0xad, 0xbe, 0xef]));
    }
}
