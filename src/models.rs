use serde::{Deserialize, Serialize};

pub const MAX_CONTENT_LEN: usize = 4_000;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Public,
    Private,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Public => "public",
            RoomKind::Private => "private",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Room {
    pub id: i64,
    pub name: String,
    pub room_type: RoomKind,
    pub created_at: String,
}

/// A persisted chat message. `created_at` is unix seconds, matching the
/// inter-instance wire format.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: i64,
    pub room_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub message_type: MessageType,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Payload for `MessageStore::append`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub message_type: MessageType,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
}

impl NewMessage {
    /// Content rules: text messages need non-empty content (≤ 4000 chars);
    /// image/file messages need a file URL and name.
    pub fn validate(&self) -> Result<(), String> {
        if self.content.chars().count() > MAX_CONTENT_LEN {
            return Err(format!("Content must be at most {MAX_CONTENT_LEN} characters"));
        }
        match self.message_type {
            MessageType::Text => {
                if self.content.trim().is_empty() {
                    return Err("Content must not be empty".to_string());
                }
            }
            MessageType::Image | MessageType::File => {
                if self.file_url.as_deref().unwrap_or("").is_empty()
                    || self.file_name.as_deref().unwrap_or("").is_empty()
                {
                    return Err("File messages require file_url and file_name".to_string());
                }
            }
        }
        Ok(())
    }
}

// --- Bus wire format ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomEventKind {
    Message,
    UserJoined,
    UserLeft,
}

/// The sole wire representation between instances. Immutable once built;
/// serialized as JSON onto bus channel `room:{room_id}`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoomEvent {
    pub event: RoomEventKind,
    pub room_id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub username: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl RoomEvent {
    pub fn message(msg: &Message) -> Self {
        RoomEvent {
            event: RoomEventKind::Message,
            room_id: msg.room_id,
            message_id: msg.id,
            user_id: msg.user_id,
            username: msg.username.clone(),
            content: msg.content.clone(),
            message_type: msg.message_type,
            created_at: msg.created_at,
            file_url: msg.file_url.clone(),
            file_name: msg.file_name.clone(),
            file_size: msg.file_size,
            mime_type: msg.mime_type.clone(),
        }
    }

    pub fn presence(kind: RoomEventKind, room_id: i64, user_id: i64, username: &str) -> Self {
        RoomEvent {
            event: kind,
            room_id,
            message_id: 0,
            user_id,
            username: username.to_string(),
            content: String::new(),
            message_type: MessageType::Text,
            created_at: chrono::Utc::now().timestamp(),
            file_url: None,
            file_name: None,
            file_size: None,
            mime_type: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// The outbound frame local members of the room should receive.
    pub fn to_frame(&self) -> ServerFrame {
        match self.event {
            RoomEventKind::Message => ServerFrame::NewMessage {
                message_id: self.message_id,
                room_id: self.room_id,
                user_id: self.user_id,
                username: self.username.clone(),
                content: self.content.clone(),
                created_at: self.created_at,
                message_type: self.message_type,
                file_url: self.file_url.clone(),
                file_name: self.file_name.clone(),
                file_size: self.file_size,
                mime_type: self.mime_type.clone(),
            },
            RoomEventKind::UserJoined => ServerFrame::UserJoined {
                room_id: self.room_id,
                user_id: self.user_id,
                username: self.username.clone(),
            },
            RoomEventKind::UserLeft => ServerFrame::UserLeft {
                room_id: self.room_id,
                user_id: self.user_id,
                username: self.username.clone(),
            },
        }
    }
}

// --- Client/server frames (JSON text frames on the socket) ---

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        token: String,
    },
    JoinRoom {
        room_id: i64,
    },
    SendMessage {
        #[serde(default)]
        content: String,
        #[serde(default)]
        message_type: MessageType,
        #[serde(default)]
        file_url: Option<String>,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        file_size: Option<i64>,
        #[serde(default)]
        mime_type: Option<String>,
    },
    LeaveRoom,
    Ping,
}

impl ClientFrame {
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Success {
        message: String,
    },
    Error {
        message: String,
    },
    Pong,
    RoomJoined {
        room_id: i64,
        room: Room,
    },
    NewMessage {
        message_id: i64,
        room_id: i64,
        user_id: i64,
        username: String,
        content: String,
        created_at: i64,
        message_type: MessageType,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_size: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    UserJoined {
        room_id: i64,
        user_id: i64,
        username: String,
    },
    UserLeft {
        room_id: i64,
        user_id: i64,
        username: String,
    },
}

impl ServerFrame {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"internal encoding error"}"#.to_string()
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        ServerFrame::Success {
            message: message.into(),
        }
    }
}

// --- Upload ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UploadResponse {
    pub file_url: String,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
    pub message_type: MessageType,
}
