use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use crate::models::{Message, MessageType, NewMessage, Room, RoomKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("room not found")]
    RoomNotFound,
    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Membership reads and join/leave mutations. The user directory itself
/// (registration, passwords) lives outside this service.
pub trait RoomDirectory: Send + Sync {
    fn room(&self, room_id: i64) -> Result<Option<Room>, StoreError>;
    fn is_member(&self, user_id: i64, room_id: i64) -> Result<bool, StoreError>;
    fn join(&self, user_id: i64, room_id: i64) -> Result<(), StoreError>;
    fn leave(&self, user_id: i64, room_id: i64) -> Result<(), StoreError>;
}

/// Durable message log: append, cursor-paginated read, read receipts.
pub trait MessageStore: Send + Sync {
    fn append(&self, new: &NewMessage) -> Result<Message, StoreError>;

    /// Messages strictly older than `before_id` (0 ⇒ newest), newest first.
    /// `limit` is clamped to 100.
    fn list_before(
        &self,
        room_id: i64,
        before_id: i64,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError>;

    /// Record that `user_id` has read up to `message_id` in `room_id`.
    /// Positions never move backwards.
    fn mark_read(&self, user_id: i64, room_id: i64, message_id: i64) -> Result<(), StoreError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rooms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                room_type TEXT NOT NULL DEFAULT 'public',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS room_members (
                room_id INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (room_id, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_members_user ON room_members(user_id);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL,
                username TEXT NOT NULL,
                content TEXT NOT NULL,
                message_type TEXT NOT NULL DEFAULT 'text',
                is_edited INTEGER NOT NULL DEFAULT 0,
                edited_at INTEGER,
                created_at INTEGER NOT NULL,
                file_url TEXT,
                file_name TEXT,
                file_size INTEGER,
                mime_type TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_room_id ON messages(room_id, id);

            CREATE TABLE IF NOT EXISTS read_positions (
                room_id INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL,
                last_read_id INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (room_id, user_id)
            );",
        )?;

        // Seed a default public room so a fresh deployment is usable
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM rooms WHERE name = 'general'",
            [],
            |r| r.get(0),
        )?;
        if count == 0 {
            conn.execute(
                "INSERT INTO rooms (name, room_type, created_at) VALUES ('general', 'public', ?1)",
                params![chrono::Utc::now().to_rfc3339()],
            )?;
        }
        Ok(())
    }

    /// Create a room. Room CRUD is an administrative concern; this exists
    /// for operator tooling and tests.
    pub fn create_room(&self, name: &str, kind: RoomKind) -> Result<Room, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO rooms (name, room_type, created_at) VALUES (?1, ?2, ?3)",
            params![name, kind.as_str(), &now],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Room {
            id,
            name: name.to_string(),
            room_type: kind,
            created_at: now,
        })
    }
}

fn room_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    let kind: String = row.get(2)?;
    Ok(Room {
        id: row.get(0)?,
        name: row.get(1)?,
        room_type: if kind == "private" {
            RoomKind::Private
        } else {
            RoomKind::Public
        },
        created_at: row.get(3)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let message_type: String = row.get(5)?;
    Ok(Message {
        id: row.get(0)?,
        room_id: row.get(1)?,
        user_id: row.get(2)?,
        username: row.get(3)?,
        content: row.get(4)?,
        message_type: match message_type.as_str() {
            "image" => MessageType::Image,
            "file" => MessageType::File,
            _ => MessageType::Text,
        },
        is_edited: row.get::<_, i64>(6)? != 0,
        edited_at: row.get(7)?,
        created_at: row.get(8)?,
        file_url: row.get(9)?,
        file_name: row.get(10)?,
        file_size: row.get(11)?,
        mime_type: row.get(12)?,
    })
}

const MESSAGE_COLUMNS: &str = "id, room_id, user_id, username, content, message_type, \
     is_edited, edited_at, created_at, file_url, file_name, file_size, mime_type";

impl RoomDirectory for SqliteStore {
    fn room(&self, room_id: i64) -> Result<Option<Room>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let room = conn
            .query_row(
                "SELECT id, name, room_type, created_at FROM rooms WHERE id = ?1",
                params![room_id],
                room_from_row,
            )
            .optional()?;
        Ok(room)
    }

    fn is_member(&self, user_id: i64, room_id: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM room_members WHERE room_id = ?1 AND user_id = ?2",
            params![room_id, user_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    fn join(&self, user_id: i64, room_id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM rooms WHERE id = ?1",
            params![room_id],
            |r| r.get(0),
        )?;
        if exists == 0 {
            return Err(StoreError::RoomNotFound);
        }
        conn.execute(
            "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
            params![room_id, user_id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn leave(&self, user_id: i64, room_id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "DELETE FROM room_members WHERE room_id = ?1 AND user_id = ?2",
            params![room_id, user_id],
        )?;
        Ok(())
    }
}

impl MessageStore for SqliteStore {
    fn append(&self, new: &NewMessage) -> Result<Message, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM rooms WHERE id = ?1",
            params![new.room_id],
            |r| r.get(0),
        )?;
        if exists == 0 {
            return Err(StoreError::RoomNotFound);
        }

        let created_at = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO messages (room_id, user_id, username, content, message_type, \
             created_at, file_url, file_name, file_size, mime_type) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                new.room_id,
                new.user_id,
                &new.username,
                &new.content,
                new.message_type.as_str(),
                created_at,
                &new.file_url,
                &new.file_name,
                new.file_size,
                &new.mime_type,
            ],
        )?;

        Ok(Message {
            id: conn.last_insert_rowid(),
            room_id: new.room_id,
            user_id: new.user_id,
            username: new.username.clone(),
            content: new.content.clone(),
            message_type: new.message_type,
            is_edited: false,
            edited_at: None,
            created_at,
            file_url: new.file_url.clone(),
            file_name: new.file_name.clone(),
            file_size: new.file_size,
            mime_type: new.mime_type.clone(),
        })
    }

    fn list_before(
        &self,
        room_id: i64,
        before_id: i64,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let limit = limit.clamp(1, 100);
        let cursor = if before_id <= 0 { i64::MAX } else { before_id };
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE room_id = ?1 AND id < ?2 ORDER BY id DESC LIMIT ?3"
        ))?;
        let messages = stmt
            .query_map(params![room_id, cursor, limit], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    fn mark_read(&self, user_id: i64, room_id: i64, message_id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO read_positions (room_id, user_id, last_read_id, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(room_id, user_id) DO UPDATE SET \
               last_read_id = MAX(last_read_id, excluded.last_read_id), \
               updated_at = excluded.updated_at",
            params![
                room_id,
                user_id,
                message_id,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}
