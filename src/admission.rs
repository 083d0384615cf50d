use std::sync::Arc;

use thiserror::Error;

use crate::models::{Room, RoomKind};
use crate::store::{RoomDirectory, StoreError};

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("room not found")]
    RoomNotFound,
    #[error("you are not a member of this room")]
    NotMember,
    #[error("room directory unavailable: {0}")]
    Directory(#[from] StoreError),
}

/// Authorization gate between a Connection and a room. Membership is the
/// sole predicate for socket traffic; public rooms auto-join on first
/// entry, private rooms require membership granted elsewhere.
#[derive(Clone)]
pub struct Admission {
    directory: Arc<dyn RoomDirectory>,
}

impl Admission {
    pub fn new(directory: Arc<dyn RoomDirectory>) -> Self {
        Admission { directory }
    }

    pub fn check(&self, user_id: i64, room_id: i64) -> Result<Room, AccessError> {
        let room = self
            .directory
            .room(room_id)?
            .ok_or(AccessError::RoomNotFound)?;

        if self.directory.is_member(user_id, room_id)? {
            return Ok(room);
        }

        match room.room_type {
            RoomKind::Public => {
                self.directory.join(user_id, room_id)?;
                Ok(room)
            }
            RoomKind::Private => Err(AccessError::NotMember),
        }
    }
}
