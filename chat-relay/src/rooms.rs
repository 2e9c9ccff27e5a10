//! Legacy password-gated rooms.
//!
//! A room is created by its first joiner, who also fixes its password. The
//! relay stores only a SHA-256 digest of the password and compares digests in
//! constant time. Rooms are deleted as soon as the last member leaves.
//!
//! [`RoomRelay`] does no I/O: every operation returns the events to send and
//! the connections to send them to.

use crate::error::ProtocolError;
use chat_types::{
    ConnectionId, JoinRoom, PeerJoined, PeerLeft, RoomJoined, RoomMember, RoomMessage, RoomPost,
    ServerEvent, Username,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use subtle::ConstantTimeEq;

/// Longest accepted room name, in bytes.
pub const MAX_ROOM_NAME_LEN: usize = 64;

/// An event addressed to one connection.
pub type Delivery = (ConnectionId, ServerEvent);

struct Room {
    password: [u8; 32],
    /// Join order is preserved for `roomJoined` member lists.
    members: Vec<(ConnectionId, RoomMember)>,
}

impl Room {
    fn member(&self, connection: ConnectionId) -> Option<&RoomMember> {
        self.members
            .iter()
            .find(|(id, _)| *id == connection)
            .map(|(_, member)| member)
    }

    fn others(&self, connection: ConnectionId) -> impl Iterator<Item = &(ConnectionId, RoomMember)> {
        self.members.iter().filter(move |(id, _)| *id != connection)
    }
}

fn digest(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

fn validate_room_name(name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() || name.len() > MAX_ROOM_NAME_LEN || name.chars().any(char::is_control) {
        return Err(ProtocolError::InvalidMessage {
            reason: format!("room name must be 1-{MAX_ROOM_NAME_LEN} printable bytes"),
        });
    }
    Ok(())
}

/// All rooms on this relay.
#[derive(Default)]
pub struct RoomRelay {
    rooms: Mutex<HashMap<String, Room>>,
}

impl std::fmt::Debug for RoomRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRelay")
            .field("rooms", &self.room_count())
            .finish()
    }
}

impl RoomRelay {
    /// No rooms.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Room>> {
        self.rooms.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Join `request.room_name`, creating it if needed.
    ///
    /// The joiner receives `roomJoined` with the members already present;
    /// each of them receives `peerJoined`.
    pub fn join(
        &self,
        connection: ConnectionId,
        request: JoinRoom,
    ) -> Result<Vec<Delivery>, ProtocolError> {
        validate_room_name(&request.room_name)?;
        let offered = digest(&request.password);
        let member = RoomMember {
            username: request.username,
            public_key: request.public_key,
        };

        let mut rooms = self.lock();
        let room = rooms
            .entry(request.room_name.clone())
            .or_insert_with(|| Room {
                password: offered,
                members: Vec::new(),
            });

        if !bool::from(room.password.ct_eq(&offered)) {
            return Err(ProtocolError::RoomPassword(request.room_name));
        }

        // Rejoining on the same connection just refreshes the member record.
        room.members.retain(|(id, _)| *id != connection);

        let mut deliveries: Vec<Delivery> = room
            .members
            .iter()
            .map(|(id, _)| {
                (
                    *id,
                    ServerEvent::PeerJoined(PeerJoined {
                        room_name: request.room_name.clone(),
                        member: member.clone(),
                    }),
                )
            })
            .collect();

        deliveries.push((
            connection,
            ServerEvent::RoomJoined(RoomJoined {
                room_name: request.room_name.clone(),
                members: room.members.iter().map(|(_, m)| m.clone()).collect(),
            }),
        ));

        tracing::debug!(
            "{:?} joined room {} as {}",
            connection,
            request.room_name,
            member.username
        );
        room.members.push((connection, member));
        Ok(deliveries)
    }

    /// Leave one room.
    pub fn leave(
        &self,
        connection: ConnectionId,
        room_name: &str,
    ) -> Result<Vec<Delivery>, ProtocolError> {
        let mut rooms = self.lock();
        let is_member = rooms
            .get(room_name)
            .is_some_and(|room| room.member(connection).is_some());
        if !is_member {
            return Err(ProtocolError::NotInRoom(room_name.to_string()));
        }
        Ok(Self::remove_member(&mut rooms, connection, room_name))
    }

    /// Remove `connection` from every room it is in (disconnect).
    pub fn leave_all(&self, connection: ConnectionId) -> Vec<Delivery> {
        let mut rooms = self.lock();
        let joined: Vec<String> = rooms
            .iter()
            .filter(|(_, room)| room.member(connection).is_some())
            .map(|(name, _)| name.clone())
            .collect();

        joined
            .iter()
            .flat_map(|name| Self::remove_member(&mut rooms, connection, name))
            .collect()
    }

    fn remove_member(
        rooms: &mut HashMap<String, Room>,
        connection: ConnectionId,
        room_name: &str,
    ) -> Vec<Delivery> {
        let Some(room) = rooms.get_mut(room_name) else {
            return Vec::new();
        };
        let Some(index) = room.members.iter().position(|(id, _)| *id == connection) else {
            return Vec::new();
        };
        let (_, departed) = room.members.remove(index);

        if room.members.is_empty() {
            rooms.remove(room_name);
            tracing::debug!("room {} is empty, deleted", room_name);
            return Vec::new();
        }

        room.members
            .iter()
            .map(|(id, _)| {
                (
                    *id,
                    ServerEvent::PeerLeft(PeerLeft {
                        room_name: room_name.to_string(),
                        username: departed.username.clone(),
                    }),
                )
            })
            .collect()
    }

    /// Fan a room post out to the other members.
    ///
    /// Each member only receives the envelope addressed to its declared
    /// username; members without one are skipped.
    pub fn post(
        &self,
        connection: ConnectionId,
        post: RoomPost,
    ) -> Result<Vec<Delivery>, ProtocolError> {
        let rooms = self.lock();
        let room = rooms
            .get(&post.room_name)
            .ok_or_else(|| ProtocolError::NotInRoom(post.room_name.clone()))?;
        let sender = room
            .member(connection)
            .ok_or_else(|| ProtocolError::NotInRoom(post.room_name.clone()))?
            .username
            .clone();

        Ok(room
            .others(connection)
            .filter_map(|(id, member)| {
                post.ciphertexts.get(&member.username).map(|envelope| {
                    (
                        *id,
                        ServerEvent::RoomMessage(RoomMessage {
                            room_name: post.room_name.clone(),
                            sender: sender.clone(),
                            encrypted_content: envelope.clone(),
                            message_id: post.message_id.clone(),
                        }),
                    )
                })
            })
            .collect())
    }

    /// Username `connection` declared when it joined `room_name`.
    pub fn member_name(
        &self,
        connection: ConnectionId,
        room_name: &str,
    ) -> Result<Username, ProtocolError> {
        self.lock()
            .get(room_name)
            .and_then(|room| room.member(connection))
            .map(|member| member.username.clone())
            .ok_or_else(|| ProtocolError::NotInRoom(room_name.to_string()))
    }

    /// Whether `connection` is in any room.
    pub fn is_member_anywhere(&self, connection: ConnectionId) -> bool {
        self.lock()
            .values()
            .any(|room| room.member(connection).is_some())
    }

    /// Number of rooms.
    pub fn room_count(&self) -> usize {
        self.lock().len()
    }

    /// Number of members in `room_name` (0 if it doesn't exist).
    pub fn member_count(&self, room_name: &str) -> usize {
        self.lock()
            .get(room_name)
            .map_or(0, |room| room.members.len())
    }
}
