//! Player registry for the server
//!
//! This module tracks every session that completed the login checks:
//! - Slot assignment, which doubles as the entity id other players see
//! - Capacity limits and case-insensitive name uniqueness
//! - Fan-out of chat lines and packets to all players or one map
//! - Entity spawn and despawn announcements between players
//!
//! The registry never holds its lock while talking to a session: every
//! fan-out works on a snapshot of the current players.

use crate::session::{Session, MAX_ENTITY_ID};
use log::info;
use parking_lot::RwLock;
use shared::ServerPacket;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("server is full")]
    Full,
    #[error("name {0} is already in use")]
    NameTaken(String),
}

/// Registered players keyed by slot
///
/// Slots run from 1 to [`MAX_ENTITY_ID`] and are reused once a player
/// leaves. A session keeps its slot for as long as it stays registered.
pub struct ClientManager {
    players: RwLock<BTreeMap<u8, Arc<Session>>>,
    max_players: usize,
}

impl ClientManager {
    /// Creates an empty registry. Capacity is capped by the entity id range.
    pub fn new(max_players: usize) -> Self {
        Self {
            players: RwLock::new(BTreeMap::new()),
            max_players: max_players.min(MAX_ENTITY_ID as usize),
        }
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Registers a session under the lowest free slot
    ///
    /// Fails if the server is full or another player already uses the
    /// session's name, compared case-insensitively.
    pub fn register(&self, session: &Arc<Session>) -> Result<u8, RegisterError> {
        let name = session.name();
        let mut players = self.players.write();

        if players.len() >= self.max_players {
            return Err(RegisterError::Full);
        }
        if players.values().any(|p| p.name().eq_ignore_ascii_case(&name)) {
            return Err(RegisterError::NameTaken(name));
        }

        let slot = (1..=MAX_ENTITY_ID)
            .find(|slot| !players.contains_key(slot))
            .ok_or(RegisterError::Full)?;
        players.insert(slot, Arc::clone(session));
        session.set_slot(Some(slot));
        info!("Player {} registered in slot {}", name, slot);
        Ok(slot)
    }

    /// Removes a session, announcing its departure if it had been announced.
    /// Safe to call more than once; returns whether anything was removed.
    pub fn unregister(&self, session: &Session) -> bool {
        let Some(slot) = session.slot() else {
            return false;
        };
        let removed = {
            let mut players = self.players.write();
            match players.get(&slot) {
                Some(p) if std::ptr::eq(Arc::as_ptr(p), session) => players.remove(&slot),
                _ => None,
            }
        };
        if removed.is_none() {
            return false;
        }
        session.set_slot(None);

        let name = session.name();
        info!("Player {} left", name);
        if session.is_announced() {
            self.send_to_map(
                session.current_map_id(),
                None,
                ServerPacket::RemoveEntity { id: slot },
            );
            self.message_all(None, &format!("Player {} left.", name));
        }
        true
    }

    /// Snapshot of the registered players in slot order.
    pub fn players(&self) -> Vec<Arc<Session>> {
        self.players.read().values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.players.read().values().map(|p| p.name()).collect()
    }

    /// Looks a player up by name, ignoring case.
    pub fn find(&self, name: &str) -> Option<Arc<Session>> {
        self.players
            .read()
            .values()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.players.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.read().is_empty()
    }

    /// Sends a server message to every player except the one in `except`.
    pub fn message_all(&self, except: Option<u8>, text: &str) {
        for player in self.players() {
            if except.is_none() || player.slot() != except {
                player.message(text);
            }
        }
    }

    /// Queues a packet for every player on the given map except `except`.
    pub fn send_to_map(&self, map_id: u64, except: Option<u8>, packet: ServerPacket) {
        for player in self.players() {
            if player.current_map_id() == map_id && (except.is_none() || player.slot() != except) {
                player.send(packet.clone());
            }
        }
    }

    /// Introduces a session and the players sharing its map to each other.
    pub fn spawn_players(&self, session: &Arc<Session>) {
        let Some(slot) = session.slot() else {
            return;
        };
        let map_id = session.current_map_id();
        for other in self.players() {
            let Some(other_slot) = other.slot() else {
                continue;
            };
            if other_slot == slot || other.current_map_id() != map_id {
                continue;
            }
            session.send(ServerPacket::AddEntity {
                id: other_slot,
                name: other.name(),
                position: other.position(),
            });
            other.send(ServerPacket::AddEntity {
                id: slot,
                name: session.name(),
                position: session.position(),
            });
        }
    }

    /// Removes a session's entity from everyone still on `old_map_id`.
    pub fn despawn(&self, session: &Session, old_map_id: u64) {
        if let Some(slot) = session.slot() {
            self.send_to_map(old_map_id, Some(slot), ServerPacket::RemoveEntity { id: slot });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Map;
    use shared::Position;
    use std::net::SocketAddr;

    fn test_map() -> Arc<Map> {
        Arc::new(Map::new(8, 8, 8).unwrap())
    }

    fn test_session(map: &Arc<Map>, port: u16) -> Arc<Session> {
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        Arc::new(Session::new(addr, Arc::clone(map)))
    }

    fn named(map: &Arc<Map>, port: u16, name: &str) -> Arc<Session> {
        let session = test_session(map, port);
        session.test_set_name(name);
        session
    }

    fn drain(session: &Session) -> Vec<ServerPacket> {
        session.test_take_control_queue()
    }

    #[test]
    fn test_register_player() {
        let map = test_map();
        let manager = ClientManager::new(4);
        let session = named(&map, 8080, "Alice");

        assert_eq!(manager.register(&session), Ok(1));
        assert_eq!(session.slot(), Some(1));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_register_max_capacity() {
        let map = test_map();
        let manager = ClientManager::new(1);
        manager.register(&named(&map, 8080, "Alice")).unwrap();

        let result = manager.register(&named(&map, 8081, "Bob"));
        assert_eq!(result, Err(RegisterError::Full));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_capacity_is_capped_by_entity_ids() {
        assert_eq!(ClientManager::new(1000).max_players(), MAX_ENTITY_ID as usize);
    }

    #[test]
    fn test_register_duplicate_name() {
        let map = test_map();
        let manager = ClientManager::new(4);
        manager.register(&named(&map, 8080, "Alice")).unwrap();

        let result = manager.register(&named(&map, 8081, "aLiCe"));
        assert_eq!(result, Err(RegisterError::NameTaken("aLiCe".to_string())));
    }

    #[test]
    fn test_slots_are_reused() {
        let map = test_map();
        let manager = ClientManager::new(4);
        let alice = named(&map, 8080, "Alice");
        let bob = named(&map, 8081, "Bob");
        manager.register(&alice).unwrap();
        manager.register(&bob).unwrap();

        assert!(manager.unregister(&alice));
        let carol = named(&map, 8082, "Carol");
        assert_eq!(manager.register(&carol), Ok(1));
        assert_eq!(manager.names(), vec!["Carol".to_string(), "Bob".to_string()]);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let map = test_map();
        let manager = ClientManager::new(4);
        let alice = named(&map, 8080, "Alice");
        manager.register(&alice).unwrap();

        assert!(manager.unregister(&alice));
        assert!(!manager.unregister(&alice));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_unregister_unknown_session() {
        let map = test_map();
        let manager = ClientManager::new(4);
        assert!(!manager.unregister(&named(&map, 8080, "Ghost")));
    }

    #[test]
    fn test_unregister_announces_departure() {
        let map = test_map();
        let manager = ClientManager::new(4);
        let alice = named(&map, 8080, "Alice");
        let bob = named(&map, 8081, "Bob");
        manager.register(&alice).unwrap();
        manager.register(&bob).unwrap();
        alice.test_set_announced();

        manager.unregister(&alice);
        let packets = drain(&bob);
        assert!(packets.contains(&ServerPacket::RemoveEntity { id: 1 }));
        assert!(packets.contains(&ServerPacket::Message {
            id: 0,
            text: "&EPlayer Alice left.".to_string()
        }));
    }

    #[test]
    fn test_silent_unregister_before_announcement() {
        let map = test_map();
        let manager = ClientManager::new(4);
        let alice = named(&map, 8080, "Alice");
        let bob = named(&map, 8081, "Bob");
        manager.register(&alice).unwrap();
        manager.register(&bob).unwrap();

        manager.unregister(&alice);
        assert!(drain(&bob).is_empty());
    }

    #[test]
    fn test_find_player_by_name() {
        let map = test_map();
        let manager = ClientManager::new(4);
        let alice = named(&map, 8080, "Alice");
        manager.register(&alice).unwrap();

        let found = manager.find("ALICE").unwrap();
        assert!(Arc::ptr_eq(&found, &alice));
        assert!(manager.find("Bob").is_none());
    }

    #[test]
    fn test_message_all_skips_excluded() {
        let map = test_map();
        let manager = ClientManager::new(4);
        let alice = named(&map, 8080, "Alice");
        let bob = named(&map, 8081, "Bob");
        manager.register(&alice).unwrap();
        manager.register(&bob).unwrap();

        manager.message_all(Some(1), "hi");
        assert!(drain(&alice).is_empty());
        assert_eq!(drain(&bob).len(), 1);

        manager.message_all(None, "hi");
        assert_eq!(drain(&alice).len(), 1);
        assert_eq!(drain(&bob).len(), 1);
    }

    #[test]
    fn test_spawn_players_on_same_map() {
        let map = test_map();
        let other_map = test_map();
        let manager = ClientManager::new(4);
        let alice = named(&map, 8080, "Alice");
        let bob = named(&map, 8081, "Bob");
        let carol = named(&other_map, 8082, "Carol");
        for session in [&alice, &bob, &carol] {
            manager.register(session).unwrap();
        }

        manager.spawn_players(&alice);
        assert_eq!(
            drain(&alice),
            vec![ServerPacket::AddEntity {
                id: 2,
                name: "Bob".to_string(),
                position: bob.position()
            }]
        );
        assert_eq!(
            drain(&bob),
            vec![ServerPacket::AddEntity {
                id: 1,
                name: "Alice".to_string(),
                position: map.spawn()
            }]
        );
        assert!(drain(&carol).is_empty());
    }

    #[test]
    fn test_send_to_map_filters_by_map() {
        let map = test_map();
        let other_map = test_map();
        let manager = ClientManager::new(4);
        let alice = named(&map, 8080, "Alice");
        let carol = named(&other_map, 8082, "Carol");
        manager.register(&alice).unwrap();
        manager.register(&carol).unwrap();

        let teleport = ServerPacket::Teleport {
            id: 9,
            position: Position::new(0, 0, 0),
        };
        manager.send_to_map(map.id(), None, teleport.clone());
        assert_eq!(drain(&alice), vec![teleport]);
        assert!(drain(&carol).is_empty());
    }
}
