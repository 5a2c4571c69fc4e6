//! Chat command dispatch and the built-in commands.

use crate::generator;
use crate::network::Server;
use crate::session::Session;
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A command players can type as `/name args`.
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-line usage shown by `/help`.
    fn help(&self) -> &'static str;

    fn op_only(&self) -> bool {
        false
    }

    fn execute(&self, server: &Server, session: &Arc<Session>, args: &str);
}

/// Commands keyed by lowercase name.
pub struct CommandRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn CommandHandler>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HelpCommand));
        registry.register(Arc::new(PlayersCommand));
        registry.register(Arc::new(WhoisCommand));
        registry.register(Arc::new(PaintCommand));
        for mode in [
            PlacementToggle::Water,
            PlacementToggle::Lava,
            PlacementToggle::Solid,
            PlacementToggle::Grass,
        ] {
            registry.register(Arc::new(mode));
        }
        registry.register(Arc::new(KickCommand));
        registry.register(Arc::new(OpCommand { grant: true }));
        registry.register(Arc::new(OpCommand { grant: false }));
        registry.register(Arc::new(NewMapCommand));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(handler.name(), handler);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CommandHandler>> {
        self.handlers.get(name.to_ascii_lowercase().as_str())
    }

    /// Runs a `/command args` line on behalf of a session.
    pub fn dispatch(&self, server: &Server, session: &Arc<Session>, text: &str) {
        let text = text.strip_prefix('/').unwrap_or(text);
        let (name, args) = text.split_once(' ').unwrap_or((text, ""));
        let Some(handler) = self.get(name) else {
            session.message(&format!("Unknown command \"{}\". See /help", name));
            return;
        };
        if handler.op_only() && !session.is_op() {
            session.message("You must be op to use this command.");
            return;
        }
        handler.execute(server, session, args.trim());
    }
}

struct HelpCommand;

impl CommandHandler for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }

    fn help(&self) -> &'static str {
        "/help - Lists available commands."
    }

    fn execute(&self, server: &Server, session: &Arc<Session>, _args: &str) {
        for handler in server.commands.handlers.values() {
            if !handler.op_only() || session.is_op() {
                session.message(handler.help());
            }
        }
    }
}

struct PlayersCommand;

impl CommandHandler for PlayersCommand {
    fn name(&self) -> &'static str {
        "players"
    }

    fn help(&self) -> &'static str {
        "/players - Lists players who are online."
    }

    fn execute(&self, server: &Server, session: &Arc<Session>, _args: &str) {
        let names = server.players.names();
        if names.len() == 1 {
            session.message("There are no other players online.");
        } else {
            session.message(&format!(
                "There are {} players online: {}",
                names.len(),
                names.join(", ")
            ));
        }
    }
}

struct WhoisCommand;

impl CommandHandler for WhoisCommand {
    fn name(&self) -> &'static str {
        "whois"
    }

    fn help(&self) -> &'static str {
        "/whois PlayerName - Shows rank and idle time of a player."
    }

    fn execute(&self, server: &Server, session: &Arc<Session>, args: &str) {
        let Some(target) = find_target(server, session, args) else {
            return;
        };
        let rank = if target.is_op() { "op" } else { "guest" };
        session.message(&format!(
            "{} is {}, idle for {}s.",
            target.name(),
            rank,
            target.idle_time().as_secs()
        ));
    }
}

struct PaintCommand;

impl CommandHandler for PaintCommand {
    fn name(&self) -> &'static str {
        "paint"
    }

    fn help(&self) -> &'static str {
        "/paint - Toggles replacing blocks instead of deleting them."
    }

    fn execute(&self, _server: &Server, session: &Arc<Session>, _args: &str) {
        let modes = session.update_modes(|modes| modes.painting = !modes.painting);
        if modes.painting {
            session.message("Paint: ON");
        } else {
            session.message("Paint: OFF");
        }
    }
}

#[derive(Clone, Copy)]
enum PlacementToggle {
    Water,
    Lava,
    Solid,
    Grass,
}

impl CommandHandler for PlacementToggle {
    fn name(&self) -> &'static str {
        match self {
            PlacementToggle::Water => "water",
            PlacementToggle::Lava => "lava",
            PlacementToggle::Solid => "solid",
            PlacementToggle::Grass => "grass",
        }
    }

    fn help(&self) -> &'static str {
        match self {
            PlacementToggle::Water => "/water - Toggles placing water instead of blue blocks.",
            PlacementToggle::Lava => "/lava - Toggles placing lava instead of red blocks.",
            PlacementToggle::Solid => "/solid - Toggles placing admincrete instead of stone.",
            PlacementToggle::Grass => "/grass - Toggles placing grass instead of dirt.",
        }
    }

    fn execute(&self, server: &Server, session: &Arc<Session>, _args: &str) {
        let config = &server.config;
        let is_op = session.is_op();
        let allowed = match self {
            PlacementToggle::Water => config.can_use_water(is_op),
            PlacementToggle::Lava => config.can_use_lava(is_op),
            PlacementToggle::Solid => config.can_use_solid(is_op),
            PlacementToggle::Grass => config.can_use_grass(is_op),
        };
        if !allowed {
            session.message(&format!("You are not allowed to use /{}.", self.name()));
            return;
        }

        let modes = session.update_modes(|modes| {
            let flag = match self {
                PlacementToggle::Water => &mut modes.water,
                PlacementToggle::Lava => &mut modes.lava,
                PlacementToggle::Solid => &mut modes.solid,
                PlacementToggle::Grass => &mut modes.grass,
            };
            *flag = !*flag;
        });
        let on = match self {
            PlacementToggle::Water => modes.water,
            PlacementToggle::Lava => modes.lava,
            PlacementToggle::Solid => modes.solid,
            PlacementToggle::Grass => modes.grass,
        };
        let label = self.name();
        session.message(&format!(
            "{}{}: {}",
            label[..1].to_ascii_uppercase(),
            &label[1..],
            if on { "ON" } else { "OFF" }
        ));
    }
}

struct KickCommand;

impl CommandHandler for KickCommand {
    fn name(&self) -> &'static str {
        "kick"
    }

    fn help(&self) -> &'static str {
        "/kick PlayerName [Reason] - Disconnects a player."
    }

    fn op_only(&self) -> bool {
        true
    }

    fn execute(&self, server: &Server, session: &Arc<Session>, args: &str) {
        let (name, reason) = args.split_once(' ').unwrap_or((args, ""));
        let Some(target) = find_target(server, session, name) else {
            return;
        };
        let reason = if reason.trim().is_empty() {
            format!("Kicked by {}", session.name())
        } else {
            reason.trim().to_string()
        };
        if target.kick(&reason) {
            info!("{} kicked {}: {}", session.name(), target.name(), reason);
            server
                .players
                .message_all(None, &format!("Player {} was kicked by {}.", target.name(), session.name()));
        }
    }
}

struct OpCommand {
    grant: bool,
}

impl CommandHandler for OpCommand {
    fn name(&self) -> &'static str {
        if self.grant {
            "op"
        } else {
            "deop"
        }
    }

    fn help(&self) -> &'static str {
        if self.grant {
            "/op PlayerName - Makes a player an operator."
        } else {
            "/deop PlayerName - Removes operator status from a player."
        }
    }

    fn op_only(&self) -> bool {
        true
    }

    fn execute(&self, server: &Server, session: &Arc<Session>, args: &str) {
        let Some(target) = find_target(server, session, args) else {
            return;
        };
        let name = target.name();
        if target.is_op() == self.grant {
            let state = if self.grant { "already" } else { "not" };
            session.message(&format!("{} is {} an op.", name, state));
            return;
        }

        if self.grant {
            server.ops.add(&name);
        } else {
            server.ops.remove(&name);
        }
        target.set_op(self.grant, server.config.can_use_solid(self.grant));
        info!("{} changed op status of {} to {}", session.name(), name, self.grant);

        let (verb, notice) = if self.grant {
            ("opped", "You are now an op!")
        } else {
            ("deopped", "You are no longer an op.")
        };
        session.message(&format!("Player {} was {}.", name, verb));
        target.message(notice);
    }
}

struct NewMapCommand;

impl CommandHandler for NewMapCommand {
    fn name(&self) -> &'static str {
        "newmap"
    }

    fn help(&self) -> &'static str {
        "/newmap - Replaces the map with a fresh flat one."
    }

    fn op_only(&self) -> bool {
        true
    }

    fn execute(&self, server: &Server, session: &Arc<Session>, _args: &str) {
        let old = server.map();
        match generator::flat(old.width(), old.length(), old.height()) {
            Ok(map) => {
                info!("{} generated a new map", session.name());
                server.change_map(map);
                server.players.message_all(None, "Map was reset.");
            }
            Err(e) => {
                warn!("Could not generate a new map: {}", e);
                session.message("Could not generate a new map.");
            }
        }
    }
}

fn find_target(server: &Server, session: &Session, name: &str) -> Option<Arc<Session>> {
    if name.is_empty() {
        session.message("Player name required.");
        return None;
    }
    let target = server.players.find(name);
    if target.is_none() {
        session.message(&format!("No player found matching \"{}\".", name));
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::map::Map;
    use shared::{ServerPacket, PERMISSION_OP};

    fn server(config: ServerConfig) -> Arc<Server> {
        Server::new(config, Map::new(8, 8, 8).unwrap())
    }

    fn join(server: &Server, port: u16, name: &str) -> Arc<Session> {
        let session = Arc::new(Session::new(
            format!("127.0.0.1:{}", port).parse().unwrap(),
            server.map(),
        ));
        session.test_set_name(name);
        server.players.register(&session).unwrap();
        session
    }

    fn texts(session: &Session) -> Vec<String> {
        session
            .test_take_control_queue()
            .into_iter()
            .filter_map(|packet| match packet {
                ServerPacket::Message { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_unknown_command() {
        let server = server(ServerConfig::default());
        let alice = join(&server, 8080, "Alice");
        server.commands.dispatch(&server, &alice, "/fly");
        assert_eq!(texts(&alice), vec!["&EUnknown command \"fly\". See /help"]);
    }

    #[test]
    fn test_players_lists_everyone() {
        let server = server(ServerConfig::default());
        let alice = join(&server, 8080, "Alice");
        server.commands.dispatch(&server, &alice, "/players");
        assert_eq!(texts(&alice), vec!["&EThere are no other players online."]);

        join(&server, 8081, "Bob");
        server.commands.dispatch(&server, &alice, "/PLAYERS");
        assert_eq!(
            texts(&alice),
            vec!["&EThere are 2 players online: Alice, Bob"]
        );
    }

    #[test]
    fn test_op_only_commands() {
        let server = server(ServerConfig::default());
        let alice = join(&server, 8080, "Alice");
        let bob = join(&server, 8081, "Bob");
        server.commands.dispatch(&server, &alice, "/kick Bob");
        assert_eq!(texts(&alice), vec!["&EYou must be op to use this command."]);
        assert!(texts(&bob).is_empty());
    }

    #[test]
    fn test_kick_command() {
        let server = server(ServerConfig::default());
        let alice = join(&server, 8080, "Alice");
        let bob = join(&server, 8081, "Bob");
        alice.set_op(true, true);
        texts(&alice);

        server.commands.dispatch(&server, &alice, "/kick bob go away");
        let packets = bob.test_take_control_queue();
        assert_eq!(
            packets.last(),
            Some(&ServerPacket::Kick {
                reason: "go away".to_string()
            })
        );
    }

    #[test]
    fn test_op_grants_permission() {
        let server = server(ServerConfig::default());
        let alice = join(&server, 8080, "Alice");
        let bob = join(&server, 8081, "Bob");
        alice.set_op(true, true);

        server.commands.dispatch(&server, &alice, "/op Bob");
        assert!(bob.is_op());
        assert!(server.ops.contains("bob"));
        let packets = bob.test_take_control_queue();
        assert_eq!(
            packets[0],
            ServerPacket::SetPermission {
                permission: PERMISSION_OP
            }
        );

        server.commands.dispatch(&server, &alice, "/deop Bob");
        assert!(!bob.is_op());
        assert!(!server.ops.contains("bob"));
    }

    #[test]
    fn test_placement_toggles_respect_permissions() {
        let server = server(ServerConfig::default());
        let alice = join(&server, 8080, "Alice");

        server.commands.dispatch(&server, &alice, "/water");
        assert_eq!(texts(&alice), vec!["&EYou are not allowed to use /water."]);
        assert!(!alice.modes().water);

        alice.set_op(true, true);
        texts(&alice);
        server.commands.dispatch(&server, &alice, "/water");
        assert_eq!(texts(&alice), vec!["&EWater: ON"]);
        assert!(alice.modes().water);
    }

    #[test]
    fn test_paint_toggle() {
        let server = server(ServerConfig::default());
        let alice = join(&server, 8080, "Alice");
        server.commands.dispatch(&server, &alice, "/paint");
        assert!(alice.modes().painting);
        server.commands.dispatch(&server, &alice, "/paint");
        assert!(!alice.modes().painting);
        assert_eq!(texts(&alice), vec!["&EPaint: ON", "&EPaint: OFF"]);
    }

    #[test]
    fn test_newmap_moves_players() {
        let server = server(ServerConfig::default());
        let alice = join(&server, 8080, "Alice");
        alice.set_op(true, true);
        let old = server.map();

        server.commands.dispatch(&server, &alice, "/newmap");
        assert_ne!(server.map().id(), old.id());
        assert_eq!(server.map().get_block(0, 0, 0), Some(shared::Block::Dirt));
    }
}
