//! Server context, TCP accept loop and physics tick driver

use crate::client_manager::ClientManager;
use crate::commands::CommandRegistry;
use crate::config::ServerConfig;
use crate::map::{BlockChange, BlockListener, Map};
use crate::names::{self, NameList};
use crate::physics::PlantPhysics;
use crate::session;
use crate::trees::DefaultTreeGrower;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use shared::ServerPacket;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};

/// How long shutdown waits for each session to disconnect.
pub const SHUTDOWN_KICK_TIMEOUT: Duration = Duration::from_secs(5);

/// Relays every map edit to the players on that map, except the one who
/// made it.
struct BlockBroadcaster {
    players: Arc<ClientManager>,
}

impl BlockListener for BlockBroadcaster {
    fn on_block_changed(&self, map: &Map, change: &BlockChange) {
        self.players.send_to_map(
            map.id(),
            change.origin,
            ServerPacket::SetBlock {
                x: change.x as i16,
                y: change.y as i16,
                z: change.z as i16,
                block: change.new,
            },
        );
    }
}

/// The current map and the physics bound to it.
struct World {
    map: Arc<Map>,
    physics: Arc<PlantPhysics>,
}

/// State shared by every session: configuration, the current map, the
/// player registry and the name lists.
pub struct Server {
    pub config: ServerConfig,
    pub salt: String,
    pub players: Arc<ClientManager>,
    pub ops: NameList,
    pub whitelist: NameList,
    pub commands: CommandRegistry,
    world: RwLock<World>,
    tick: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl Server {
    /// Creates a server around `map` with empty operator and whitelist sets.
    pub fn new(config: ServerConfig, map: Map) -> Arc<Self> {
        Self::with_lists(config, map, NameList::new(), NameList::new())
    }

    /// Creates a server, reading the operator and whitelist files named in
    /// the configuration. Missing files count as empty lists.
    pub fn load(config: ServerConfig, map: Map) -> io::Result<Arc<Self>> {
        let ops = Self::load_list(config.ops_file.as_deref())?;
        let whitelist = Self::load_list(config.whitelist_file.as_deref())?;
        info!(
            "Loaded {} ops and {} whitelisted names",
            ops.len(),
            whitelist.len()
        );
        Ok(Self::with_lists(config, map, ops, whitelist))
    }

    fn load_list(path: Option<&Path>) -> io::Result<NameList> {
        match path {
            Some(path) => NameList::load(path),
            None => Ok(NameList::new()),
        }
    }

    pub fn with_lists(config: ServerConfig, map: Map, ops: NameList, whitelist: NameList) -> Arc<Self> {
        let players = Arc::new(ClientManager::new(config.max_players));
        let world = Self::prepare_world(&config, &players, map);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            salt: names::generate_salt(),
            commands: CommandRegistry::with_builtins(),
            players,
            ops,
            whitelist,
            world: RwLock::new(world),
            tick: AtomicU64::new(0),
            shutdown,
            config,
        })
    }

    fn prepare_world(config: &ServerConfig, players: &Arc<ClientManager>, map: Map) -> World {
        let physics = PlantPhysics::attach(&map, config.physics, Arc::new(DefaultTreeGrower));
        map.add_listener(Arc::new(BlockBroadcaster {
            players: Arc::clone(players),
        }));
        World {
            map: Arc::new(map),
            physics,
        }
    }

    /// The map new sessions join.
    pub fn map(&self) -> Arc<Map> {
        self.world.read().map.clone()
    }

    pub fn physics(&self) -> Arc<PlantPhysics> {
        self.world.read().physics.clone()
    }

    /// Replaces the current map and moves every player to it.
    pub fn change_map(&self, map: Map) -> Arc<Map> {
        let world = Self::prepare_world(&self.config, &self.players, map);
        let map = world.map.clone();
        *self.world.write() = world;
        info!(
            "Changed map to {} ({}x{}x{})",
            map.id(),
            map.width(),
            map.length(),
            map.height()
        );
        for player in self.players.players() {
            player.change_map(map.clone());
        }
        map
    }

    /// Runs one physics tick on the current map.
    pub fn tick_physics(&self) -> u64 {
        let (map, physics) = {
            let world = self.world.read();
            (world.map.clone(), world.physics.clone())
        };
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        physics.tick(&map, tick);
        tick
    }

    /// Spawns the task that drives plant physics at the configured rate.
    pub fn spawn_physics(self: &Arc<Self>) -> JoinHandle<()> {
        let server = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut tick_interval = interval(server.config.tick_interval());
            tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while !*shutdown.borrow() {
                tokio::select! {
                    _ = tick_interval.tick() => {
                        let tick = server.tick_physics();
                        // Periodic monitoring
                        if tick % 1200 == 0 && !server.players.is_empty() {
                            debug!("Tick {}: {} players online", tick, server.players.len());
                        }
                    }
                    _ = shutdown.changed() => {}
                }
            }
        })
    }

    /// Accepts connections until [`Server::shutdown`] is called.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        let physics = self.spawn_physics();
        let mut shutdown = self.shutdown.subscribe();
        info!(
            "Server \"{}\" listening on {}",
            self.config.server_name,
            listener.local_addr()?
        );

        while !*shutdown.borrow() {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("Connection from {}", addr);
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Could not disable Nagle for {}: {}", addr, e);
                        }
                        tokio::spawn(session::run_session(Arc::clone(&self), stream, addr));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                _ = shutdown.changed() => {}
            }
        }

        physics.abort();
        info!("Server stopped accepting connections");
        Ok(())
    }

    /// Stops the accept loop and physics, then kicks every player and waits
    /// for their sessions to close.
    pub async fn shutdown(&self, reason: &str) {
        self.shutdown.send_replace(true);
        let mut kicks = JoinSet::new();
        for player in self.players.players() {
            let reason = reason.to_string();
            kicks.spawn(async move {
                let done = player.kick_and_wait(&reason, SHUTDOWN_KICK_TIMEOUT).await;
                (player.name(), done)
            });
        }
        while let Some(result) = kicks.join_next().await {
            match result {
                Ok((name, false)) => warn!("Session {} did not close in time", name),
                Ok(_) => {}
                Err(e) => error!("Kick task failed: {}", e),
            }
        }
        info!("Server shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use shared::Block;

    fn join(server: &Server, port: u16, name: &str) -> Arc<Session> {
        let session = Arc::new(Session::new(
            format!("127.0.0.1:{}", port).parse().unwrap(),
            server.map(),
        ));
        session.test_set_name(name);
        server.players.register(&session).unwrap();
        session
    }

    fn block_updates(session: &Session) -> Vec<ServerPacket> {
        session.test_take_block_queue()
    }

    #[test]
    fn test_edits_are_broadcast_except_to_origin() {
        let server = Server::new(ServerConfig::default(), Map::new(8, 8, 8).unwrap());
        let alice = join(&server, 8080, "Alice");
        let bob = join(&server, 8081, "Bob");

        server.map().set_block(alice.slot(), 1, 2, 3, Block::Stone);
        assert!(block_updates(&alice).is_empty());
        assert_eq!(
            block_updates(&bob),
            vec![ServerPacket::SetBlock {
                x: 1,
                y: 2,
                z: 3,
                block: Block::Stone
            }]
        );

        // physics and other server edits reach everyone
        server.map().set_block(None, 1, 2, 4, Block::Stone);
        assert_eq!(block_updates(&alice).len(), 1);
        assert_eq!(block_updates(&bob).len(), 1);
    }

    #[test]
    fn test_edits_stay_on_their_map() {
        let server = Server::new(ServerConfig::default(), Map::new(8, 8, 8).unwrap());
        let alice = join(&server, 8080, "Alice");
        let old = server.map();
        server.change_map(Map::new(8, 8, 8).unwrap());

        // the worker has not switched yet, so alice still sees the old map
        old.set_block(None, 0, 0, 0, Block::Stone);
        assert_eq!(block_updates(&alice).len(), 1);
        server.map().set_block(None, 0, 0, 0, Block::Stone);
        assert!(block_updates(&alice).is_empty());
    }

    #[test]
    fn test_change_map_rebinds_physics() {
        let server = Server::new(ServerConfig::default(), Map::new(8, 8, 8).unwrap());
        let before = server.physics();
        let map = server.change_map(Map::new(4, 4, 4).unwrap());
        assert!(Arc::ptr_eq(&map, &server.map()));
        assert!(!Arc::ptr_eq(&before, &server.physics()));
        assert_eq!(server.tick_physics(), 0);
        assert_eq!(server.tick_physics(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_without_players() {
        let server = Server::new(ServerConfig::default(), Map::new(8, 8, 8).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let running = tokio::spawn(Arc::clone(&server).run(listener));
        server.shutdown("Server shutting down.").await;
        assert!(running.await.unwrap().is_ok());
    }
}
