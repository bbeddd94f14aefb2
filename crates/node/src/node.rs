use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use glam::IVec2;

use lockstep::{
    LevelStartStatus, NetRole, NetSession, NetworkStats, SetupInfo, Transport, UdpTransport,
};

use crate::config::NodeConfig;
use crate::events::NodeEvent;
use crate::simulation::World;

#[derive(Debug, Clone)]
pub struct PlayerRow {
    pub slot: usize,
    pub addr: Option<SocketAddr>,
    pub sequence: i32,
    pub ack: i32,
    pub latency_ms: u16,
    pub inconsistent: bool,
    pub position: IVec2,
}

#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub slot: usize,
    pub started: bool,
    pub role: NetRole,
    pub arbitrator: usize,
    pub gametic: i32,
    pub client_tic: i32,
    pub lobby: u8,
    pub level: u32,
    pub level_status: LevelStartStatus,
    pub level_delay: u32,
    pub map: String,
    pub uptime_secs: u64,
    pub players: Vec<PlayerRow>,
    pub network: NetworkStats,
}

pub struct GameNode {
    config: NodeConfig,
    session: NetSession,
    transport: UdpTransport,
    world: World,
    started: bool,
    start_time: Instant,
    running: Arc<AtomicBool>,
    pending_events: VecDeque<NodeEvent>,
}

impl GameNode {
    pub fn new(config: NodeConfig) -> Result<Self> {
        let mut transport = UdpTransport::bind(config.bind_addr)
            .with_context(|| format!("binding {}", config.bind_addr))?;
        for &(slot, addr) in &config.peers {
            transport.add_peer(slot, addr);
        }
        if let Some(sim) = config.packet_loss.clone() {
            transport.set_packet_loss_sim(sim);
        }

        let mut session = NetSession::new(config.net.clone(), config.slot, config.slots())?;
        if session.is_arbitrator() {
            session.host_setup(SetupInfo {
                tic_dup: u8::try_from(config.net.tic_dup).context("tic dup above 255")?,
                packet_server: config.net.mode == lockstep::NetMode::PacketServer,
                players: config.slots().into_iter().map(|s| s as u8).collect(),
                arbitrator: config.slot as u8,
                rng_seed: config.rng_seed,
                map: config.map.clone(),
            })?;
        }

        let world = World::new(config.slot, config.rng_seed);

        Ok(Self {
            config,
            session,
            transport,
            world,
            started: false,
            start_time: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
            pending_events: VecDeque::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = NodeEvent> + '_ {
        self.collect_world_events();
        self.pending_events.drain(..)
    }

    fn collect_world_events(&mut self) {
        let events: Vec<NodeEvent> = self.world.drain_events().collect();
        for event in events {
            if let NodeEvent::PlayerLeft { player } = event
                && let Some(addr) = self.transport.remove_peer(player)
            {
                log::debug!("Forgot address {} of player {}", addr, player);
            }
            self.pending_events.push_back(event);
        }
    }

    pub fn set_input(&mut self, input: Option<IVec2>) {
        self.world.input = input;
    }

    fn now_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn run(&mut self) {
        let deadline = self
            .config
            .run_for_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        while self.running.load(Ordering::SeqCst) {
            self.frame();
            for event in self.drain_events().collect::<Vec<_>>() {
                if event.is_warning() {
                    log::warn!("{}", event.describe());
                } else {
                    log::info!("{}", event.describe());
                }
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                self.running.store(false, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown();
    }

    /// One pass of the frame loop: the startup handshake until it completes,
    /// then the lockstep update.
    pub fn frame(&mut self) {
        let now = self.now_ms();
        let result = if self.started {
            self.session
                .try_run_tics(&mut self.transport, &mut self.world, now)
                .map(|_| ())
        } else {
            self.session
                .arbitrate_net_start(&mut self.transport, now)
                .map(|ready| {
                    if ready {
                        self.begin_game();
                    }
                })
        };

        if let Err(e) = result {
            self.pending_events.push_back(NodeEvent::Error {
                message: format!("Network error: {}", e),
            });
            self.running.store(false, Ordering::SeqCst);
        }
    }

    fn begin_game(&mut self) {
        let Some(info) = self.session.setup_info().cloned() else {
            return;
        };
        self.started = true;
        self.world.reseed(info.rng_seed, info.tic_dup as u32);
        self.session.set_waiting();
        self.pending_events.push_back(NodeEvent::GameStarted {
            map: info.map,
            players: info.players.len(),
        });
    }

    pub fn shutdown(&mut self) {
        if let Err(e) = self.session.quit_net_game(&mut self.transport) {
            log::warn!("Failed to announce exit: {}", e);
        }
    }

    pub fn status(&self) -> NodeStatus {
        let players = self
            .session
            .clients()
            .iter()
            .filter_map(|slot| {
                let state = self.session.client_state(slot)?;
                Some(PlayerRow {
                    slot,
                    addr: self.transport.peer_addr(slot),
                    sequence: state.current_sequence,
                    ack: state.sequence_ack,
                    latency_ms: state.average_latency,
                    inconsistent: state.inconsistent,
                    position: self.world.position(slot),
                })
            })
            .collect();

        NodeStatus {
            slot: self.config.slot,
            started: self.started,
            role: self.session.role(),
            arbitrator: self.session.arbitrator(),
            gametic: self.session.gametic(),
            client_tic: self.session.client_tic(),
            lobby: self.session.lobby_id(),
            level: self.world.level(),
            level_status: self.session.level_status(),
            level_delay: self.session.level_delay(),
            map: self
                .session
                .setup_info()
                .map_or_else(|| self.config.map.clone(), |info| info.map.clone()),
            uptime_secs: self.start_time.elapsed().as_secs(),
            players,
            network: self.transport.stats().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NodeConfig {
        NodeConfig {
            slot: 0,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            peers: vec![(1, "127.0.0.1:9".parse().unwrap())],
            ..Default::default()
        }
    }

    #[test]
    fn status_lists_peer_addresses() {
        let node = GameNode::new(config()).unwrap();
        let status = node.status();
        assert_eq!(status.players.len(), 2);
        assert_eq!(status.players[0].addr, None);
        assert_eq!(status.players[1].addr, Some("127.0.0.1:9".parse().unwrap()));
    }

    #[test]
    fn departed_player_address_is_forgotten() {
        let mut node = GameNode::new(config()).unwrap();
        node.world.push_event(NodeEvent::PlayerLeft { player: 1 });

        let events: Vec<_> = node.drain_events().collect();

        assert!(matches!(events.as_slice(), [NodeEvent::PlayerLeft { player: 1 }]));
        assert_eq!(node.transport.peer_addr(1), None);
    }

    #[test]
    fn wide_tic_dup_is_refused() {
        let mut config = config();
        config.net.tic_dup = 300;
        assert!(GameNode::new(config).is_err());
    }
}
