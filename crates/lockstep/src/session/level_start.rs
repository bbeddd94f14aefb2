use serde::{Deserialize, Serialize};

use crate::config::NetMode;
use crate::error::NetError;
use crate::game::GameHooks;
use crate::net::{Transport, write_level_ready};

use super::{MAX_LATENCY_MS, NetSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LevelStartStatus {
    #[default]
    Ready,
    /// Packet-server arbitrator counting down its own delay.
    Host,
    Waiting,
}

#[derive(Debug, Clone, Default)]
pub(super) struct LevelStart {
    pub status: LevelStartStatus,
    /// Players that reported the level loaded.
    pub ack: u64,
    /// Tics left before commands may be generated.
    pub delay: u32,
    /// Tics of latency sampling left before the arbitrator may release.
    pub full_latency_cycle: u32,
}

impl LevelStart {
    pub fn allows_commands(&self) -> bool {
        self.status != LevelStartStatus::Waiting && self.delay == 0
    }
}

impl NetSession {
    pub fn level_status(&self) -> LevelStartStatus {
        self.level.status
    }

    pub fn level_delay(&self) -> u32 {
        self.level.delay
    }

    /// Raises the barrier every node has to pass before a new level runs.
    pub fn set_waiting(&mut self) {
        if !self.netgame || self.clients.len() <= 1 {
            return;
        }
        self.level.status = LevelStartStatus::Waiting;
        self.level.ack = 0;
        self.level.delay = 0;
        if self.config.mode == NetMode::PacketServer {
            self.level.full_latency_cycle = self.config.latency_warmup_tics();
        }
        log::debug!("Waiting for level start, lobby {}", self.lobby_id);
    }

    /// Counts real tics down against the start delay and latency warmup.
    pub(super) fn advance_level_start(&mut self, elapsed: u32) {
        self.level.full_latency_cycle = self.level.full_latency_cycle.saturating_sub(elapsed);
        if self.level.status == LevelStartStatus::Waiting {
            return;
        }
        self.level.delay = self.level.delay.saturating_sub(elapsed);
        if self.level.delay == 0 && self.level.status == LevelStartStatus::Host {
            self.level.status = LevelStartStatus::Ready;
        }
    }

    /// Per-update barrier work: peers announce they are loaded and the
    /// arbitrator checks whether it can release everyone.
    pub(super) fn update_level_start<T, G>(&mut self, transport: &mut T, game: &G) -> Result<(), NetError>
    where
        T: Transport,
        G: GameHooks,
    {
        if self.level.status != LevelStartStatus::Waiting {
            return Ok(());
        }
        if self.is_arbitrator() {
            return self.try_release_level_start(transport, game);
        }
        if game.is_map_loaded() {
            let lobby = self.lobby_id;
            self.transmit(transport, self.arbitrator, |w| write_level_ready(w, lobby, None))?;
        }
        Ok(())
    }

    pub(super) fn check_level_start<T, G>(
        &mut self,
        transport: &mut T,
        game: &G,
        client: usize,
        delay: u32,
    ) -> Result<(), NetError>
    where
        T: Transport,
        G: GameHooks,
    {
        if self.level.status != LevelStartStatus::Waiting {
            // Our release got lost; say it again.
            if self.is_arbitrator() {
                let lobby = self.lobby_id;
                let delay = (self.config.mode == NetMode::PacketServer).then_some(0);
                self.transmit(transport, client, |w| write_level_ready(w, lobby, delay))?;
            }
            return Ok(());
        }

        if client == self.arbitrator {
            self.release_level_start(delay);
            return Ok(());
        }
        if !self.is_arbitrator() {
            return Ok(());
        }

        self.level.ack |= 1u64 << client;
        self.try_release_level_start(transport, game)
    }

    fn try_release_level_start<T, G>(&mut self, transport: &mut T, game: &G) -> Result<(), NetError>
    where
        T: Transport,
        G: GameHooks,
    {
        let others = self.clients.mask() & !(1u64 << self.arbitrator);
        if self.level.ack & others != others || !game.is_map_loaded() {
            return Ok(());
        }

        let packet_server = self.config.mode == NetMode::PacketServer;
        if packet_server && self.level.full_latency_cycle > 0 {
            return Ok(());
        }

        let me = self.console_player;
        let peers: Vec<(usize, u32)> = self
            .clients
            .iter()
            .filter(|&c| c != me)
            .map(|c| (c, self.states[c].average_latency.min(MAX_LATENCY_MS) as u32))
            .collect();
        let highest = if packet_server {
            peers.iter().map(|&(_, latency)| latency).max().unwrap_or(0)
        } else {
            0
        };

        let lobby = self.lobby_id;
        for (peer, latency) in peers {
            let delay = packet_server
                .then(|| self.config.ms_to_tics(highest - latency).min(u16::MAX as u32) as u16);
            self.transmit(transport, peer, |w| write_level_ready(w, lobby, delay))?;
        }

        let own_delay = self.config.ms_to_tics(highest);
        self.release_level_start(own_delay);
        Ok(())
    }

    fn release_level_start(&mut self, delay: u32) {
        self.level.ack = 0;
        self.level.delay = delay;
        self.level.status = if self.config.mode == NetMode::PacketServer && self.is_arbitrator() && delay > 0 {
            LevelStartStatus::Host
        } else {
            LevelStartStatus::Ready
        };
        log::info!("Level start released, delay {} tics", delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetConfig;
    use crate::net::{LoopbackHub, NetCommand};
    use crate::session::test_game::ScriptedGame;

    fn packet_server() -> NetConfig {
        NetConfig {
            mode: NetMode::PacketServer,
            ..Default::default()
        }
    }

    #[test]
    fn single_player_never_waits() {
        let mut session = NetSession::new(NetConfig::default(), 0, [0]).unwrap();
        session.set_waiting();
        assert_eq!(session.level_status(), LevelStartStatus::Ready);
    }

    #[test]
    fn peer_announces_once_loaded() {
        let hub = LoopbackHub::new();
        let mut transport = hub.endpoint(1);
        let mut game = ScriptedGame {
            map_loading: true,
            ..Default::default()
        };
        let mut session = NetSession::new(NetConfig::default(), 1, [0, 1]).unwrap();
        session.set_waiting();

        session.update_level_start(&mut transport, &game).unwrap();
        assert_eq!(hub.pending(0), 0);

        game.map_loading = false;
        session.update_level_start(&mut transport, &game).unwrap();
        assert_eq!(
            hub.take_queue(0),
            vec![(1, vec![NetCommand::LEVEL_READY.bits(), session.lobby_id()])]
        );
    }

    #[test]
    fn packet_server_host_delays_by_latency() {
        let hub = LoopbackHub::new();
        let mut transport = hub.endpoint(0);
        let game = ScriptedGame::default();
        let mut session = NetSession::new(packet_server(), 0, [0, 1, 2]).unwrap();
        session.set_waiting();
        session.states[1].average_latency = 100;
        session.states[2].average_latency = 900;

        session.check_level_start(&mut transport, &game, 1, 0).unwrap();
        session.check_level_start(&mut transport, &game, 2, 0).unwrap();
        // Latency warmup has not finished.
        assert_eq!(session.level_status(), LevelStartStatus::Waiting);

        session.advance_level_start(session.config().latency_warmup_tics());
        session.update_level_start(&mut transport, &game).unwrap();

        // 350 capped, 350 - 100 = 250 ms -> 9 tics, 0 ms -> 0 tics.
        let lobby = session.lobby_id();
        assert_eq!(
            hub.take_queue(1),
            vec![(0, vec![NetCommand::LEVEL_READY.bits(), lobby, 0, 9])]
        );
        assert_eq!(
            hub.take_queue(2),
            vec![(0, vec![NetCommand::LEVEL_READY.bits(), lobby, 0, 0])]
        );
        assert_eq!(session.level_status(), LevelStartStatus::Host);
        assert_eq!(session.level_delay(), 13);

        session.advance_level_start(13);
        assert_eq!(session.level_status(), LevelStartStatus::Ready);
        assert!(session.level.allows_commands());
    }

    #[test]
    fn duplicate_ready_is_answered_without_state_change() {
        let hub = LoopbackHub::new();
        let mut transport = hub.endpoint(0);
        let game = ScriptedGame::default();
        let mut session = NetSession::new(NetConfig::default(), 0, [0, 1]).unwrap();
        session.set_waiting();

        session.check_level_start(&mut transport, &game, 1, 0).unwrap();
        assert_eq!(session.level_status(), LevelStartStatus::Ready);
        assert_eq!(hub.take_queue(1).len(), 1);

        session.check_level_start(&mut transport, &game, 1, 0).unwrap();
        assert_eq!(session.level_status(), LevelStartStatus::Ready);
        assert_eq!(session.level.ack, 0);
        assert_eq!(hub.take_queue(1).len(), 1);
    }

    #[test]
    fn peer_ignores_ready_once_released() {
        let hub = LoopbackHub::new();
        let mut transport = hub.endpoint(1);
        let game = ScriptedGame::default();
        let mut session = NetSession::new(packet_server(), 1, [0, 1]).unwrap();
        session.set_waiting();

        session.check_level_start(&mut transport, &game, 0, 4).unwrap();
        assert_eq!(session.level_status(), LevelStartStatus::Ready);
        assert_eq!(session.level_delay(), 4);

        session.check_level_start(&mut transport, &game, 0, 9).unwrap();
        assert_eq!(session.level_delay(), 4);
        assert_eq!(hub.pending(0), 0);
    }
}
