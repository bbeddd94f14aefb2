mod client_state;
mod clients;
mod consistency;
mod latency;
mod level_start;
mod receive;
mod role;
mod send;
mod specials;
mod startup;
mod sync;
#[cfg(test)]
pub(crate) mod test_game;

pub use client_state::{ClientFlags, ClientState};
pub use clients::NetworkClients;
pub use latency::MAX_LATENCY_MS;
pub use level_start::LevelStartStatus;
pub use role::{NetRole, RoleOps};
pub use startup::{SetupError, SetupInfo};

use crate::config::{NetConfig, NetMode};
use crate::error::NetError;
use crate::game::GameHooks;
use crate::net::{NetBuffer, TicCommand};

use level_start::LevelStart;
use specials::SpecialStream;
use startup::StartupState;
use sync::TicPacing;

/// A quit the packet-server arbitrator keeps relaying until every peer has
/// acknowledged the sequence it happened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingQuit {
    player: usize,
    sequence: i32,
}

/// One node's view of a lockstep game.
pub struct NetSession {
    config: NetConfig,
    console_player: usize,
    netgame: bool,
    clients: NetworkClients,
    states: Vec<ClientState>,
    buffer: NetBuffer,

    /// Next gametic to generate a command for.
    client_tic: i32,
    /// Next gametic to run.
    gametic: i32,
    /// Next consistency index to record.
    current_consistency: i32,

    arbitrator: usize,
    lobby_id: u8,
    /// Last sequence and consistency index the current lobby shares with the
    /// previous one.
    epoch_sequence: i32,
    epoch_consistency: i32,
    level: LevelStart,

    commands_ahead: u8,
    skip_command_amount: u32,
    quitters: Vec<PendingQuit>,
    new_arbitrator: Option<usize>,

    specials: SpecialStream,
    pacing: TicPacing,
    startup: StartupState,
}

impl NetSession {
    pub fn new<I>(config: NetConfig, console_player: usize, clients: I) -> Result<Self, NetError>
    where
        I: IntoIterator<Item = usize>,
    {
        config.validate()?;

        let mut clients = NetworkClients::from_slots(clients);
        clients.insert(console_player);
        if let Some(bad) = clients.iter().find(|&c| c >= config.max_players) {
            return Err(NetError::BadSlot(bad));
        }

        let states = (0..config.max_players)
            .map(|_| ClientState::new(config.backup_tics, config.max_send_tics))
            .collect();
        let arbitrator = clients.first().unwrap_or(console_player);
        let netgame = clients.len() > 1;

        log::info!(
            "Net session: player {} of {:?}, arbitrator {}, {:?}",
            console_player,
            clients.as_slice(),
            arbitrator,
            config.mode
        );

        Ok(Self {
            config,
            console_player,
            netgame,
            clients,
            states,
            buffer: NetBuffer::new(),
            client_tic: 0,
            gametic: 0,
            current_consistency: 0,
            arbitrator,
            lobby_id: 0,
            epoch_sequence: -1,
            epoch_consistency: -1,
            level: LevelStart::default(),
            commands_ahead: 0,
            skip_command_amount: 0,
            quitters: Vec::new(),
            new_arbitrator: None,
            specials: SpecialStream::default(),
            pacing: TicPacing::default(),
            startup: StartupState::default(),
        })
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn mode(&self) -> NetMode {
        self.config.mode
    }

    pub fn console_player(&self) -> usize {
        self.console_player
    }

    pub fn arbitrator(&self) -> usize {
        self.arbitrator
    }

    pub fn is_arbitrator(&self) -> bool {
        self.arbitrator == self.console_player
    }

    pub fn is_netgame(&self) -> bool {
        self.netgame
    }

    pub fn clients(&self) -> &NetworkClients {
        &self.clients
    }

    pub fn role(&self) -> NetRole {
        if !self.netgame {
            NetRole::SinglePlayer
        } else if self.config.mode == NetMode::PacketServer && self.is_arbitrator() {
            NetRole::Server
        } else {
            NetRole::Client
        }
    }

    pub fn gametic(&self) -> i32 {
        self.gametic
    }

    pub fn client_tic(&self) -> i32 {
        self.client_tic
    }

    pub fn lobby_id(&self) -> u8 {
        self.lobby_id
    }

    pub fn commands_ahead(&self) -> u8 {
        self.commands_ahead
    }

    pub fn skip_command_amount(&self) -> u32 {
        self.skip_command_amount
    }

    pub fn client_state(&self, player: usize) -> Option<&ClientState> {
        self.states.get(player)
    }

    pub fn is_inconsistent(&self, player: usize) -> bool {
        self.states.get(player).is_some_and(|s| s.inconsistent)
    }

    /// Pausing is refused in network games when configured so.
    pub fn pause_allowed(&self) -> bool {
        !(self.netgame && self.config.disable_pause)
    }

    /// The command `player` issued for `tic`, if it is still buffered.
    pub fn player_input(&self, tic: i32, player: usize) -> Option<&TicCommand> {
        let state = self.states.get(player)?;
        let sequence = tic / self.config.tic_dup as i32;
        let oldest = state.current_sequence - self.config.backup_tics as i32 + 1;
        if !self.clients.contains(player) || sequence > state.current_sequence || sequence < oldest.max(0) {
            return None;
        }
        Some(state.tic(sequence))
    }

    /// Average round trip for every other player, in milliseconds.
    pub fn pings(&self) -> Vec<(usize, u16)> {
        self.clients
            .iter()
            .filter(|&c| c != self.console_player)
            .map(|c| (c, self.states[c].average_latency))
            .collect()
    }

    /// Moves the clocks to `gametic`, as after loading a save.
    pub fn set_gametic(&mut self, gametic: i32) {
        let tic_dup = self.config.tic_dup as i32;
        self.gametic = gametic.max(0);
        self.client_tic = (self.gametic + tic_dup - 1) / tic_dup * tic_dup;
        self.current_consistency = self.gametic / tic_dup;
    }

    #[inline]
    fn sequence_of(&self, tic: i32) -> i32 {
        tic / self.config.tic_dup as i32
    }

    fn bump_lobby(&mut self) {
        self.lobby_id = self.lobby_id.wrapping_add(1);
    }

    /// Throws away every buffered command so the game restarts from a clean
    /// slate. Membership and the arbitrator are kept.
    pub fn clear_buffers(&mut self) {
        for state in &mut self.states {
            state.reset();
        }
        self.client_tic = 0;
        self.gametic = 0;
        self.current_consistency = 0;
        self.level = LevelStart::default();
        self.commands_ahead = 0;
        self.skip_command_amount = 0;
        self.quitters.clear();
        self.new_arbitrator = None;
        self.specials.clear();
        self.pacing = TicPacing::default();
        self.epoch_sequence = -1;
        self.epoch_consistency = -1;
        self.bump_lobby();
        log::info!("Net buffers cleared, lobby {}", self.lobby_id);
    }

    /// Rewinds every stream to the current gametic. `mid_tic` is set when
    /// called from inside a running tic, which then counts as the last tic
    /// of its sequence.
    pub fn reset_commands(&mut self, mid_tic: bool) {
        self.bump_lobby();

        let tic_dup = self.config.tic_dup as i32;
        let mut tic = self.gametic / tic_dup;
        if mid_tic {
            self.client_tic = (tic + 1) * tic_dup;
            self.gametic = tic * tic_dup + tic_dup - 1;
        } else {
            self.client_tic = tic * tic_dup;
            self.gametic = self.client_tic;
            tic -= 1;
        }

        self.current_consistency = self.current_consistency.min(tic + 1);
        let last_consistency = self.current_consistency - 1;
        self.epoch_sequence = tic;
        self.epoch_consistency = last_consistency;

        for client in self.clients.iter() {
            let state = &mut self.states[client];
            state.flags &= ClientFlags::QUIT;
            state.current_sequence = state.current_sequence.min(tic);
            state.sequence_ack = state.sequence_ack.min(tic);
            state.resend_sequence_from = state.sequence_ack + 1;
            state.current_net_consistency = state.current_net_consistency.min(last_consistency);
            state.consistency_ack = state.consistency_ack.min(last_consistency);
            state.resend_consistency_from = state.consistency_ack + 1;
            state.last_verified_consistency = state
                .last_verified_consistency
                .min(self.current_consistency);
            state.stalled_acks = 0;
        }

        self.commands_ahead = 0;
        self.skip_command_amount = 0;
        self.specials.clear();

        log::debug!(
            "Commands reset: lobby {}, gametic {}, client tic {}",
            self.lobby_id,
            self.gametic,
            self.client_tic
        );
    }

    /// Removes `player` from the game, migrating the arbitrator if needed.
    pub fn disconnect_player<G: GameHooks>(&mut self, player: usize, game: &mut G) {
        if !self.clients.remove(player) {
            return;
        }
        self.states[player].reset();
        self.level.ack &= !(1u64 << player);
        game.player_left(player);
        game.check_demo_status();
        log::info!("Player {} left the game", player);

        if self.config.mode == NetMode::PacketServer
            && self.is_arbitrator()
            && player != self.console_player
        {
            self.quitters.push(PendingQuit {
                player,
                sequence: self.states[self.console_player].current_sequence + 1,
            });
        }

        if player == self.arbitrator {
            let hint = self.new_arbitrator.take().filter(|&h| self.clients.contains(h));
            let next = hint.or(self.clients.first()).unwrap_or(self.console_player);
            self.arbitrator = next;
            self.level.ack = 0;
            game.arbitrator_changed(next);
            log::info!("Player {} is the new arbitrator", next);

            if self.config.mode == NetMode::PacketServer {
                for client in self.clients.iter() {
                    self.states[client].reset_latency();
                }
                self.level.full_latency_cycle = self.config.latency_warmup_tics();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_game::ScriptedGame;
    use super::*;

    fn config(mode: NetMode, tic_dup: u32) -> NetConfig {
        NetConfig {
            mode,
            tic_dup,
            ..Default::default()
        }
    }

    #[test]
    fn arbitrator_migrates_to_lowest_remaining_slot() {
        let mut session = NetSession::new(config(NetMode::PacketServer, 1), 3, [0, 2, 3]).unwrap();
        let mut game = ScriptedGame::default();
        session.states[2].average_latency = 90;
        session.states[3].average_latency = 40;

        session.disconnect_player(0, &mut game);

        assert_eq!(session.arbitrator(), 2);
        assert_eq!(session.clients().as_slice(), &[2, 3]);
        assert_eq!(session.states[2].average_latency, 0);
        assert_eq!(session.states[3].average_latency, 0);
        assert_eq!(session.level.full_latency_cycle, session.config().latency_warmup_tics());
        assert_eq!(game.left, vec![0]);
        assert_eq!(game.arbitrators, vec![2]);
    }

    #[test]
    fn exit_hint_picks_the_new_arbitrator() {
        let mut session = NetSession::new(config(NetMode::PacketServer, 1), 2, [0, 2, 3]).unwrap();
        let mut game = ScriptedGame::default();
        session.new_arbitrator = Some(3);

        session.disconnect_player(0, &mut game);

        assert_eq!(session.arbitrator(), 3);
        assert_eq!(session.role(), NetRole::Client);
    }

    #[test]
    fn reset_mid_tic_rewinds_to_sequence_end() {
        let mut session = NetSession::new(config(NetMode::PeerToPeer, 2), 0, [0, 1]).unwrap();
        session.set_gametic(17);
        session.states[0].current_sequence = 12;
        session.states[1].current_sequence = 10;
        session.states[1].sequence_ack = 11;
        session.states[1].flags = ClientFlags::MISSING_SEQ | ClientFlags::UPDATED;
        let lobby = session.lobby_id();

        session.reset_commands(true);

        assert_eq!(session.client_tic(), 18);
        assert_eq!(session.gametic(), 17);
        assert_eq!(session.lobby_id(), lobby.wrapping_add(1));
        assert_eq!(session.states[0].current_sequence, 8);
        assert_eq!(session.states[1].current_sequence, 8);
        assert_eq!(session.states[1].sequence_ack, 8);
        assert_eq!(session.states[1].resend_sequence_from, 9);
        assert!(session.states[1].flags.is_empty());
    }

    #[test]
    fn reset_between_tics_drops_the_pending_sequence() {
        let mut session = NetSession::new(config(NetMode::PeerToPeer, 1), 0, [0, 1]).unwrap();
        session.set_gametic(10);
        session.states[0].current_sequence = 14;
        session.states[1].current_sequence = 12;
        session.states[1].flags = ClientFlags::QUIT | ClientFlags::RETRANSMIT;

        session.reset_commands(false);

        assert_eq!(session.client_tic(), 10);
        assert_eq!(session.gametic(), 10);
        assert_eq!(session.states[0].current_sequence, 9);
        assert_eq!(session.states[1].current_sequence, 9);
        assert_eq!(session.states[1].flags, ClientFlags::QUIT);
    }

    #[test]
    fn clear_buffers_keeps_membership() {
        let mut session = NetSession::new(config(NetMode::PeerToPeer, 1), 1, [0, 1, 2]).unwrap();
        session.set_gametic(40);
        session.states[2].current_sequence = 44;

        session.clear_buffers();

        assert_eq!(session.gametic(), 0);
        assert_eq!(session.client_tic(), 0);
        assert_eq!(session.states[2].current_sequence, -1);
        assert_eq!(session.clients().as_slice(), &[0, 1, 2]);
        assert_eq!(session.lobby_id(), 1);
    }

    #[test]
    fn rejects_slots_beyond_the_table() {
        let result = NetSession::new(NetConfig::default(), 0, [0, 16]);
        assert!(matches!(result, Err(NetError::BadSlot(16))));
    }

    #[test]
    fn pause_follows_config_in_netgames() {
        let mut cfg = NetConfig::default();
        cfg.disable_pause = true;
        assert!(NetSession::new(cfg.clone(), 0, [0]).unwrap().pause_allowed());
        assert!(!NetSession::new(cfg, 0, [0, 1]).unwrap().pause_allowed());
    }
}
