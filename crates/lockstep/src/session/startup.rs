use rkyv::{Archive, Deserialize, Serialize, rancor, util::AlignedVec};

use crate::config::NetMode;
use crate::error::NetError;
use crate::net::{PacketKind, Transport, write_setup};

use super::{NetSession, NetworkClients};

const SETUP_HELLO: u8 = 0;
const SETUP_INFO: u8 = 1;

const HELLO_INTERVAL_MS: u64 = 100;

/// Game settings the arbitrator hands every guest before play starts.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct SetupInfo {
    pub tic_dup: u8,
    pub packet_server: bool,
    pub players: Vec<u8>,
    pub arbitrator: u8,
    pub rng_seed: u32,
    pub map: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("empty setup message")]
    Empty,
    #[error("unknown setup message kind {0}")]
    UnknownKind(u8),
    #[error("setup archive failed: {0}")]
    Archive(rancor::Error),
    #[error("invalid setup: {0}")]
    Invalid(&'static str),
}

impl SetupInfo {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SetupError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(SetupError::Archive)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SetupError> {
        // Datagram payloads start at arbitrary offsets.
        let mut aligned = AlignedVec::<16>::new();
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(SetupError::Archive)
    }

    pub fn mode(&self) -> NetMode {
        if self.packet_server {
            NetMode::PacketServer
        } else {
            NetMode::PeerToPeer
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SetupMessage {
    Hello { have_info: bool },
    Info(SetupInfo),
}

impl SetupMessage {
    fn encode(&self) -> Result<Vec<u8>, SetupError> {
        match self {
            SetupMessage::Hello { have_info } => Ok(vec![SETUP_HELLO, *have_info as u8]),
            SetupMessage::Info(info) => {
                let mut bytes = vec![SETUP_INFO];
                bytes.extend(info.to_bytes()?);
                Ok(bytes)
            }
        }
    }

    fn decode(payload: &[u8]) -> Result<Self, SetupError> {
        let (&kind, rest) = payload.split_first().ok_or(SetupError::Empty)?;
        match kind {
            SETUP_HELLO => Ok(SetupMessage::Hello {
                have_info: rest.first().is_some_and(|&b| b != 0),
            }),
            SETUP_INFO => SetupInfo::from_bytes(rest).map(SetupMessage::Info),
            other => Err(SetupError::UnknownKind(other)),
        }
    }
}

#[derive(Debug, Default)]
pub(super) struct StartupState {
    info: Option<SetupInfo>,
    /// Guests the arbitrator has heard a hello from.
    greeted: u64,
    last_hello_ms: Option<u64>,
}

impl NetSession {
    /// Settings the arbitrator hands out during startup.
    pub fn host_setup(&mut self, info: SetupInfo) -> Result<(), NetError> {
        self.apply_setup(&info)?;
        self.startup.info = Some(info);
        Ok(())
    }

    pub fn setup_info(&self) -> Option<&SetupInfo> {
        self.startup.info.as_ref()
    }

    /// One polling step of the pre-game handshake. Returns `true` once this
    /// node can start: guests when they hold the settings, the arbitrator
    /// when every guest has checked in.
    pub fn arbitrate_net_start<T: Transport>(&mut self, transport: &mut T, now_ms: u64) -> Result<bool, NetError> {
        if !self.netgame {
            return Ok(true);
        }

        while let Some((from, len)) = transport.poll(self.buffer.raw_mut())? {
            self.buffer.set_len(len);
            let data = self.buffer.as_slice();
            if data.first().map(|&f| PacketKind::classify(f)) != Some(PacketKind::Setup) {
                log::debug!("Ignoring non-setup packet from {} during startup", from);
                continue;
            }
            let payload = data[1..].to_vec();
            self.handle_setup(transport, from, &payload)?;
        }

        if self.is_arbitrator() {
            let guests = self.clients.mask() & !(1u64 << self.console_player);
            return Ok(self.startup.info.is_some() && self.startup.greeted & guests == guests);
        }

        if self.startup.info.is_some() {
            return Ok(true);
        }
        let due = self
            .startup
            .last_hello_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= HELLO_INTERVAL_MS);
        if due {
            self.startup.last_hello_ms = Some(now_ms);
            let hello = SetupMessage::Hello { have_info: false }.encode()?;
            self.transmit(transport, self.arbitrator, |w| write_setup(w, &hello))?;
        }
        Ok(false)
    }

    /// Also runs in game: a guest whose settings were lost keeps saying hello
    /// and the arbitrator answers it from here.
    pub(super) fn handle_setup<T: Transport>(&mut self, transport: &mut T, from: usize, payload: &[u8]) -> Result<(), NetError> {
        let message = match SetupMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Bad setup message from {}: {}", from, e);
                return Ok(());
            }
        };

        match message {
            SetupMessage::Hello { have_info } => {
                if !self.is_arbitrator() || !self.clients.contains(from) {
                    return Ok(());
                }
                if self.startup.greeted & (1u64 << from) == 0 {
                    log::info!("Player {} checked in (has settings: {})", from, have_info);
                }
                self.startup.greeted |= 1u64 << from;
                if let Some(info) = &self.startup.info {
                    let bytes = SetupMessage::Info(info.clone()).encode()?;
                    self.transmit(transport, from, |w| write_setup(w, &bytes))?;
                }
            }
            SetupMessage::Info(info) => {
                if from != self.arbitrator || self.startup.info.is_some() {
                    return Ok(());
                }
                self.apply_setup(&info)?;
                log::info!(
                    "Received settings from {}: map {}, {:?}, tic dup {}",
                    from,
                    info.map,
                    info.mode(),
                    info.tic_dup
                );
                self.startup.info = Some(info);
            }
        }
        Ok(())
    }

    fn apply_setup(&mut self, info: &SetupInfo) -> Result<(), SetupError> {
        if info.tic_dup == 0 {
            return Err(SetupError::Invalid("tic dup is zero"));
        }
        let players = NetworkClients::from_slots(info.players.iter().map(|&p| p as usize));
        let arbitrator = info.arbitrator as usize;
        if players.iter().any(|p| p >= self.config.max_players) {
            return Err(SetupError::Invalid("player slot out of range"));
        }
        if !players.contains(self.console_player) || !players.contains(arbitrator) {
            return Err(SetupError::Invalid("player list misses us or the arbitrator"));
        }

        self.config.tic_dup = info.tic_dup as u32;
        self.config.mode = info.mode();
        self.netgame = players.len() > 1;
        self.clients = players;
        self.arbitrator = arbitrator;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetConfig;
    use crate::net::{LoopbackHub, NetCommand};

    fn info() -> SetupInfo {
        SetupInfo {
            tic_dup: 2,
            packet_server: true,
            players: vec![0, 1, 2],
            arbitrator: 0,
            rng_seed: 0xC0FFEE,
            map: "E1M1".into(),
        }
    }

    #[test]
    fn handshake_hands_out_settings() {
        let hub = LoopbackHub::new();
        let mut transports: Vec<_> = (0..3).map(|slot| hub.endpoint(slot)).collect();
        let mut sessions: Vec<_> = (0..3)
            .map(|me| NetSession::new(NetConfig::default(), me, [0, 1, 2]).unwrap())
            .collect();
        sessions[0].host_setup(info()).unwrap();

        let mut done = [false; 3];
        for step in 0..10 {
            for slot in 0..3 {
                done[slot] = sessions[slot]
                    .arbitrate_net_start(&mut transports[slot], step * 100)
                    .unwrap();
            }
        }

        assert_eq!(done, [true; 3]);
        for session in &sessions {
            assert_eq!(session.setup_info(), Some(&info()));
            assert_eq!(session.config().tic_dup, 2);
            assert_eq!(session.mode(), NetMode::PacketServer);
        }
    }

    #[test]
    fn lost_settings_are_resent_in_game() {
        let hub = LoopbackHub::new();
        let mut host_transport = hub.endpoint(0);
        let mut guest_transport = hub.endpoint(1);
        let mut host = NetSession::new(NetConfig::default(), 0, [0, 1]).unwrap();
        let mut guest = NetSession::new(NetConfig::default(), 1, [0, 1]).unwrap();
        let mut info = info();
        info.players = vec![0, 1];
        info.packet_server = false;
        host.host_setup(info.clone()).unwrap();

        assert!(!guest.arbitrate_net_start(&mut guest_transport, 0).unwrap());
        assert!(host.arbitrate_net_start(&mut host_transport, 0).unwrap());
        hub.take_queue(1);

        assert!(!guest.arbitrate_net_start(&mut guest_transport, 100).unwrap());
        let mut game = crate::session::test_game::ScriptedGame::default();
        host.get_packets(&mut host_transport, &mut game, 100).unwrap();
        assert!(guest.arbitrate_net_start(&mut guest_transport, 200).unwrap());
        assert_eq!(guest.setup_info(), Some(&info));
    }

    #[test]
    fn garbage_setup_is_ignored() {
        let hub = LoopbackHub::new();
        let mut transport = hub.endpoint(0);
        let mut host = NetSession::new(NetConfig::default(), 0, [0, 1]).unwrap();
        let mut info = info();
        info.players = vec![0, 1];
        host.host_setup(info).unwrap();
        hub.inject(0, 1, vec![NetCommand::SETUP.bits(), 9, 9]);
        hub.inject(0, 1, vec![NetCommand::SETUP.bits(), SETUP_INFO, 1, 2]);

        assert!(!host.arbitrate_net_start(&mut transport, 0).unwrap());
    }

    #[test]
    fn settings_must_include_the_receiver() {
        let mut session = NetSession::new(NetConfig::default(), 3, [0, 3]).unwrap();
        let result = session.host_setup(info());
        assert!(matches!(result, Err(NetError::Setup(SetupError::Invalid(_)))));
    }
}
