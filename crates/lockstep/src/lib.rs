pub mod config;
pub mod error;
pub mod game;
pub mod net;
pub mod session;

pub use config::{BACKUPTICS, MAXPLAYERS, MAXSENDTICS, NetConfig, NetMode, TICRATE};
pub use error::NetError;
pub use game::{GameHooks, TicOutcome};
pub use net::{
    DEFAULT_PORT, LoopbackHub, LoopbackTransport, NetworkStats, PacketLossSimulation, TicCommand,
    Transport, TransportError, UdpTransport, UserCmd,
};
pub use session::{
    ClientFlags, ClientState, LevelStartStatus, MAX_LATENCY_MS, NetRole, NetSession,
    NetworkClients, RoleOps, SetupError, SetupInfo,
};
