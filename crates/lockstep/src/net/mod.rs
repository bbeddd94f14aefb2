mod buffer;
mod cmd;
mod protocol;
mod stats;
mod transport;

pub use buffer::{DecodeError, MAX_PACKET_SIZE, NetBuffer, PacketReader, PacketWriter};
pub use cmd::{TicCommand, UserCmd, UserCmdFields};
pub use protocol::{
    DEFAULT_PORT, NetCommand, PacketKind, PlayerBlock, TIC_HEADER_SIZE, TicPacket, packet_size,
    write_exit, write_latency, write_level_ready, write_setup,
};
pub use stats::{NetworkStats, PacketLossSimulation};
pub use transport::{LoopbackHub, LoopbackTransport, Transport, TransportError, UdpTransport};
