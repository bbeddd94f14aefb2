use crate::net::{DecodeError, TransportError};
use crate::session::SetupError;

/// Fatal conditions. Lost, late or garbled packets never show up here.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("invalid network configuration: {0}")]
    InvalidConfig(String),
    #[error("tried to transmit to player {0} outside a network game")]
    Offline(usize),
    #[error("player slot {0} is outside the client table")]
    BadSlot(usize),
    #[error("packet for player {to} does not fit in the buffer: {source}")]
    Encode {
        to: usize,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Setup(#[from] SetupError),
}
