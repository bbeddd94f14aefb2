use serde::{Deserialize, Serialize};

use crate::error::NetError;

pub const MAXPLAYERS: usize = 16;
pub const TICRATE: u32 = 35;
pub const BACKUPTICS: usize = TICRATE as usize * 5;
pub const MAXSENDTICS: usize = TICRATE as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NetMode {
    #[default]
    PeerToPeer,
    PacketServer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    pub max_players: usize,
    pub backup_tics: usize,
    pub max_send_tics: usize,
    pub tic_rate: u32,
    pub tic_dup: u32,
    pub mode: NetMode,
    /// Legacy peer-to-peer clock balancing against the arbitrator.
    pub ticbalance: bool,
    /// Resend the last tic in every packet.
    pub extratic: bool,
    pub disable_pause: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            max_players: MAXPLAYERS,
            backup_tics: BACKUPTICS,
            max_send_tics: MAXSENDTICS,
            tic_rate: TICRATE,
            tic_dup: 1,
            mode: NetMode::PeerToPeer,
            ticbalance: false,
            extratic: false,
            disable_pause: false,
        }
    }
}

impl NetConfig {
    pub fn validate(&self) -> Result<(), NetError> {
        let invalid = |msg: String| Err(NetError::InvalidConfig(msg));

        // Level start acks are a u64 mask and player ids travel as one byte.
        if self.max_players == 0 || self.max_players > 64 {
            return invalid(format!("max_players {} not in 1..=64", self.max_players));
        }
        if self.max_send_tics == 0 || self.max_send_tics > u8::MAX as usize {
            return invalid(format!("max_send_tics {} not in 1..=255", self.max_send_tics));
        }
        if self.backup_tics < 2 * self.max_send_tics + 2 {
            return invalid(format!(
                "backup_tics {} must be at least twice max_send_tics ({})",
                self.backup_tics, self.max_send_tics
            ));
        }
        if self.tic_dup == 0 || self.tic_rate == 0 {
            return invalid("tic_dup and tic_rate must be positive".into());
        }
        // Handed to guests as one byte.
        if self.tic_dup > u8::MAX as u32 {
            return invalid(format!("tic_dup {} above 255", self.tic_dup));
        }
        Ok(())
    }

    /// Tics the arbitrator collects latency for before releasing a
    /// packet-server level start.
    pub fn latency_warmup_tics(&self) -> u32 {
        self.max_send_tics as u32 * 3
    }

    pub fn ms_to_tics(&self, ms: u32) -> u32 {
        (ms * self.tic_rate).div_ceil(1000)
    }
}
