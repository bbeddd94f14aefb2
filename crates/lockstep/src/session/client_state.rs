use bitflags::bitflags;

use crate::net::TicCommand;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClientFlags: u8 {
        const QUIT = 1 << 0;
        /// Something arrived from this client during the current drain.
        const UPDATED = 1 << 1;
        /// The client asked us to resend.
        const RETRANSMIT = 1 << 2;
        /// A gap in this client's commands; ask for a resend.
        const MISSING_SEQ = 1 << 3;
        /// A gap in this client's consistencies; ask for a resend.
        const MISSING_CON = 1 << 4;
    }
}

impl ClientFlags {
    /// Cleared at the start of every packet drain.
    pub const TRANSIENT: Self = Self::UPDATED
        .union(Self::RETRANSMIT)
        .union(Self::MISSING_SEQ)
        .union(Self::MISSING_CON);
}

/// Everything tracked for one player slot. Sequence numbers start at -1,
/// meaning nothing has been received yet.
#[derive(Debug, Clone)]
pub struct ClientState {
    pub current_sequence: i32,
    pub sequence_ack: i32,
    pub resend_sequence_from: i32,
    pub current_net_consistency: i32,
    /// Next consistency index to compare against our own.
    pub last_verified_consistency: i32,
    pub consistency_ack: i32,
    pub resend_consistency_from: i32,

    pub average_latency: u16,
    pub current_latency: u32,
    pub last_latency_update: u32,
    pub latency_pending: bool,
    sent_time: Vec<u64>,
    recv_time: Vec<u64>,

    pub flags: ClientFlags,
    pub inconsistent: bool,
    /// Packets seen without the ack moving while we had unacked tics.
    pub stalled_acks: u32,

    tics: Vec<TicCommand>,
    net_consistency: Vec<u16>,
    local_consistency: Vec<u16>,
}

impl ClientState {
    pub fn new(backup_tics: usize, max_send_tics: usize) -> Self {
        Self {
            current_sequence: -1,
            sequence_ack: -1,
            resend_sequence_from: 0,
            current_net_consistency: -1,
            last_verified_consistency: 0,
            consistency_ack: -1,
            resend_consistency_from: 0,
            average_latency: 0,
            current_latency: 0,
            last_latency_update: 0,
            latency_pending: false,
            sent_time: vec![0; max_send_tics],
            recv_time: vec![0; max_send_tics],
            flags: ClientFlags::empty(),
            inconsistent: false,
            stalled_acks: 0,
            tics: vec![TicCommand::default(); backup_tics],
            net_consistency: vec![0; backup_tics],
            local_consistency: vec![0; backup_tics],
        }
    }

    /// Returns the slot to its freshly constructed state, keeping the ring
    /// allocations.
    pub fn reset(&mut self) {
        self.current_sequence = -1;
        self.sequence_ack = -1;
        self.resend_sequence_from = 0;
        self.current_net_consistency = -1;
        self.last_verified_consistency = 0;
        self.consistency_ack = -1;
        self.resend_consistency_from = 0;
        self.reset_latency();
        self.flags = ClientFlags::empty();
        self.inconsistent = false;
        self.stalled_acks = 0;
        self.tics.iter_mut().for_each(TicCommand::clear);
        self.net_consistency.fill(0);
        self.local_consistency.fill(0);
    }

    pub fn reset_latency(&mut self) {
        self.average_latency = 0;
        self.current_latency = 0;
        self.last_latency_update = 0;
        self.latency_pending = false;
        self.sent_time.fill(0);
        self.recv_time.fill(0);
    }

    #[inline]
    fn ring(len: usize, index: i32) -> usize {
        index.rem_euclid(len as i32) as usize
    }

    pub fn tic(&self, sequence: i32) -> &TicCommand {
        &self.tics[Self::ring(self.tics.len(), sequence)]
    }

    pub fn tic_mut(&mut self, sequence: i32) -> &mut TicCommand {
        let slot = Self::ring(self.tics.len(), sequence);
        &mut self.tics[slot]
    }

    pub fn net_consistency(&self, index: i32) -> u16 {
        self.net_consistency[Self::ring(self.net_consistency.len(), index)]
    }

    pub fn set_net_consistency(&mut self, index: i32, value: u16) {
        let slot = Self::ring(self.net_consistency.len(), index);
        self.net_consistency[slot] = value;
    }

    pub fn local_consistency(&self, index: i32) -> u16 {
        self.local_consistency[Self::ring(self.local_consistency.len(), index)]
    }

    pub fn set_local_consistency(&mut self, index: i32, value: u16) {
        let slot = Self::ring(self.local_consistency.len(), index);
        self.local_consistency[slot] = value;
    }

    pub fn sent_time(&self, probe: usize) -> u64 {
        self.sent_time[probe % self.sent_time.len()]
    }

    pub fn set_sent_time(&mut self, probe: usize, now_ms: u64) {
        let slot = probe % self.sent_time.len();
        self.sent_time[slot] = now_ms;
    }

    pub fn set_recv_time(&mut self, probe: usize, now_ms: u64) {
        let slot = probe % self.recv_time.len();
        self.recv_time[slot] = now_ms;
    }

    /// Mean round trip over the probe window.
    pub fn mean_round_trip(&self) -> u16 {
        let total: u64 = self
            .sent_time
            .iter()
            .zip(&self.recv_time)
            .map(|(&sent, &recv)| recv.saturating_sub(sent))
            .sum();
        (total / self.sent_time.len() as u64).min(u16::MAX as u64) as u16
    }
}
