use crate::error::NetError;
use crate::net::{Transport, write_latency};

use super::NetSession;

/// Latencies above this do not stretch the level start delay any further.
pub const MAX_LATENCY_MS: u16 = 350;

/// A probe without an answer is given up on after this long.
const PROBE_TIMEOUT_MS: u64 = 1000;

impl NetSession {
    /// Sends a latency probe to every destination that is not waiting on an
    /// answer.
    pub(super) fn send_latency_probes<T: Transport>(&mut self, transport: &mut T, now_ms: u64) -> Result<(), NetError> {
        let max_send = self.config.max_send_tics;
        for dest in self.role().ops().destinations(self) {
            let state = &mut self.states[dest];
            let probe = state.current_latency as usize % max_send;
            if state.latency_pending && now_ms.saturating_sub(state.sent_time(probe)) < PROBE_TIMEOUT_MS {
                continue;
            }
            state.set_sent_time(probe, now_ms);
            state.latency_pending = true;
            self.transmit(transport, dest, |w| write_latency(w, probe as u8, false))?;
        }
        Ok(())
    }

    pub(super) fn record_latency_ack(&mut self, from: usize, probe: u8, now_ms: u64) {
        let max_send = self.config.max_send_tics;
        let state = &mut self.states[from];
        let expected = state.current_latency as usize % max_send;
        if !state.latency_pending || probe as usize != expected {
            return;
        }

        state.set_recv_time(expected, now_ms);
        state.latency_pending = false;
        state.current_latency += 1;
        state.last_latency_update += 1;

        if state.last_latency_update >= max_send as u32 {
            state.average_latency = state.mean_round_trip();
        }
    }
}
