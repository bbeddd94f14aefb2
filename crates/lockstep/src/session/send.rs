use crate::config::NetMode;
use crate::error::NetError;
use crate::net::{DecodeError, PacketWriter, PlayerBlock, TicPacket, Transport, write_exit};

use super::{ClientFlags, NetSession};

/// Times an exit is sent, since nobody acknowledges it.
const EXIT_REPEAT: usize = 4;

/// Inclusive range of indices to put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SendWindow {
    from: i32,
    count: i32,
}

impl SendWindow {
    fn new(resend_from: i32, ack: i32, available: i32, oldest: i32, cap: usize) -> Self {
        let from = resend_from.max(ack + 1).max(oldest);
        let count = (available - from + 1).clamp(0, cap as i32);
        Self { from, count }
    }

    fn last(&self) -> i32 {
        self.from + self.count - 1
    }
}

impl NetSession {
    /// Writes one packet into the shared buffer and hands it to the
    /// transport.
    pub(super) fn transmit<T, F>(&mut self, transport: &mut T, to: usize, write: F) -> Result<(), NetError>
    where
        T: Transport,
        F: FnOnce(&mut PacketWriter<'_>) -> Result<(), DecodeError>,
    {
        if !self.netgame {
            return Err(NetError::Offline(to));
        }
        let mut w = self.buffer.writer();
        write(&mut w).map_err(|source| NetError::Encode { to, source })?;
        w.finish();
        transport.send(to, self.buffer.as_slice())?;
        Ok(())
    }

    /// Sends every destination the commands and consistencies it has not
    /// acknowledged yet.
    pub fn send_tic_packets<T: Transport>(&mut self, transport: &mut T) -> Result<(), NetError> {
        let ops = self.role().ops();
        let host_fields = ops.writes_host_fields();

        for dest in ops.destinations(self) {
            let players = ops.relayed_players(self, dest);
            let sources = ops.sources(self, dest);
            self.send_tic_packet(transport, dest, &players, &sources, host_fields)?;
        }

        if host_fields {
            self.retire_quitters();
        }
        Ok(())
    }

    fn send_tic_packet<T: Transport>(
        &mut self,
        transport: &mut T,
        dest: usize,
        players: &[usize],
        sources: &[usize],
        host_fields: bool,
    ) -> Result<(), NetError> {
        let me = self.console_player;
        let backup = self.config.backup_tics as i32;
        let max_send = self.config.max_send_tics;

        let available_sequence = players
            .iter()
            .map(|&p| self.states[p].current_sequence)
            .min()
            .unwrap_or(-1);
        let available_consistency = players
            .iter()
            .map(|&p| self.states[p].current_net_consistency)
            .min()
            .unwrap_or(-1);

        let state = &self.states[dest];
        let mut tics = SendWindow::new(
            state.resend_sequence_from,
            state.sequence_ack,
            available_sequence,
            available_sequence - backup + 1,
            max_send,
        );
        let ran = SendWindow::new(
            state.resend_consistency_from,
            state.consistency_ack,
            available_consistency,
            available_consistency - backup + 1,
            max_send,
        );

        let ack_of = |f: fn(&super::ClientState) -> i32| {
            sources.iter().map(|&p| f(&self.states[p])).min().unwrap_or(-1)
        };
        let sequence_ack = ack_of(|s| s.current_sequence);
        let consistency_ack = ack_of(|s| s.current_net_consistency);

        let quitters = if host_fields {
            self.quitters
                .iter()
                .filter(|q| state.sequence_ack < q.sequence)
                .map(|q| q.player as u8)
                .collect()
        } else {
            Vec::new()
        };
        let commands_ahead = host_fields.then(|| {
            (state.current_sequence - self.states[me].current_sequence).clamp(0, u8::MAX as i32) as u8
        });
        let retransmit = state
            .flags
            .intersects(ClientFlags::MISSING_SEQ | ClientFlags::MISSING_CON);

        loop {
            let packet = TicPacket {
                retransmit,
                lobby_id: self.lobby_id,
                sequence_ack,
                consistency_ack,
                quitters: quitters.clone(),
                base_sequence: tics.from,
                base_consistency: ran.from,
                commands_ahead,
                players: players
                    .iter()
                    .map(|&p| {
                        let source = &self.states[p];
                        PlayerBlock {
                            player: p as u8,
                            latency: host_fields.then_some(source.average_latency),
                            consistencies: (0..ran.count)
                                .map(|i| (i as u8, source.net_consistency(ran.from + i)))
                                .collect(),
                            tics: (0..tics.count)
                                .map(|i| (i as u8, source.tic(tics.from + i).clone()))
                                .collect(),
                        }
                    })
                    .collect(),
            };

            match self.transmit(transport, dest, |w| packet.write(w, host_fields)) {
                Err(NetError::Encode {
                    source: DecodeError::BufferFull { .. },
                    ..
                }) if tics.count > 1 => {
                    tics.count /= 2;
                    log::debug!("Packet for {} too large, sending {} tics", dest, tics.count);
                }
                result => {
                    result?;
                    break;
                }
            }
        }

        let extratic = self.config.extratic as i32;
        let state = &mut self.states[dest];
        if tics.count > 0 {
            state.resend_sequence_from = tics.last() + 1 - extratic;
        }
        if ran.count > 0 {
            state.resend_consistency_from = ran.last() + 1;
        }
        Ok(())
    }

    /// Forgets quits every remaining peer has acknowledged.
    fn retire_quitters(&mut self) {
        let states = &self.states;
        let clients = &self.clients;
        let me = self.console_player;
        self.quitters.retain(|q| {
            clients
                .iter()
                .filter(|&c| c != me)
                .any(|c| states[c].sequence_ack < q.sequence)
        });
    }

    /// Tells everyone we are leaving.
    pub fn quit_net_game<T: Transport>(&mut self, transport: &mut T) -> Result<(), NetError> {
        if !self.netgame {
            return Ok(());
        }
        let me = self.console_player;
        let new_host = (self.config.mode == NetMode::PacketServer && self.is_arbitrator())
            .then(|| self.clients.iter().find(|&c| c != me))
            .flatten()
            .map(|c| c as u8);

        let destinations = self.role().ops().destinations(self);
        for _ in 0..EXIT_REPEAT {
            for &dest in &destinations {
                self.transmit(transport, dest, |w| write_exit(w, new_host))?;
            }
        }
        log::info!("Left the network game");
        Ok(())
    }
}
