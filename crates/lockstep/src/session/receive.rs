use crate::config::NetMode;
use crate::error::NetError;
use crate::game::GameHooks;
use crate::net::{PacketKind, TicPacket, Transport, packet_size, write_latency};

use super::{ClientFlags, NetSession};

/// Packets without ack progress before the send window is rewound.
pub(super) const RESEND_COUNT: u32 = 10;

/// Lobby of an incoming tic packet relative to ours. Around a reset the
/// peers straddle two lobbies for a while and still have to fill each
/// other's gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Epoch {
    Current,
    /// The sender already reset; everything it has is from before the reset.
    Ahead,
    /// The sender has not reached the reset we already ran.
    Behind,
}

impl NetSession {
    /// Drains every waiting packet, then drops players that quit.
    pub fn get_packets<T, G>(&mut self, transport: &mut T, game: &mut G, now_ms: u64) -> Result<(), NetError>
    where
        T: Transport,
        G: GameHooks,
    {
        for client in self.clients.iter() {
            self.states[client].flags.remove(ClientFlags::TRANSIENT);
        }

        while let Some((from, len)) = transport.poll(self.buffer.raw_mut())? {
            self.buffer.set_len(len);
            self.handle_packet(transport, game, from, now_ms)?;
        }

        self.process_quitters(game);
        Ok(())
    }

    fn handle_packet<T, G>(&mut self, transport: &mut T, game: &mut G, from: usize, now_ms: u64) -> Result<(), NetError>
    where
        T: Transport,
        G: GameHooks,
    {
        if from >= self.config.max_players || from == self.console_player {
            log::debug!("Dropping packet from invalid slot {}", from);
            return Ok(());
        }

        let host_fields = self.config.mode == NetMode::PacketServer && from == self.arbitrator;
        let data = self.buffer.as_slice();
        match packet_size(data, host_fields) {
            Ok(size) if size == data.len() => {}
            Ok(size) => {
                log::debug!("Bad packet length {} from {} (should be {})", data.len(), from, size);
                return Ok(());
            }
            Err(e) => {
                log::debug!("Unreadable packet from {}: {}", from, e);
                return Ok(());
            }
        }

        let kind = PacketKind::classify(data[0]);
        let byte1 = data.get(1).copied();
        let in_game = self.clients.contains(from);

        match kind {
            PacketKind::Exit => {
                if !in_game {
                    return Ok(());
                }
                self.states[from].flags |= ClientFlags::QUIT;
                if host_fields {
                    self.new_arbitrator = byte1.map(usize::from);
                }
            }
            PacketKind::Setup => {
                let payload = data[1..].to_vec();
                self.handle_setup(transport, from, &payload)?;
            }
            PacketKind::Latency => {
                let (true, Some(probe)) = (in_game, byte1) else {
                    return Ok(());
                };
                let mut w = self.buffer.writer();
                if write_latency(&mut w, probe, true).is_ok() {
                    w.finish();
                    transport.send(from, self.buffer.as_slice())?;
                }
            }
            PacketKind::LatencyAck => {
                if let (true, Some(probe)) = (in_game, byte1) {
                    self.record_latency_ack(from, probe, now_ms);
                }
            }
            PacketKind::LevelReady => {
                if !in_game {
                    return Ok(());
                }
                if byte1 != Some(self.lobby_id) {
                    log::debug!("Level ready from {} for stale lobby {:?}", from, byte1);
                    return Ok(());
                }
                let delay = if host_fields {
                    u16::from_be_bytes([data[2], data[3]]) as u32
                } else {
                    0
                };
                self.check_level_start(transport, game, from, delay)?;
            }
            PacketKind::TicData => {
                if !in_game {
                    return Ok(());
                }
                let parsed = TicPacket::read(&mut self.buffer.reader(), host_fields);
                match parsed {
                    Ok(packet) => self.apply_tic_packet(from, packet),
                    Err(e) => log::debug!("Bad tic packet from {}: {}", from, e),
                }
            }
        }
        Ok(())
    }

    fn apply_tic_packet(&mut self, from: usize, packet: TicPacket) {
        let epoch = match packet.lobby_id.wrapping_sub(self.lobby_id) {
            0 => Epoch::Current,
            1 => Epoch::Ahead,
            u8::MAX => Epoch::Behind,
            _ => {
                log::debug!(
                    "Tic packet from {} for lobby {} (ours is {})",
                    from,
                    packet.lobby_id,
                    self.lobby_id
                );
                return;
            }
        };
        // A sender still in the previous lobby only shares history up to the
        // reset point with us.
        let (sequence_limit, consistency_limit) = match epoch {
            Epoch::Behind => (self.epoch_sequence, self.epoch_consistency),
            Epoch::Current | Epoch::Ahead => (i32::MAX, i32::MAX),
        };

        let me = self.console_player;
        let own_sequence = self.states[me].current_sequence.min(sequence_limit);
        let own_consistency = (self.current_consistency - 1).min(consistency_limit);
        let gameseq = self.sequence_of(self.gametic);
        let backup = self.config.backup_tics as i32;

        {
            let state = &mut self.states[from];
            state.flags |= ClientFlags::UPDATED;

            // Nobody can have seen more of our stream than we produced.
            let sequence_ack = packet.sequence_ack.min(own_sequence);
            if sequence_ack > state.sequence_ack {
                state.sequence_ack = sequence_ack;
                state.stalled_acks = 0;
            } else if state.resend_sequence_from > state.sequence_ack + 1 {
                state.stalled_acks += 1;
                if state.stalled_acks >= RESEND_COUNT {
                    state.resend_sequence_from = state.sequence_ack + 1;
                    state.resend_consistency_from = state.consistency_ack + 1;
                    state.stalled_acks = 0;
                }
            }
            state.resend_sequence_from = state.resend_sequence_from.max(state.sequence_ack + 1);

            let consistency_ack = packet.consistency_ack.min(own_consistency);
            state.consistency_ack = state.consistency_ack.max(consistency_ack);
            state.resend_consistency_from = state
                .resend_consistency_from
                .max(state.consistency_ack + 1);

            if packet.retransmit {
                state.flags |= ClientFlags::RETRANSMIT;
                state.resend_sequence_from = state.sequence_ack + 1;
                state.resend_consistency_from = state.consistency_ack + 1;
            }
        }

        if from == self.arbitrator {
            for quitter in packet.quitters.iter().map(|&q| q as usize) {
                if quitter != me && self.clients.contains(quitter) {
                    self.states[quitter].flags |= ClientFlags::QUIT;
                }
            }
            if let (Epoch::Current, Some(ahead)) = (epoch, packet.commands_ahead) {
                self.apply_commands_ahead(ahead);
            }
        }

        let sources = self.role().ops().sources(self, from);
        for mut block in packet.players {
            let player = block.player as usize;
            if player == me || !sources.contains(&player) || !self.clients.contains(player) {
                continue;
            }

            if let Some(latency) = block.latency
                && player != self.arbitrator
            {
                self.states[player].average_latency = latency;
            }

            // Checksums from a lobby we have not reached are taken again once
            // we get there.
            if epoch == Epoch::Ahead {
                block.consistencies.clear();
            }
            block.consistencies.sort_by_key(|&(offset, _)| offset);
            for (offset, value) in block.consistencies {
                let index = packet.base_consistency + offset as i32;
                let state = &mut self.states[player];
                if index <= state.current_net_consistency {
                    continue;
                }
                if index > consistency_limit {
                    break;
                }
                if index != state.current_net_consistency + 1 {
                    self.states[from].flags |= ClientFlags::MISSING_CON;
                    break;
                }
                state.set_net_consistency(index, value);
                state.current_net_consistency = index;
            }

            block.tics.sort_by_key(|(offset, _)| *offset);
            for (offset, command) in block.tics {
                let sequence = packet.base_sequence + offset as i32;
                let state = &mut self.states[player];
                if sequence <= state.current_sequence {
                    continue;
                }
                if sequence > sequence_limit {
                    break;
                }
                if sequence != state.current_sequence + 1 {
                    self.states[from].flags |= ClientFlags::MISSING_SEQ;
                    break;
                }
                // Would overwrite a command that has not run yet.
                if sequence >= gameseq + backup {
                    break;
                }
                *state.tic_mut(sequence) = command;
                state.current_sequence = sequence;
            }
        }
    }

    fn apply_commands_ahead(&mut self, ahead: u8) {
        self.commands_ahead = ahead;
        if self.skip_command_amount == 0 && ahead >= 2 {
            self.skip_command_amount = ahead as u32 - 1;
            log::debug!("Running {} commands ahead of the host, holding back", ahead);
        }
    }

    fn process_quitters<G: GameHooks>(&mut self, game: &mut G) {
        let quitting: Vec<usize> = self
            .clients
            .iter()
            .filter(|&c| c != self.console_player && self.states[c].flags.contains(ClientFlags::QUIT))
            .collect();
        for player in quitting {
            self.disconnect_player(player, game);
        }
    }
}
