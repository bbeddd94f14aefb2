use bitflags::bitflags;

use super::buffer::{DecodeError, PacketReader, PacketWriter};
use super::cmd::TicCommand;

pub const DEFAULT_PORT: u16 = 5029;

/// Bytes before the optional quitter list in a tic-data packet: flags, lobby
/// id, sequence ack and consistency ack.
pub const TIC_HEADER_SIZE: usize = 10;

bitflags! {
    /// Byte 0 of every packet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NetCommand: u8 {
        const EXIT = 0x80;
        const RETRANSMIT = 0x40;
        const SETUP = 0x20;
        const LEVEL_READY = 0x10;
        const QUITTERS = 0x08;
        const LATENCY_ACK = 0x02;
        const LATENCY = 0x01;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Exit,
    Setup,
    Latency,
    LatencyAck,
    LevelReady,
    TicData,
}

impl PacketKind {
    pub fn classify(flags: u8) -> Self {
        let flags = NetCommand::from_bits_truncate(flags);
        if flags.contains(NetCommand::EXIT) {
            PacketKind::Exit
        } else if flags.contains(NetCommand::SETUP) {
            PacketKind::Setup
        } else if flags.contains(NetCommand::LATENCY) {
            PacketKind::Latency
        } else if flags.contains(NetCommand::LATENCY_ACK) {
            PacketKind::LatencyAck
        } else if flags.contains(NetCommand::LEVEL_READY) {
            PacketKind::LevelReady
        } else {
            PacketKind::TicData
        }
    }
}

/// Walks a received packet and returns how many bytes it should occupy.
///
/// `host_fields` is set when the packet came from the arbitrator of a
/// packet-server session, which adds the new-host byte to exits, the delay to
/// level-ready packets and the commands-ahead and latency fields to tic data.
/// Must stay in step with the writers below.
pub fn packet_size(data: &[u8], host_fields: bool) -> Result<usize, DecodeError> {
    let mut r = PacketReader::new(data);
    let flags = r.read_u8()?;

    match PacketKind::classify(flags) {
        PacketKind::Exit => return Ok(1 + host_fields as usize),
        PacketKind::Setup => return Ok(data.len()),
        PacketKind::Latency | PacketKind::LatencyAck => return Ok(2),
        PacketKind::LevelReady => return Ok(2 + 2 * host_fields as usize),
        PacketKind::TicData => {}
    }

    r.skip(TIC_HEADER_SIZE - 1)?;
    if NetCommand::from_bits_truncate(flags).contains(NetCommand::QUITTERS) {
        let count = r.read_u8()? as usize;
        r.skip(count)?;
    }

    let players = r.read_u8()?;
    let tics = r.read_u8()?;
    if tics > 0 {
        r.skip(4)?;
    }
    let ran = r.read_u8()?;
    if ran > 0 {
        r.skip(4)?;
    }
    if host_fields {
        r.skip(1)?;
    }

    for _ in 0..players {
        r.skip(1)?;
        if host_fields {
            r.skip(2)?;
        }
        r.skip(3 * ran as usize)?;
        for _ in 0..tics {
            r.skip(1)?;
            TicCommand::skip(&mut r)?;
        }
    }

    Ok(r.position())
}

pub fn write_exit(w: &mut PacketWriter<'_>, new_host: Option<u8>) -> Result<(), DecodeError> {
    w.write_u8(NetCommand::EXIT.bits())?;
    if let Some(host) = new_host {
        w.write_u8(host)?;
    }
    Ok(())
}

pub fn write_latency(w: &mut PacketWriter<'_>, sequence: u8, ack: bool) -> Result<(), DecodeError> {
    let flag = if ack {
        NetCommand::LATENCY_ACK
    } else {
        NetCommand::LATENCY
    };
    w.write_u8(flag.bits())?;
    w.write_u8(sequence)
}

pub fn write_level_ready(
    w: &mut PacketWriter<'_>,
    lobby_id: u8,
    delay: Option<u16>,
) -> Result<(), DecodeError> {
    w.write_u8(NetCommand::LEVEL_READY.bits())?;
    w.write_u8(lobby_id)?;
    if let Some(delay) = delay {
        w.write_u16(delay)?;
    }
    Ok(())
}

pub fn write_setup(w: &mut PacketWriter<'_>, payload: &[u8]) -> Result<(), DecodeError> {
    w.write_u8(NetCommand::SETUP.bits())?;
    w.write_bytes(payload)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerBlock {
    pub player: u8,
    pub latency: Option<u16>,
    /// `(offset, checksum)` pairs, offsets relative to the base consistency.
    pub consistencies: Vec<(u8, u16)>,
    /// `(offset, command)` pairs, offsets relative to the base sequence.
    pub tics: Vec<(u8, TicCommand)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicPacket {
    pub retransmit: bool,
    pub lobby_id: u8,
    pub sequence_ack: i32,
    pub consistency_ack: i32,
    pub quitters: Vec<u8>,
    pub base_sequence: i32,
    pub base_consistency: i32,
    pub commands_ahead: Option<u8>,
    pub players: Vec<PlayerBlock>,
}

impl TicPacket {
    pub fn tic_count(&self) -> usize {
        self.players.first().map_or(0, |p| p.tics.len())
    }

    pub fn ran_count(&self) -> usize {
        self.players.first().map_or(0, |p| p.consistencies.len())
    }

    pub fn write(&self, w: &mut PacketWriter<'_>, host_fields: bool) -> Result<(), DecodeError> {
        let tics = self.tic_count();
        let ran = self.ran_count();
        if tics > u8::MAX as usize || ran > u8::MAX as usize || self.players.len() > u8::MAX as usize {
            return Err(DecodeError::Malformed("count does not fit in a byte"));
        }
        if self
            .players
            .iter()
            .any(|p| p.tics.len() != tics || p.consistencies.len() != ran)
        {
            return Err(DecodeError::Malformed("player blocks disagree on counts"));
        }

        let mut flags = NetCommand::empty();
        flags.set(NetCommand::RETRANSMIT, self.retransmit);
        flags.set(NetCommand::QUITTERS, !self.quitters.is_empty());

        w.write_u8(flags.bits())?;
        w.write_u8(self.lobby_id)?;
        w.write_i32(self.sequence_ack)?;
        w.write_i32(self.consistency_ack)?;
        if !self.quitters.is_empty() {
            w.write_u8(self.quitters.len() as u8)?;
            w.write_bytes(&self.quitters)?;
        }

        w.write_u8(self.players.len() as u8)?;
        w.write_u8(tics as u8)?;
        if tics > 0 {
            w.write_i32(self.base_sequence)?;
        }
        w.write_u8(ran as u8)?;
        if ran > 0 {
            w.write_i32(self.base_consistency)?;
        }
        if host_fields {
            w.write_u8(self.commands_ahead.unwrap_or(0))?;
        }

        for block in &self.players {
            w.write_u8(block.player)?;
            if host_fields {
                w.write_u16(block.latency.unwrap_or(0))?;
            }
            for &(offset, consistency) in &block.consistencies {
                w.write_u8(offset)?;
                w.write_u16(consistency)?;
            }
            for (offset, command) in &block.tics {
                w.write_u8(*offset)?;
                command.write(w)?;
            }
        }
        Ok(())
    }

    pub fn read(r: &mut PacketReader<'_>, host_fields: bool) -> Result<Self, DecodeError> {
        let flags = NetCommand::from_bits_truncate(r.read_u8()?);
        let mut packet = TicPacket {
            retransmit: flags.contains(NetCommand::RETRANSMIT),
            lobby_id: r.read_u8()?,
            sequence_ack: r.read_i32()?,
            consistency_ack: r.read_i32()?,
            ..Default::default()
        };

        if flags.contains(NetCommand::QUITTERS) {
            let count = r.read_u8()? as usize;
            packet.quitters = r.read_bytes(count)?.to_vec();
        }

        let players = r.read_u8()?;
        let tics = r.read_u8()?;
        if tics > 0 {
            packet.base_sequence = r.read_i32()?;
        }
        let ran = r.read_u8()?;
        if ran > 0 {
            packet.base_consistency = r.read_i32()?;
        }
        if host_fields {
            packet.commands_ahead = Some(r.read_u8()?);
        }

        for _ in 0..players {
            let mut block = PlayerBlock {
                player: r.read_u8()?,
                ..Default::default()
            };
            if host_fields {
                block.latency = Some(r.read_u16()?);
            }
            for _ in 0..ran {
                let offset = r.read_u8()?;
                block.consistencies.push((offset, r.read_u16()?));
            }
            for _ in 0..tics {
                let offset = r.read_u8()?;
                block.tics.push((offset, TicCommand::read(r)?));
            }
            packet.players.push(block);
        }

        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::buffer::NetBuffer;
    use crate::net::cmd::UserCmd;

    fn sample_packet(host: bool) -> TicPacket {
        let cmd = |forward: i16| TicCommand {
            events: vec![1, 2],
            cmd: UserCmd {
                forward_move: forward,
                ..Default::default()
            },
        };
        TicPacket {
            retransmit: true,
            lobby_id: 3,
            sequence_ack: 41,
            consistency_ack: -1,
            quitters: vec![5],
            base_sequence: 42,
            base_consistency: 40,
            commands_ahead: host.then_some(2),
            players: vec![
                PlayerBlock {
                    player: 0,
                    latency: host.then_some(0),
                    consistencies: vec![(0, 0xBEEF)],
                    tics: vec![(0, cmd(10)), (1, cmd(0))],
                },
                PlayerBlock {
                    player: 2,
                    latency: host.then_some(120),
                    consistencies: vec![(0, 7)],
                    tics: vec![(0, cmd(-5)), (1, cmd(25))],
                },
            ],
        }
    }

    #[test]
    fn control_packet_sizes() {
        assert_eq!(packet_size(&[NetCommand::EXIT.bits()], false).unwrap(), 1);
        assert_eq!(packet_size(&[NetCommand::EXIT.bits(), 2], true).unwrap(), 2);
        assert_eq!(packet_size(&[NetCommand::LATENCY.bits(), 9], false).unwrap(), 2);
        assert_eq!(packet_size(&[NetCommand::LATENCY_ACK.bits(), 9], true).unwrap(), 2);
        assert_eq!(packet_size(&[NetCommand::LEVEL_READY.bits(), 1], false).unwrap(), 2);
        assert_eq!(packet_size(&[NetCommand::LEVEL_READY.bits(), 1, 0, 3], true).unwrap(), 4);
        assert_eq!(packet_size(&[NetCommand::SETUP.bits(), 1, 2, 3, 4], false).unwrap(), 5);
    }

    #[test]
    fn size_walk_matches_encoder() {
        for host in [false, true] {
            let packet = sample_packet(host);
            let mut buffer = NetBuffer::new();
            let mut w = buffer.writer();
            packet.write(&mut w, host).unwrap();
            let written = w.finish();

            assert_eq!(packet_size(buffer.as_slice(), host).unwrap(), written);

            let decoded = TicPacket::read(&mut buffer.reader(), host).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn empty_tic_packet_has_no_bases() {
        let packet = TicPacket {
            lobby_id: 1,
            sequence_ack: -1,
            consistency_ack: -1,
            players: vec![PlayerBlock {
                player: 1,
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut buffer = NetBuffer::new();
        let mut w = buffer.writer();
        packet.write(&mut w, false).unwrap();
        // header + player count + tic count + ran count + player id
        assert_eq!(w.finish(), TIC_HEADER_SIZE + 4);
    }

    #[test]
    fn truncated_tic_packet_fails_the_size_walk() {
        let packet = sample_packet(false);
        let mut buffer = NetBuffer::new();
        let mut w = buffer.writer();
        packet.write(&mut w, false).unwrap();
        let written = w.finish();

        let cut = &buffer.as_slice()[..written - 3];
        assert!(packet_size(cut, false).is_err());
    }

    #[test]
    fn mismatched_blocks_are_rejected() {
        let mut packet = sample_packet(false);
        packet.players[1].tics.pop();
        let mut buffer = NetBuffer::new();
        let mut w = buffer.writer();
        assert_eq!(
            packet.write(&mut w, false),
            Err(DecodeError::Malformed("player blocks disagree on counts"))
        );
    }
}
