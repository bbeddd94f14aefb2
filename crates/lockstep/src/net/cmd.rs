use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::buffer::{DecodeError, PacketReader, PacketWriter};

bitflags! {
    /// Which [`UserCmd`] fields follow the mask byte on the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UserCmdFields: u8 {
        const BUTTONS = 1 << 0;
        const PITCH = 1 << 1;
        const YAW = 1 << 2;
        const FORWARD_MOVE = 1 << 3;
        const SIDE_MOVE = 1 << 4;
        const UP_MOVE = 1 << 5;
        const ROLL = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCmd {
    pub buttons: u32,
    pub pitch: i16,
    pub yaw: i16,
    pub roll: i16,
    pub forward_move: i16,
    pub side_move: i16,
    pub up_move: i16,
}

impl UserCmd {
    pub const BT_ATTACK: u32 = 1 << 0;
    pub const BT_USE: u32 = 1 << 1;
    pub const BT_JUMP: u32 = 1 << 2;
    pub const BT_CROUCH: u32 = 1 << 3;

    #[inline]
    pub fn has_button(&self, button: u32) -> bool {
        self.buttons & button != 0
    }

    fn fields(&self) -> UserCmdFields {
        let mut fields = UserCmdFields::empty();
        fields.set(UserCmdFields::BUTTONS, self.buttons != 0);
        fields.set(UserCmdFields::PITCH, self.pitch != 0);
        fields.set(UserCmdFields::YAW, self.yaw != 0);
        fields.set(UserCmdFields::FORWARD_MOVE, self.forward_move != 0);
        fields.set(UserCmdFields::SIDE_MOVE, self.side_move != 0);
        fields.set(UserCmdFields::UP_MOVE, self.up_move != 0);
        fields.set(UserCmdFields::ROLL, self.roll != 0);
        fields
    }

    pub fn write(&self, w: &mut PacketWriter<'_>) -> Result<(), DecodeError> {
        let fields = self.fields();
        w.write_u8(fields.bits())?;
        if fields.contains(UserCmdFields::BUTTONS) {
            w.write_u32(self.buttons)?;
        }
        if fields.contains(UserCmdFields::PITCH) {
            w.write_i16(self.pitch)?;
        }
        if fields.contains(UserCmdFields::YAW) {
            w.write_i16(self.yaw)?;
        }
        if fields.contains(UserCmdFields::FORWARD_MOVE) {
            w.write_i16(self.forward_move)?;
        }
        if fields.contains(UserCmdFields::SIDE_MOVE) {
            w.write_i16(self.side_move)?;
        }
        if fields.contains(UserCmdFields::UP_MOVE) {
            w.write_i16(self.up_move)?;
        }
        if fields.contains(UserCmdFields::ROLL) {
            w.write_i16(self.roll)?;
        }
        Ok(())
    }

    pub fn read(r: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        let fields = UserCmdFields::from_bits_truncate(r.read_u8()?);
        let mut cmd = UserCmd::default();
        if fields.contains(UserCmdFields::BUTTONS) {
            cmd.buttons = r.read_u32()?;
        }
        if fields.contains(UserCmdFields::PITCH) {
            cmd.pitch = r.read_i16()?;
        }
        if fields.contains(UserCmdFields::YAW) {
            cmd.yaw = r.read_i16()?;
        }
        if fields.contains(UserCmdFields::FORWARD_MOVE) {
            cmd.forward_move = r.read_i16()?;
        }
        if fields.contains(UserCmdFields::SIDE_MOVE) {
            cmd.side_move = r.read_i16()?;
        }
        if fields.contains(UserCmdFields::UP_MOVE) {
            cmd.up_move = r.read_i16()?;
        }
        if fields.contains(UserCmdFields::ROLL) {
            cmd.roll = r.read_i16()?;
        }
        Ok(cmd)
    }

    pub fn skip(r: &mut PacketReader<'_>) -> Result<(), DecodeError> {
        let fields = UserCmdFields::from_bits_truncate(r.read_u8()?);
        let mut size = 2 * fields.bits().count_ones() as usize;
        if fields.contains(UserCmdFields::BUTTONS) {
            size += 2;
        }
        r.skip(size)
    }
}

/// One player's input for one tic: special events first, then the movement
/// command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicCommand {
    pub events: Vec<u8>,
    pub cmd: UserCmd,
}

impl TicCommand {
    pub fn new(cmd: UserCmd) -> Self {
        Self {
            events: Vec::new(),
            cmd,
        }
    }

    pub fn write(&self, w: &mut PacketWriter<'_>) -> Result<(), DecodeError> {
        let len = u16::try_from(self.events.len())
            .map_err(|_| DecodeError::Malformed("event stream longer than 65535 bytes"))?;
        w.write_u16(len)?;
        w.write_bytes(&self.events)?;
        self.cmd.write(w)
    }

    pub fn read(r: &mut PacketReader<'_>) -> Result<Self, DecodeError> {
        let len = r.read_u16()? as usize;
        let events = r.read_bytes(len)?.to_vec();
        let cmd = UserCmd::read(r)?;
        Ok(Self { events, cmd })
    }

    pub fn skip(r: &mut PacketReader<'_>) -> Result<(), DecodeError> {
        let len = r.read_u16()? as usize;
        r.skip(len)?;
        UserCmd::skip(r)
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.cmd = UserCmd::default();
    }
}
