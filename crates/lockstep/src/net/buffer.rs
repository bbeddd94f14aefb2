pub const MAX_PACKET_SIZE: usize = 14000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("packet truncated: needed {needed} bytes at offset {offset}, have {len}")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },
    #[error("packet buffer full: {needed} bytes do not fit at offset {offset}")]
    BufferFull { offset: usize, needed: usize },
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

/// The single buffer every packet passes through, inbound or outbound.
pub struct NetBuffer {
    data: Box<[u8; MAX_PACKET_SIZE]>,
    len: usize,
}

impl Default for NetBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl NetBuffer {
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; MAX_PACKET_SIZE]),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(MAX_PACKET_SIZE);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    pub fn reader(&self) -> PacketReader<'_> {
        PacketReader::new(self.as_slice())
    }

    /// Starts a new outbound packet, discarding whatever the buffer held.
    pub fn writer(&mut self) -> PacketWriter<'_> {
        self.len = 0;
        PacketWriter {
            buf: &mut self.data[..],
            pos: 0,
            committed: &mut self.len,
        }
    }
}

pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < needed {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed,
                len: self.data.len(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(bytes)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), DecodeError> {
        self.take(count).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        self.take(count)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.pos..];
        self.pos = self.data.len();
        bytes
    }
}

/// Writes into the shared buffer. The buffer length is only updated by
/// [`PacketWriter::finish`], so an abandoned write leaves an empty packet.
pub struct PacketWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    committed: &'a mut usize,
}

impl PacketWriter<'_> {
    pub fn position(&self) -> usize {
        self.pos
    }

    fn reserve(&mut self, needed: usize) -> Result<&mut [u8], DecodeError> {
        if self.buf.len() - self.pos < needed {
            return Err(DecodeError::BufferFull {
                offset: self.pos,
                needed,
            });
        }
        let start = self.pos;
        self.pos += needed;
        Ok(&mut self.buf[start..start + needed])
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), DecodeError> {
        self.reserve(1)?[0] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), DecodeError> {
        self.reserve(2)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<(), DecodeError> {
        self.write_u16(value as u16)
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), DecodeError> {
        self.reserve(4)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), DecodeError> {
        self.write_u32(value as u32)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    pub fn finish(self) -> usize {
        *self.committed = self.pos;
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_commits_only_on_finish() {
        let mut buffer = NetBuffer::new();
        {
            let mut w = buffer.writer();
            w.write_u8(7).unwrap();
            w.write_i32(-1).unwrap();
        }
        assert!(buffer.is_empty());

        let mut w = buffer.writer();
        w.write_u8(7).unwrap();
        w.write_u16(0x1234).unwrap();
        assert_eq!(w.finish(), 3);
        assert_eq!(buffer.as_slice(), &[7, 0x12, 0x34]);
    }

    #[test]
    fn reader_reports_truncation() {
        let data = [0u8, 1, 2];
        let mut r = PacketReader::new(&data);
        assert_eq!(r.read_u16().unwrap(), 1);
        let err = r.read_u32().unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                offset: 2,
                needed: 4,
                len: 3
            }
        );
    }

    #[test]
    fn negative_sequences_are_big_endian() {
        let mut buffer = NetBuffer::new();
        let mut w = buffer.writer();
        w.write_i32(-1).unwrap();
        w.write_i32(258).unwrap();
        w.finish();
        assert_eq!(buffer.as_slice(), &[0xff, 0xff, 0xff, 0xff, 0, 0, 1, 2]);

        let mut r = buffer.reader();
        assert_eq!(r.read_i32().unwrap(), -1);
        assert_eq!(r.read_i32().unwrap(), 258);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn writer_stops_at_capacity() {
        let mut buffer = NetBuffer::new();
        let mut w = buffer.writer();
        let big = vec![0u8; MAX_PACKET_SIZE];
        w.write_bytes(&big).unwrap();
        assert!(matches!(
            w.write_u8(1),
            Err(DecodeError::BufferFull { .. })
        ));
    }
}
