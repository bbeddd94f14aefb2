use super::NetSession;

/// Event bytes queued for the next command this node generates.
#[derive(Debug, Clone, Default)]
pub(super) struct SpecialStream {
    data: Vec<u8>,
}

impl SpecialStream {
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl NetSession {
    pub fn write_byte(&mut self, value: u8) {
        self.specials.data.push(value);
    }

    pub fn write_word(&mut self, value: i16) {
        self.specials.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_long(&mut self, value: i32) {
        self.specials.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_float(&mut self, value: f32) {
        self.specials.data.extend_from_slice(&value.to_bits().to_be_bytes());
    }

    /// NUL-terminated.
    pub fn write_string(&mut self, value: &str) {
        self.specials.data.extend(value.bytes().filter(|&b| b != 0));
        self.specials.data.push(0);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.specials.data.extend_from_slice(bytes);
    }

    pub fn pending_specials(&self) -> &[u8] {
        &self.specials.data
    }
}
