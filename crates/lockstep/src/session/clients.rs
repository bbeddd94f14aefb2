/// The in-game player slots, kept sorted so iteration order is the same on
/// every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkClients {
    slots: Vec<usize>,
}

impl NetworkClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots<I: IntoIterator<Item = usize>>(slots: I) -> Self {
        let mut clients = Self::new();
        for slot in slots {
            clients.insert(slot);
        }
        clients
    }

    pub fn insert(&mut self, slot: usize) -> bool {
        match self.slots.binary_search(&slot) {
            Ok(_) => false,
            Err(at) => {
                self.slots.insert(at, slot);
                true
            }
        }
    }

    pub fn remove(&mut self, slot: usize) -> bool {
        match self.slots.binary_search(&slot) {
            Ok(at) => {
                self.slots.remove(at);
                true
            }
            Err(_) => false,
        }
    }

    #[inline]
    pub fn contains(&self, slot: usize) -> bool {
        self.slots.binary_search(&slot).is_ok()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn first(&self) -> Option<usize> {
        self.slots.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.slots
    }

    /// Bitmask of every slot, for level start acknowledgement.
    pub fn mask(&self) -> u64 {
        self.slots.iter().fold(0, |mask, &slot| mask | 1 << slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_sorted_and_unique() {
        let mut clients = NetworkClients::from_slots([3, 0, 2, 3]);
        assert_eq!(clients.as_slice(), &[0, 2, 3]);
        assert!(!clients.insert(2));
        assert!(clients.insert(1));
        assert_eq!(clients.as_slice(), &[0, 1, 2, 3]);

        assert!(clients.remove(0));
        assert!(!clients.remove(0));
        assert_eq!(clients.first(), Some(1));
        assert_eq!(clients.mask(), 0b1110);
    }
}
