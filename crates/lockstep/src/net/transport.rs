use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::rc::Rc;

use super::stats::{NetworkStats, PacketLossSimulation};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("no address known for player slot {0}")]
    UnknownPeer(usize),
}

/// Datagram delivery between numbered player slots.
///
/// `poll` never blocks: it returns `Ok(None)` as soon as nothing is waiting.
pub trait Transport {
    fn send(&mut self, to: usize, data: &[u8]) -> Result<(), TransportError>;

    /// Copies the next waiting datagram into `buf` and returns the sender's
    /// slot and the datagram length.
    fn poll(&mut self, buf: &mut [u8]) -> Result<Option<(usize, usize)>, TransportError>;

    fn stats(&self) -> &NetworkStats;
}

pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    peers: HashMap<usize, SocketAddr>,
    slots_by_addr: HashMap<SocketAddr, usize>,
    stats: NetworkStats,
    packet_loss_sim: PacketLossSimulation,
}

impl UdpTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            peers: HashMap::new(),
            slots_by_addr: HashMap::new(),
            stats: NetworkStats::default(),
            packet_loss_sim: PacketLossSimulation::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn add_peer(&mut self, slot: usize, addr: SocketAddr) {
        if let Some(old) = self.peers.insert(slot, addr) {
            self.slots_by_addr.remove(&old);
        }
        self.slots_by_addr.insert(addr, slot);
    }

    pub fn remove_peer(&mut self, slot: usize) -> Option<SocketAddr> {
        let addr = self.peers.remove(&slot)?;
        self.slots_by_addr.remove(&addr);
        Some(addr)
    }

    pub fn peer_addr(&self, slot: usize) -> Option<SocketAddr> {
        self.peers.get(&slot).copied()
    }

    pub fn set_packet_loss_sim(&mut self, sim: PacketLossSimulation) {
        self.packet_loss_sim = sim;
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, to: usize, data: &[u8]) -> Result<(), TransportError> {
        let addr = self
            .peers
            .get(&to)
            .copied()
            .ok_or(TransportError::UnknownPeer(to))?;

        if self.packet_loss_sim.should_drop() {
            self.stats.packets_dropped += 1;
            return Ok(());
        }

        match self.socket.send_to(data, addr) {
            Ok(bytes) => {
                self.stats.record_sent(bytes);
                Ok(())
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.stats.packets_dropped += 1;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn poll(&mut self, buf: &mut [u8]) -> Result<Option<(usize, usize)>, TransportError> {
        loop {
            match self.socket.recv_from(buf) {
                Ok((size, addr)) => {
                    let Some(&slot) = self.slots_by_addr.get(&addr) else {
                        log::debug!("Ignoring {} bytes from unknown address {}", size, addr);
                        self.stats.packets_rejected += 1;
                        continue;
                    };
                    self.stats.record_received(size);
                    return Ok(Some((slot, size)));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                // ICMP port unreachable from a peer that already left.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn stats(&self) -> &NetworkStats {
        &self.stats
    }
}

type DropFilter = Box<dyn FnMut(usize, usize, &[u8]) -> bool>;

#[derive(Default)]
struct HubInner {
    queues: HashMap<usize, VecDeque<(usize, Vec<u8>)>>,
    filter: Option<DropFilter>,
}

/// In-process datagram switch connecting several [`LoopbackTransport`]s.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Rc<RefCell<HubInner>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self, slot: usize) -> LoopbackTransport {
        self.inner.borrow_mut().queues.entry(slot).or_default();
        LoopbackTransport {
            slot,
            hub: self.clone(),
            stats: NetworkStats::default(),
        }
    }

    /// Installs a filter called with `(from, to, bytes)`; returning `true`
    /// drops the datagram.
    pub fn set_drop_filter<F>(&self, filter: F)
    where
        F: FnMut(usize, usize, &[u8]) -> bool + 'static,
    {
        self.inner.borrow_mut().filter = Some(Box::new(filter));
    }

    pub fn clear_drop_filter(&self) {
        self.inner.borrow_mut().filter = None;
    }

    pub fn pending(&self, slot: usize) -> usize {
        self.inner
            .borrow()
            .queues
            .get(&slot)
            .map_or(0, |q| q.len())
    }

    /// Removes every datagram waiting for `slot`.
    pub fn take_queue(&self, slot: usize) -> Vec<(usize, Vec<u8>)> {
        self.inner
            .borrow_mut()
            .queues
            .get_mut(&slot)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn inject(&self, to: usize, from: usize, data: Vec<u8>) {
        self.inner
            .borrow_mut()
            .queues
            .entry(to)
            .or_default()
            .push_back((from, data));
    }

    fn deliver(&self, from: usize, to: usize, data: &[u8]) -> bool {
        let mut inner = self.inner.borrow_mut();
        if let Some(filter) = inner.filter.as_mut() {
            if filter(from, to, data) {
                return false;
            }
        }
        inner
            .queues
            .entry(to)
            .or_default()
            .push_back((from, data.to_vec()));
        true
    }

    fn receive(&self, slot: usize) -> Option<(usize, Vec<u8>)> {
        self.inner
            .borrow_mut()
            .queues
            .get_mut(&slot)
            .and_then(|q| q.pop_front())
    }
}

pub struct LoopbackTransport {
    slot: usize,
    hub: LoopbackHub,
    stats: NetworkStats,
}

impl LoopbackTransport {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, to: usize, data: &[u8]) -> Result<(), TransportError> {
        if self.hub.deliver(self.slot, to, data) {
            self.stats.record_sent(data.len());
        } else {
            self.stats.packets_dropped += 1;
        }
        Ok(())
    }

    fn poll(&mut self, buf: &mut [u8]) -> Result<Option<(usize, usize)>, TransportError> {
        let Some((from, data)) = self.hub.receive(self.slot) else {
            return Ok(None);
        };
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        self.stats.record_received(len);
        Ok(Some((from, len)))
    }

    fn stats(&self) -> &NetworkStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_delivers_in_order() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(0);
        let mut b = hub.endpoint(1);

        a.send(1, &[1, 2, 3]).unwrap();
        a.send(1, &[4]).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(b.poll(&mut buf).unwrap(), Some((0, 3)));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(b.poll(&mut buf).unwrap(), Some((0, 1)));
        assert_eq!(b.poll(&mut buf).unwrap(), None);
        assert_eq!(b.stats().packets_received, 2);
    }

    #[test]
    fn drop_filter_discards() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(0);
        let _b = hub.endpoint(1);
        hub.set_drop_filter(|_, to, _| to == 1);

        a.send(1, &[9]).unwrap();
        assert_eq!(hub.pending(1), 0);
        assert_eq!(a.stats().packets_dropped, 1);

        hub.clear_drop_filter();
        a.send(1, &[9]).unwrap();
        assert_eq!(hub.pending(1), 1);
    }
}
