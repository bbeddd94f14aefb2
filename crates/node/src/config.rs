use std::net::SocketAddr;

use lockstep::{NetConfig, PacketLossSimulation};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub slot: usize,
    pub bind_addr: SocketAddr,
    pub peers: Vec<(usize, SocketAddr)>,
    pub net: NetConfig,
    pub map: String,
    pub rng_seed: u32,
    pub packet_loss: Option<PacketLossSimulation>,
    /// Headless nodes leave after this many seconds.
    pub run_for_secs: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            slot: 0,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], lockstep::DEFAULT_PORT)),
            peers: Vec::new(),
            net: NetConfig::default(),
            map: "MAP01".into(),
            rng_seed: 0x1d2c3b4a,
            packet_loss: None,
            run_for_secs: None,
        }
    }
}

impl NodeConfig {
    pub fn slots(&self) -> Vec<usize> {
        let mut slots: Vec<usize> = self.peers.iter().map(|&(slot, _)| slot).collect();
        slots.push(self.slot);
        slots.sort_unstable();
        slots.dedup();
        slots
    }
}

/// Parses `SLOT=HOST:PORT`.
pub fn parse_peer(value: &str) -> Result<(usize, SocketAddr), String> {
    let (slot, addr) = value
        .split_once('=')
        .ok_or_else(|| format!("expected SLOT=HOST:PORT, got {value}"))?;
    let slot = slot
        .trim()
        .parse()
        .map_err(|e| format!("bad slot {slot:?}: {e}"))?;
    let addr = addr
        .trim()
        .parse()
        .map_err(|e| format!("bad address {addr:?}: {e}"))?;
    Ok((slot, addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_argument_parses() {
        let (slot, addr) = parse_peer("2=127.0.0.1:5031").unwrap();
        assert_eq!(slot, 2);
        assert_eq!(addr.port(), 5031);
        assert!(parse_peer("127.0.0.1:5031").is_err());
        assert!(parse_peer("x=127.0.0.1:1").is_err());
    }

    #[test]
    fn slots_include_self_once() {
        let config = NodeConfig {
            slot: 1,
            peers: vec![
                (3, "127.0.0.1:1".parse().unwrap()),
                (0, "127.0.0.1:2".parse().unwrap()),
            ],
            ..Default::default()
        };
        assert_eq!(config.slots(), vec![0, 1, 3]);
    }
}
