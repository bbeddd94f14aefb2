use serde::{Deserialize, Serialize};

use crate::config::NetMode;

use super::NetSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetRole {
    SinglePlayer,
    Client,
    /// Arbitrator of a packet-server session.
    Server,
}

/// Routing decisions that differ per role.
pub trait RoleOps {
    /// Slots this node sends tic packets, latency probes and exits to.
    fn destinations(&self, session: &NetSession) -> Vec<usize>;

    /// Players whose commands go into a packet for `dest`.
    fn relayed_players(&self, session: &NetSession, dest: usize) -> Vec<usize>;

    /// Players whose commands arrive in packets from `from`.
    fn sources(&self, session: &NetSession, from: usize) -> Vec<usize>;

    /// Commands-ahead, latency and new-host fields.
    fn writes_host_fields(&self) -> bool {
        false
    }
}

struct SinglePlayerOps;
struct ClientOps;
struct ServerOps;

impl NetRole {
    pub fn ops(self) -> &'static dyn RoleOps {
        match self {
            NetRole::SinglePlayer => &SinglePlayerOps,
            NetRole::Client => &ClientOps,
            NetRole::Server => &ServerOps,
        }
    }
}

fn others(session: &NetSession, except: usize) -> Vec<usize> {
    session.clients().iter().filter(|&c| c != except).collect()
}

impl RoleOps for SinglePlayerOps {
    fn destinations(&self, _session: &NetSession) -> Vec<usize> {
        Vec::new()
    }

    fn relayed_players(&self, _session: &NetSession, _dest: usize) -> Vec<usize> {
        Vec::new()
    }

    fn sources(&self, _session: &NetSession, _from: usize) -> Vec<usize> {
        Vec::new()
    }
}

impl RoleOps for ClientOps {
    fn destinations(&self, session: &NetSession) -> Vec<usize> {
        match session.mode() {
            NetMode::PacketServer => vec![session.arbitrator()],
            NetMode::PeerToPeer => others(session, session.console_player()),
        }
    }

    fn relayed_players(&self, session: &NetSession, _dest: usize) -> Vec<usize> {
        vec![session.console_player()]
    }

    fn sources(&self, session: &NetSession, from: usize) -> Vec<usize> {
        if session.mode() == NetMode::PacketServer && from == session.arbitrator() {
            others(session, session.console_player())
        } else {
            vec![from]
        }
    }
}

impl RoleOps for ServerOps {
    fn destinations(&self, session: &NetSession) -> Vec<usize> {
        others(session, session.console_player())
    }

    fn relayed_players(&self, session: &NetSession, dest: usize) -> Vec<usize> {
        others(session, dest)
    }

    fn sources(&self, _session: &NetSession, from: usize) -> Vec<usize> {
        vec![from]
    }

    fn writes_host_fields(&self) -> bool {
        true
    }
}
