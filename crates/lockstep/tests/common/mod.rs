#![allow(dead_code)]

use lockstep::{
    GameHooks, LoopbackHub, LoopbackTransport, MAXPLAYERS, NetConfig, NetSession, TicCommand,
    TicOutcome, Transport, UserCmd,
};

/// Every player's position is the running sum of its forward moves.
#[derive(Debug, Default)]
pub struct SumGame {
    pub me: usize,
    pub sums: [i64; MAXPLAYERS],
    pub history: Vec<[i64; MAXPLAYERS]>,
    pub left: Vec<usize>,
    pub desyncs: Vec<(usize, i32)>,
    pub change_level_at: Option<i32>,
    /// Reports a wrong checksum for our own player.
    pub corrupt_own: bool,
}

impl SumGame {
    pub fn new(me: usize) -> Self {
        Self {
            me,
            ..Default::default()
        }
    }
}

impl GameHooks for SumGame {
    fn build_command(&mut self, tic: i32) -> UserCmd {
        UserCmd {
            forward_move: ((tic as usize * 7 + self.me * 13) % 50) as i16,
            ..Default::default()
        }
    }

    fn run_tic(&mut self, tic: i32, commands: &[(usize, &TicCommand)]) -> TicOutcome {
        for (player, command) in commands {
            self.sums[*player] += command.cmd.forward_move as i64;
        }
        self.history.push(self.sums);
        if self.change_level_at == Some(tic) {
            TicOutcome::LevelChanged
        } else {
            TicOutcome::Continue
        }
    }

    fn consistency(&self, player: usize) -> u16 {
        let sum = self.sums[player] as u16;
        if self.corrupt_own && player == self.me {
            sum.wrapping_add(1)
        } else {
            sum
        }
    }

    fn player_left(&mut self, player: usize) {
        self.left.push(player);
    }

    fn desync_detected(&mut self, player: usize, tic: i32) {
        self.desyncs.push((player, tic));
    }
}

pub struct Node<T: Transport> {
    pub session: NetSession,
    pub transport: T,
    pub game: SumGame,
    pub active: bool,
}

impl<T: Transport> Node<T> {
    pub fn step(&mut self, now_ms: u64) -> usize {
        if !self.active {
            return 0;
        }
        self.session
            .try_run_tics(&mut self.transport, &mut self.game, now_ms)
            .unwrap()
    }
}

pub fn loopback_nodes(hub: &LoopbackHub, config: &NetConfig, count: usize) -> Vec<Node<LoopbackTransport>> {
    (0..count)
        .map(|me| Node {
            session: NetSession::new(config.clone(), me, 0..count).unwrap(),
            transport: hub.endpoint(me),
            game: SumGame::new(me),
            active: true,
        })
        .collect()
}

pub fn run_for<T: Transport>(nodes: &mut [Node<T>], from_ms: u64, to_ms: u64, step_ms: u64) {
    let mut now = from_ms;
    while now <= to_ms {
        for node in nodes.iter_mut() {
            node.step(now);
        }
        now += step_ms;
    }
}

/// Every pair of games agrees on the tics both have run.
pub fn assert_same_history<T: Transport>(nodes: &[Node<T>]) {
    for pair in nodes.windows(2) {
        let (a, b) = (&pair[0].game.history, &pair[1].game.history);
        let common = a.len().min(b.len());
        assert_eq!(a[..common], b[..common]);
    }
}

/// Deterministic pseudo-random loss so runs are repeatable.
pub fn lossy(percent: u64, seed: u64) -> impl FnMut(usize, usize, &[u8]) -> bool + 'static {
    let mut state = seed;
    move |_, _, _| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) % 100 < percent
    }
}
