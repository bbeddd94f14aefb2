use glam::IVec2;

use lockstep::{GameHooks, MAXPLAYERS, TicCommand, TicOutcome, UserCmd};

use crate::events::NodeEvent;

/// Half the width of the square arena, in world units.
const ARENA_EXTENT: i32 = 4096;
const MOVE_SCALE: i32 = 16;
const LEVEL_TICS: i32 = 35 * 60;

/// A tiny deterministic world: every player is a point pushed around by its
/// commands. Integer math only, so every node computes the same positions.
pub struct World {
    slot: usize,
    tic_dup: i32,
    positions: [IVec2; MAXPLAYERS],
    level: u32,
    rng: u32,
    /// Direction held by the local player; `None` wanders.
    pub input: Option<IVec2>,
    events: Vec<NodeEvent>,
}

impl World {
    pub fn new(slot: usize, rng_seed: u32) -> Self {
        let mut world = Self {
            slot,
            tic_dup: 1,
            positions: [IVec2::ZERO; MAXPLAYERS],
            level: 1,
            rng: rng_seed,
            input: None,
            events: Vec::new(),
        };
        world.spawn_all();
        world
    }

    pub fn reseed(&mut self, rng_seed: u32, tic_dup: u32) {
        self.rng = rng_seed;
        self.tic_dup = tic_dup.max(1) as i32;
        self.spawn_all();
    }

    pub fn position(&self, player: usize) -> IVec2 {
        self.positions[player]
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = NodeEvent> + '_ {
        self.events.drain(..)
    }

    pub fn push_event(&mut self, event: NodeEvent) {
        self.events.push(event);
    }

    fn spawn_all(&mut self) {
        for (player, position) in self.positions.iter_mut().enumerate() {
            let angle = player as i32 * 64;
            *position = IVec2::new(angle - 512, 512 - angle);
        }
    }

    fn next_random(&mut self) -> u32 {
        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 17;
        self.rng ^= self.rng << 5;
        self.rng
    }

    fn wander(&self, tic: i32) -> IVec2 {
        let phase = (tic / 35) as u32 ^ (self.slot as u32).wrapping_mul(0x9e37_79b9);
        let mixed = phase.wrapping_mul(0x85eb_ca6b).rotate_left(13);
        IVec2::new((mixed % 3) as i32 - 1, ((mixed >> 8) % 3) as i32 - 1)
    }
}

impl GameHooks for World {
    fn build_command(&mut self, tic: i32) -> UserCmd {
        let dir = self.input.unwrap_or_else(|| self.wander(tic));
        UserCmd {
            forward_move: (dir.y * 50) as i16,
            side_move: (dir.x * 50) as i16,
            ..Default::default()
        }
    }

    fn run_tic(&mut self, tic: i32, commands: &[(usize, &TicCommand)]) -> TicOutcome {
        for (player, command) in commands {
            let step = IVec2::new(command.cmd.side_move as i32, command.cmd.forward_move as i32) / MOVE_SCALE;
            let bounds = IVec2::splat(ARENA_EXTENT);
            self.positions[*player] = (self.positions[*player] + step).clamp(-bounds, bounds);
        }
        // One draw per tic keeps the shared generator identical everywhere.
        self.next_random();

        if (tic + 1) % (LEVEL_TICS * self.tic_dup) == 0 {
            self.level += 1;
            self.spawn_all();
            self.events.push(NodeEvent::LevelChanged { level: self.level });
            return TicOutcome::LevelChanged;
        }
        TicOutcome::Continue
    }

    fn consistency(&self, player: usize) -> u16 {
        let p = self.positions[player];
        (p.x.wrapping_mul(31) ^ p.y.wrapping_mul(17) ^ self.rng as i32) as u16
    }

    fn player_left(&mut self, player: usize) {
        self.positions[player] = IVec2::ZERO;
        self.events.push(NodeEvent::PlayerLeft { player });
    }

    fn arbitrator_changed(&mut self, player: usize) {
        self.events.push(NodeEvent::ArbitratorChanged { player });
    }

    fn desync_detected(&mut self, player: usize, tic: i32) {
        self.events.push(NodeEvent::Desync { player, tic });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(side: i16, forward: i16) -> TicCommand {
        TicCommand::new(UserCmd {
            side_move: side,
            forward_move: forward,
            ..Default::default()
        })
    }

    #[test]
    fn same_commands_same_world() {
        let mut a = World::new(0, 42);
        let mut b = World::new(1, 42);
        let moves = [command(50, 0), command(-50, 50)];

        for tic in 0..200 {
            let commands = [(0, &moves[0]), (1, &moves[1])];
            a.run_tic(tic, &commands);
            b.run_tic(tic, &commands);
        }

        assert_eq!(a.position(0), b.position(0));
        assert_eq!(a.consistency(1), b.consistency(1));
    }

    #[test]
    fn positions_stay_in_the_arena() {
        let mut world = World::new(0, 7);
        let push = command(i16::MAX, i16::MAX);
        for tic in 0..2000 {
            world.run_tic(tic, &[(0, &push)]);
        }
        let p = world.position(0);
        assert!(p.x <= ARENA_EXTENT && p.y <= ARENA_EXTENT);
    }

    #[test]
    fn level_ends_after_a_minute() {
        let mut world = World::new(0, 1);
        let idle = command(0, 0);
        let outcome = (0..LEVEL_TICS)
            .map(|tic| world.run_tic(tic, &[(0, &idle)]))
            .last();
        assert_eq!(outcome, Some(TicOutcome::LevelChanged));
        assert_eq!(world.level(), 2);
    }

    #[test]
    fn held_input_drives_commands() {
        let mut world = World::new(3, 1);
        world.input = Some(IVec2::new(1, -1));
        let cmd = world.build_command(10);
        assert_eq!(cmd.side_move, 50);
        assert_eq!(cmd.forward_move, -50);
    }
}
