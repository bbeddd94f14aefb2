use crate::game::{GameHooks, TicOutcome};
use crate::net::{TicCommand, UserCmd};

/// Deterministic stand-in world: each player's checksum is the running sum
/// of its forward moves.
#[derive(Debug, Default)]
pub(crate) struct ScriptedGame {
    pub forward: i16,
    pub sums: [u16; 16],
    pub ran: Vec<i32>,
    pub left: Vec<usize>,
    pub arbitrators: Vec<usize>,
    pub desyncs: Vec<(usize, i32)>,
    pub map_loading: bool,
    pub change_level_at: Option<i32>,
}

impl GameHooks for ScriptedGame {
    fn build_command(&mut self, _tic: i32) -> UserCmd {
        UserCmd {
            forward_move: self.forward,
            ..Default::default()
        }
    }

    fn run_tic(&mut self, tic: i32, commands: &[(usize, &TicCommand)]) -> TicOutcome {
        for (player, cmd) in commands {
            self.sums[*player] = self.sums[*player].wrapping_add(cmd.cmd.forward_move as u16);
        }
        self.ran.push(tic);
        if self.change_level_at == Some(tic) {
            TicOutcome::LevelChanged
        } else {
            TicOutcome::Continue
        }
    }

    fn consistency(&self, player: usize) -> u16 {
        self.sums[player]
    }

    fn is_map_loaded(&self) -> bool {
        !self.map_loading
    }

    fn player_left(&mut self, player: usize) {
        self.left.push(player);
    }

    fn arbitrator_changed(&mut self, player: usize) {
        self.arbitrators.push(player);
    }

    fn desync_detected(&mut self, player: usize, tic: i32) {
        self.desyncs.push((player, tic));
    }
}
