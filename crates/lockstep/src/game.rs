use crate::net::{TicCommand, UserCmd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicOutcome {
    Continue,
    /// The tic finished a level; commands are rewound and the level start
    /// barrier is raised.
    LevelChanged,
}

/// The deterministic simulation the session drives.
pub trait GameHooks {
    /// Samples local input for the console player.
    fn build_command(&mut self, tic: i32) -> UserCmd;

    /// Runs one gametic. `commands` holds every in-game player's command in
    /// slot order.
    fn run_tic(&mut self, tic: i32, commands: &[(usize, &TicCommand)]) -> TicOutcome;

    /// World-state checksum for `player` after the tic that just ran.
    fn consistency(&self, player: usize) -> u16;

    fn is_map_loaded(&self) -> bool {
        true
    }

    fn player_left(&mut self, _player: usize) {}

    fn arbitrator_changed(&mut self, _player: usize) {}

    fn check_demo_status(&mut self) {}

    fn desync_detected(&mut self, _player: usize, _tic: i32) {}
}
