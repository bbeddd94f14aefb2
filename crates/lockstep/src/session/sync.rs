use crate::config::NetMode;
use crate::error::NetError;
use crate::game::{GameHooks, TicOutcome};
use crate::net::{TicCommand, Transport};

use super::NetSession;

const FRAMESKIP: usize = 4;

/// Wall-clock bookkeeping for generating and running tics.
#[derive(Debug, Clone, Default)]
pub(super) struct TicPacing {
    started: bool,
    /// Real tic seen by the last `try_run_tics`.
    entertic: i64,
    /// Real tic commands have been generated up to.
    gametime: i64,
    skip_tics: i64,
    frame_on: usize,
    frameskip: [bool; FRAMESKIP],
    old_own_sequence: i32,
}

impl NetSession {
    fn real_tic(&self, now_ms: u64) -> i64 {
        let tics = now_ms as u128 * self.config.tic_rate as u128 / 1000;
        tics as i64 / self.config.tic_dup as i64
    }

    fn start_clock(&mut self, nowtime: i64) {
        if !self.pacing.started {
            self.pacing.started = true;
            self.pacing.entertic = nowtime;
            self.pacing.gametime = nowtime;
        }
    }

    /// Lowest sequence every in-game player has a command for.
    fn lowest_sequence(&self) -> i32 {
        self.clients
            .iter()
            .map(|c| self.states[c].current_sequence)
            .min()
            .unwrap_or(-1)
    }

    /// Receives, generates local commands for the real time that passed and
    /// sends once per elapsed tic.
    pub fn net_update<T, G>(&mut self, transport: &mut T, game: &mut G, now_ms: u64) -> Result<(), NetError>
    where
        T: Transport,
        G: GameHooks,
    {
        self.get_packets(transport, game, now_ms)?;

        let nowtime = self.real_tic(now_ms);
        self.start_clock(nowtime);
        let mut newtics = nowtime - self.pacing.gametime;
        self.pacing.gametime = nowtime;
        if newtics <= 0 {
            return Ok(());
        }

        self.advance_level_start(newtics as u32);

        if self.pacing.skip_tics <= newtics {
            newtics -= self.pacing.skip_tics;
            self.pacing.skip_tics = 0;
        } else {
            self.pacing.skip_tics -= newtics;
            newtics = 0;
        }
        if self.skip_command_amount > 0 {
            let held = (self.skip_command_amount as i64).min(newtics);
            self.skip_command_amount -= held as u32;
            newtics -= held;
        }

        let tic_dup = self.config.tic_dup as i32;
        let limit = (self.config.backup_tics / 2 - 1) as i32;
        for _ in 0..newtics {
            if !self.level.allows_commands() || (self.client_tic - self.gametic) / tic_dup >= limit {
                break;
            }
            self.make_tic(game);
        }

        if self.netgame {
            self.update_level_start(transport, game)?;
            self.send_latency_probes(transport, now_ms)?;
            self.send_tic_packets(transport)?;
        }
        Ok(())
    }

    fn make_tic<G: GameHooks>(&mut self, game: &mut G) {
        let sequence = self.sequence_of(self.client_tic);
        let cmd = game.build_command(self.client_tic);
        let events = self.specials.take();

        let state = &mut self.states[self.console_player];
        *state.tic_mut(sequence) = TicCommand { events, cmd };
        state.current_sequence = sequence;
        self.client_tic += self.config.tic_dup as i32;
    }

    /// Runs as many tics as every player has commands for, catching up at
    /// most one tic faster than real time. Never blocks; returns the number
    /// of gametics run.
    pub fn try_run_tics<T, G>(&mut self, transport: &mut T, game: &mut G, now_ms: u64) -> Result<usize, NetError>
    where
        T: Transport,
        G: GameHooks,
    {
        let entertic = self.real_tic(now_ms);
        self.start_clock(entertic);
        let realtics = entertic - self.pacing.entertic;
        self.pacing.entertic = entertic;

        self.net_update(transport, game, now_ms)?;
        if realtics <= 0 {
            return Ok(0);
        }

        self.tic_balance();

        let available = (self.lowest_sequence() + 1 - self.sequence_of(self.gametic)) as i64;
        let counts = if realtics < available - 1 {
            realtics + 1
        } else if realtics < available {
            realtics
        } else {
            available
        };

        let mut ran = 0;
        'run: for _ in 0..counts {
            for _ in 0..self.config.tic_dup {
                if self.lowest_sequence() < self.sequence_of(self.gametic) {
                    break 'run;
                }
                ran += 1;
                if self.run_one_tic(game) == TicOutcome::LevelChanged {
                    break 'run;
                }
            }
        }

        self.check_consistencies(game);
        Ok(ran)
    }

    fn run_one_tic<G: GameHooks>(&mut self, game: &mut G) -> TicOutcome {
        let sequence = self.sequence_of(self.gametic);
        let commands: Vec<(usize, &TicCommand)> = self
            .clients
            .iter()
            .map(|c| (c, self.states[c].tic(sequence)))
            .collect();
        let outcome = game.run_tic(self.gametic, &commands);

        if outcome == TicOutcome::LevelChanged {
            self.reset_commands(true);
            self.set_waiting();
        }

        self.gametic += 1;
        if self.gametic % self.config.tic_dup as i32 == 0 {
            let finished = self.sequence_of(self.gametic) - 1;
            self.record_consistencies(game, finished);
        }
        outcome
    }

    /// Peer-to-peer nodes nudge their clock toward the arbitrator's.
    fn tic_balance(&mut self) {
        if !self.config.ticbalance
            || !self.netgame
            || self.config.mode != NetMode::PeerToPeer
            || self.is_arbitrator()
        {
            return;
        }

        let own = self.states[self.console_player].current_sequence;
        let key = self.states[self.arbitrator].current_sequence;
        if own <= key {
            self.pacing.gametime -= 1;
        }

        let pacing = &mut self.pacing;
        pacing.frameskip[pacing.frame_on % FRAMESKIP] = pacing.old_own_sequence > key;
        pacing.old_own_sequence = own;
        pacing.frame_on += 1;
        if pacing.frameskip.iter().all(|&skip| skip) {
            pacing.skip_tics = 1;
            pacing.frameskip = [false; FRAMESKIP];
        }
    }
}
