use crate::game::GameHooks;

use super::NetSession;

impl NetSession {
    /// Records every player's checksum for the sequence that just finished.
    pub(super) fn record_consistencies<G: GameHooks>(&mut self, game: &G, sequence: i32) {
        for client in self.clients.iter() {
            let value = game.consistency(client);
            self.states[client].set_local_consistency(sequence, value);
        }

        let me = self.console_player;
        let own = self.states[me].local_consistency(sequence);
        self.states[me].set_net_consistency(sequence, own);
        self.states[me].current_net_consistency = sequence;
        self.current_consistency = sequence + 1;
    }

    /// Compares what each player reported against our own checksums. A
    /// mismatch is reported once and then the player is no longer checked.
    pub fn check_consistencies<G: GameHooks>(&mut self, game: &mut G) {
        let local_limit = self.current_consistency - 1;
        let oldest = self.current_consistency - self.config.backup_tics as i32;
        for client in self.clients.iter() {
            if client == self.console_player {
                continue;
            }
            let state = &mut self.states[client];
            if state.inconsistent {
                continue;
            }

            let limit = local_limit.min(state.current_net_consistency);
            let mut index = state.last_verified_consistency.max(oldest);
            while index <= limit {
                if state.local_consistency(index) != state.net_consistency(index) {
                    state.inconsistent = true;
                    state.last_verified_consistency = state.current_net_consistency;
                    log::warn!(
                        "Player {} is out of sync at tic {}: {:#06x} != {:#06x}",
                        client,
                        index,
                        state.net_consistency(index),
                        state.local_consistency(index)
                    );
                    game.desync_detected(client, index);
                    break;
                }
                index += 1;
            }
            if !state.inconsistent {
                state.last_verified_consistency = index;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::NetConfig;
    use crate::session::NetSession;
    use crate::session::test_game::ScriptedGame;

    #[test]
    fn mismatch_is_sticky() {
        let mut session = NetSession::new(NetConfig::default(), 0, [0, 1]).unwrap();
        let mut game = ScriptedGame::default();

        for seq in 0..3 {
            game.sums[1] = seq as u16;
            session.record_consistencies(&game, seq);
            session.states[1].set_net_consistency(seq, if seq == 1 { 99 } else { seq as u16 });
            session.states[1].current_net_consistency = seq;
        }
        session.check_consistencies(&mut game);

        assert!(session.is_inconsistent(1));
        assert_eq!(game.desyncs, vec![(1, 1)]);

        game.sums[1] = 3;
        session.record_consistencies(&game, 3);
        session.states[1].set_net_consistency(3, 3);
        session.states[1].current_net_consistency = 3;
        session.check_consistencies(&mut game);

        assert!(session.is_inconsistent(1));
        assert_eq!(game.desyncs.len(), 1);
    }

    #[test]
    fn only_checks_what_both_sides_have() {
        let mut session = NetSession::new(NetConfig::default(), 0, [0, 1]).unwrap();
        let mut game = ScriptedGame::default();

        game.sums[1] = 5;
        session.record_consistencies(&game, 0);
        session.record_consistencies(&game, 1);
        session.states[1].set_net_consistency(0, 5);
        session.states[1].current_net_consistency = 0;

        session.check_consistencies(&mut game);

        let state = session.client_state(1).unwrap();
        assert!(!state.inconsistent);
        assert_eq!(state.last_verified_consistency, 1);
        assert_eq!(session.states[0].current_net_consistency, 1);
    }
}
