#[derive(Debug, Clone)]
pub enum NodeEvent {
    GameStarted {
        map: String,
        players: usize,
    },
    PlayerLeft {
        player: usize,
    },
    ArbitratorChanged {
        player: usize,
    },
    Desync {
        player: usize,
        tic: i32,
    },
    LevelChanged {
        level: u32,
    },
    Error {
        message: String,
    },
}

impl NodeEvent {
    pub fn describe(&self) -> String {
        match self {
            NodeEvent::GameStarted { map, players } => {
                format!("Game started on {} with {} players", map, players)
            }
            NodeEvent::PlayerLeft { player } => format!("Player {} left", player),
            NodeEvent::ArbitratorChanged { player } => {
                format!("Player {} is now the arbitrator", player)
            }
            NodeEvent::Desync { player, tic } => {
                format!("Player {} out of sync at tic {}", player, tic)
            }
            NodeEvent::LevelChanged { level } => format!("Entering level {}", level),
            NodeEvent::Error { message } => message.clone(),
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, NodeEvent::Desync { .. } | NodeEvent::Error { .. })
    }
}
