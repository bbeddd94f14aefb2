mod config;
mod events;
mod node;
mod simulation;
mod tui;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use glam::IVec2;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use lockstep::{NetConfig, NetMode, PacketLossSimulation};

use config::{NodeConfig, parse_peer};
use node::GameNode;
use tui::TuiState;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    PeerToPeer,
    PacketServer,
}

impl From<Mode> for NetMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::PeerToPeer => NetMode::PeerToPeer,
            Mode::PacketServer => NetMode::PacketServer,
        }
    }
}

#[derive(Parser)]
#[command(name = "lockstep-node")]
#[command(about = "Lockstep tic-sync game node")]
struct Args {
    /// Player slot of this node.
    #[arg(short, long, default_value_t = 0)]
    slot: usize,

    #[arg(long = "peer", value_parser = parse_peer, help = "Another player as SLOT=HOST:PORT (repeatable)")]
    peers: Vec<(usize, SocketAddr)>,

    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[arg(short, long, help = "Defaults to the base port plus the slot")]
    port: Option<u16>,

    #[arg(short, long, value_enum, default_value_t = Mode::PeerToPeer)]
    mode: Mode,

    #[arg(long, default_value_t = 1)]
    tic_dup: u32,

    #[arg(long, help = "Resend one extra tic in every packet")]
    extratic: bool,

    #[arg(long, help = "Nudge pacing toward the slowest peer")]
    ticbalance: bool,

    #[arg(long)]
    disable_pause: bool,

    #[arg(long)]
    headless: bool,

    #[arg(long, help = "Enable packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value = "MAP01")]
    map: String,

    #[arg(long, default_value_t = 0x1d2c3b4a)]
    seed: u32,

    #[arg(long, help = "Leave the game after this many seconds (headless)")]
    run_for: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<NodeConfig> {
        let port = match self.port {
            Some(port) => port,
            None => u16::try_from(self.slot)
                .ok()
                .and_then(|slot| lockstep::DEFAULT_PORT.checked_add(slot))
                .with_context(|| format!("no default port for slot {}, pass --port", self.slot))?,
        };

        let net = NetConfig {
            mode: self.mode.into(),
            tic_dup: self.tic_dup,
            extratic: self.extratic,
            ticbalance: self.ticbalance,
            disable_pause: self.disable_pause,
            ..Default::default()
        };
        net.validate()?;

        let packet_loss = self.simulate_packet_loss.then(|| PacketLossSimulation {
            enabled: true,
            loss_percent: (self.loss_percent / 100.0).clamp(0.0, 1.0),
        });

        Ok(NodeConfig {
            slot: self.slot,
            bind_addr: SocketAddr::new(self.bind, port),
            peers: self.peers,
            net,
            map: self.map,
            rng_seed: self.seed,
            packet_loss,
            run_for_secs: self.run_for,
        })
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let headless = args.headless;
    let config = args.into_config()?;

    let mut node = GameNode::new(config)?;

    if headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        log::info!("Node listening on {}", node.local_addr());
        node.run();
        log::info!("Node shutting down");
    } else {
        run_with_tui(&mut node)?;
    }

    Ok(())
}

fn run_with_tui(node: &mut GameNode) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = node.running();
    let mut tui_state = TuiState::new();

    tui_state.log_info(format!("Node listening on {}", node.local_addr()));

    while running.load(Ordering::SeqCst) {
        node.frame();

        for event in node.drain_events() {
            match event {
                events::NodeEvent::Error { .. } => tui_state.log_error(event.describe()),
                _ if event.is_warning() => tui_state.log_warn(event.describe()),
                _ => tui_state.log_info(event.describe()),
            }
        }

        if event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        KeyCode::Up => node.set_input(Some(IVec2::Y)),
                        KeyCode::Down => node.set_input(Some(IVec2::NEG_Y)),
                        KeyCode::Left => node.set_input(Some(IVec2::NEG_X)),
                        KeyCode::Right => node.set_input(Some(IVec2::X)),
                        KeyCode::Char(' ') => node.set_input(None),
                        _ => {}
                    }
                }
            }
        }

        let status = node.status();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &status);
        })?;
    }

    tui_state.log_info("Shutting down...");
    node.shutdown();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
