//! Play command - run one session until the game ends
//!
//! The session is driven from a fixed tick: receive, process, read input,
//! flush. Standard input is read on its own thread and handed over through a
//! channel so the tick never blocks.

use std::cell::RefCell;
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use tictac_core::config::{self, Config};
use tictac_core::game::{GRID_SIZE, Grid};
use tictac_core::net::{NetService, NetworkType, Parameters};
use tictac_core::sync::{SyncEvent, SyncState, TurnSync};

/// Session role
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Play both symbols locally
    Solo,
    /// Join a host
    Client,
    /// Host and play
    Host,
    /// Host two clients without playing
    Server,
}

impl From<Mode> for NetworkType {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Solo => NetworkType::None,
            Mode::Client => NetworkType::Client,
            Mode::Host => NetworkType::Host,
            Mode::Server => NetworkType::DedicatedServer,
        }
    }
}

/// Arguments for a session
#[derive(Args)]
pub struct PlayArgs {
    /// Session role
    #[arg(short, long, value_enum, default_value_t = Mode::Solo)]
    pub mode: Mode,

    /// Host address to join (overrides config)
    #[arg(long)]
    pub host: Option<SocketAddr>,

    /// Local port to host on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to a config.toml (defaults to the platform config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Milliseconds between network ticks
    #[arg(long, default_value = "10")]
    pub tick_ms: u64,

    /// Write the effective configuration back before playing
    #[arg(long)]
    pub save_config: bool,
}

/// A line of user input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Play { x: u8, y: u8 },
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if matches!(line, "q" | "quit" | "exit") {
        return Some(Command::Quit);
    }
    let mut parts = line.split_whitespace();
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Command::Play { x, y })
}

/// Read stdin lines on a background thread
fn spawn_input_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn load_config(args: &PlayArgs) -> Result<Config> {
    let mut config = match &args.config {
        // Saving to a new file starts from the defaults
        Some(path) if args.save_config && !path.exists() => Config::default(),
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => config::load(),
    };
    if let Some(host) = args.host {
        config.network.host_address = host;
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Board with column (x) and row (y) labels
fn render_board(grid: &Grid) -> String {
    let mut out = String::from(" ");
    for x in 0..GRID_SIZE {
        out.push_str(&format!(" {}", x));
    }
    out.push('\n');
    for y in 0..GRID_SIZE {
        out.push_str(&y.to_string());
        for x in 0..GRID_SIZE {
            let symbol = grid.cell(x, y).map_or(' ', |cell| cell.as_char());
            out.push(' ');
            out.push(symbol);
        }
        out.push('\n');
    }
    out
}

fn save_config(args: &PlayArgs, config: &Config) -> Result<()> {
    match &args.config {
        Some(path) => config
            .save_to(path)
            .with_context(|| format!("Failed to save config to {}", path.display()))?,
        None => config::save(config).context("Failed to save config")?,
    }
    tracing::info!("Configuration saved");
    Ok(())
}

fn print_board(sync: &TurnSync) {
    println!();
    print!("{}", render_board(sync.game().grid()));
    println!();
}

fn describe(event: &SyncEvent, sync: &TurnSync) {
    match event {
        SyncEvent::StateChanged { to, .. } => match to {
            SyncState::WaitingOpponent => println!("Waiting for players..."),
            SyncState::WaitingConnection => println!("Connecting..."),
            SyncState::WaitingGameStart => println!("Connected, waiting for the game to start"),
            _ => {}
        },
        SyncEvent::SymbolAssigned(symbol) => println!("You play {}", symbol.as_char()),
        SyncEvent::GameStarted { first } => {
            println!("Game started, {} moves first", first.as_char());
            print_board(sync);
        }
        SyncEvent::MovePlayed { player, x, y } => {
            println!("{} played {} {}", player.as_char(), x, y);
            print_board(sync);
        }
        SyncEvent::MoveRejected { x, y } => println!("Move {} {} was rejected", x, y),
        SyncEvent::GameFinished { winner } if winner.is_player() => {
            println!("{} wins!", winner.as_char())
        }
        SyncEvent::GameFinished { .. } => println!("Draw!"),
        SyncEvent::PeerDisconnected(addr) => println!("{} disconnected", addr),
        SyncEvent::ConnectionFailed(addr) => println!("Could not connect to {}", addr),
        SyncEvent::ProtocolViolation { .. } => {}
    }

    if matches!(
        event,
        SyncEvent::GameStarted { .. } | SyncEvent::MovePlayed { .. }
    ) && sync.is_local_turn()
    {
        println!("Your move (x y):");
    }
}

pub fn execute(args: PlayArgs) -> Result<()> {
    let config = load_config(&args)?;
    if args.save_config {
        save_config(&args, &config)?;
    }
    let parameters = Parameters::from_config(&config.network, args.mode.into());
    tracing::info!(mode = ?args.mode, host = %parameters.host_address, "Starting session");

    let mut service = NetService::udp(config.transport.clone());
    let sync = Rc::new(RefCell::new(TurnSync::new()));
    service.add_listener(sync.clone());
    service
        .init(parameters)
        .context("Failed to start session")?;

    let input = spawn_input_reader();
    let tick = Duration::from_millis(args.tick_ms);
    let linger = config.transport.peer_timeout();

    let outcome = run(&mut service, &sync, &input, tick, linger);
    service.release();
    outcome
}

fn run(
    service: &mut NetService,
    sync: &Rc<RefCell<TurnSync>>,
    input: &Receiver<String>,
    tick: Duration,
    linger: Duration,
) -> Result<()> {
    loop {
        service.receive()?;
        service.process()?;

        let events = sync.borrow_mut().drain_events();
        for event in &events {
            describe(event, &sync.borrow());
            match event {
                SyncEvent::ConnectionFailed(addr) => bail!("Could not connect to {}", addr),
                SyncEvent::PeerDisconnected(_) => return Ok(()),
                _ => {}
            }
        }
        if sync.borrow().state() == SyncState::Finished {
            return drain_outgoing(service, tick, linger);
        }

        match input.try_recv() {
            Ok(line) => match parse_command(&line) {
                Some(Command::Quit) => return Ok(()),
                Some(Command::Play { x, y }) => {
                    if let Err(e) = sync.borrow_mut().request_play(service, x, y) {
                        println!("{}", e);
                    }
                }
                None => println!("Enter a move as `x y` (0-2), or `quit`"),
            },
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return Ok(()),
        }

        service.flush()?;
        thread::sleep(tick);
    }
}

/// Keep ticking until the last messages are acked, so a lost final
/// `PlayResult` is still retransmitted before `release` disconnects
fn drain_outgoing(service: &mut NetService, tick: Duration, linger: Duration) -> Result<()> {
    let deadline = Instant::now() + linger;
    loop {
        service.flush()?;
        if !service.has_unacked() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            tracing::warn!("Giving up on unacknowledged messages");
            return Ok(());
        }
        thread::sleep(tick);
        service.receive()?;
        service.process()?;
    }
}
