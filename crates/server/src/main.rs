mod config;
mod tui;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use relay::{PhysicsWorld, Server, ServerEvent, TestingGround, TickPacer, UdpTransport};

use config::ServerConfig;
use tui::TuiState;

type RelayServer = Server<UdpTransport, PhysicsWorld>;

#[derive(Parser)]
#[command(name = "relay-server")]
#[command(about = "Priority-scheduled state replication server")]
struct Args {
    #[arg(short, long, help = "TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(long, help = "Byte ceiling for one state update")]
    max_payload: Option<usize>,

    #[arg(short, long)]
    max_clients: Option<usize>,

    #[arg(long, help = "Number of dynamic props in the testing ground")]
    props: Option<usize>,

    #[arg(long)]
    headless: bool,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.replication.tick_rate = tick_rate;
        }
        if let Some(max_payload) = self.max_payload {
            config.replication.max_payload = max_payload;
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(props) = self.props {
            config.props = props;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.server_config()?;

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let bind_addr = config.bind_addr();
    let transport = UdpTransport::bind(&bind_addr, config.max_clients, config.udp.clone())
        .with_context(|| format!("binding {bind_addr}"))?;
    let local_addr = transport.local_addr();
    let sim = PhysicsWorld::new(config.player.clone());
    let mut server = Server::new(transport, sim, config.replication.clone())?;
    server.load_level(&TestingGround::build(config.props))?;

    let running = Arc::new(AtomicBool::new(true));
    watch_ctrl_c(Arc::clone(&running))?;

    if args.headless {
        log::info!("Server started on {}", local_addr);
        run_headless(&mut server, &running);
        log::info!("Server shutting down");
    } else {
        run_with_tui(&mut server, &running, &config)?;
    }

    server.shutdown();
    Ok(())
}

/// Clears `running` on Ctrl-C so the loop finishes its tick and the server
/// gets to flush and close the transport.
fn watch_ctrl_c(running: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;

    thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            match runtime.block_on(tokio::signal::ctrl_c()) {
                Ok(()) => log::info!("Ctrl-C received, stopping"),
                Err(e) => log::error!("Listening for Ctrl-C failed: {e}"),
            }
            running.store(false, Ordering::SeqCst);
        })
        .context("spawning signal thread")?;
    Ok(())
}

fn run_headless(server: &mut RelayServer, running: &AtomicBool) {
    let mut pacer = TickPacer::new(server.config().tick_interval());
    while running.load(Ordering::SeqCst) {
        let tick_started = Instant::now();
        server.tick();
        // Already logged by the server; the queue only needs draining.
        server.drain_events().for_each(drop);
        pacer.wait(tick_started);
    }
}

fn run_with_tui(
    server: &mut RelayServer,
    running: &AtomicBool,
    config: &ServerConfig,
) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut pacer = TickPacer::new(server.config().tick_interval());
    let mut tui_state = TuiState::new(config.max_clients);
    tui_state.log_info(format!(
        "Server started on {} at {} Hz",
        server.transport().local_addr(),
        server.config().tick_rate
    ));

    while running.load(Ordering::SeqCst) {
        let tick_started = Instant::now();
        server.tick();

        for event in server.drain_events() {
            match event {
                ServerEvent::ClientConnected { conn, player } => {
                    tui_state.log_info(format!("{} joined as {}", conn, player));
                }
                ServerEvent::ClientDisconnected {
                    conn,
                    player,
                    reason,
                } => {
                    tui_state.log_info(format!("{} ({}) {}", conn, player, reason.as_str()));
                }
                ServerEvent::ConnectionRejected { conn, reason } => {
                    tui_state.log_warn(format!("Rejected {}: {}", conn, reason));
                }
                ServerEvent::ProtocolError { conn, error } => {
                    tui_state.log_warn(format!("{}: {}", conn, error));
                }
                ServerEvent::Error { message } => {
                    tui_state.log_error(message);
                }
            }
        }

        if let Some(conn) = tui_state.take_pending_kick() {
            server.kick(conn);
        }

        let stats = server.stats();

        if event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        // Raw mode swallows SIGINT.
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            running.store(false, Ordering::SeqCst);
                        }
                        KeyCode::Up => tui_state.select_prev(),
                        KeyCode::Down => tui_state.select_next(stats.last_tick.len()),
                        KeyCode::Char('k') | KeyCode::Char('K') => {
                            tui_state.request_kick(&stats);
                        }
                        _ => {}
                    }
                }
            }
        }

        terminal.draw(|frame| {
            tui::render(frame, &mut tui_state, &stats);
        })?;

        pacer.wait(tick_started);
    }

    tui_state.log_info("Shutting down...");

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
