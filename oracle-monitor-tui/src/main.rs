//! Terminal dashboard for the oracle monitor.
//!
//! Configuration comes from `ORACLE_*` environment variables (see
//! [`MonitorConfig::from_env`]); logs go to `ORACLE_MONITOR_LOG` so they never corrupt the
//! screen.

mod input;
mod theme;
mod ui;

use crate::input::{Action, InputState};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use oracle_monitor::{DashboardHandle, MonitorConfig};
use ratatui::{Terminal, backend::CrosstermBackend};
use rustls::crypto::ring::default_provider;
use std::{error::Error, fs::OpenOptions, io, sync::Mutex, time::Duration};
use tracing::info;

const DEFAULT_LOG_PATH: &str = "oracle-monitor.log";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = default_provider().install_default();
    init_logging()?;

    let config = MonitorConfig::from_env()?;
    let dashboard = oracle_monitor::launch(config)?;

    // Setup panic hook to restore terminal on crash
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &dashboard);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    dashboard.shutdown().await;
    info!("oracle monitor exited");

    res.map_err(Into::into)
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    dashboard: &DashboardHandle,
) -> io::Result<()> {
    let tick_rate = Duration::from_millis(100);
    let frames = dashboard.frames();
    let mut input = InputState::default();

    loop {
        let frame = frames.borrow().clone();
        terminal.draw(|f| ui::draw(f, &frame, &input))?;

        if !event::poll(tick_rate)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match input.handle_key(key, &frame) {
            Action::Quit => return Ok(()),
            Action::Command(command) => {
                dashboard.send(command);
            }
            Action::Nothing => {}
        }
    }
}

// Initialise an INFO `Subscriber` writing to the log file and install it as the global default.
fn init_logging() -> Result<(), Box<dyn Error>> {
    let path = std::env::var("ORACLE_MONITOR_LOG").unwrap_or_else(|_| DEFAULT_LOG_PATH.to_string());
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        // Escape codes would end up in the file
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();

    info!(log = %path, "logging initialised");
    Ok(())
}
