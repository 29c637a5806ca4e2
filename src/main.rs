use anyhow::Result;
use dualchat_core::config::data_dir;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::{EventHandler, Tui};

const LOG_FILE: &str = "dualchat.log";

#[tokio::main]
async fn main() -> Result<()> {
    // Runs without logs if the file cannot be opened. Reported before the
    // terminal switches to the alternate screen.
    if let Err(e) = data_dir().and_then(|dir| init_logging(&dir)) {
        eprintln!("dualchat: logging disabled: {e:#}");
    }

    let mut app = App::new();

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new(&app.controller);

    let result = run(&mut terminal, &mut app, &mut events).await;

    app.controller.cancel_request();
    tui::restore()?;
    tracing::info!("dualchat exiting");

    result
}

async fn run(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }
    Ok(())
}

/// Structured logs in `<dir>/dualchat.log`, normally the config directory.
fn init_logging(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dualchat=debug,dualchat_core=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dualchat starting");
    Ok(())
}
