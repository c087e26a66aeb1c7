use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use popups::headless::HeadlessStage;
use popups::{ClickTarget, Popup, PopupGroup, PopupRegistry};
use popups_core::config::Config;
use popups_core::host::ContentConfig;
use popups_core::EventKind;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tokio::sync::oneshot;
use tokio::task::LocalSet;
use tracing::{info, warn};

const EVENT_KINDS: [EventKind; 8] = [
    EventKind::Ready,
    EventKind::BeforeOpen,
    EventKind::Open,
    EventKind::CancelOpen,
    EventKind::BeforeClose,
    EventKind::Close,
    EventKind::CancelClose,
    EventKind::TransitionEnd,
];

#[derive(Parser)]
#[command(name = "popupctl", about = "Drive popup lifecycles on an in-memory stage")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a lifecycle scenario and log every notification
    Run {
        #[arg(value_enum)]
        scenario: Scenario,
        /// Computed transition duration of each popup (e.g. 0.3s, 150ms)
        #[arg(long)]
        duration: Option<String>,
        /// Configuration file to use instead of the default location
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// Open a popup, then close it with a background click
    OpenClose,
    /// Close an opened popup and reopen it before the close finishes
    CancelClose,
    /// Close a popup while it is still opening
    CancelOpen,
    /// Try to close a non-closable popup, then unlock it
    Locked,
    /// Open three popups and close them together
    CloseAll,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("popupctl=info".parse()?)
                .add_directive("popups=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Run {
            scenario,
            duration,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            LocalSet::new().block_on(&runtime, run(scenario, duration, config))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    config.context("loading config")
}

async fn run(scenario: Scenario, duration: Option<String>, config: Config) -> Result<()> {
    let mut stage = HeadlessStage::new();
    if let Some(css) = duration {
        stage = stage.with_transition(css);
    }
    let stage = Rc::new(stage);
    let registry = PopupRegistry::new();
    let group = PopupGroup::register(&registry, None, stage.clone(), &config)?;
    info!(group = group.id(), ?scenario, "running scenario");

    match scenario {
        Scenario::OpenClose => {
            let popup = open(&group, "alert").await?;
            if let Some(closing) = popup.click(ClickTarget::Background) {
                closing.await?;
            } else {
                warn!(popup = %popup.id(), "background click ignored");
                popup.close(true, None).await?;
            }
        }
        Scenario::CancelClose => {
            let popup = open(&group, "alert").await?;
            let closing = popup.close(true, None);
            let reopening = popup.open(ContentConfig::new("alert"), true, None);
            report("close", closing.await);
            report("reopen", reopening.await);
            popup.close(true, None).await?;
        }
        Scenario::CancelOpen => {
            let pending = group.open(ContentConfig::new("alert"), true, None);
            let popup = newest(&group)?;
            ready(&popup)
                .await
                .context("popup dropped before it was ready")?;
            let closing = popup.close(true, None);
            report("open", pending.await.map(|_| ()));
            report("close", closing.await);
        }
        Scenario::Locked => {
            let popup = open(&group, "confirm").await?;
            popup.set_closable(false);
            report("locked close", popup.close(true, None).await);
            popup.set_closable(true);
            report("unlocked close", popup.close(true, None).await);
        }
        Scenario::CloseAll => {
            for content in ["alert", "confirm", "prompt"] {
                open(&group, content).await?;
            }
            let summary = group.close_all().await;
            for (id, result) in &summary.results {
                info!(popup = %id, ok = result.is_ok(), "close_all entry");
            }
            info!(complete = summary.is_complete(), "close_all finished");
        }
    }

    info!(
        live = group.len(),
        visible = group.is_visible(),
        popups_mounted = stage.log().popups_mounted(),
        contents_live = stage.log().live_contents(),
        "scenario finished"
    );
    group.destroy();
    Ok(())
}

/// Open `content_type` in `group` with every notification logged.
async fn open(group: &PopupGroup, content_type: &str) -> Result<Popup> {
    let pending = group.open(ContentConfig::new(content_type), true, None);
    trace_events(&newest(group)?);
    Ok(pending.await?)
}

fn newest(group: &PopupGroup) -> Result<Popup> {
    let popup = group
        .popups()
        .pop()
        .context("group rejected the popup")?;
    Ok(popup)
}

fn trace_events(popup: &Popup) {
    for kind in EVENT_KINDS {
        let weak = popup.downgrade();
        let id = popup.id();
        popup.events().on(kind, move |event| {
            let state = weak.upgrade().map(|p| p.state().to_string());
            info!(
                popup = %id,
                event = %event.kind(),
                state = state.as_deref().unwrap_or("dropped"),
                detail = ?event.detail(),
                "notification"
            );
        });
    }
}

/// Completes when `popup` fires `ready`.
fn ready(popup: &Popup) -> oneshot::Receiver<()> {
    trace_events(popup);
    let (tx, rx) = oneshot::channel();
    let tx = Cell::new(Some(tx));
    popup.events().once(EventKind::Ready, move |_| {
        if let Some(tx) = tx.take() {
            let _ = tx.send(());
        }
    });
    rx
}

fn report(what: &str, outcome: popups_core::Result<()>) {
    match outcome {
        Ok(()) => info!(operation = what, "resolved"),
        Err(err) => warn!(operation = what, error = %err, "rejected"),
    }
}
