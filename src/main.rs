//! Headless entry point for the Agnes voice coach.
//!
//! # Startup sequence
//!
//! 1. Parse CLI flags and initialise logging.
//! 2. Load [`AppConfig`] (explicit `--config` path or the platform default).
//! 3. Create a current-thread [`tokio`] runtime; `cpal` streams are not
//!    `Send`, so the session runner is driven by `block_on` directly.
//! 4. Open the default input and output devices.
//! 5. Spawn the hotkey listener thread and forward its events as commands.
//! 6. Start the session and run until Ctrl-C or a terminal error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::mpsc;

use agnes_voice::{
    audio::{CpalCapture, CpalPlayback},
    collab::Collaborators,
    config::AppConfig,
    hotkey::{HotkeyBindings, HotkeyEvent, HotkeyListener},
    session::{new_shared_state, SessionCommand, SessionRunner, SharedState, WsConnector},
};

#[derive(Debug, Parser)]
#[command(name = "agnes-voice", version, about = "Realtime voice coaching session with Agnes")]
struct Args {
    /// Settings file to use instead of the platform default.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Transmit the microphone only while the push-to-talk key is held.
    #[arg(long)]
    push_to_talk: bool,

    /// Log filter, e.g. `debug` or `agnes_voice=trace` (overrides RUST_LOG).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(filter) = args.log_level.as_deref() {
        logger.parse_filters(filter);
    }
    logger.init();
    log::info!("Agnes voice coach starting up");

    let mut config = match args.config.as_deref() {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        }),
    };
    if args.push_to_talk {
        config.hotkey.push_to_talk = true;
    }
    if config.agent.resolved_api_key().is_none() {
        log::warn!(
            "no API key configured; set agent.api_key or {}",
            agnes_voice::config::API_KEY_ENV
        );
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;

    rt.block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let capture = CpalCapture::new(config.audio.input_sample_rate);
    let playback = CpalPlayback::open(config.audio.output_sample_rate).context("opening audio output")?;
    let ui = new_shared_state();

    let runner = SessionRunner::new(
        config.clone(),
        capture,
        playback,
        Arc::new(WsConnector::new()),
        Collaborators::default(),
        Arc::clone(&ui),
    )?;

    let (command_tx, command_rx) = mpsc::channel::<SessionCommand>(32);

    // Hotkeys
    let (hotkey_tx, mut hotkey_rx) = mpsc::channel::<HotkeyEvent>(16);
    let _hotkey_listener = match HotkeyListener::start(HotkeyBindings::from_config(&config.hotkey), hotkey_tx) {
        Ok(listener) => Some(listener),
        Err(e) => {
            log::warn!("hotkeys unavailable: {e}");
            None
        }
    };
    {
        let tx = command_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = hotkey_rx.recv().await {
                if tx.send(event.into()).await.is_err() {
                    break;
                }
            }
        });
    }

    // Ctrl-C ends the session intentionally.
    {
        let tx = command_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("interrupt received, ending session");
                let _ = tx.send(SessionCommand::End).await;
            }
        });
    }

    tokio::spawn(log_ui_changes(Arc::clone(&ui)));

    command_tx.send(SessionCommand::Start).await?;
    drop(command_tx);

    match runner.run(command_rx).await {
        Some(record) => {
            log::info!(
                "session {} finished: {}s, {} transcript entries, score {}",
                record.id,
                record.duration_secs,
                record.transcript.len(),
                record.score.map_or_else(|| "n/a".to_string(), |s| s.to_string())
            );
            if let Some(feedback) = record.feedback {
                println!("{feedback}");
            }
            Ok(())
        }
        None => {
            let error = ui.lock().ok().and_then(|ui| ui.error_message.clone());
            match error {
                Some(message) => bail!(message),
                None => Ok(()),
            }
        }
    }
}

/// Poll the shared state and log what a front end would redraw.
async fn log_ui_changes(ui: SharedState) {
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let mut shown_entries = 0;
    let mut last = None;
    let mut last_score = None;

    loop {
        ticker.tick().await;
        let Ok(state) = ui.lock().map(|s| s.clone()) else {
            return;
        };

        for entry in state.transcript.iter().skip(shown_entries) {
            log::info!("{}: {}", entry.speaker.label(), entry.text);
        }
        shown_entries = state.transcript.len();

        if state.score != last_score {
            if let Some(score) = state.score {
                log::info!("Agnes score: {score}/100");
            }
            last_score = state.score;
        }

        let summary = (state.connection, state.activity, state.error_message.clone(), state.muted);
        if last.as_ref() != Some(&summary) {
            log::info!(
                "[{}] {}{}{}",
                state.connection.label(),
                state.activity.label(),
                if state.muted { " (muted)" } else { "" },
                state.error_message.as_deref().map(|e| format!(" - {e}")).unwrap_or_default()
            );
            last = Some(summary);
        }
    }
}
