//! Bard headless host.
//!
//! Wires the orchestrator to the Bard service API, the system microphone and
//! a software narration clock, then reads line commands from stdin.

mod commands;
mod player;
mod settings;
mod state;

use std::sync::Arc;

use anyhow::Context;
use bard_core::audio::CpalMicrophone;
use bard_core::wake::WakeWordDetector;
use bard_core::{
    ChannelWakeWord, Collaborators, HttpBackend, LegacyServices, Narration, NarrationClock,
    Orchestrator,
};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::commands::{execute, parse_command, HELP};
use crate::player::ClockedAnswerPlayer;
use crate::settings::{default_settings_path, load_settings, save_settings};
use crate::state::{AppState, History};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bard=info")),
        )
        .init();

    info!("Bard starting");

    // ── Settings ──────────────────────────────────────────────────────────
    let settings_path = default_settings_path();
    let first_run = !settings_path.exists();
    let mut settings = load_settings(&settings_path);
    if first_run {
        if let Err(e) = save_settings(&settings_path, &settings) {
            warn!(path = %settings_path.display(), error = %e, "could not write default settings");
        }
    }
    settings.apply_env_overrides();
    settings.normalize();
    info!(
        api_url = %settings.api_url,
        wake_word = settings.wake_word_enabled,
        preview_seconds = settings.preview_seconds,
        "settings loaded"
    );

    // ── Collaborators ─────────────────────────────────────────────────────
    let backend = HttpBackend::new(&settings.api_url).context("invalid API URL")?;
    let narration = Arc::new(NarrationClock::new(1));
    let player = Arc::new(ClockedAnswerPlayer::new(backend.clone()));
    let microphone = Arc::new(CpalMicrophone::new(settings.preferred_input_device.clone()));

    let (wake_word, wake_trigger) = if settings.wake_word_enabled {
        let detector = ChannelWakeWord::new();
        let trigger = detector.trigger_handle();
        (
            Some(Box::new(detector) as Box<dyn WakeWordDetector>),
            Some(trigger),
        )
    } else {
        (None, None)
    };

    let mut config = settings.orchestrator_config();
    config.conversation = match backend.agent_config().await {
        Ok(agent) => agent.conversation_config(),
        Err(e) => {
            debug!("agent config unavailable: {e}");
            None
        }
    };

    let backend_arc = Arc::new(backend.clone());
    let (orchestrator, actor) = Orchestrator::spawn(
        config,
        Collaborators {
            narration: narration.clone(),
            wake_word,
            legacy: Some(LegacyServices {
                microphone,
                transcriber: backend_arc.clone(),
                questions: backend_arc,
                player,
            }),
            conversation: None,
        },
    );

    let history = Arc::new(Mutex::new(History::new(settings.history_limit)));
    let forwarders = spawn_event_forwarders(&orchestrator, narration.clone(), history.clone());

    let state = AppState {
        orchestrator,
        narration,
        backend,
        wake: wake_trigger,
        settings,
        history,
    };

    // ── Command loop ──────────────────────────────────────────────────────
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(msg) => {
                println!("{msg}");
                continue;
            }
        };
        match execute(&state, command).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => error!(error = %e, "command failed"),
        }
    }

    info!("Bard shutting down");
    state.orchestrator.shutdown().await;
    if let Err(e) = actor.await {
        warn!(error = %e, "orchestrator task ended abnormally");
    }
    for task in forwarders {
        task.abort();
    }
    Ok(())
}

/// Log state changes and notices, and record answered questions.
fn spawn_event_forwarders(
    orchestrator: &Orchestrator,
    narration: Arc<NarrationClock>,
    history: Arc<Mutex<History>>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut states = orchestrator.subscribe_states();
    let state_task = tokio::spawn(async move {
        loop {
            match states.recv().await {
                Ok(event) => {
                    info!(seq = event.seq, state = event.state.label(), "interaction state");
                    // Narration sits at the captured position while an
                    // interaction is active.
                    history.lock().observe(&event.state, narration.position());
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "state events lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut notices = orchestrator.subscribe_notices();
    let notice_task = tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => warn!(
                    seq = notice.seq,
                    kind = ?notice.kind,
                    fatal = notice.fatal,
                    "{}",
                    notice.message
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notices lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    vec![state_task, notice_task]
}
