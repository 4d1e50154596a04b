//! Line commands for the interactive host.
//!
//! Each stdin line parses into a [`Command`]; [`execute`] runs it against the
//! shared [`AppState`] and reports whether the loop should keep reading.

use bard_core::audio::list_input_devices;
use bard_core::{Narration, TriggerSource};
use tracing::{info, warn};

use crate::state::AppState;

/// Keyword the manual `wake` command reports to the detector channel.
pub const WAKE_KEYWORD: &str = "hey bard";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Chapters,
    Play { chapter_id: u32, audio_time: f64 },
    Pause,
    Ask,
    Wake,
    Cancel,
    Resume,
    Status,
    History,
    Devices,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".into());
    };
    let args: Vec<&str> = words.collect();

    let no_args = |cmd: Command| {
        if args.is_empty() {
            Ok(cmd)
        } else {
            Err(format!("`{head}` takes no arguments"))
        }
    };

    match head.to_ascii_lowercase().as_str() {
        "chapters" => no_args(Command::Chapters),
        "play" => parse_play(&args),
        "pause" => no_args(Command::Pause),
        "ask" => no_args(Command::Ask),
        "wake" => no_args(Command::Wake),
        "cancel" => no_args(Command::Cancel),
        "resume" => no_args(Command::Resume),
        "status" => no_args(Command::Status),
        "history" => no_args(Command::History),
        "devices" => no_args(Command::Devices),
        "help" | "?" => no_args(Command::Help),
        "quit" | "exit" => no_args(Command::Quit),
        other => Err(format!("unknown command `{other}` (try `help`)")),
    }
}

fn parse_play(args: &[&str]) -> Result<Command, String> {
    let (chapter, time) = match args {
        [chapter] => (*chapter, None),
        [chapter, time] => (*chapter, Some(*time)),
        _ => return Err("usage: play <chapter> [seconds]".into()),
    };
    let chapter_id = chapter
        .parse::<u32>()
        .map_err(|_| format!("invalid chapter `{chapter}`"))?;
    let audio_time = match time {
        Some(t) => t
            .parse::<f64>()
            .ok()
            .filter(|t| t.is_finite() && *t >= 0.0)
            .ok_or_else(|| format!("invalid offset `{t}`"))?,
        None => 0.0,
    };
    Ok(Command::Play {
        chapter_id,
        audio_time,
    })
}

pub const HELP: &str = "\
commands:
  chapters               list chapters from the service
  play <chapter> [secs]  start narration
  pause                  pause narration
  ask                    ask a question (push-to-talk)
  wake                   simulate the wake word
  cancel                 cancel the current interaction
  resume                 end the current interaction and resume narration
  status                 show interaction and narration state
  history                list answered questions
  devices                list audio input devices
  quit                   exit";

/// Run one command. Returns `false` when the host should exit.
pub async fn execute(state: &AppState, command: Command) -> anyhow::Result<bool> {
    match command {
        Command::Chapters => {
            for chapter in state.backend.chapters().await? {
                let duration = chapter
                    .duration_seconds
                    .map(|d| format!("{d:.0}s"))
                    .unwrap_or_else(|| "?".into());
                println!(
                    "{:>3}  {}  ({duration}, {} sentences)",
                    chapter.chapter_id, chapter.title, chapter.sentence_count
                );
            }
        }
        Command::Play {
            chapter_id,
            audio_time,
        } => {
            let duration = match state.backend.chapters().await {
                Ok(chapters) => chapters
                    .into_iter()
                    .find(|c| c.chapter_id == chapter_id)
                    .and_then(|c| c.duration_seconds),
                Err(e) => {
                    warn!(error = %e, "chapter list unavailable; playing without a duration");
                    None
                }
            };
            state.narration.load(chapter_id, audio_time, duration);
            state.narration.play();
            state.orchestrator.narration_changed();
            info!(chapter_id, audio_time, "narration started");
        }
        Command::Pause => {
            state.narration.pause();
            state.orchestrator.narration_changed();
            let at = state.narration.position();
            info!(chapter_id = at.chapter_id, audio_time = at.audio_time, "narration paused");
        }
        Command::Ask => state.orchestrator.trigger(TriggerSource::Manual),
        Command::Wake => match &state.wake {
            Some(trigger) if trigger.trigger(WAKE_KEYWORD) => {}
            Some(_) => println!("wake word is not listening right now"),
            None => println!("wake word is disabled in settings"),
        },
        Command::Cancel => state.orchestrator.cancel(),
        Command::Resume => state.orchestrator.resume(),
        Command::Status => {
            let at = state.narration.position();
            println!(
                "interaction: {}\nnarration:   chapter {} at {:.1}s ({})",
                state.orchestrator.state().label(),
                at.chapter_id,
                at.audio_time,
                if state.narration.is_playing() {
                    "playing"
                } else {
                    "paused"
                }
            );
            if let Some(left) = state.orchestrator.silence_countdown() {
                println!("countdown:   {left}s");
            }
        }
        Command::History => {
            let history = state.history.lock();
            if history.is_empty() {
                println!("no questions yet");
            }
            for exchange in history.entries() {
                println!(
                    "[{}] ch {} @ {:.1}s\n  Q: {}\n  A: {}",
                    exchange.asked_at.format("%H:%M:%S"),
                    exchange.position.chapter_id,
                    exchange.position.audio_time,
                    exchange.question,
                    exchange.answer
                );
            }
        }
        Command::Devices => {
            let devices = list_input_devices();
            if devices.is_empty() {
                println!("no input devices");
            }
            for name in devices {
                let marker = if state.settings.preferred_input_device.as_deref() == Some(&name) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {name}");
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}
