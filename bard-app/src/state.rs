//! Host application state shared by the command loop and event forwarders.

use std::collections::VecDeque;
use std::sync::Arc;

use bard_core::wake::WakeWordTrigger;
use bard_core::{HttpBackend, InteractionState, NarrationClock, Orchestrator, PlaybackPosition};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::settings::AppSettings;

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub narration: Arc<NarrationClock>,
    pub backend: HttpBackend,
    /// `None` when the wake word is disabled in settings.
    pub wake: Option<WakeWordTrigger>,
    pub settings: AppSettings,
    pub history: Arc<Mutex<History>>,
}

/// One answered question.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub asked_at: DateTime<Utc>,
    pub position: PlaybackPosition,
    pub question: String,
    pub answer: String,
}

/// Bounded, newest-last record of completed exchanges.
#[derive(Debug)]
pub struct History {
    limit: usize,
    entries: VecDeque<Exchange>,
    pending_question: Option<String>,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: VecDeque::new(),
            pending_question: None,
        }
    }

    /// Feed a state change; records an exchange once an answer arrives for
    /// the question seen in `Thinking`.
    pub fn observe(&mut self, state: &InteractionState, position: PlaybackPosition) {
        match state {
            InteractionState::Thinking { transcript } => {
                self.pending_question = Some(transcript.clone());
            }
            InteractionState::Answering { answer_text, .. } => {
                if let Some(question) = self.pending_question.take() {
                    self.push(Exchange {
                        asked_at: Utc::now(),
                        position,
                        question,
                        answer: answer_text.clone(),
                    });
                }
            }
            InteractionState::Idle | InteractionState::Failed { .. } => {
                self.pending_question = None;
            }
            _ => {}
        }
    }

    pub fn push(&mut self, exchange: Exchange) {
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(exchange);
    }

    pub fn entries(&self) -> impl Iterator<Item = &Exchange> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thinking(q: &str) -> InteractionState {
        InteractionState::Thinking {
            transcript: q.into(),
        }
    }

    fn answering(a: &str) -> InteractionState {
        InteractionState::Answering {
            answer_text: a.into(),
            audio_ref: None,
        }
    }

    #[test]
    fn question_and_answer_become_one_exchange() {
        let mut history = History::new(10);
        let at = PlaybackPosition::new(3, 42.0);
        history.observe(&InteractionState::Listening, at);
        history.observe(&thinking("Who is Zacchaeus?"), at);
        history.observe(&answering("A tax collector in Jericho."), at);
        history.observe(&InteractionState::Idle, at);

        let entries: Vec<&Exchange> = history.entries().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].question, "Who is Zacchaeus?");
        assert_eq!(entries[0].position, at);
    }

    #[test]
    fn failed_interaction_records_nothing() {
        let mut history = History::new(10);
        let at = PlaybackPosition::new(1, 0.0);
        history.observe(&thinking("q"), at);
        history.observe(
            &InteractionState::Failed {
                reason: bard_core::FailureReason::from(&bard_core::BardError::AnswerServiceFailed(
                    "503".into(),
                )),
            },
            at,
        );
        history.observe(&answering("late"), at);
        assert!(history.is_empty());
    }

    #[test]
    fn oldest_exchange_is_evicted_at_the_limit() {
        let mut history = History::new(2);
        let at = PlaybackPosition::new(1, 1.0);
        for q in ["one", "two", "three"] {
            history.observe(&thinking(q), at);
            history.observe(&answering("a"), at);
        }
        let questions: Vec<&str> = history.entries().map(|e| e.question.as_str()).collect();
        assert_eq!(questions, vec!["two", "three"]);
        assert_eq!(history.len(), 2);
    }
}
