//! Sentence alignment for a chapter and the agent briefing derived from it.
//!
//! Alignment maps narration time to text: each sentence occupies a closed
//! interval `[start_time, end_time]` of the chapter audio. Intervals are
//! ordered by `sequence` and never overlap.

use serde::{Deserialize, Serialize};

use crate::error::{BardError, Result};
use crate::playback::PlaybackPosition;
use crate::services::BoxFuture;

/// One aligned sentence of narration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentSentence {
    pub sentence_id: u32,
    pub sequence: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

/// Fetches alignment data for a chapter.
pub trait AlignmentSource: Send + Sync + 'static {
    fn alignment(&self, chapter_id: u32) -> BoxFuture<'_, Result<Vec<AlignmentSentence>>>;
}

/// Validated, time-ordered alignment of one chapter.
#[derive(Debug, Clone)]
pub struct Alignment {
    chapter_id: u32,
    sentences: Vec<AlignmentSentence>,
}

impl Alignment {
    /// Sort by sequence and check that every interval is well-formed and
    /// disjoint from its neighbours.
    pub fn new(chapter_id: u32, mut sentences: Vec<AlignmentSentence>) -> Result<Self> {
        sentences.sort_by_key(|s| s.sequence);

        for s in &sentences {
            if s.end_time < s.start_time {
                return Err(BardError::Alignment(format!(
                    "sentence {} ends before it starts ({} < {})",
                    s.sentence_id, s.end_time, s.start_time
                )));
            }
        }
        for pair in sentences.windows(2) {
            if pair[1].start_time < pair[0].end_time {
                return Err(BardError::Alignment(format!(
                    "sentences {} and {} overlap",
                    pair[0].sentence_id, pair[1].sentence_id
                )));
            }
        }

        Ok(Self {
            chapter_id,
            sentences,
        })
    }

    pub fn chapter_id(&self) -> u32 {
        self.chapter_id
    }

    pub fn sentences(&self) -> &[AlignmentSentence] {
        &self.sentences
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// The sentence being narrated at `audio_time`, if any.
    pub fn sentence_at(&self, audio_time: f64) -> Option<&AlignmentSentence> {
        // First sentence that has not ended before `audio_time`.
        let idx = self
            .sentences
            .partition_point(|s| s.end_time < audio_time);
        self.sentences
            .get(idx)
            .filter(|s| s.start_time <= audio_time)
    }

    /// All sentences fully narrated by `audio_time`.
    pub fn heard_so_far(&self, audio_time: f64) -> &[AlignmentSentence] {
        let idx = self
            .sentences
            .partition_point(|s| s.end_time <= audio_time);
        &self.sentences[..idx]
    }
}

/// Snapshot of what the listener has heard, handed to the conversational agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    pub chapter_id: u32,
    pub audio_time: f64,
    pub sentence_id: Option<u32>,
    pub current_sentence: Option<String>,
    pub text_heard_so_far: String,
    pub word_count: usize,
}

impl AgentContext {
    /// Context with no alignment available: position only.
    pub fn position_only(position: PlaybackPosition) -> Self {
        Self {
            chapter_id: position.chapter_id,
            audio_time: position.audio_time,
            sentence_id: None,
            current_sentence: None,
            text_heard_so_far: String::new(),
            word_count: 0,
        }
    }

    /// Build the context at `position`, keeping at most `max_words` of the
    /// most recently heard words.
    pub fn build(alignment: &Alignment, position: PlaybackPosition, max_words: usize) -> Self {
        let current = alignment.sentence_at(position.audio_time);
        let heard = alignment
            .heard_so_far(position.audio_time)
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let (text_heard_so_far, word_count) = truncate_oldest_words(&heard, max_words);

        Self {
            chapter_id: position.chapter_id,
            audio_time: position.audio_time,
            sentence_id: current.map(|s| s.sentence_id),
            current_sentence: current.map(|s| s.text.clone()),
            text_heard_so_far,
            word_count,
        }
    }

    /// The briefing message sent to the agent right after connecting.
    pub fn briefing(&self) -> String {
        let mut out = format!(
            "The listener paused chapter {} at {:.1} seconds to ask a question.",
            self.chapter_id, self.audio_time
        );
        if let Some(sentence) = &self.current_sentence {
            out.push_str(&format!(" Current sentence: \"{sentence}\""));
        }
        if !self.text_heard_so_far.is_empty() {
            out.push_str(&format!(
                "\n\nText heard so far ({} words):\n{}",
                self.word_count, self.text_heard_so_far
            ));
        }
        out.push_str("\n\nDo not reveal anything that happens after this point.");
        out
    }
}

/// Keep the newest `max_words` words, marking a cut with a leading `...`.
fn truncate_oldest_words(text: &str, max_words: usize) -> (String, usize) {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return (words.join(" "), words.len());
    }
    let kept = &words[words.len() - max_words..];
    (format!("...{}", kept.join(" ")), max_words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(id: u32, start: f64, end: f64, text: &str) -> AlignmentSentence {
        AlignmentSentence {
            sentence_id: id,
            sequence: id,
            start_time: start,
            end_time: end,
            text: text.into(),
        }
    }

    fn chapter() -> Alignment {
        Alignment::new(
            1,
            vec![
                sentence(2, 4.0, 9.0, "He went up to the temple."),
                sentence(1, 0.0, 3.5, "In the beginning there was a road."),
                sentence(3, 9.0, 15.0, "The crowd was silent."),
            ],
        )
        .expect("valid alignment")
    }

    #[test]
    fn sentences_are_ordered_by_sequence() {
        let ids: Vec<u32> = chapter().sentences().iter().map(|s| s.sentence_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_inverted_interval() {
        let err = Alignment::new(1, vec![sentence(1, 5.0, 4.0, "x")]).expect_err("inverted");
        assert!(matches!(err, BardError::Alignment(_)));
    }

    #[test]
    fn rejects_overlap() {
        let err = Alignment::new(1, vec![sentence(1, 0.0, 5.0, "a"), sentence(2, 4.0, 6.0, "b")])
            .expect_err("overlap");
        assert!(matches!(err, BardError::Alignment(_)));
    }

    #[test]
    fn sentence_at_finds_containing_interval() {
        let a = chapter();
        assert_eq!(a.sentence_at(5.0).map(|s| s.sentence_id), Some(2));
        assert_eq!(a.sentence_at(0.0).map(|s| s.sentence_id), Some(1));
        // Shared boundary resolves to the earlier sentence.
        assert_eq!(a.sentence_at(9.0).map(|s| s.sentence_id), Some(2));
        // Gap between sentences.
        assert!(a.sentence_at(3.7).is_none());
        assert!(a.sentence_at(20.0).is_none());
    }

    #[test]
    fn heard_so_far_excludes_the_sentence_in_progress() {
        let a = chapter();
        let heard: Vec<u32> = a.heard_so_far(10.0).iter().map(|s| s.sentence_id).collect();
        assert_eq!(heard, vec![1, 2]);
        assert!(a.heard_so_far(1.0).is_empty());
    }

    #[test]
    fn context_truncates_from_the_oldest_end() {
        let a = chapter();
        let ctx = AgentContext::build(&a, PlaybackPosition::new(1, 10.0), 5);
        assert_eq!(ctx.word_count, 5);
        assert_eq!(ctx.text_heard_so_far, "...went up to the temple.");
        assert_eq!(ctx.sentence_id, Some(3));
        assert_eq!(ctx.current_sentence.as_deref(), Some("The crowd was silent."));
    }

    #[test]
    fn context_without_truncation_has_no_ellipsis() {
        let a = chapter();
        let ctx = AgentContext::build(&a, PlaybackPosition::new(1, 4.0), 2000);
        assert_eq!(ctx.text_heard_so_far, "In the beginning there was a road.");
        assert_eq!(ctx.word_count, 7);
    }

    #[test]
    fn briefing_mentions_position_and_heard_text() {
        let a = chapter();
        let ctx = AgentContext::build(&a, PlaybackPosition::new(1, 10.0), 2000);
        let briefing = ctx.briefing();
        assert!(briefing.contains("chapter 1 at 10.0 seconds"));
        assert!(briefing.contains("The crowd was silent."));
        assert!(briefing.contains("In the beginning there was a road."));
    }

    #[test]
    fn position_only_briefing_skips_heard_text() {
        let ctx = AgentContext::position_only(PlaybackPosition::new(7, 1.5));
        let briefing = ctx.briefing();
        assert!(briefing.contains("chapter 7 at 1.5 seconds"));
        assert!(!briefing.contains("Text heard so far"));
    }
}
