//! HTTP client for the Bard service API.
//!
//! | Call | Endpoint |
//! |------|----------|
//! | [`Transcriber::transcribe`] | `POST /transcribe` (multipart, field `audio`) |
//! | [`QuestionService::ask`] | `POST /ask` |
//! | [`AlignmentSource::alignment`] | `GET /chapters/{id}/alignment` |
//! | [`HttpBackend::chapters`] | `GET /chapters` |
//! | [`HttpBackend::agent_config`] | `GET /agent/config` |

use std::time::Duration;

use reqwest::{multipart, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Answer, AskRequest, BoxFuture, QuestionService, Transcriber, Transcript};
use crate::{
    alignment::{AlignmentSentence, AlignmentSource},
    buffering::clip::AudioClip,
    error::{BardError, Result},
    pipeline::conversation::ConversationConfig,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Chapter listing entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChapterInfo {
    pub chapter_id: u32,
    pub title: String,
    pub duration_seconds: Option<f64>,
    pub sentence_count: u32,
}

/// Conversational agent settings published by the service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub voice_id: String,
    pub use_agent: bool,
    pub conversation_timeout_ms: u64,
    pub max_context_words: usize,
}

impl AgentConfig {
    /// Session settings for a conversation transport, or `None` when the
    /// service has the agent switched off.
    pub fn conversation_config(&self) -> Option<ConversationConfig> {
        if !self.use_agent || self.agent_id.trim().is_empty() {
            return None;
        }
        let defaults = ConversationConfig::default();
        Some(ConversationConfig {
            agent_id: self.agent_id.clone(),
            silence_timeout: match self.conversation_timeout_ms {
                0 => defaults.silence_timeout,
                ms => Duration::from_millis(ms),
            },
            max_context_words: match self.max_context_words {
                0 => defaults.max_context_words,
                n => n,
            },
            ..defaults
        })
    }
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

#[derive(Debug, Serialize)]
struct AskBody<'a> {
    question: &'a str,
    chapter_id: u32,
    audio_time: f64,
}

#[derive(Debug, Deserialize)]
struct AskResponse {
    answer: String,
    audio_url: Option<String>,
    #[serde(default)]
    current_sentence_id: Option<u32>,
    #[serde(default)]
    context_sentence_count: Option<u32>,
}

/// Client for one Bard service instance.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    /// # Errors
    /// The base URL does not parse.
    pub fn new(base_url: &str) -> Result<Self> {
        // A trailing slash makes `join` append instead of replacing the last segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| BardError::Other(anyhow::anyhow!("invalid service URL {base_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve an endpoint path or a server-returned reference against the base URL.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| BardError::Other(anyhow::anyhow!("invalid URL {path}: {e}")))
    }

    pub async fn chapters(&self) -> Result<Vec<ChapterInfo>> {
        let url = self.resolve("chapters")?;
        let response = self.client.get(url).send().await.map_err(other)?;
        let response = check_status(response).await.map_err(BardError::Other)?;
        response.json().await.map_err(other)
    }

    pub async fn agent_config(&self) -> Result<AgentConfig> {
        let url = self.resolve("agent/config")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BardError::ConversationConnectFailed(e.to_string()))?;
        let response = check_status(response)
            .await
            .map_err(|e| BardError::ConversationConnectFailed(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| BardError::ConversationConnectFailed(e.to_string()))
    }

    /// Download answer audio referenced by an [`Answer`].
    pub async fn answer_audio(&self, audio_ref: &str) -> Result<Vec<u8>> {
        let url = self.resolve(audio_ref)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BardError::PlaybackBlocked(e.to_string()))?;
        let response = check_status(response)
            .await
            .map_err(|e| BardError::PlaybackBlocked(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BardError::PlaybackBlocked(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn post_transcribe(&self, clip: AudioClip) -> anyhow::Result<Transcript> {
        let wav = clip.to_wav_bytes()?;
        debug!(
            bytes = wav.len(),
            duration_s = clip.duration_secs(),
            "uploading question clip"
        );
        let part = multipart::Part::bytes(wav)
            .file_name("question.wav")
            .mime_str("audio/wav")?;
        let form = multipart::Form::new().part("audio", part);

        let response = self
            .client
            .post(self.resolve("transcribe")?)
            .multipart(form)
            .send()
            .await?;
        let payload: TranscribeResponse = check_status(response).await?.json().await?;
        Ok(Transcript {
            text: payload.text.trim().to_string(),
        })
    }

    async fn post_ask(&self, request: AskRequest) -> anyhow::Result<Answer> {
        let body = AskBody {
            question: &request.question,
            chapter_id: request.chapter_id,
            audio_time: request.audio_time,
        };
        let response = self
            .client
            .post(self.resolve("ask")?)
            .json(&body)
            .send()
            .await?;
        let payload: AskResponse = check_status(response).await?.json().await?;
        debug!(
            sentence_id = ?payload.current_sentence_id,
            context_sentences = ?payload.context_sentence_count,
            has_audio = payload.audio_url.is_some(),
            "answer received"
        );
        Ok(Answer {
            answer_text: payload.answer,
            audio_ref: payload.audio_url,
        })
    }

    async fn get_alignment(&self, chapter_id: u32) -> anyhow::Result<Vec<AlignmentSentence>> {
        let url = self.resolve(&format!("chapters/{chapter_id}/alignment"))?;
        let response = self.client.get(url).send().await?;
        Ok(check_status(response).await?.json().await?)
    }
}

impl Transcriber for HttpBackend {
    fn transcribe(&self, clip: AudioClip) -> BoxFuture<'_, Result<Transcript>> {
        Box::pin(async move {
            self.post_transcribe(clip)
                .await
                .map_err(|e| BardError::TranscriptionFailed(e.to_string()))
        })
    }
}

impl QuestionService for HttpBackend {
    fn ask(&self, request: AskRequest) -> BoxFuture<'_, Result<Answer>> {
        Box::pin(async move {
            self.post_ask(request)
                .await
                .map_err(|e| BardError::AnswerServiceFailed(e.to_string()))
        })
    }
}

impl AlignmentSource for HttpBackend {
    fn alignment(&self, chapter_id: u32) -> BoxFuture<'_, Result<Vec<AlignmentSentence>>> {
        Box::pin(async move {
            self.get_alignment(chapter_id)
                .await
                .map_err(|e| BardError::Alignment(e.to_string()))
        })
    }
}

fn other(e: reqwest::Error) -> BardError {
    BardError::Other(e.into())
}

/// Turn a non-success response into an error carrying the server's detail.
async fn check_status(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or(body);
    warn!(%status, %detail, "service request failed");
    anyhow::bail!("{status}: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_onto_base_path() {
        let backend = HttpBackend::new("http://localhost:8000/api").unwrap();
        assert_eq!(
            backend.resolve("/chapters/3/alignment").unwrap().as_str(),
            "http://localhost:8000/api/chapters/3/alignment"
        );
    }

    #[test]
    fn absolute_audio_refs_are_kept() {
        let backend = HttpBackend::new("http://localhost:8000").unwrap();
        assert_eq!(
            backend.resolve("https://cdn.example.com/a.mp3").unwrap().as_str(),
            "https://cdn.example.com/a.mp3"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(HttpBackend::new("not a url").is_err());
    }

    #[test]
    fn ask_response_tolerates_missing_audio() {
        let payload: AskResponse = serde_json::from_str(
            r#"{"answer":"He is a tax collector.","audio_url":null,"current_sentence_id":12,"context_sentence_count":40}"#,
        )
        .unwrap();
        assert_eq!(payload.answer, "He is a tax collector.");
        assert!(payload.audio_url.is_none());
    }

    #[test]
    fn agent_config_parses_service_payload() {
        let cfg: AgentConfig = serde_json::from_str(
            r#"{"agent_id":"agent_1","voice_id":"v","use_agent":true,"conversation_timeout_ms":10000,"max_context_words":2000}"#,
        )
        .unwrap();
        assert!(cfg.use_agent);
        assert_eq!(cfg.conversation_timeout_ms, 10_000);
    }

    #[test]
    fn agent_config_maps_onto_session_settings() {
        let cfg = AgentConfig {
            agent_id: "agent_1".into(),
            voice_id: "v".into(),
            use_agent: true,
            conversation_timeout_ms: 4_500,
            max_context_words: 500,
        };
        let session = cfg.conversation_config().expect("agent enabled");
        assert_eq!(session.agent_id, "agent_1");
        assert_eq!(session.silence_timeout, Duration::from_millis(4_500));
        assert_eq!(session.max_context_words, 500);
        assert_eq!(session.teardown_timeout, ConversationConfig::default().teardown_timeout);

        let zeroed = AgentConfig {
            conversation_timeout_ms: 0,
            max_context_words: 0,
            ..cfg.clone()
        };
        let session = zeroed.conversation_config().expect("agent enabled");
        assert_eq!(session.silence_timeout, Duration::from_secs(10));
        assert_eq!(session.max_context_words, 2000);

        let off = AgentConfig {
            use_agent: false,
            ..cfg
        };
        assert!(off.conversation_config().is_none());
    }

    #[test]
    fn alignment_payload_parses() {
        let sentences: Vec<AlignmentSentence> = serde_json::from_str(
            r#"[{"sentence_id":1,"sequence":0,"text":"In the beginning.","start_time":0.0,"end_time":2.5}]"#,
        )
        .unwrap();
        assert_eq!(sentences[0].end_time, 2.5);
    }
}
