//! Voice-note handling: download, transcription, and speech synthesis.
//!
//! Inbound voice notes are fetched from the messaging platform's media API
//! (metadata lookup, then an authorized download), transcribed with a
//! Whisper-compatible endpoint, and fed into the text pipeline. Outbound
//! voice replies are synthesized as Opus-in-Ogg via Azure Cognitive Services.
//!
//! Download failures are deliberately quiet: a voice note we cannot fetch
//! ends the turn without a reply instead of surfacing an error to the sender.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, multipart};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::credentials::CredentialResolver;
use crate::error::MediaError;

/// Mime type used for synthesized voice replies.
pub const VOICE_REPLY_MIME: &str = "audio/ogg";

/// Phrasings that ask for a spoken reply.
static VOICE_REQUEST_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)voice\s*note",
        r"(?i)voice\s*message",
        r"(?i)audio\s*message",
        r"(?i)audio\s*note",
        r"(?i)send\b.*\bvoice",
        r"(?i)respond\b.*\bvoice",
        r"(?i)reply\b.*\bvoice",
        r"(?i)answer\b.*\bvoice",
        r"(?i)in\s+(?:a\s+)?voice",
        r"(?i)as\s+(?:a\s+)?voice",
        r"(?i)via\s+voice",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("voice request pattern must compile"))
    .collect()
});

/// True when the message text asks for the reply as a voice note.
pub fn wants_voice_reply(text: &str) -> bool {
    VOICE_REQUEST_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Raw audio with its mime type.
#[derive(Debug, Clone)]
pub struct MediaBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Bridge between the pipeline and external media services.
#[async_trait]
pub trait MediaBridge: Send + Sync {
    /// Fetch a voice note's bytes. Failures are logged and collapse to `None`.
    async fn download(&self, media_id: &str) -> Option<MediaBlob>;

    /// Turn downloaded audio into text.
    async fn transcribe(&self, audio: MediaBlob) -> Result<String, MediaError>;

    /// Turn reply text into spoken audio (`VOICE_REPLY_MIME`).
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, MediaError>;
}

// ── Configuration ───────────────────────────────────────────────────

/// Speech-to-text settings (Whisper-compatible API).
#[derive(Clone)]
pub struct SttConfig {
    pub api_key: SecretString,
    pub model: String,
    pub endpoint: String,
}

impl SttConfig {
    /// Load from the environment. Returns `None` without `OPENAI_API_KEY`.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok()?;
        let model =
            std::env::var("WA_AGENT_STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        let endpoint = std::env::var("WA_AGENT_STT_ENDPOINT")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        Some(Self {
            api_key: SecretString::from(api_key),
            model,
            endpoint,
        })
    }
}

/// Text-to-speech settings (Azure Cognitive Services).
#[derive(Clone)]
pub struct TtsConfig {
    pub api_key: SecretString,
    pub region: String,
    pub voice: String,
    pub language: String,
    pub output_format: String,
}

impl TtsConfig {
    /// Load from the environment. Returns `None` without `AZURE_TTS_KEY`.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("AZURE_TTS_KEY").ok()?;
        Some(Self {
            api_key: SecretString::from(api_key),
            region: std::env::var("AZURE_TTS_REGION").unwrap_or_else(|_| "eastus".to_string()),
            voice: std::env::var("WA_AGENT_TTS_VOICE")
                .unwrap_or_else(|_| "en-US-EmmaMultilingualNeural".to_string()),
            language: std::env::var("WA_AGENT_TTS_LANGUAGE")
                .unwrap_or_else(|_| "en-US".to_string()),
            output_format: std::env::var("WA_AGENT_TTS_FORMAT")
                .unwrap_or_else(|_| "ogg-24khz-16bit-mono-opus".to_string()),
        })
    }
}

// ── Gateway ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MediaMetadata {
    url: Option<String>,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Production `MediaBridge` backed by the platform media API, a Whisper
/// endpoint, and Azure TTS. Speech services are optional; when one is not
/// configured the corresponding call fails with `NotConfigured`.
pub struct SpeechGateway {
    client: Client,
    credentials: Arc<CredentialResolver>,
    graph_base_url: String,
    stt: Option<SttConfig>,
    tts: Option<TtsConfig>,
}

impl SpeechGateway {
    pub fn new(
        credentials: Arc<CredentialResolver>,
        graph_base_url: String,
        stt: Option<SttConfig>,
        tts: Option<TtsConfig>,
    ) -> Self {
        Self {
            client: Client::new(),
            credentials,
            graph_base_url,
            stt,
            tts,
        }
    }
}

#[async_trait]
impl MediaBridge for SpeechGateway {
    async fn download(&self, media_id: &str) -> Option<MediaBlob> {
        let creds = match self.credentials.resolve().await {
            Some(creds) => creds,
            None => {
                warn!(media_id, "No platform credentials; cannot fetch media");
                return None;
            }
        };

        // Step 1: metadata lookup resolves the media id to a signed URL.
        let metadata_url = format!("{}/{}", self.graph_base_url, media_id);
        let response = match self
            .client
            .get(&metadata_url)
            .bearer_auth(creds.access_token.expose_secret())
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(media_id, error = %e, "Media metadata request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(media_id, status = %response.status(), "Media metadata request rejected");
            return None;
        }
        let metadata: MediaMetadata = match response.json().await {
            Ok(m) => m,
            Err(e) => {
                warn!(media_id, error = %e, "Media metadata was not valid JSON");
                return None;
            }
        };
        let Some(url) = metadata.url else {
            warn!(media_id, "Media metadata carried no download URL");
            return None;
        };

        // Step 2: the URL itself still requires the bearer token.
        let response = match self
            .client
            .get(&url)
            .bearer_auth(creds.access_token.expose_secret())
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(media_id, error = %e, "Media download failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(media_id, status = %response.status(), "Media download rejected");
            return None;
        }

        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                warn!(media_id, error = %e, "Media body read failed");
                return None;
            }
        };

        let mime_type = header_mime
            .or(metadata.mime_type)
            .unwrap_or_else(|| VOICE_REPLY_MIME.to_string());
        debug!(media_id, bytes = bytes.len(), mime = %mime_type, "Voice note downloaded");
        Some(MediaBlob {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }

    async fn transcribe(&self, audio: MediaBlob) -> Result<String, MediaError> {
        let Some(stt) = &self.stt else {
            return Err(MediaError::NotConfigured {
                capability: "speech-to-text",
            });
        };

        let extension = audio_extension(&audio.mime_type);
        let part = multipart::Part::bytes(audio.bytes)
            .file_name(format!("voice.{extension}"))
            .mime_str(&audio.mime_type)
            .map_err(|e| MediaError::Http(format!("Invalid audio mime type: {e}")))?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("model", stt.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", stt.endpoint))
            .bearer_auth(stt.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| MediaError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MediaError::Api {
                service: "transcription",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| MediaError::Http(format!("Invalid transcription response: {e}")))?;
        debug!(chars = parsed.text.len(), "Voice note transcribed");
        Ok(parsed.text)
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, MediaError> {
        let Some(tts) = &self.tts else {
            return Err(MediaError::NotConfigured {
                capability: "text-to-speech",
            });
        };

        let url = format!(
            "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
            tts.region
        );
        let ssml = build_ssml(text, &tts.language, &tts.voice);

        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", tts.api_key.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", &tts.output_format)
            .header(reqwest::header::USER_AGENT, "wa-agent")
            .body(ssml)
            .send()
            .await
            .map_err(|e| MediaError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MediaError::Api {
                service: "speech synthesis",
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| MediaError::Http(e.to_string()))?;
        debug!(bytes = bytes.len(), "Speech synthesized");
        Ok(bytes.to_vec())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// File extension for an audio mime type, for upload filenames.
pub(crate) fn audio_extension(mime_type: &str) -> &'static str {
    if mime_type.contains("ogg") {
        "ogg"
    } else if mime_type.contains("mp4") {
        "mp4"
    } else if mime_type.contains("mpeg") || mime_type.contains("mp3") {
        "mp3"
    } else if mime_type.contains("webm") {
        "webm"
    } else if mime_type.contains("wav") {
        "wav"
    } else {
        "ogg"
    }
}

fn build_ssml(text: &str, language: &str, voice: &str) -> String {
    format!(
        "<speak version='1.0' xml:lang='{language}'>\
         <voice xml:lang='{language}' name='{voice}'>{}</voice>\
         </speak>",
        escape_xml(text)
    )
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
