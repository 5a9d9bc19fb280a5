//! JSON codec for the realtime agent protocol.
//!
//! # Outbound
//!
//! ```text
//! {"setup": {"model", "generationConfig", "systemInstruction",
//!            "inputAudioTranscription": {}, "outputAudioTranscription": {}}}
//! {"realtimeInput": {"mediaChunks": [{"mimeType", "data": <base64>}]}}
//! {"clientContent": {"turns": [{"role": "user", "parts": [{"text"}]}], "turnComplete": true}}
//! ```
//!
//! # Inbound
//!
//! `setupComplete`, `serverContent` and `goAway`.  One `serverContent`
//! message can carry several things at once; [`decode_server_message`]
//! flattens it into [`AgentEvent`]s with `Interrupted` always first, so the
//! caller can stop playback before it sees any audio from the same frame.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::event::{AgentEvent, Outbound};
use crate::config::AgentConfig;

// ---------------------------------------------------------------------------
// WireError
// ---------------------------------------------------------------------------

/// Malformed inbound data.  Logged and skipped, never fatal.
///
/// A bad part inside an otherwise valid message is dropped on its own and
/// does not surface here.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid JSON from agent: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Outbound messages
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: &'a str,
    generation_config: GenerationConfig<'a>,
    system_instruction: Content<'a>,
    input_audio_transcription: Empty,
    output_audio_transcription: Empty,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'a str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoice<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoice<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Serialize, Default)]
struct Empty {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContentMessage<'a> {
    client_content: ClientContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContent<'a> {
    turns: Vec<Content<'a>>,
    turn_complete: bool,
}

/// The first message on a new link.
pub fn encode_setup(config: &AgentConfig) -> Result<String, WireError> {
    let msg = SetupMessage {
        setup: Setup {
            model: &config.model,
            generation_config: GenerationConfig {
                response_modalities: [config.response_modality.wire_name()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoice {
                            voice_name: &config.voice,
                        },
                    },
                },
            },
            system_instruction: Content {
                role: None,
                parts: vec![TextPart {
                    text: &config.system_instruction,
                }],
            },
            input_audio_transcription: Empty::default(),
            output_audio_transcription: Empty::default(),
        },
    };
    Ok(serde_json::to_string(&msg)?)
}

pub fn encode_outbound(message: &Outbound) -> Result<String, WireError> {
    let json = match message {
        Outbound::Audio { pcm, sample_rate } => serde_json::to_string(&RealtimeInputMessage {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: format!("audio/pcm;rate={sample_rate}"),
                    data: BASE64.encode(pcm),
                }],
            },
        })?,
        Outbound::Image(jpeg) => serde_json::to_string(&RealtimeInputMessage {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: "image/jpeg".into(),
                    data: BASE64.encode(jpeg),
                }],
            },
        })?,
        Outbound::Text(text) => serde_json::to_string(&ClientContentMessage {
            client_content: ClientContent {
                turns: vec![Content {
                    role: Some("user"),
                    parts: vec![TextPart { text }],
                }],
                turn_complete: true,
            },
        })?,
    };
    Ok(json)
}

// ---------------------------------------------------------------------------
// Inbound messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    interrupted: bool,
    input_transcription: Option<Transcription>,
    model_turn: Option<ModelTurn>,
    output_transcription: Option<Transcription>,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Deserialize, Default)]
struct Transcription {
    text: Option<String>,
    #[serde(default)]
    finished: bool,
}

#[derive(Debug, Deserialize, Default)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

/// Flatten one inbound frame into events, `Interrupted` first.
pub fn decode_server_message(bytes: &[u8]) -> Result<Vec<AgentEvent>, WireError> {
    let msg: ServerMessage = serde_json::from_slice(bytes)?;
    let mut events = Vec::new();

    if msg.setup_complete.is_some() {
        events.push(AgentEvent::Opened);
    }

    if let Some(content) = msg.server_content {
        if content.interrupted {
            events.push(AgentEvent::Interrupted);
        }
        if let Some(t) = content.input_transcription {
            if let Some(text) = t.text.filter(|s| !s.is_empty()) {
                events.push(AgentEvent::InputTranscription {
                    text,
                    is_final: t.finished,
                });
            }
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(text) = part.text.filter(|s| !s.is_empty()) {
                    events.push(AgentEvent::ModelText(text));
                }
                if let Some(inline) = part.inline_data {
                    match BASE64.decode(inline.data) {
                        Ok(pcm) => events.push(AgentEvent::Audio(pcm)),
                        Err(e) => log::warn!("session: skipping undecodable audio part: {e}"),
                    }
                }
            }
        }
        if let Some(t) = content.output_transcription {
            if let Some(text) = t.text.filter(|s| !s.is_empty()) {
                events.push(AgentEvent::OutputTranscription(text));
            }
        }
        if content.turn_complete {
            events.push(AgentEvent::TurnComplete);
        }
    }

    if msg.go_away.is_some() {
        events.push(AgentEvent::GoAway);
    }

    Ok(events)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
