//! Wire message types for the duplex channel
//!
//! Outbound messages serialize with snake_case keys, inbound messages
//! arrive camelCase; both shapes are fixed by the remote service. Inbound
//! parsing is deliberately permissive: unknown fields are ignored so
//! protocol evolution degrades to a no-op instead of a parse failure, and
//! anything we cannot recognize collapses to [`ServerEvent::Unrecognized`].

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// MIME type tag for outbound capture frames
pub const PCM_MIME_TYPE: &str = "audio/pcm";

// =============================================================================
// Outbound (client -> service)
// =============================================================================

/// Outbound control or media message
///
/// Each variant is self-contained; no message carries implicit state.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Session setup, sent exactly once before any media
    Setup(SetupMessage),
    /// One encoded capture frame
    Realtime(RealtimeInputMessage),
}

impl ClientMessage {
    /// Build the setup message for a session
    #[must_use]
    pub fn setup(model: &str, voice: &str, system_instruction: Option<&str>) -> Self {
        Self::Setup(SetupMessage {
            setup: Setup {
                model: model.to_string(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice.to_string(),
                            },
                        },
                    },
                },
                system_instruction: system_instruction.map(|text| Content {
                    parts: vec![TextPart {
                        text: text.to_string(),
                    }],
                }),
            },
        })
    }

    /// Wrap one encoded capture frame as a media chunk
    #[must_use]
    pub fn media_chunk(data: String) -> Self {
        Self::Realtime(RealtimeInputMessage {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: PCM_MIME_TYPE.to_string(),
                    data,
                }],
            },
        })
    }

    /// Serialize to a wire frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if encoding fails.
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

/// Session declaration: model, output modality, voice, optional instruction
#[derive(Debug, Clone, Serialize)]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

/// Outbound audio frame wrapped with its MIME-type tag
#[derive(Debug, Clone, Serialize)]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

// =============================================================================
// Inbound (service -> client)
// =============================================================================

/// Raw inbound frame shape; all fields optional, unknown keys ignored
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub turn_complete: Option<bool>,
    pub interrupted: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ModelTurn {
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    pub inline_data: Option<InlineData>,
}

/// Inbound audio part: encoded samples plus their MIME type
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// What an inbound frame means to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Setup acknowledged by the service
    SetupComplete,
    /// One encoded speech chunk of a response
    Audio { mime_type: String, data: String },
    /// The service cut the current response short; flush playback
    Interrupted,
    /// End-of-turn marker, informational only
    TurnComplete,
    /// Parsed fine but carried nothing we act on
    Unrecognized,
}

impl ServerMessage {
    /// Parse an inbound frame into session events
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the text is not valid structured
    /// JSON; the caller drops the frame and the session continues.
    pub fn parse(text: &str) -> Result<Vec<ServerEvent>> {
        let message: Self =
            serde_json::from_str(text).map_err(|e| Error::Protocol(e.to_string()))?;
        Ok(message.into_events())
    }

    /// Flatten the raw frame into the events it carries, in wire order
    #[must_use]
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(ServerEvent::SetupComplete);
        }

        if let Some(content) = self.server_content {
            if content.interrupted == Some(true) {
                events.push(ServerEvent::Interrupted);
            }

            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(inline) = part.inline_data {
                        if inline.mime_type.starts_with("audio/") {
                            events.push(ServerEvent::Audio {
                                mime_type: inline.mime_type,
                                data: inline.data,
                            });
                        }
                    }
                }
            }

            if content.turn_complete == Some(true) {
                events.push(ServerEvent::TurnComplete);
            }
        }

        if events.is_empty() {
            events.push(ServerEvent::Unrecognized);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_wire_shape() {
        let msg = ClientMessage::setup("models/demo", "Puck", Some("be brief"));
        let value: serde_json::Value = serde_json::from_str(&msg.to_wire().unwrap()).unwrap();

        assert_eq!(value["setup"]["model"], "models/demo");
        assert_eq!(
            value["setup"]["generation_config"]["response_modalities"][0],
            "AUDIO"
        );
        assert_eq!(
            value["setup"]["generation_config"]["speech_config"]["voice_config"]
                ["prebuilt_voice_config"]["voice_name"],
            "Puck"
        );
        assert_eq!(
            value["setup"]["system_instruction"]["parts"][0]["text"],
            "be brief"
        );
    }

    #[test]
    fn test_setup_omits_absent_instruction() {
        let msg = ClientMessage::setup("models/demo", "Puck", None);
        let wire = msg.to_wire().unwrap();
        assert!(!wire.contains("system_instruction"));
    }

    #[test]
    fn test_media_chunk_wire_shape() {
        let msg = ClientMessage::media_chunk("AAAA".to_string());
        let value: serde_json::Value = serde_json::from_str(&msg.to_wire().unwrap()).unwrap();

        let chunk = &value["realtime_input"]["media_chunks"][0];
        assert_eq!(chunk["mime_type"], "audio/pcm");
        assert_eq!(chunk["data"], "AAAA");
    }

    #[test]
    fn test_parse_server_audio() {
        let text = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"UklGRg=="}}
        ]}}}"#;

        let events = ServerMessage::parse(text).unwrap();
        assert_eq!(
            events,
            vec![ServerEvent::Audio {
                mime_type: "audio/pcm;rate=24000".to_string(),
                data: "UklGRg==".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_turn_complete() {
        let events = ServerMessage::parse(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();
        assert_eq!(events, vec![ServerEvent::TurnComplete]);
    }

    #[test]
    fn test_parse_audio_then_turn_complete_in_order() {
        let text = r#"{"serverContent":{
            "modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm","data":"AA=="}}]},
            "turnComplete":true
        }}"#;

        let events = ServerMessage::parse(text).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ServerEvent::Audio { .. }));
        assert_eq!(events[1], ServerEvent::TurnComplete);
    }

    #[test]
    fn test_parse_interrupted() {
        let events = ServerMessage::parse(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
        assert_eq!(events, vec![ServerEvent::Interrupted]);
    }

    #[test]
    fn test_parse_setup_complete() {
        let events = ServerMessage::parse(r#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(events, vec![ServerEvent::SetupComplete]);
    }

    #[test]
    fn test_unknown_top_level_keys_are_tolerated() {
        let events =
            ServerMessage::parse(r#"{"usageMetadata":{"totalTokens":12}}"#).unwrap();
        assert_eq!(events, vec![ServerEvent::Unrecognized]);
    }

    #[test]
    fn test_unknown_fields_beside_known_ones() {
        let text = r#"{"serverContent":{"turnComplete":true,"generationMetadata":{"x":1}}}"#;
        let events = ServerMessage::parse(text).unwrap();
        assert_eq!(events, vec![ServerEvent::TurnComplete]);
    }

    #[test]
    fn test_non_audio_parts_are_skipped() {
        let text = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"image/png","data":"AA=="}},
            {"text":"hello"}
        ]}}}"#;

        let events = ServerMessage::parse(text).unwrap();
        assert_eq!(events, vec![ServerEvent::Unrecognized]);
    }

    #[test]
    fn test_malformed_frame_is_a_protocol_error() {
        assert!(matches!(
            ServerMessage::parse("not json at all"),
            Err(Error::Protocol(_))
        ));
    }
}
