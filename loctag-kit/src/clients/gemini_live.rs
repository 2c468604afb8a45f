use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::audio::{INPUT_MIME_TYPE, codec};
use crate::protocol::*;
use crate::utils::asynchronous::spawn;

/// Default endpoint of the bidirectional live API.
pub const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio model used for live sessions unless another one is picked.
pub const DEFAULT_LIVE_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-12-2025";

const DEFAULT_VOICE: &str = "Zephyr";

/// The assistant's persona for voice conversations.
const LIVE_SYSTEM_INSTRUCTION: &str = "You are Shakil AI, a friendly location expert. \
    You can hear and speak. Provide helpful, short answers in a mix of Bengali and English. \
    Focus on locations, maps, and helpful guidance.";

// Live API message structures
#[derive(Serialize, Debug)]
struct SetupMessage {
    setup: Setup,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: TextContent,
    input_audio_transcription: serde_json::Value,
    output_audio_transcription: serde_json::Value,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Serialize, Debug)]
struct TextContent {
    parts: Vec<TextPart>,
}

#[derive(Serialize, Debug)]
struct TextPart {
    text: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    mime_type: String,
    data: String,
}

// Incoming message types from the live endpoint
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    interrupted: bool,
    turn_complete: bool,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
}

#[derive(Deserialize, Debug)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ServerPart {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug)]
struct InlineData {
    #[serde(default)]
    data: String,
}

#[derive(Deserialize, Debug)]
struct Transcription {
    #[serde(default)]
    text: String,
}

/// Translate one server frame into the events it carries.
///
/// Unrecognized frames and frames with malformed audio payloads produce no
/// events; both are logged and the session keeps going.
fn server_message_events(text: &str) -> Vec<LiveEvent> {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(error) => {
            log::debug!("Ignoring unrecognized server message: {error}");
            return Vec::new();
        }
    };

    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(LiveEvent::SessionReady);
    }

    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                let Some(inline) = part.inline_data else {
                    continue;
                };

                match codec::decode(&inline.data) {
                    Ok(bytes) => events.push(LiveEvent::AudioData(bytes)),
                    Err(error) => log::warn!("Dropping audio frame with malformed base64: {error}"),
                }
            }
        }

        if content.interrupted {
            events.push(LiveEvent::Interrupted);
        }

        if let Some(transcription) = content.input_transcription {
            if !transcription.text.is_empty() {
                events.push(LiveEvent::InputTranscription(transcription.text));
            }
        }

        if let Some(transcription) = content.output_transcription {
            if !transcription.text.is_empty() {
                events.push(LiveEvent::OutputTranscription(transcription.text));
            }
        }

        if content.turn_complete {
            events.push(LiveEvent::TurnComplete);
        }
    }

    events
}

/// A client capable of opening live sessions against the bidirectional
/// endpoint.
#[derive(Clone, Debug)]
pub struct GeminiLiveClient {
    url: String,
    api_key: Option<String>,
    model: String,
}

impl GeminiLiveClient {
    pub fn new(url: String) -> Self {
        Self {
            url,
            api_key: None,
            model: DEFAULT_LIVE_MODEL.to_string(),
        }
    }

    pub fn set_key(&mut self, api_key: &str) -> Result<(), String> {
        self.api_key = Some(api_key.to_string());
        Ok(())
    }

    /// Use another live model. Accepts the id with or without the `models/`
    /// resource prefix.
    pub fn set_model(&mut self, model: &str) {
        self.model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
    }

    /// Open a live session.
    ///
    /// On success the returned channel accepts realtime input frames and
    /// emits server messages until either side closes it.
    pub fn connect(&self) -> KitFuture<'static, ClientResult<LiveChannel>> {
        let url = self.url.clone();
        let api_key = self.api_key.clone();
        let model = self.model.clone();

        let future = async move {
            let Some(api_key) = api_key else {
                return ClientResult::new_err(vec![ClientError::new(
                    ClientErrorKind::Unknown,
                    "No API key provided for the live session.".to_string(),
                )]);
            };

            let request = format!("{url}?key={api_key}");
            let (ws_stream, _) = match tokio_tungstenite::connect_async(request).await {
                Ok(result) => result,
                Err(e) => {
                    log::error!("Error connecting to the live endpoint: {e}");
                    return ClientResult::new_err(vec![ClientError::new_with_source(
                        ClientErrorKind::Network,
                        "Failed to connect to the live endpoint.".to_string(),
                        Some(e),
                    )]);
                }
            };

            let (mut write, mut read) = ws_stream.split();
            log::debug!("WebSocket connection created");

            // The first frame of a session must be its setup.
            let setup = SetupMessage {
                setup: Setup {
                    model,
                    generation_config: GenerationConfig {
                        response_modalities: vec!["AUDIO".to_string()],
                        speech_config: SpeechConfig {
                            voice_config: VoiceConfig {
                                prebuilt_voice_config: PrebuiltVoiceConfig {
                                    voice_name: DEFAULT_VOICE.to_string(),
                                },
                            },
                        },
                    },
                    system_instruction: TextContent {
                        parts: vec![TextPart {
                            text: LIVE_SYSTEM_INSTRUCTION.to_string(),
                        }],
                    },
                    input_audio_transcription: serde_json::json!({}),
                    output_audio_transcription: serde_json::json!({}),
                },
            };

            let setup_json = match serde_json::to_string(&setup) {
                Ok(json) => json,
                Err(e) => {
                    return ClientResult::new_err(vec![ClientError::new_with_source(
                        ClientErrorKind::Format,
                        "Could not serialize the session setup.".to_string(),
                        Some(e),
                    )]);
                }
            };

            if let Err(e) = write.send(WsMessage::Text(setup_json.into())).await {
                return ClientResult::new_err(vec![ClientError::new_with_source(
                    ClientErrorKind::Network,
                    "Failed to send the session setup.".to_string(),
                    Some(e),
                )]);
            }

            let (channel, mut command_receiver) = LiveChannel::new();

            // Task to handle incoming messages
            let event_sender = channel.event_sender.clone();
            spawn(async move {
                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(WsMessage::Text(text)) => {
                            for event in server_message_events(&text) {
                                let _ = event_sender.unbounded_send(event);
                            }
                        }
                        Ok(WsMessage::Binary(data)) => {
                            // The endpoint is known to deliver JSON frames as
                            // binary as well.
                            match String::from_utf8(data.to_vec()) {
                                Ok(text) => {
                                    for event in server_message_events(&text) {
                                        let _ = event_sender.unbounded_send(event);
                                    }
                                }
                                Err(_) => log::debug!("Ignoring non-utf8 binary frame"),
                            }
                        }
                        Ok(WsMessage::Close(_)) => {
                            log::info!("WebSocket closed");
                            let _ = event_sender.unbounded_send(LiveEvent::Closed);
                            break;
                        }
                        Err(e) => {
                            log::error!("WebSocket error: {e}");
                            let _ = event_sender.unbounded_send(LiveEvent::Error(e.to_string()));
                            break;
                        }
                        _ => {}
                    }
                }
            });

            // Task to handle outgoing commands
            spawn(async move {
                while let Some(command) = command_receiver.next().await {
                    match command {
                        LiveCommand::SendAudio(pcm) => {
                            let message = RealtimeInputMessage {
                                realtime_input: RealtimeInput {
                                    media_chunks: vec![MediaChunk {
                                        mime_type: INPUT_MIME_TYPE.to_string(),
                                        data: codec::encode(&pcm),
                                    }],
                                },
                            };

                            if let Ok(json) = serde_json::to_string(&message) {
                                if let Err(e) = write.send(WsMessage::Text(json.into())).await {
                                    log::warn!("Error sending audio input: {e}");
                                }
                            }
                        }
                        LiveCommand::Close => {
                            // Close the WebSocket connection
                            let _ = write.send(WsMessage::Close(None)).await;
                            break;
                        }
                    }
                }
            });

            ClientResult::new_ok(channel)
        };

        kit_future(future)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_shape() {
        let mut client = GeminiLiveClient::new(DEFAULT_LIVE_URL.to_string());
        client.set_model("gemini-2.5-flash-native-audio-preview-12-2025");
        assert_eq!(client.model, DEFAULT_LIVE_MODEL);

        let setup = SetupMessage {
            setup: Setup {
                model: client.model.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: DEFAULT_VOICE.to_string(),
                            },
                        },
                    },
                },
                system_instruction: TextContent {
                    parts: vec![TextPart {
                        text: LIVE_SYSTEM_INSTRUCTION.to_string(),
                    }],
                },
                input_audio_transcription: serde_json::json!({}),
                output_audio_transcription: serde_json::json!({}),
            },
        };

        let value = serde_json::to_value(&setup).unwrap();
        assert_eq!(value["setup"]["model"], DEFAULT_LIVE_MODEL);
        assert_eq!(
            value["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            value["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
        assert_eq!(
            value["setup"]["inputAudioTranscription"],
            serde_json::json!({})
        );
    }

    #[test]
    fn test_realtime_input_shape() {
        let message = RealtimeInputMessage {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: INPUT_MIME_TYPE.to_string(),
                    data: codec::encode(&[0, 1, 2]),
                }],
            },
        };

        let value = serde_json::to_value(&message).unwrap();
        let chunk = &value["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], codec::encode(&[0, 1, 2]));
    }

    #[test]
    fn test_server_message_mapping() {
        let audio = codec::encode(&[1, 2, 3, 4]);
        let text = format!(
            r#"{{"serverContent":{{
                "modelTurn":{{"parts":[{{"inlineData":{{"data":"{audio}"}}}}]}},
                "interrupted":true,
                "inputTranscription":{{"text":"hello"}},
                "outputTranscription":{{"text":"hi"}}
            }}}}"#
        );

        let events = server_message_events(&text);
        assert_eq!(
            events,
            vec![
                LiveEvent::AudioData(vec![1, 2, 3, 4]),
                LiveEvent::Interrupted,
                LiveEvent::InputTranscription("hello".to_string()),
                LiveEvent::OutputTranscription("hi".to_string()),
            ]
        );
    }

    #[test]
    fn test_setup_complete_maps_to_session_ready() {
        assert_eq!(
            server_message_events(r#"{"setupComplete":{}}"#),
            vec![LiveEvent::SessionReady]
        );
    }

    #[test]
    fn test_malformed_audio_is_dropped_not_fatal() {
        let text = r#"{"serverContent":{
            "modelTurn":{"parts":[{"inlineData":{"data":"not base64!!"}}]},
            "turnComplete":true
        }}"#;

        assert_eq!(server_message_events(text), vec![LiveEvent::TurnComplete]);
    }

    #[test]
    fn test_unrecognized_frames_are_ignored() {
        assert!(server_message_events("not json").is_empty());
        assert!(server_message_events(r#"{"usageMetadata":{}}"#).is_empty());
    }
}
