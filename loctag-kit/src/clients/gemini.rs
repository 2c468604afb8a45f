use async_stream::stream;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName};
use serde::Deserialize;
use std::{
    str::FromStr,
    sync::{Arc, RwLock},
    time::Duration,
};

use crate::protocol::*;
use crate::utils::errors::enrich_http_error;
use crate::utils::{serde::deserialize_null_default, sse::parse_sse};

/// Default base url of the Gemini REST API.
pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Multimodal model used for chat requests unless another one is picked.
pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.5-flash-image";

/// Reply shown when the stream fails before producing any text.
const FALLBACK_REPLY: &str = "দুঃখিত, লোকেশন ট্যাগ করতে সমস্যা হচ্ছে। আবার চেষ্টা করুন।";

/// Default titles for sources the service returns untitled.
const UNTITLED_MAPS_SOURCE: &str = "ম্যাপে ট্যাগ করা হয়েছে";
const UNTITLED_WEB_SOURCE: &str = "সূত্র";

/// The assistant's persona and task, with the user's coordinates interpolated
/// when they are known.
fn system_instruction(location: Option<LatLng>) -> String {
    let coordinates = location
        .map(|l| format!("({}, {})", l.latitude, l.longitude))
        .unwrap_or_else(|| "(unknown)".to_string());

    format!(
        "You are Shakil AI, a location expert. \
        Your specialty is \"Location Tagging\". \
        1. Identification: If an image is provided, identify exactly what landmark, building, or business it is. \
        2. Tagging: Tag the location by providing its official name and a Google Maps link. \
        3. Proximity: Use the user's coordinates {coordinates} if available to tell the user exactly how far they are from the tagged location. \
        4. Language: Always respond in a friendly Bengali/English mix as preferred by the user. \
        Be ultra-precise and concise."
    )
}

/// A model from the models endpoint.
#[derive(Clone, Debug, Deserialize, PartialEq)]
struct Model {
    name: String,
    #[serde(default, rename = "displayName")]
    display_name: String,
}

/// Response from the models endpoint.
#[derive(Clone, Debug, Deserialize, PartialEq)]
struct Models {
    #[serde(default)]
    pub models: Vec<Model>,
}

/// One SSE chunk of a streaming response.
///
/// Grounding metadata is kept raw here; it is extracted in a separate step
/// once the stream completes, so its failures never touch the text.
#[derive(Clone, Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Clone, Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default, rename = "groundingMetadata")]
    grounding_metadata: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

/// Non-text parts have no `text` field, and some backends null it out.
#[derive(Clone, Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_null_default")]
    text: String,
}

#[derive(Clone, Debug, Deserialize)]
struct GroundingMetadata {
    #[serde(default, rename = "groundingChunks")]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Clone, Debug, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    maps: Option<SourceRef>,
    #[serde(default)]
    web: Option<SourceRef>,
}

#[derive(Clone, Debug, Deserialize)]
struct SourceRef {
    title: Option<String>,
    uri: Option<String>,
}

/// The post-stream lookup of structured grounding metadata.
///
/// A failure here is logged and produces an empty citation list; the already
/// accumulated text is never affected.
fn extract_citations(metadata: Vec<serde_json::Value>) -> Vec<GroundingSource> {
    let mut sources = Vec::new();

    for value in metadata {
        let parsed: GroundingMetadata = match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(error) => {
                log::warn!("Could not read grounding metadata, skipping citations: {error}");
                return Vec::new();
            }
        };

        for chunk in parsed.grounding_chunks {
            if let Some(maps) = chunk.maps {
                if let Some(uri) = maps.uri {
                    sources.push(GroundingSource {
                        title: maps.title.unwrap_or_else(|| UNTITLED_MAPS_SOURCE.to_string()),
                        uri,
                    });
                }
            } else if let Some(web) = chunk.web {
                if let Some(uri) = web.uri {
                    sources.push(GroundingSource {
                        title: web.title.unwrap_or_else(|| UNTITLED_WEB_SOURCE.to_string()),
                        uri,
                    });
                }
            }
        }
    }

    sources
}

/// Consume parsed SSE events into cumulative content snapshots.
///
/// Every yielded snapshot carries the complete text so far, never a delta. A
/// stream failure keeps whatever text was already accumulated (or the fixed
/// fallback reply when there is none) as the final snapshot, alongside the
/// error.
fn stream_completions<S>(events: S) -> impl Stream<Item = ClientResult<MessageContent>>
where
    S: Stream<Item = Result<String, ClientError>>,
{
    stream! {
        let mut content = MessageContent::default();
        let mut grounding = Vec::new();

        for await event in events {
            let event = match event {
                Ok(event) => event,
                Err(error) => {
                    if content.text.is_empty() {
                        content.text = FALLBACK_REPLY.to_string();
                    }
                    yield ClientResult::new_ok_and_err(content.clone(), vec![error]);
                    return;
                }
            };

            let chunk: StreamChunk = match serde_json::from_str(&event) {
                Ok(chunk) => chunk,
                Err(error) => {
                    let error = ClientError::new_with_source(
                        ClientErrorKind::Format,
                        "Could not parse an SSE message as JSON or its structure does not match the expected format.".to_string(),
                        Some(error),
                    );
                    if content.text.is_empty() {
                        content.text = FALLBACK_REPLY.to_string();
                    }
                    yield ClientResult::new_ok_and_err(content.clone(), vec![error]);
                    return;
                }
            };

            for candidate in chunk.candidates {
                let body = candidate
                    .content
                    .iter()
                    .flat_map(|c| c.parts.iter())
                    .map(|p| p.text.as_str())
                    .collect::<String>();

                content.text.push_str(&body);

                if let Some(metadata) = candidate.grounding_metadata {
                    grounding.push(metadata);
                }
            }

            yield ClientResult::new_ok(content.clone());
        }

        content.citations = extract_citations(grounding);
        yield ClientResult::new_ok(content.clone());
    }
}

#[derive(Clone, Debug)]
struct GeminiClientInner {
    url: String,
    headers: HeaderMap,
    location: Option<LatLng>,
    client: reqwest::Client,
}

/// A client capable of interacting with the Gemini API.
#[derive(Debug)]
pub struct GeminiClient(Arc<RwLock<GeminiClientInner>>);

impl Clone for GeminiClient {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl From<GeminiClientInner> for GeminiClient {
    fn from(inner: GeminiClientInner) -> Self {
        Self(Arc::new(RwLock::new(inner)))
    }
}

impl GeminiClient {
    /// Creates a new client with the given API base url.
    pub fn new(url: String) -> Self {
        let headers = HeaderMap::new();
        let client = default_client();

        GeminiClientInner {
            url,
            headers,
            location: None,
            client,
        }
        .into()
    }

    pub fn set_header(&mut self, key: &str, value: &str) -> Result<(), &'static str> {
        let header_name = HeaderName::from_str(key).map_err(|_| "Invalid header name")?;

        let header_value = value.parse().map_err(|_| "Invalid header value")?;

        self.0
            .write()
            .unwrap()
            .headers
            .insert(header_name, header_value);

        Ok(())
    }

    pub fn set_key(&mut self, key: &str) -> Result<(), &'static str> {
        self.set_header("x-goog-api-key", key)
    }

    /// Attach user coordinates to subsequent requests.
    ///
    /// The coordinates go into the system instruction and into the retrieval
    /// configuration of the maps tool.
    pub fn set_location(&mut self, location: LatLng) {
        self.0.write().unwrap().location = Some(location);
    }
}

impl BotClient for GeminiClient {
    fn bots(&self) -> KitFuture<'static, ClientResult<Vec<Bot>>> {
        let inner = self.0.read().unwrap().clone();

        let provider = inner.url.clone();
        let url = format!("{}/models", inner.url);
        let headers = inner.headers;

        let request = inner.client.get(&url).headers(headers);

        let future = async move {
            let response = match request.send().await {
                Ok(response) => response,
                Err(error) => {
                    return ClientError::new_with_source(
                        ClientErrorKind::Network,
                        format!("An error ocurred sending a request to {url}."),
                        Some(error),
                    )
                    .into();
                }
            };

            if !response.status().is_success() {
                let code = response.status().as_u16();
                return ClientError::new(
                    ClientErrorKind::Response,
                    format!("Got unexpected HTTP status code {code} from {url}."),
                )
                .into();
            }

            let text = match response.text().await {
                Ok(text) => text,
                Err(error) => {
                    return ClientError::new_with_source(
                        ClientErrorKind::Format,
                        format!("Could not parse the response from {url} as valid text."),
                        Some(error),
                    )
                    .into();
                }
            };

            if text.is_empty() {
                return ClientError::new(
                    ClientErrorKind::Format,
                    format!("The response from {url} is empty."),
                )
                .into();
            }

            let models: Models = match serde_json::from_str(&text) {
                Ok(models) => models,
                Err(error) => {
                    return ClientError::new_with_source(
                        ClientErrorKind::Format,
                        format!("Could not parse the response from {url} as JSON or its structure does not match the expected format."),
                        Some(error),
                    ).into();
                }
            };

            let mut bots: Vec<Bot> = models
                .models
                .iter()
                .map(|m| {
                    let id = m.name.strip_prefix("models/").unwrap_or(&m.name);
                    let name = if m.display_name.is_empty() {
                        id.to_string()
                    } else {
                        m.display_name.clone()
                    };

                    Bot {
                        id: BotId::new(id, &provider),
                        name,
                        avatar: Picture::Grapheme(
                            id.chars()
                                .next()
                                .map(|c| c.to_uppercase().to_string())
                                .unwrap_or_default(),
                        ),
                    }
                })
                .collect();

            bots.sort_by(|a, b| a.name.cmp(&b.name));

            ClientResult::new_ok(bots)
        };

        kit_future(future)
    }

    fn clone_box(&self) -> Box<dyn BotClient> {
        Box::new(self.clone())
    }

    /// Send one multimodal request and stream cumulative snapshots back.
    fn send(
        &mut self,
        bot: &Bot,
        messages: &[Message],
    ) -> KitStream<'static, ClientResult<MessageContent>> {
        let inner = self.0.read().unwrap().clone();

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            inner.url,
            bot.id.id()
        );
        let headers = inner.headers;
        let location = inner.location;
        let client = inner.client;

        // The request is single-turn: the service grounds every prompt on its
        // own, so only the latest message is forwarded.
        let prompt = messages.last().cloned().unwrap_or_default();

        let stream = stream! {
            let mut parts = Vec::new();

            if let Some(attachment) = prompt.content.attachments.iter().find(|a| a.is_image()) {
                match attachment.read_base64().await {
                    Ok(data) => parts.push(serde_json::json!({
                        "inline_data": {
                            "mime_type": attachment
                                .content_type
                                .clone()
                                .unwrap_or_else(|| "image/jpeg".to_string()),
                            "data": data,
                        }
                    })),
                    Err(error) => {
                        log::warn!("Skipping unavailable attachment {}: {error}", attachment.name)
                    }
                }
            }

            parts.push(serde_json::json!({ "text": prompt.content.text }));

            let mut payload = serde_json::json!({
                "contents": [{ "role": "user", "parts": parts }],
                "tools": [
                    { "google_maps": {} },
                    { "google_search": {} }
                ],
                "generation_config": { "temperature": 0.7 },
                "system_instruction": { "parts": [{ "text": system_instruction(location) }] },
            });

            if let Some(location) = location {
                payload["tool_config"] = serde_json::json!({
                    "retrieval_config": {
                        "lat_lng": {
                            "latitude": location.latitude,
                            "longitude": location.longitude,
                        }
                    }
                });
            }

            let request = client.post(&url).headers(headers).json(&payload);

            let response = match request.send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        response
                    } else {
                        let status_code = response.status();
                        if let Err(error) = response.error_for_status() {
                            let original = format!("Request failed: {error}");
                            let enriched = enrich_http_error(status_code, &original);

                            let content = MessageContent {
                                text: FALLBACK_REPLY.to_string(),
                                ..Default::default()
                            };
                            yield ClientResult::new_ok_and_err(content, vec![ClientError::new_with_source(
                                ClientErrorKind::Response,
                                enriched,
                                Some(error),
                            )]);
                        }
                        return;
                    }
                }
                Err(error) => {
                    let content = MessageContent {
                        text: FALLBACK_REPLY.to_string(),
                        ..Default::default()
                    };
                    yield ClientResult::new_ok_and_err(content, vec![ClientError::new_with_source(
                        ClientErrorKind::Network,
                        format!("Could not send request to {url}. Verify your connection and the server status."),
                        Some(error),
                    )]);
                    return;
                }
            };

            let events = parse_sse(response.bytes_stream()).map(move |result| {
                result.map_err(|error| {
                    ClientError::new_with_source(
                        ClientErrorKind::Network,
                        format!("Response streaming got interrupted while reading from {url}. This may be a problem with your connection or the server."),
                        Some(error),
                    )
                })
            });

            for await snapshot in stream_completions(events) {
                yield snapshot;
            }
        };

        kit_stream(stream)
    }
}

fn default_client() -> reqwest::Client {
    // There are no default timeouts. Connection may hang if we don't
    // configure them.
    reqwest::Client::builder()
        // Only considered while establishing the connection.
        .connect_timeout(Duration::from_secs(90))
        // Considered while reading the response and reset on every chunk
        // received.
        //
        // Warning: Do not use normal `timeout` method as it doesn't consider
        // this.
        .read_timeout(Duration::from_secs(90))
        .build()
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn text_chunk(text: &str) -> String {
        format!(r#"{{"candidates":[{{"content":{{"parts":[{{"text":"{text}"}}]}}}}]}}"#)
    }

    fn collect(events: Vec<Result<String, ClientError>>) -> Vec<ClientResult<MessageContent>> {
        block_on(stream_completions(futures::stream::iter(events)).collect::<Vec<_>>())
    }

    #[test]
    fn test_snapshots_are_cumulative() {
        let snapshots = collect(vec![Ok(text_chunk("Hel")), Ok(text_chunk("lo"))]);

        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].value().unwrap().text, "Hel");
        assert_eq!(snapshots[1].value().unwrap().text, "Hello");

        // The final snapshot carries the citations (none here).
        assert_eq!(snapshots[2].value().unwrap().text, "Hello");
        assert!(snapshots[2].value().unwrap().citations.is_empty());
        assert!(!snapshots[2].has_errors());
    }

    #[test]
    fn test_failure_without_text_substitutes_the_fallback() {
        let error = ClientError::new(ClientErrorKind::Network, "stream broke".into());
        let snapshots = collect(vec![Err(error)]);

        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].value().unwrap().text, FALLBACK_REPLY);
        assert!(snapshots[0].has_errors());
    }

    #[test]
    fn test_failure_after_partial_text_keeps_it() {
        let error = ClientError::new(ClientErrorKind::Network, "stream broke".into());
        let snapshots = collect(vec![Ok(text_chunk("Hel")), Err(error)]);

        assert_eq!(snapshots.len(), 2);
        let last = snapshots.last().unwrap();
        assert_eq!(last.value().unwrap().text, "Hel");
        assert!(last.has_errors());
    }

    #[test]
    fn test_grounding_sources_are_extracted_after_the_stream() {
        let event = r#"{"candidates":[{
            "content":{"parts":[{"text":"done"}]},
            "groundingMetadata":{"groundingChunks":[
                {"maps":{"title":"Lalbagh Fort","uri":"https://maps.example/fort"}},
                {"web":{"uri":"https://example.com/a"}}
            ]}
        }]}"#;

        let snapshots = collect(vec![Ok(event.to_string())]);
        let last = snapshots.last().unwrap();
        let content = last.value().unwrap();

        assert_eq!(content.text, "done");
        assert_eq!(
            content.citations,
            vec![
                GroundingSource {
                    title: "Lalbagh Fort".into(),
                    uri: "https://maps.example/fort".into(),
                },
                GroundingSource {
                    title: UNTITLED_WEB_SOURCE.into(),
                    uri: "https://example.com/a".into(),
                },
            ]
        );
    }

    #[test]
    fn test_malformed_grounding_yields_empty_citations() {
        let event = r#"{"candidates":[{
            "content":{"parts":[{"text":"done"}]},
            "groundingMetadata":{"groundingChunks":42}
        }]}"#;

        let snapshots = collect(vec![Ok(event.to_string())]);
        let last = snapshots.last().unwrap();
        let content = last.value().unwrap();

        assert_eq!(content.text, "done");
        assert!(content.citations.is_empty());
        assert!(!last.has_errors());
    }

    #[test]
    fn test_system_instruction_interpolates_coordinates() {
        let instruction = system_instruction(Some(LatLng {
            latitude: 23.7,
            longitude: 90.4,
        }));

        assert!(instruction.contains("(23.7, 90.4)"));
        assert!(system_instruction(None).contains("(unknown)"));
    }
}
