use chrono::{DateTime, Utc};
#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    fmt,
    sync::{Arc, Mutex},
};

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};

pub use crate::utils::asynchronous::{KitFuture, KitStream, kit_future, kit_stream};

/// The picture/avatar of an entity that may be represented/encoded in different ways.
#[derive(Clone, Debug)]
pub enum Picture {
    Grapheme(String),
    Image(String),
}

/// Identify the entities that are recognized by this crate, mainly in a chat.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub enum EntityId {
    /// Represents the user operating this app.
    User,

    /// Represents the `system`/`developer` context many models expect in order
    /// to customize the chat experience and behavior.
    System,

    /// Represents a bot, which is an automated assistant of any kind (model, agent, etc).
    Bot(BotId),

    /// This app itself. Normally appears when app specific information must be displayed
    /// (like inline errors).
    ///
    /// It's not supposed to be sent as part of a conversation to bots.
    #[default]
    App,
}

#[derive(Clone, Debug)]
pub struct Bot {
    /// Unique internal identifier for the bot across all providers
    pub id: BotId,
    pub name: String,
    pub avatar: Picture,
}

/// Identifies any kind of bot, local or remote, model or agent, whatever.
///
/// It MUST be globally unique and stable. It should be generated from a provider
/// local id and the domain or url of that provider.
///
/// For serialization, this is encoded as a single string.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct BotId(Arc<str>);

impl BotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creates a new bot id from a provider local id and a provider domain or url.
    pub fn new(id: &str, provider: &str) -> Self {
        // The id is encoded as: <id_len>;<id>@<provider>.
        // `@` is simply a semantic separator, meaning (literally) "at".
        // The length is what is actually used for separating components allowing
        // these to include `@` characters.
        let id = format!("{};{}@{}", id.len(), id, provider);
        BotId(id.into())
    }

    fn deconstruct(&self) -> (usize, &str) {
        let (id_length, raw) = self.0.split_once(';').expect("malformed bot id");
        let id_length = id_length.parse::<usize>().expect("malformed bot id");
        (id_length, raw)
    }

    /// The id of the bot as it is known by its provider.
    ///
    /// This may not be globally unique.
    pub fn id(&self) -> &str {
        let (id_length, raw) = self.deconstruct();
        &raw[..id_length]
    }

    /// The provider component of this bot id.
    pub fn provider(&self) -> &str {
        let (id_length, raw) = self.deconstruct();
        // + 1 skips the semantic `@` separator
        &raw[id_length + 1..]
    }
}

impl fmt::Display for BotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User coordinates attached to a request so the service can reason about
/// proximity.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

/// A citation the service attached to a response to substantiate its claims.
///
/// Sources come from either map or web grounding.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

/// Standard message content format.
#[derive(Clone, Debug, PartialEq, Default)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct MessageContent {
    /// The main body/document of this message.
    ///
    /// This would normally be written in somekind of document format like
    /// markdown, html, plain text, etc. Only markdown is expected by default.
    pub text: String,

    /// List of citations/sources associated with this message.
    #[cfg_attr(feature = "json", serde(default))]
    pub citations: Vec<GroundingSource>,

    /// File attachments in this content.
    #[cfg_attr(feature = "json", serde(default))]
    pub attachments: Vec<Attachment>,
}

impl MessageContent {
    /// Checks if the content is absolutely empty (contains no data at all).
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.citations.is_empty() && self.attachments.is_empty()
    }
}

/// Represents a file/image/document sent or received as part of a message.
#[derive(Clone, Debug, PartialEq, Default)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct Attachment {
    /// Normally the original filename.
    pub name: String,
    /// Mime type of the content, if known.
    pub content_type: Option<String>,
    #[cfg_attr(feature = "json", serde(skip))]
    content: Option<Vec<u8>>,
}

impl Attachment {
    /// Creates a new in-memory attachment from the given bytes.
    pub fn from_bytes(name: String, content_type: Option<String>, content: Vec<u8>) -> Self {
        Attachment {
            name,
            content_type,
            content: Some(content),
        }
    }

    /// Creates a new in-memory attachment from a base64 encoded string.
    pub fn from_base64(
        name: String,
        content_type: Option<String>,
        base64_content: &str,
    ) -> std::io::Result<Self> {
        let content = crate::audio::codec::decode(base64_content).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "Invalid base64 content")
        })?;

        Ok(Attachment::from_bytes(name, content_type, content))
    }

    pub fn is_available(&self) -> bool {
        self.content.is_some()
    }

    pub fn is_image(&self) -> bool {
        if let Some(content_type) = &self.content_type {
            content_type.starts_with("image/")
        } else {
            false
        }
    }

    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        if let Some(content) = &self.content {
            Ok(content.clone())
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Attachment content not available",
            ))
        }
    }

    pub async fn read_base64(&self) -> std::io::Result<String> {
        let content = self.read().await?;
        Ok(crate::audio::codec::encode(&content))
    }
}

/// Metadata automatically tracked by the kit for each message.
///
/// Does not implement default to be explicit about timestamps.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct MessageMetadata {
    /// Runtime flag indicating that the message is still being written.
    ///
    /// Not serialized.
    #[cfg_attr(feature = "json", serde(skip))]
    pub is_writing: bool,

    /// When the message got created.
    ///
    /// Default to epoch if missing during deserialization. Otherwise, if constructed
    /// by [`MessageMetadata::default`], it defaults to "now".
    #[cfg_attr(feature = "json", serde(default))]
    pub created_at: DateTime<Utc>,

    /// Last time the main text was updated.
    ///
    /// Default to epoch if missing during deserialization. Otherwise, if constructed
    /// by [`MessageMetadata::default`], it defaults to "now".
    #[cfg_attr(feature = "json", serde(default))]
    pub text_updated_at: DateTime<Utc>,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        MessageMetadata {
            is_writing: false,
            created_at: Utc::now(),
            text_updated_at: Utc::now(),
        }
    }
}

impl MessageMetadata {
    /// Same behavior as [`MessageMetadata::default`].
    pub fn new() -> Self {
        MessageMetadata::default()
    }

    /// Create a new metadata with all fields set to default but timestamps set to epoch.
    pub fn epoch() -> Self {
        MessageMetadata {
            is_writing: false,
            created_at: DateTime::UNIX_EPOCH,
            text_updated_at: DateTime::UNIX_EPOCH,
        }
    }

    pub fn is_idle(&self) -> bool {
        !self.is_writing
    }

    pub fn is_writing(&self) -> bool {
        self.is_writing
    }
}

/// A message that is part of a conversation.
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct Message {
    /// The id of who sent this message.
    pub from: EntityId,

    /// Auto-generated metadata for this message.
    ///
    /// Timestamps inside default to "now" on creation, but if missing during
    /// deserialization, they default to "epoch".
    #[cfg_attr(feature = "json", serde(default = "MessageMetadata::epoch"))]
    pub metadata: MessageMetadata,

    /// The parsed content of this message ready to present.
    pub content: MessageContent,
}

impl Message {
    /// Set the content of a message as a whole (also updates metadata).
    pub fn set_content(&mut self, content: MessageContent) {
        self.update_content(|c| {
            *c = content;
        });
    }

    /// Update specific parts of the content of a message (also updates metadata).
    pub fn update_content(&mut self, f: impl FnOnce(&mut MessageContent)) {
        let bk = self.content.clone();

        f(&mut self.content);

        if self.content.text != bk.text {
            self.metadata.text_updated_at = Utc::now();
        }
    }
}

/// The standard error kinds a client implementation should facilitate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientErrorKind {
    /// The network connection could not be established properly or was lost.
    Network,

    /// The connection could be established, but the remote server/peer gave us
    /// an error.
    ///
    /// Example: On a centralized HTTP server, this would happen when it returns
    /// an HTTP error code.
    Response,

    /// The remote server/peer returned a successful response, but we can't parse
    /// its content.
    ///
    /// Example: When working with JSON APIs, this can happen when the schema of
    /// the JSON response is not what we expected or is not JSON at all.
    Format,

    /// A kind of error that is not contemplated by the kit at the client layer.
    Unknown,
}

impl ClientErrorKind {
    pub fn to_human_readable(&self) -> &str {
        match self {
            ClientErrorKind::Network => "Network error",
            ClientErrorKind::Response => "Remote error",
            ClientErrorKind::Format => "Format error",
            ClientErrorKind::Unknown => "Unknown error",
        }
    }
}

/// Standard error returned from client operations.
#[derive(Debug, Clone)]
pub struct ClientError {
    kind: ClientErrorKind,
    message: String,
    source: Option<Arc<dyn Error + Send + Sync + 'static>>,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.to_human_readable(), self.message)
    }
}

impl Error for ClientError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|s| &**s as _)
    }
}

impl From<ClientError> for Vec<ClientError> {
    fn from(error: ClientError) -> Self {
        vec![error]
    }
}

impl<T> From<ClientError> for ClientResult<T> {
    fn from(error: ClientError) -> Self {
        ClientResult::new_err(vec![error])
    }
}

impl ClientError {
    /// Construct a simple client error without source.
    ///
    /// If you have an underlying error you want to include as the source, use
    /// [ClientError::new_with_source] instead.
    pub fn new(kind: ClientErrorKind, message: String) -> Self {
        ClientError {
            kind,
            message,
            source: None,
        }
    }

    /// Construct a client error using an underlying error as the source.
    pub fn new_with_source<S>(kind: ClientErrorKind, message: String, source: Option<S>) -> Self
    where
        S: Error + Send + Sync + 'static,
    {
        ClientError {
            kind,
            message,
            source: source.map(|s| Arc::new(s) as _),
        }
    }

    /// Error kind accessor.
    pub fn kind(&self) -> ClientErrorKind {
        self.kind
    }

    /// Error message accessor.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }
}

/// The outcome of a client operation.
///
/// Different from the standard Result, this one may contain more than one error.
/// And at the same time, even if an error ocurrs, there may be a value to rescue.
///
/// It would be mistake if this contains no value and no errors at the same time.
/// This is taken care on creation time, and it can't be modified afterwards.
#[derive(Debug)]
pub struct ClientResult<T> {
    errors: Vec<ClientError>,
    value: Option<T>,
}

impl<T> ClientResult<T> {
    /// Creates a result containing a successful value and no errors.
    pub fn new_ok(value: T) -> Self {
        ClientResult {
            errors: Vec::new(),
            value: Some(value),
        }
    }

    /// Creates a result containing errors and no value to rescue.
    ///
    /// The errors list should be non empty. If it's empty a default error will
    /// be added to avoid the invariant of having no value and no errors at the
    /// same time.
    pub fn new_err(errors: Vec<ClientError>) -> Self {
        let errors = if errors.is_empty() {
            vec![ClientError::new(
                ClientErrorKind::Unknown,
                "An error ocurred, but no details were provided.".into(),
            )]
        } else {
            errors
        };

        ClientResult {
            errors,
            value: None,
        }
    }

    /// Creates a result containing errors and a value to rescue.
    ///
    /// This method should only be used when there are both errors and a value.
    /// - If there are no errors, use [ClientResult::new_ok] instead.
    /// - Similar to [ClientResult::new_err], if the errors list is empty, a default
    ///   error will be added.
    pub fn new_ok_and_err(value: T, errors: Vec<ClientError>) -> Self {
        let errors = if errors.is_empty() {
            vec![ClientError::new(
                ClientErrorKind::Unknown,
                "An error ocurred, but no details were provided.".into(),
            )]
        } else {
            errors
        };

        ClientResult {
            errors,
            value: Some(value),
        }
    }

    /// Returns the successful value if there is one.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Returns the errors list.
    pub fn errors(&self) -> &[ClientError] {
        &self.errors
    }

    /// Returns true if there is a successful value.
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Returns true if there are errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Consume the result and return the successful value if there is one.
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Consume the result and return the errors list.
    pub fn into_errors(self) -> Vec<ClientError> {
        self.errors
    }

    /// Consume the result and return the successful value and the errors list.
    pub fn into_value_and_errors(self) -> (Option<T>, Vec<ClientError>) {
        (self.value, self.errors)
    }

    /// Consume the result to convert it into a standard Result.
    pub fn into_result(self) -> Result<T, Vec<ClientError>> {
        if self.errors.is_empty() {
            Ok(self.value.expect("ClientResult has no value nor errors"))
        } else {
            Err(self.errors)
        }
    }
}

/// A standard interface to fetch bots information and send messages to them.
///
/// Expect this to be cloned to move across widgets and async contexts, so keep
/// implementations cheap to clone and synced.
pub trait BotClient: Send {
    /// Send a message to a bot with support for streamed response.
    ///
    /// Each message yielded by the stream should be a snapshot of the full
    /// message as it is being built.
    ///
    /// You are free to add, modify or remove content on-the-go.
    fn send(
        &mut self,
        bot: &Bot,
        messages: &[Message],
    ) -> KitStream<'static, ClientResult<MessageContent>>;

    /// Bots available under this client.
    fn bots(&self) -> KitFuture<'static, ClientResult<Vec<Bot>>>;

    /// Make a boxed dynamic clone of this client to pass around.
    fn clone_box(&self) -> Box<dyn BotClient>;
}

impl Clone for Box<dyn BotClient> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Commands accepted by an open live session.
#[derive(Debug)]
pub enum LiveCommand {
    /// Push one PCM16 frame of captured audio as realtime input.
    SendAudio(Vec<u8>),
    /// Request the session channel to close.
    Close,
}

/// Messages an open live session can emit.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveEvent {
    /// The server acknowledged the session setup.
    SessionReady,
    /// One frame of synthesized PCM16 audio output.
    AudioData(Vec<u8>),
    /// Queued audio output is stale and must be discarded immediately.
    Interrupted,
    /// Transcription of what the user said.
    InputTranscription(String),
    /// Transcription of what the assistant said.
    OutputTranscription(String),
    /// The assistant finished its current turn.
    TurnComplete,
    /// The channel was closed by either side.
    Closed,
    Error(String),
}

/// Opaque bidirectional channel to an open live session.
///
/// This is the only surface the rest of the kit sees of a live transport:
/// commands go in, events come out, and [`LiveChannel::close`] requests
/// teardown.
pub struct LiveChannel {
    pub command_sender: UnboundedSender<LiveCommand>,
    pub event_sender: UnboundedSender<LiveEvent>,
    pub event_receiver: Arc<Mutex<Option<UnboundedReceiver<LiveEvent>>>>,
}

impl Clone for LiveChannel {
    fn clone(&self) -> Self {
        LiveChannel {
            command_sender: self.command_sender.clone(),
            event_sender: self.event_sender.clone(),
            event_receiver: self.event_receiver.clone(),
        }
    }
}

impl LiveChannel {
    /// Creates the channel pair a transport implementation hands out.
    pub fn new() -> (Self, UnboundedReceiver<LiveCommand>) {
        let (event_sender, event_receiver) = unbounded();
        let (command_sender, command_receiver) = unbounded();

        let channel = LiveChannel {
            command_sender,
            event_sender,
            event_receiver: Arc::new(Mutex::new(Some(event_receiver))),
        };

        (channel, command_receiver)
    }

    /// Send a command to the transport. Returns false if the channel is gone.
    pub fn send(&self, command: LiveCommand) -> bool {
        self.command_sender.unbounded_send(command).is_ok()
    }

    /// Request the transport to close. Errors are ignored since the channel
    /// may already be gone.
    pub fn close(&self) {
        let _ = self.command_sender.unbounded_send(LiveCommand::Close);
    }

    /// Take the event receiver out of the channel.
    ///
    /// There is a single receiver, so this returns `None` after the first call.
    pub fn take_event_receiver(&self) -> Option<UnboundedReceiver<LiveEvent>> {
        self.event_receiver.lock().unwrap().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_id() {
        // Simple
        let id = BotId::new("123", "example.com");
        assert_eq!(id.as_str(), "3;123@example.com");
        assert_eq!(id.id(), "123");
        assert_eq!(id.provider(), "example.com");

        // Dirty
        let id = BotId::new("a;b@c", "https://ex@a@m;ple.co@m");
        assert_eq!(id.as_str(), "5;a;b@c@https://ex@a@m;ple.co@m");
        assert_eq!(id.id(), "a;b@c");
        assert_eq!(id.provider(), "https://ex@a@m;ple.co@m");

        // Similar yet different
        let id1 = BotId::new("a@", "b");
        let id2 = BotId::new("a", "@b");
        assert_ne!(id1.as_str(), id2.as_str());
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_live_channel_single_receiver() {
        let (channel, _commands) = LiveChannel::new();

        assert!(channel.take_event_receiver().is_some());
        assert!(channel.take_event_receiver().is_none());
    }

    #[test]
    fn test_live_channel_send_after_receiver_drop() {
        let (channel, commands) = LiveChannel::new();
        drop(commands);

        assert!(!channel.send(LiveCommand::Close));
    }
}
