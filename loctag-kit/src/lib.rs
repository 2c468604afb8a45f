//! # Description
//!
//! Loctag Kit is a Rust crate containing the headless building blocks of the
//! Loctag assistant: protocol types, a streaming multimodal chat client, a
//! realtime voice transport, and the audio relay core that connects a
//! microphone and speaker to a live session.
//!
//! # Features
//!
//! - 📞 Built-in Gemini client with streamed, grounded responses.
//! - 🎙️ Live bidirectional voice sessions with barge-in interruption.
//! - 🔊 Gapless scheduled playback of streamed audio frames.
//! - 🧩 Extensible with your own clients through the [`protocol::BotClient`]
//!   trait.
//!
//! Everything network- or device-facing is feature gated (`http`, `realtime`,
//! `audio`); the `full` feature enables the whole kit.

pub mod audio;
pub mod clients;
#[cfg(feature = "audio")]
pub mod live;
pub mod protocol;
pub mod utils;

pub use clients::*;
pub use protocol::*;
