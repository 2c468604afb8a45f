#[cfg(feature = "http")]
pub mod gemini;
#[cfg(feature = "http")]
pub use gemini::*;

#[cfg(feature = "realtime")]
pub mod gemini_live;
#[cfg(feature = "realtime")]
pub use gemini_live::*;
