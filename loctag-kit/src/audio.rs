//! The audio relay core: codec helpers, capture framing, and scheduled
//! playback of streamed frames.

pub mod capture;
pub mod codec;
#[cfg(feature = "audio")]
pub(crate) mod device;
pub mod playback;

/// Sample rate of realtime input audio sent to the service.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized audio received from the service.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Mime tag attached to outbound realtime input frames.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Number of samples in one captured frame.
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;
