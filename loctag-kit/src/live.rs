//! Live voice sessions.
//!
//! A [`LiveSession`] owns every piece of per-session audio state: the
//! transport channel, both device streams, the capture loop, and the playback
//! schedule. Nothing here is process-wide, so sessions can come and go
//! without leaking into each other.

use futures::StreamExt;

use crate::audio::{OUTPUT_SAMPLE_RATE, capture, codec, device, playback::Player};
use crate::clients::gemini_live::GeminiLiveClient;
use crate::protocol::{ClientError, ClientErrorKind, LiveChannel, LiveEvent};
use crate::utils::asynchronous::{AbortOnDropHandle, abort_on_drop, spawn};

/// What a live session reports back to its owner.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveSessionEvent {
    /// Transcription of what the user is saying.
    UserTranscription(String),
    /// Transcription of what the assistant is saying.
    ModelTranscription(String),
    /// The session ended, either by a server close or a transport failure.
    Closed,
}

/// An open voice conversation: microphone in, scheduled speaker audio out,
/// transcriptions reported through the event callback.
pub struct LiveSession {
    channel: LiveChannel,
    player: Player,
    _event_task: AbortOnDropHandle,
    _input_stream: cpal::Stream,
    _output_stream: cpal::Stream,
}

impl LiveSession {
    /// Connect the transport and wire the microphone and speaker to it.
    ///
    /// Incoming audio frames (24 kHz mono PCM) are scheduled for gapless
    /// playback; an interruption signal flushes everything scheduled so the
    /// next frame plays immediately. Captured frames are pushed as realtime
    /// input for the whole lifetime of the session.
    ///
    /// Device streams are not `Send`, so the returned future must be driven
    /// on the thread that will own the session.
    pub async fn start(
        client: &GeminiLiveClient,
        mut on_event: impl FnMut(LiveSessionEvent) + Send + 'static,
    ) -> Result<LiveSession, Vec<ClientError>> {
        let channel = client.connect().await.into_result()?;
        let mut events = channel
            .take_event_receiver()
            .expect("a fresh channel still has its event receiver");

        let (output_stream, player) = match device::open_output() {
            Ok(opened) => opened,
            Err(error) => {
                channel.close();
                return Err(error.into());
            }
        };

        let queue = capture::CaptureQueue::new();
        let input_stream = match device::open_input(queue.clone()) {
            Ok(stream) => stream,
            Err(error) => {
                channel.close();
                return Err(error.into());
            }
        };

        let chunks = queue.receiver();
        let capture_channel = channel.clone();
        if let Err(error) = std::thread::Builder::new()
            .name("loctag-capture".to_string())
            .spawn(move || capture::run_capture_loop(chunks, capture_channel))
        {
            channel.close();
            return Err(ClientError::new_with_source(
                ClientErrorKind::Unknown,
                "Could not start the capture thread.".to_string(),
                Some(error),
            )
            .into());
        }

        let playback = player.clone();
        let (event_future, event_task) = abort_on_drop(async move {
            while let Some(event) = events.next().await {
                match event {
                    LiveEvent::SessionReady => log::debug!("Live session ready"),
                    LiveEvent::AudioData(bytes) => {
                        let buffer = codec::pcm16_to_float(&bytes, OUTPUT_SAMPLE_RATE, 1);
                        let samples = codec::resample_linear(
                            &buffer.into_mono(),
                            OUTPUT_SAMPLE_RATE,
                            playback.sample_rate(),
                        );
                        playback.enqueue(samples);
                    }
                    LiveEvent::Interrupted => playback.interrupt(),
                    LiveEvent::InputTranscription(text) => {
                        on_event(LiveSessionEvent::UserTranscription(text))
                    }
                    LiveEvent::OutputTranscription(text) => {
                        on_event(LiveSessionEvent::ModelTranscription(text))
                    }
                    LiveEvent::TurnComplete => log::debug!("Model turn complete"),
                    LiveEvent::Closed => {
                        on_event(LiveSessionEvent::Closed);
                        break;
                    }
                    LiveEvent::Error(message) => {
                        log::warn!("Live session error: {message}");
                        on_event(LiveSessionEvent::Closed);
                        break;
                    }
                }
            }
        });
        spawn(async move {
            let _ = event_future.await;
        });

        Ok(LiveSession {
            channel,
            player,
            _event_task: event_task,
            _input_stream: input_stream,
            _output_stream: output_stream,
        })
    }

    /// Seconds of audio rendered to the speaker so far.
    pub fn playback_clock(&self) -> f64 {
        self.player.clock_seconds()
    }

    /// True while nothing is scheduled or playing.
    pub fn is_playback_idle(&self) -> bool {
        self.player.is_idle()
    }

    /// Best-effort, non-blocking teardown.
    ///
    /// Requests the channel close and drops both device streams, the capture
    /// loop and the event task without waiting for confirmation; teardown
    /// errors are swallowed.
    pub fn stop(self) {
        self.channel.close();
        // Dropping the rest does the work: the device streams stop, the
        // capture loop sees a hung-up queue, and the event task aborts.
    }
}
