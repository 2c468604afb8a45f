//! Capture-side framing: device callback chunks are cut into fixed-size
//! frames, converted to PCM16 and pushed to the live channel as realtime
//! input.

use crate::audio::CAPTURE_FRAME_SAMPLES;
#[cfg(feature = "audio")]
use crate::audio::codec;
#[cfg(feature = "audio")]
use crate::protocol::{LiveChannel, LiveCommand};

/// Re-frames arbitrarily sized device chunks into fixed-size frames.
#[derive(Debug, Default)]
pub struct FrameBuilder {
    pending: Vec<f32>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one chunk of samples; returns every frame it completed, in order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= CAPTURE_FRAME_SAMPLES {
            let rest = self.pending.split_off(CAPTURE_FRAME_SAMPLES);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }

        frames
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Bounded handoff from the device callback to the capture loop.
///
/// The device callback must never block, so a saturated queue drops its
/// oldest chunk instead of waiting for the consumer.
#[cfg(feature = "audio")]
#[derive(Clone)]
pub(crate) struct CaptureQueue {
    sender: crossbeam_channel::Sender<Vec<f32>>,
    receiver: crossbeam_channel::Receiver<Vec<f32>>,
}

#[cfg(feature = "audio")]
impl CaptureQueue {
    pub(crate) const CAPACITY: usize = 32;

    pub(crate) fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(Self::CAPACITY);
        CaptureQueue { sender, receiver }
    }

    pub(crate) fn push(&self, chunk: Vec<f32>) {
        let mut chunk = chunk;
        loop {
            match self.sender.try_send(chunk) {
                Ok(()) => return,
                Err(crossbeam_channel::TrySendError::Full(rejected)) => {
                    log::debug!("Capture queue saturated, dropping oldest chunk");
                    let _ = self.receiver.try_recv();
                    chunk = rejected;
                }
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => return,
            }
        }
    }

    pub(crate) fn receiver(&self) -> crossbeam_channel::Receiver<Vec<f32>> {
        self.receiver.clone()
    }
}

/// Forward captured audio to the live channel until the device side hangs up.
///
/// Each completed frame is converted to PCM16 and sent independently and
/// asynchronously; a send failure is logged and does not halt subsequent
/// frame capture. No retry, no backpressure towards the microphone.
#[cfg(feature = "audio")]
pub(crate) fn run_capture_loop(
    chunks: crossbeam_channel::Receiver<Vec<f32>>,
    channel: LiveChannel,
) {
    let mut frames = FrameBuilder::new();

    while let Ok(chunk) = chunks.recv() {
        for frame in frames.push(&chunk) {
            let pcm = codec::float_to_pcm16(&frame);
            if !channel.send(LiveCommand::SendAudio(pcm)) {
                log::warn!("Error sending audio input: live channel closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_builder_reframes_chunks() {
        let mut builder = FrameBuilder::new();

        assert!(builder.push(&vec![0.1; 1000]).is_empty());
        assert_eq!(builder.pending_len(), 1000);

        let frames = builder.push(&vec![0.2; 8000]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), CAPTURE_FRAME_SAMPLES);
        assert_eq!(frames[1].len(), CAPTURE_FRAME_SAMPLES);

        // Order is preserved across the chunk boundary.
        assert_eq!(frames[0][999], 0.1);
        assert_eq!(frames[0][1000], 0.2);
        assert_eq!(builder.pending_len(), 9000 - 2 * CAPTURE_FRAME_SAMPLES);
    }

    #[cfg(feature = "audio")]
    #[test]
    fn test_capture_queue_drops_oldest_when_saturated() {
        let queue = CaptureQueue::new();

        for i in 0..(CaptureQueue::CAPACITY + 8) {
            queue.push(vec![i as f32]);
        }

        let receiver = queue.receiver();
        let first = receiver.try_recv().unwrap();
        assert_eq!(first, vec![8.0]);

        let mut count = 1;
        while receiver.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, CaptureQueue::CAPACITY);
    }

    #[cfg(feature = "audio")]
    #[test]
    fn test_capture_loop_sends_pcm16_frames() {
        let (channel, mut commands) = LiveChannel::new();
        let queue = CaptureQueue::new();

        let receiver = queue.receiver();
        let worker = std::thread::spawn(move || run_capture_loop(receiver, channel));

        queue.push(vec![0.5; CAPTURE_FRAME_SAMPLES]);
        drop(queue);
        worker.join().unwrap();

        match commands.try_next() {
            Ok(Some(LiveCommand::SendAudio(pcm))) => {
                assert_eq!(pcm.len(), CAPTURE_FRAME_SAMPLES * 2);
                assert_eq!(&pcm[..2], &16384i16.to_le_bytes());
            }
            other => panic!("expected one audio frame, got {other:?}"),
        }
    }
}
