//! Scheduled playback of streamed audio frames.
//!
//! Frames can arrive faster than real time, so each decoded buffer is
//! scheduled at the earliest moment that keeps playback gapless, in-order and
//! non-overlapping. An interruption discards everything scheduled so the next
//! frame plays immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Handle of one scheduled buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BufferId(u64);

/// Placement of one buffer on the playback timeline, in seconds.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// The playback timeline of one live session.
///
/// `next_start_time` is monotonically non-decreasing except when explicitly
/// reset to zero by [`PlaybackSchedule::interrupt`]. Each scheduled buffer
/// stays in the live set until it either finishes naturally or is discarded
/// by an interruption.
#[derive(Debug, Default)]
pub struct PlaybackSchedule {
    next_start_time: f64,
    next_id: u64,
    live: HashMap<BufferId, ScheduledBuffer>,
}

impl PlaybackSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place the next buffer: never earlier than "now" and never earlier than
    /// the end of the previously scheduled buffer.
    pub fn schedule(&mut self, duration: f64, now: f64) -> ScheduledBuffer {
        let start = self.next_start_time.max(now);

        let id = BufferId(self.next_id);
        self.next_id += 1;

        let scheduled = ScheduledBuffer {
            id,
            start,
            duration,
        };

        self.next_start_time = scheduled.end();
        self.live.insert(id, scheduled);
        scheduled
    }

    /// Remove a buffer that finished playing naturally.
    ///
    /// Returns false if the buffer already left the live set, which callers
    /// are free to ignore.
    pub fn finish(&mut self, id: BufferId) -> bool {
        self.live.remove(&id).is_some()
    }

    /// Discard everything scheduled and rewind the timeline to zero.
    ///
    /// Returns the handles that must be force-stopped so no stale audio from
    /// before the interruption stays audible.
    pub fn interrupt(&mut self) -> Vec<BufferId> {
        let ids = self.live.drain().map(|(id, _)| id).collect();
        self.next_start_time = 0.0;
        ids
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_idle(&self) -> bool {
        self.live.is_empty()
    }
}

#[derive(Debug)]
struct QueuedBuffer {
    id: BufferId,
    start_sample: u64,
    samples: Vec<f32>,
    cursor: usize,
}

#[derive(Debug, Default)]
struct PlayerState {
    schedule: PlaybackSchedule,
    queue: Vec<QueuedBuffer>,
    clock_samples: u64,
}

/// Renders scheduled buffers into an output stream.
///
/// Shared between the session task (enqueue/interrupt) and the device output
/// callback (render); the render clock doubles as the schedule's notion of
/// "now".
#[derive(Clone, Debug)]
pub struct Player {
    sample_rate: u32,
    state: Arc<Mutex<PlayerState>>,
}

impl Player {
    pub fn new(sample_rate: u32) -> Self {
        Player {
            sample_rate,
            state: Arc::new(Mutex::new(PlayerState::default())),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds of audio rendered so far.
    pub fn clock_seconds(&self) -> f64 {
        let state = self.state.lock().unwrap();
        state.clock_samples as f64 / self.sample_rate as f64
    }

    /// Schedule one decoded buffer for gapless playback after whatever is
    /// already queued.
    pub fn enqueue(&self, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }

        let mut state = self.state.lock().unwrap();

        let now = state.clock_samples as f64 / self.sample_rate as f64;
        let duration = samples.len() as f64 / self.sample_rate as f64;
        let scheduled = state.schedule.schedule(duration, now);
        let start_sample = (scheduled.start * self.sample_rate as f64).round() as u64;

        state.queue.push(QueuedBuffer {
            id: scheduled.id,
            start_sample,
            samples,
            cursor: 0,
        });
    }

    /// Force-stop everything scheduled or playing.
    ///
    /// Buffers that already finished are ignored.
    pub fn interrupt(&self) {
        let mut state = self.state.lock().unwrap();
        state.schedule.interrupt();
        state.queue.clear();
    }

    /// Fill one output block and advance the clock. Called from the device
    /// output callback; must not block on anything but the state lock.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);

        let mut state = self.state.lock().unwrap();
        let block_start = state.clock_samples;
        let block_end = block_start + out.len() as u64;

        let mut finished = Vec::new();

        for buffer in &mut state.queue {
            let position = buffer.start_sample + buffer.cursor as u64;
            if position >= block_end {
                continue;
            }

            let out_offset = position.saturating_sub(block_start) as usize;
            let remaining = buffer.samples.len() - buffer.cursor;
            let copy = remaining.min(out.len() - out_offset);

            for i in 0..copy {
                out[out_offset + i] += buffer.samples[buffer.cursor + i];
            }

            buffer.cursor += copy;
            if buffer.cursor == buffer.samples.len() {
                finished.push(buffer.id);
            }
        }

        state.queue.retain(|b| b.cursor < b.samples.len());
        for id in finished {
            state.schedule.finish(id);
        }

        state.clock_samples = block_end;
    }

    pub fn is_idle(&self) -> bool {
        self.state.lock().unwrap().schedule.is_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_gapless_and_ordered() {
        let mut schedule = PlaybackSchedule::new();

        // Frames arrive before the previous one finishes.
        let a = schedule.schedule(0.5, 0.0);
        let b = schedule.schedule(0.25, 0.125);
        let c = schedule.schedule(0.125, 0.25);

        assert_eq!(a.start, 0.0);
        assert_eq!(b.start, 0.5);
        assert_eq!(c.start, 0.75);

        // Non-decreasing, no overlap, no added gap.
        for pair in [[a, b], [b, c]] {
            assert!(pair[1].start >= pair[0].start);
            assert!(pair[1].start >= pair[0].end());
        }
        assert_eq!(schedule.next_start_time(), 0.875);
        assert_eq!(schedule.live_count(), 3);
    }

    #[test]
    fn test_schedule_waits_for_the_clock() {
        let mut schedule = PlaybackSchedule::new();

        schedule.schedule(0.5, 0.0);
        // Arrival after the previous buffer already ended: start at "now",
        // not at the stale end time.
        let late = schedule.schedule(0.5, 2.0);

        assert_eq!(late.start, 2.0);
        assert_eq!(schedule.next_start_time(), 2.5);
    }

    #[test]
    fn test_finish_removes_exactly_once() {
        let mut schedule = PlaybackSchedule::new();
        let a = schedule.schedule(0.5, 0.0);

        assert!(schedule.finish(a.id));
        assert!(!schedule.finish(a.id));
        assert!(schedule.is_idle());
    }

    #[test]
    fn test_interrupt_resets_the_timeline() {
        let mut schedule = PlaybackSchedule::new();
        schedule.schedule(0.5, 0.0);
        schedule.schedule(0.5, 0.0);

        let stopped = schedule.interrupt();
        assert_eq!(stopped.len(), 2);
        assert_eq!(schedule.next_start_time(), 0.0);
        assert!(schedule.is_idle());

        // The next frame schedules at "now", not at a stale future offset.
        let next = schedule.schedule(0.5, 3.0);
        assert_eq!(next.start, 3.0);
    }

    #[test]
    fn test_player_renders_back_to_back_buffers() {
        let player = Player::new(10);

        player.enqueue(vec![1.0; 5]);
        player.enqueue(vec![2.0; 5]);

        let mut out = [0.0f32; 10];
        player.render(&mut out);

        assert_eq!(&out[..5], &[1.0; 5]);
        assert_eq!(&out[5..], &[2.0; 5]);
        assert!(player.is_idle());
        assert_eq!(player.clock_seconds(), 1.0);
    }

    #[test]
    fn test_player_schedules_after_the_clock() {
        let player = Player::new(10);

        let mut out = [0.0f32; 10];
        player.render(&mut out);

        // One second already played; this buffer must start now, not at zero.
        player.enqueue(vec![1.0; 5]);
        player.render(&mut out);

        assert_eq!(&out[..5], &[1.0; 5]);
        assert_eq!(&out[5..], &[0.0; 5]);
    }

    #[test]
    fn test_player_interrupt_silences_everything() {
        let player = Player::new(10);

        player.enqueue(vec![1.0; 10]);
        player.enqueue(vec![2.0; 10]);

        let mut out = [0.0f32; 5];
        player.render(&mut out);
        assert_eq!(out, [1.0; 5]);

        player.interrupt();
        assert!(player.is_idle());

        player.render(&mut out);
        assert_eq!(out, [0.0; 5]);

        // Post-interruption audio plays immediately instead of queueing
        // behind the discarded buffers.
        player.enqueue(vec![3.0; 5]);
        player.render(&mut out);
        assert_eq!(out, [3.0; 5]);
    }

    #[test]
    fn test_player_renders_partial_blocks() {
        let player = Player::new(10);
        player.enqueue(vec![1.0; 8]);

        let mut first = [0.0f32; 5];
        player.render(&mut first);
        assert_eq!(first, [1.0; 5]);
        assert!(!player.is_idle());

        let mut second = [0.0f32; 5];
        player.render(&mut second);
        assert_eq!(&second[..3], &[1.0; 3]);
        assert_eq!(&second[3..], &[0.0; 2]);
        assert!(player.is_idle());
    }
}
