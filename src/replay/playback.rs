//! Time-accurate replay playback.
//!
//! The scheduler owns the playback cursor and advances it against
//! wall-clock time passed in through [`PlaybackScheduler::tick`]. Time is
//! never sampled inside this module, which keeps every method
//! deterministic and unit-testable: tests synthesize `Instant`s instead
//! of sleeping.

use std::collections::VecDeque;

use smallvec::SmallVec;
use tracing::{debug, trace};
use web_time::{Duration, Instant};

use crate::event_drain::EventDrain;
use crate::replay::Frame;

/// Nominal simulation rate of recorded fights, in frames per second.
pub const FRAME_RATE: u64 = 60;

/// Wall-clock duration of one frame at normal speed.
pub const FRAME_DURATION: Duration = Duration::from_nanos(FRAME_DURATION_NANOS);

/// Slowest supported playback speed.
pub const MIN_PLAYBACK_SPEED: f64 = 0.1;

/// Fastest supported playback speed.
pub const MAX_PLAYBACK_SPEED: f64 = 5.0;

const FRAME_DURATION_NANOS: u64 = 1_000_000_000 / FRAME_RATE + 1; // 16_666_667

/// Playback position state. Initial state is `Stopped`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Not advancing; the cursor rests at frame 0 (or wherever a seek put it).
    #[default]
    Stopped,
    /// Advancing against wall-clock time.
    Playing,
    /// Holding position; resuming continues from the current cursor.
    Paused,
}

/// Notifications emitted by the scheduler, drained via [`PlaybackScheduler::events`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PlaybackEvent {
    /// The cursor moved to `frame_index`. Emitted once per frame crossed,
    /// in order, including catch-up bursts and synchronous seeks.
    FrameAdvanced {
        /// Index into the loaded frame sequence.
        frame_index: usize,
    },
    /// Playback reached the final frame and stopped. Emitted exactly once
    /// per completed run.
    Finished,
}

/// Owns playback position, speed and pause state for one loaded replay.
///
/// The tick contract: elapsed wall time is scaled by the current speed and
/// accumulated against [`FRAME_DURATION`]; a single tick may emit zero,
/// one, or several [`PlaybackEvent::FrameAdvanced`] events (catch-up,
/// never silent skipping). Reaching the last frame while playing
/// transitions to `Stopped` and emits [`PlaybackEvent::Finished`].
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    frames: Vec<Frame>,
    state: PlaybackState,
    cursor: usize,
    speed: f64,
    accumulated_nanos: u64,
    last_tick: Option<Instant>,
    event_queue: VecDeque<PlaybackEvent>,
}

impl PlaybackScheduler {
    /// Creates an empty scheduler at normal speed with nothing loaded.
    #[must_use]
    pub fn new() -> Self {
        Self {
            speed: 1.0,
            ..Self::default()
        }
    }

    /// Loads a decoded frame sequence, resetting to `Stopped` at frame 0.
    /// Pending events from a previous replay are discarded.
    pub fn load(&mut self, frames: Vec<Frame>) {
        debug!(frames = frames.len(), "loading replay frames");
        self.frames = frames;
        self.state = PlaybackState::Stopped;
        self.cursor = 0;
        self.accumulated_nanos = 0;
        self.last_tick = None;
        self.event_queue.clear();
    }

    /// Current playback state.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Current cursor position.
    #[must_use]
    pub fn frame_index(&self) -> usize {
        self.cursor
    }

    /// Number of loaded frames.
    #[must_use]
    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    /// Current playback speed multiplier.
    #[must_use]
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// The frame under the cursor, if any frames are loaded.
    #[must_use]
    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.get(self.cursor)
    }

    /// The frame at `index`, if in range.
    #[must_use]
    pub fn frame_at(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Begins or resumes playback. Starting from `Stopped` begins at frame 0
    /// and immediately emits that frame; resuming from `Paused` continues
    /// from the current cursor without re-emitting it. A no-op with no
    /// frames loaded.
    pub fn play(&mut self) {
        if self.frames.is_empty() {
            return;
        }
        match self.state {
            PlaybackState::Playing => {}
            PlaybackState::Paused => {
                self.state = PlaybackState::Playing;
                self.last_tick = None;
            }
            PlaybackState::Stopped => {
                self.state = PlaybackState::Playing;
                self.cursor = 0;
                self.accumulated_nanos = 0;
                self.last_tick = None;
                self.push_event(PlaybackEvent::FrameAdvanced { frame_index: 0 });
            }
        }
    }

    /// Pauses playback, holding the current position.
    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    /// Stops playback and rewinds the cursor to frame 0.
    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.cursor = 0;
        self.accumulated_nanos = 0;
        self.last_tick = None;
    }

    /// Moves the cursor to `index`, clamped to the loaded range, regardless
    /// of play state, and synchronously emits the frame landed on. Seeking
    /// is idempotent: a repeated `seek(n)` emits the same frame again and
    /// leaves the cursor unchanged.
    pub fn seek(&mut self, index: usize) {
        if self.frames.is_empty() {
            return;
        }
        let clamped = index.min(self.frames.len() - 1);
        if clamped != index {
            trace!(requested = index, clamped, "seek clamped to frame range");
        }
        self.cursor = clamped;
        self.accumulated_nanos = 0;
        self.push_event(PlaybackEvent::FrameAdvanced {
            frame_index: clamped,
        });
    }

    /// Sets the speed multiplier, clamped to
    /// [`MIN_PLAYBACK_SPEED`]..=[`MAX_PLAYBACK_SPEED`]. Affects subsequent
    /// ticks only; time already accumulated is not rescaled.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.clamp(MIN_PLAYBACK_SPEED, MAX_PLAYBACK_SPEED);
    }

    /// Advances playback against wall-clock time. Returns the indices of
    /// the frames emitted by this tick, in order (also queued as events).
    pub fn tick(&mut self, now: Instant) -> SmallVec<[usize; 4]> {
        let elapsed = match self.last_tick {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::ZERO,
        };
        self.last_tick = Some(now);

        if self.state != PlaybackState::Playing {
            return SmallVec::new();
        }
        self.advance_by(elapsed)
    }

    /// Core advancing logic, separated from `tick` so elapsed time can be
    /// driven directly.
    fn advance_by(&mut self, elapsed: Duration) -> SmallVec<[usize; 4]> {
        let mut emitted = SmallVec::new();
        if self.state != PlaybackState::Playing || self.frames.is_empty() {
            return emitted;
        }

        let scaled = (elapsed.as_nanos() as f64 * self.speed).round() as u64;
        self.accumulated_nanos = self.accumulated_nanos.saturating_add(scaled);

        while self.accumulated_nanos >= FRAME_DURATION_NANOS {
            self.accumulated_nanos -= FRAME_DURATION_NANOS;
            if self.cursor + 1 >= self.frames.len() {
                // Already on the final frame: finish instead of advancing.
                self.state = PlaybackState::Stopped;
                self.accumulated_nanos = 0;
                self.push_event(PlaybackEvent::Finished);
                debug!(frames = self.frames.len(), "replay playback finished");
                break;
            }
            self.cursor += 1;
            emitted.push(self.cursor);
            self.push_event(PlaybackEvent::FrameAdvanced {
                frame_index: self.cursor,
            });
        }
        emitted
    }

    /// Drains all queued playback events.
    pub fn events(&mut self) -> EventDrain<'_, PlaybackEvent> {
        EventDrain::from_drain(self.event_queue.drain(..))
    }

    fn push_event(&mut self, event: PlaybackEvent) {
        self.event_queue.push_back(event);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::replay::PlayerFrameState;

    fn frames(n: usize) -> Vec<Frame> {
        (0..n)
            .map(|i| Frame {
                index: i as u64,
                players: [
                    PlayerFrameState {
                        x: i as f64,
                        ..PlayerFrameState::default()
                    },
                    PlayerFrameState::default(),
                ],
            })
            .collect()
    }

    fn playing_scheduler(n: usize) -> (PlaybackScheduler, Instant) {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.load(frames(n));
        scheduler.play();
        let start = Instant::now();
        // establish the tick baseline and drain the initial frame event
        scheduler.tick(start);
        let _ = scheduler.events().count();
        (scheduler, start)
    }

    #[test]
    fn starts_stopped_at_frame_zero() {
        let scheduler = PlaybackScheduler::new();
        assert_eq!(scheduler.state(), PlaybackState::Stopped);
        assert_eq!(scheduler.frame_index(), 0);
        assert_eq!(scheduler.total_frames(), 0);
    }

    #[test]
    fn load_resets_to_stopped_at_zero() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.load(frames(10));
        scheduler.play();
        scheduler.seek(5);
        scheduler.load(frames(3));
        assert_eq!(scheduler.state(), PlaybackState::Stopped);
        assert_eq!(scheduler.frame_index(), 0);
        assert_eq!(scheduler.events().count(), 0);
    }

    #[test]
    fn play_with_nothing_loaded_is_a_no_op() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.play();
        assert_eq!(scheduler.state(), PlaybackState::Stopped);
    }

    #[test]
    fn play_emits_first_frame_synchronously() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.load(frames(5));
        scheduler.play();
        let events: Vec<_> = scheduler.events().collect();
        assert_eq!(events, vec![PlaybackEvent::FrameAdvanced { frame_index: 0 }]);
    }

    #[test]
    fn one_frame_duration_advances_one_frame() {
        let (mut scheduler, start) = playing_scheduler(10);
        let emitted = scheduler.tick(start + FRAME_DURATION);
        assert_eq!(emitted.as_slice(), &[1]);
    }

    #[test]
    fn catch_up_emits_every_crossed_frame_in_order() {
        let (mut scheduler, start) = playing_scheduler(10);
        let emitted = scheduler.tick(start + 3 * FRAME_DURATION);
        assert_eq!(emitted.as_slice(), &[1, 2, 3]);
        let events: Vec<_> = scheduler.events().collect();
        assert_eq!(
            events,
            vec![
                PlaybackEvent::FrameAdvanced { frame_index: 1 },
                PlaybackEvent::FrameAdvanced { frame_index: 2 },
                PlaybackEvent::FrameAdvanced { frame_index: 3 },
            ]
        );
    }

    #[test]
    fn double_speed_advances_two_frames_per_frame_duration() {
        let (mut scheduler, start) = playing_scheduler(10);
        scheduler.set_speed(2.0);
        let emitted = scheduler.tick(start + FRAME_DURATION);
        assert_eq!(emitted.as_slice(), &[1, 2]);
    }

    #[test]
    fn half_speed_needs_two_frame_durations_per_frame() {
        let (mut scheduler, start) = playing_scheduler(10);
        scheduler.set_speed(0.5);
        assert_eq!(scheduler.tick(start + FRAME_DURATION).len(), 0);
        assert_eq!(scheduler.tick(start + 2 * FRAME_DURATION).as_slice(), &[1]);
    }

    #[test]
    fn speed_is_clamped_to_supported_range() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.set_speed(0.0);
        assert_eq!(scheduler.speed(), MIN_PLAYBACK_SPEED);
        scheduler.set_speed(100.0);
        assert_eq!(scheduler.speed(), MAX_PLAYBACK_SPEED);
    }

    #[test]
    fn pause_holds_position_and_resume_continues() {
        let (mut scheduler, start) = playing_scheduler(10);
        scheduler.tick(start + FRAME_DURATION);
        scheduler.pause();
        assert_eq!(scheduler.state(), PlaybackState::Paused);
        // time passing while paused must not advance anything
        let emitted = scheduler.tick(start + 10 * FRAME_DURATION);
        assert!(emitted.is_empty());
        assert_eq!(scheduler.frame_index(), 1);

        scheduler.play();
        assert_eq!(scheduler.state(), PlaybackState::Playing);
        assert_eq!(scheduler.frame_index(), 1);
        // resuming must not re-emit the held frame
        let _ = scheduler.events().count();
        let later = start + 11 * FRAME_DURATION;
        scheduler.tick(later);
        let emitted = scheduler.tick(later + FRAME_DURATION);
        assert_eq!(emitted.as_slice(), &[2]);
    }

    #[test]
    fn stop_rewinds_to_zero() {
        let (mut scheduler, start) = playing_scheduler(10);
        scheduler.tick(start + 4 * FRAME_DURATION);
        scheduler.stop();
        assert_eq!(scheduler.state(), PlaybackState::Stopped);
        assert_eq!(scheduler.frame_index(), 0);
    }

    #[test]
    fn seek_is_synchronous_and_clamped() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.load(frames(5));
        scheduler.seek(100);
        assert_eq!(scheduler.frame_index(), 4);
        let events: Vec<_> = scheduler.events().collect();
        assert_eq!(events, vec![PlaybackEvent::FrameAdvanced { frame_index: 4 }]);
    }

    #[test]
    fn seek_is_idempotent() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.load(frames(8));
        scheduler.seek(3);
        let first: Vec<_> = scheduler.events().collect();
        scheduler.seek(3);
        scheduler.seek(3);
        let repeated: Vec<_> = scheduler.events().collect();
        assert_eq!(scheduler.frame_index(), 3);
        assert_eq!(first.last(), repeated.last());
        assert!(repeated
            .iter()
            .all(|e| *e == PlaybackEvent::FrameAdvanced { frame_index: 3 }));
    }

    #[test]
    fn seek_works_while_paused_and_playing() {
        let (mut scheduler, start) = playing_scheduler(10);
        scheduler.seek(7);
        assert_eq!(scheduler.frame_index(), 7);
        assert_eq!(scheduler.state(), PlaybackState::Playing);
        scheduler.pause();
        scheduler.seek(2);
        assert_eq!(scheduler.frame_index(), 2);
        assert_eq!(scheduler.state(), PlaybackState::Paused);
        let _ = start;
    }

    #[test]
    fn finishing_emits_exactly_one_finished_event() {
        let (mut scheduler, start) = playing_scheduler(3);
        scheduler.tick(start + 10 * FRAME_DURATION);
        assert_eq!(scheduler.state(), PlaybackState::Stopped);
        let finished = scheduler
            .events()
            .filter(|e| *e == PlaybackEvent::Finished)
            .count();
        assert_eq!(finished, 1);

        // more time passing must not emit another one
        scheduler.tick(start + 20 * FRAME_DURATION);
        assert_eq!(scheduler.events().count(), 0);
    }

    #[test]
    fn finished_run_can_be_replayed_from_the_start() {
        let (mut scheduler, start) = playing_scheduler(3);
        scheduler.tick(start + 10 * FRAME_DURATION);
        assert_eq!(scheduler.state(), PlaybackState::Stopped);
        scheduler.play();
        assert_eq!(scheduler.state(), PlaybackState::Playing);
        assert_eq!(scheduler.frame_index(), 0);
    }

    #[test]
    fn accumulated_time_is_not_rescaled_on_speed_change() {
        let (mut scheduler, start) = playing_scheduler(10);
        // accumulate just under one frame at normal speed
        scheduler.tick(start + FRAME_DURATION / 2);
        scheduler.set_speed(5.0);
        // half a frame of wall time at 5x adds 2.5 frames: 3 frames total crossed
        let emitted = scheduler.tick(start + FRAME_DURATION);
        assert_eq!(emitted.len(), 3);
    }
}
