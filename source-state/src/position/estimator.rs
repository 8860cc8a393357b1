use std::sync::Arc;
use std::time::{Duration, Instant};

use super::Clock;

/// Snapshot of the estimator's anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackAnchor {
    pub position_ms: u64,
    pub anchored_at: Instant,
    pub duration_ms: Option<u64>,
    pub is_playing: bool,
}

/// Software clock projecting playback position between server anchors
///
/// The estimate is always derived from `(position_ms, anchored_at)` and the
/// playing signals; nothing else mutates a running position. Every mutation
/// first rebases the anchor at the current estimate so that changing the
/// playing signals never rewrites the past.
///
/// "Playing" is a composite of three signals:
///
/// - the explicit flag last reported by the backend,
/// - a grace window after a seek,
/// - a short window after a metadata update that said playing.
pub struct PositionEstimator {
    clock: Arc<dyn Clock>,
    grace_window: Duration,
    signal_window: Duration,

    position_ms: u64,
    anchored_at: Instant,
    duration_ms: Option<u64>,

    explicit_playing: Option<bool>,
    grace_until: Option<Instant>,
    signal_until: Option<Instant>,
}

impl PositionEstimator {
    pub fn new(clock: Arc<dyn Clock>, grace_window: Duration, signal_window: Duration) -> Self {
        let anchored_at = clock.now();
        Self {
            clock,
            grace_window,
            signal_window,
            position_ms: 0,
            anchored_at,
            duration_ms: None,
            explicit_playing: None,
            grace_until: None,
            signal_until: None,
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current estimated position, clamped to the duration when known
    pub fn estimate_now(&self) -> u64 {
        self.estimate_at(self.clock.now())
    }

    /// True if the backend said playing, a seek grace window is open, or a
    /// recent update signaled playing
    pub fn is_effectively_playing(&self) -> bool {
        let now = self.clock.now();
        self.explicit_playing == Some(true)
            || self.grace_until.is_some_and(|until| now < until)
            || self.signal_until.is_some_and(|until| now < until)
    }

    /// True once the estimate has reached a known duration
    pub fn at_end(&self) -> bool {
        match self.duration_ms {
            Some(duration) if duration > 0 => self.estimate_now() >= duration,
            _ => false,
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn in_grace_window(&self) -> bool {
        let now = self.clock.now();
        self.grace_until.is_some_and(|until| now < until)
    }

    pub fn snapshot(&self) -> PlaybackAnchor {
        PlaybackAnchor {
            position_ms: self.position_ms,
            anchored_at: self.anchored_at,
            duration_ms: self.duration_ms,
            is_playing: self.is_effectively_playing(),
        }
    }

    fn estimate_at(&self, now: Instant) -> u64 {
        let elapsed = self
            .advancing_until(now)
            .saturating_duration_since(self.anchored_at);
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.clamp(self.position_ms.saturating_add(elapsed_ms))
    }

    /// Point up to which the clock has been running since the anchor
    fn advancing_until(&self, now: Instant) -> Instant {
        if self.explicit_playing == Some(true) {
            return now;
        }
        [self.grace_until, self.signal_until]
            .into_iter()
            .flatten()
            .map(|until| until.min(now))
            .max()
            .unwrap_or(self.anchored_at)
    }

    fn clamp(&self, position_ms: u64) -> u64 {
        match self.duration_ms {
            Some(duration) if duration > 0 => position_ms.min(duration),
            _ => position_ms,
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Re-anchor to a reported position
    pub fn on_anchor_update(
        &mut self,
        position_ms: u64,
        duration_ms: Option<u64>,
        is_playing_hint: Option<bool>,
    ) {
        let now = self.clock.now();
        self.anchor(position_ms, now);
        if duration_ms.is_some() {
            self.duration_ms = duration_ms;
        }
        if let Some(playing) = is_playing_hint {
            self.apply_hint(playing, now);
        }
    }

    /// Playing flag from an update that carried no position
    pub fn on_playing_hint(&mut self, is_playing: bool) {
        let now = self.clock.now();
        self.rebase(now);
        self.apply_hint(is_playing, now);
    }

    /// Re-anchor immediately and open the seek grace window
    pub fn on_seek(&mut self, position_ms: u64, duration_ms: Option<u64>) {
        let now = self.clock.now();
        self.anchor(position_ms, now);
        if duration_ms.is_some() {
            self.duration_ms = duration_ms;
        }
        self.grace_until = Some(now + self.grace_window);
    }

    /// Reset to the start (or given position) of a new track
    ///
    /// The previous track's duration and grace window no longer apply.
    pub fn on_track_change(&mut self, position_ms: u64) {
        let now = self.clock.now();
        self.anchor(position_ms, now);
        self.duration_ms = None;
        self.grace_until = None;
    }

    /// Freeze on pause/stop, resume from the frozen value on play
    pub fn on_play_state_change(&mut self, is_playing: bool) {
        let now = self.clock.now();
        self.rebase(now);
        self.explicit_playing = Some(is_playing);
        if !is_playing {
            self.grace_until = None;
            self.signal_until = None;
        }
    }

    pub fn set_duration(&mut self, duration_ms: Option<u64>) {
        self.duration_ms = duration_ms;
    }

    /// Back to idle defaults, cancelling every window
    pub fn reset(&mut self) {
        self.position_ms = 0;
        self.anchored_at = self.clock.now();
        self.duration_ms = None;
        self.explicit_playing = None;
        self.grace_until = None;
        self.signal_until = None;
    }

    fn anchor(&mut self, position_ms: u64, now: Instant) {
        self.position_ms = position_ms;
        self.anchored_at = now;
    }

    fn rebase(&mut self, now: Instant) {
        let position = self.estimate_at(now);
        self.anchor(position, now);
    }

    fn apply_hint(&mut self, is_playing: bool, now: Instant) {
        self.explicit_playing = Some(is_playing);
        if is_playing {
            self.signal_until = Some(now + self.signal_window);
        }
    }
}

impl std::fmt::Debug for PositionEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionEstimator")
            .field("position_ms", &self.position_ms)
            .field("duration_ms", &self.duration_ms)
            .field("explicit_playing", &self.explicit_playing)
            .field("grace_until", &self.grace_until)
            .field("signal_until", &self.signal_until)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::ManualClock;

    fn estimator() -> (PositionEstimator, ManualClock) {
        let clock = ManualClock::new();
        let estimator = PositionEstimator::new(
            Arc::new(clock.clone()),
            Duration::from_secs(10),
            Duration::from_secs(3),
        );
        (estimator, clock)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_idle_estimator_does_not_advance() {
        let (est, clock) = estimator();
        clock.advance(ms(5000));
        assert_eq!(est.estimate_now(), 0);
        assert!(!est.is_effectively_playing());
    }

    #[test]
    fn test_advances_while_playing() {
        let (mut est, clock) = estimator();
        est.on_anchor_update(0, Some(200_000), None);
        est.on_play_state_change(true);

        clock.advance(ms(2000));
        assert_eq!(est.estimate_now(), 2000);
        clock.advance(ms(750));
        assert_eq!(est.estimate_now(), 2750);
    }

    #[test]
    fn test_clamped_to_duration() {
        let (mut est, clock) = estimator();
        est.on_anchor_update(199_000, Some(200_000), Some(true));
        clock.advance(ms(5000));
        assert_eq!(est.estimate_now(), 200_000);
        assert!(est.at_end());
    }

    #[test]
    fn test_zero_duration_is_unbounded() {
        // Live streams report no length
        let (mut est, clock) = estimator();
        est.on_anchor_update(5000, Some(0), Some(true));
        clock.advance(ms(60_000));
        assert_eq!(est.estimate_now(), 65_000);
        assert!(!est.at_end());

        est.on_anchor_update(1000, None, Some(true));
        clock.advance(ms(1000));
        assert_eq!(est.estimate_now(), 2000);
    }

    #[test]
    fn test_seek_reanchors_and_opens_grace() {
        let (mut est, clock) = estimator();
        est.on_anchor_update(10_000, Some(200_000), None);
        clock.advance(ms(4000));

        est.on_seek(30_000, Some(200_000));
        clock.advance(ms(500));

        assert_eq!(est.estimate_now(), 30_500);
        assert!(est.is_effectively_playing());
    }

    #[test]
    fn test_grace_window_expires_and_freezes() {
        let (mut est, clock) = estimator();
        est.on_seek(1000, None);

        clock.advance(ms(9_999));
        assert!(est.is_effectively_playing());
        clock.advance(ms(1));
        assert!(!est.is_effectively_playing());
        assert_eq!(est.estimate_now(), 11_000);

        clock.advance(ms(5000));
        assert_eq!(est.estimate_now(), 11_000);
    }

    #[test]
    fn test_grace_overrides_explicit_paused() {
        let (mut est, clock) = estimator();
        est.on_playing_hint(false);
        est.on_seek(5000, Some(60_000));
        clock.advance(ms(1000));

        assert!(est.is_effectively_playing());
        assert_eq!(est.estimate_now(), 6000);
    }

    #[test]
    fn test_pause_freezes_and_resume_continues() {
        let (mut est, clock) = estimator();
        est.on_anchor_update(0, Some(200_000), None);
        est.on_play_state_change(true);
        clock.advance(ms(3000));

        est.on_play_state_change(false);
        clock.advance(ms(10_000));
        assert_eq!(est.estimate_now(), 3000);

        est.on_play_state_change(true);
        clock.advance(ms(1000));
        assert_eq!(est.estimate_now(), 4000);
    }

    #[test]
    fn test_pause_cancels_grace_window() {
        let (mut est, clock) = estimator();
        est.on_seek(1000, None);
        est.on_play_state_change(false);
        clock.advance(ms(2000));

        assert!(!est.is_effectively_playing());
        assert_eq!(est.estimate_now(), 1000);
    }

    #[test]
    fn test_playing_signal_window() {
        let (mut est, clock) = estimator();
        est.on_anchor_update(0, None, Some(true));
        // A contradicting flag from another event kind inside the window
        est.on_playing_hint(false);

        clock.advance(ms(2000));
        assert!(est.is_effectively_playing());
        assert_eq!(est.estimate_now(), 2000);

        clock.advance(ms(2000));
        assert!(!est.is_effectively_playing());
        assert_eq!(est.estimate_now(), 3000);
    }

    #[test]
    fn test_track_change_resets_position_and_grace() {
        let (mut est, clock) = estimator();
        est.on_seek(120_000, Some(200_000));
        clock.advance(ms(1000));

        est.on_track_change(0);
        assert_eq!(est.estimate_now(), 0);
        assert_eq!(est.duration_ms(), None);
        assert!(!est.in_grace_window());
    }

    #[test]
    fn test_hint_does_not_jump_frozen_position() {
        let (mut est, clock) = estimator();
        est.on_anchor_update(5000, None, Some(false));
        clock.advance(ms(8000));

        est.on_playing_hint(true);
        assert_eq!(est.estimate_now(), 5000);
        clock.advance(ms(100));
        assert_eq!(est.estimate_now(), 5100);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let (mut est, clock) = estimator();
        est.on_anchor_update(42_000, Some(90_000), Some(true));
        est.reset();
        clock.advance(ms(1000));

        assert_eq!(est.estimate_now(), 0);
        assert!(!est.is_effectively_playing());
        assert_eq!(est.snapshot().duration_ms, None);
    }
}
