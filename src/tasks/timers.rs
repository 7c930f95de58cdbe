//! Periodic timers for the single-threaded event loop.
//!
//! The host asks for [`TimerQueue::next_deadline`] to decide how long to
//! sleep, then hands every due timer back to the slideshow via
//! [`TimerQueue::take_due`].

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::events::SurfaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Slideshow-wide image advance.
    Advance,
    /// Crossfade frame for one surface.
    Animation(SurfaceId),
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    interval: Duration,
    deadline: Instant,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    timers: BTreeMap<TimerKind, Timer>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) `kind` to fire every `interval`, first at
    /// `now + interval`.
    pub fn start(&mut self, kind: TimerKind, interval: Duration, now: Instant) {
        let interval = interval.max(Duration::from_millis(1));
        self.timers.insert(
            kind,
            Timer {
                interval,
                deadline: now + interval,
            },
        );
    }

    pub fn stop(&mut self, kind: TimerKind) -> bool {
        self.timers.remove(&kind).is_some()
    }

    pub fn is_active(&self, kind: TimerKind) -> bool {
        self.timers.contains_key(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.deadline).min()
    }

    /// Returns every timer whose deadline has passed, in deadline order, and
    /// schedules each one for its next period. A timer that fell several
    /// periods behind fires once and is rescheduled relative to `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due: Vec<(Instant, TimerKind)> = Vec::new();
        for (kind, timer) in self.timers.iter_mut() {
            if timer.deadline <= now {
                due.push((timer.deadline, *kind));
                timer.deadline += timer.interval;
                if timer.deadline <= now {
                    timer.deadline = now + timer.interval;
                }
            }
        }
        due.sort();
        due.into_iter().map(|(_, kind)| kind).collect()
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_periodically() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        timers.start(TimerKind::Advance, Duration::from_secs(10), t0);
        assert!(timers.take_due(t0 + Duration::from_secs(9)).is_empty());
        assert_eq!(
            timers.take_due(t0 + Duration::from_secs(10)),
            vec![TimerKind::Advance]
        );
        assert_eq!(timers.next_deadline(), Some(t0 + Duration::from_secs(20)));
    }

    #[test]
    fn late_timer_fires_once() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        timers.start(TimerKind::Advance, Duration::from_millis(100), t0);
        let late = t0 + Duration::from_millis(550);
        assert_eq!(timers.take_due(late).len(), 1);
        assert_eq!(
            timers.next_deadline(),
            Some(late + Duration::from_millis(100))
        );
    }

    #[test]
    fn due_timers_come_back_in_deadline_order() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        timers.start(TimerKind::Advance, Duration::from_millis(30), t0);
        timers.start(TimerKind::Animation(SurfaceId(2)), Duration::from_millis(10), t0);
        timers.start(TimerKind::Animation(SurfaceId(1)), Duration::from_millis(20), t0);
        assert_eq!(
            timers.take_due(t0 + Duration::from_millis(30)),
            vec![
                TimerKind::Animation(SurfaceId(2)),
                TimerKind::Animation(SurfaceId(1)),
                TimerKind::Advance,
            ]
        );
    }

    #[test]
    fn stop_and_clear() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        let anim = TimerKind::Animation(SurfaceId(0));
        timers.start(anim, Duration::from_millis(33), t0);
        timers.start(TimerKind::Advance, Duration::from_secs(1), t0);
        assert!(timers.stop(anim));
        assert!(!timers.stop(anim));
        assert!(!timers.is_active(anim));
        timers.clear();
        assert!(timers.is_empty());
        assert_eq!(timers.next_deadline(), None);
    }
}
