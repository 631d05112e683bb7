//! Liveness timers for the SSTP and PPP layers (spec.md §4.10). Each timer
//! is driven entirely from the demultiplexer's task (`tick` on every
//! received frame at that layer, `check_alive` once per loop iteration), so
//! — per spec.md §5 — no cross-task synchronisation is needed here.

use std::time::{Duration, Instant};

/// 20 second liveness interval for both the SSTP and PPP echo timers
/// (spec.md §4.10).
pub const ECHO_INTERVAL: Duration = Duration::from_secs(20);

pub struct EchoTimer {
    interval: Duration,
    last_ticked: Instant,
    deadline: Instant,
    awaiting_reply: bool,
}

/// What `check_alive` tells the caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Still alive, nothing to send.
    Alive,
    /// Still alive, but an echo request should be sent now.
    SendEcho,
    /// The peer missed its echo-reply deadline.
    Dead,
}

impl EchoTimer {
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            last_ticked: now,
            deadline: now,
            awaiting_reply: false,
        }
    }

    /// Resets the "last activity" clock on any received frame at this
    /// layer (spec.md §3 invariant 5).
    pub fn tick(&mut self) {
        self.last_ticked = Instant::now();
        self.awaiting_reply = false;
    }

    /// Spec.md §4.10's `checkAlive`, evaluated once per demux loop
    /// iteration. Returns [`Liveness::SendEcho`] exactly once per echo
    /// cycle (the caller is expected to actually send the echo upon
    /// seeing it), and [`Liveness::Dead`] once the reply deadline passes
    /// without a tick.
    pub fn check_alive(&mut self, now: Instant) -> Liveness {
        if now.saturating_duration_since(self.last_ticked) <= self.interval {
            return Liveness::Alive;
        }
        if self.awaiting_reply {
            if now > self.deadline {
                return Liveness::Dead;
            }
            return Liveness::Alive;
        }
        self.awaiting_reply = true;
        self.deadline = now + self.interval;
        Liveness::SendEcho
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alive_within_interval() {
        let mut timer = EchoTimer::new(Duration::from_millis(50));
        assert_eq!(timer.check_alive(Instant::now()), Liveness::Alive);
    }

    #[test]
    fn sends_echo_once_past_interval_then_waits() {
        let mut timer = EchoTimer::new(Duration::from_millis(10));
        let past = Instant::now() + Duration::from_millis(20);
        assert_eq!(timer.check_alive(past), Liveness::SendEcho);
        // Still within the new deadline: alive, no duplicate echo.
        assert_eq!(timer.check_alive(past), Liveness::Alive);
    }

    #[test]
    fn dead_after_missed_deadline() {
        let mut timer = EchoTimer::new(Duration::from_millis(10));
        let echo_at = Instant::now() + Duration::from_millis(20);
        assert_eq!(timer.check_alive(echo_at), Liveness::SendEcho);
        let past_deadline = echo_at + Duration::from_millis(11);
        assert_eq!(timer.check_alive(past_deadline), Liveness::Dead);
    }

    #[test]
    fn tick_resets_and_clears_awaiting() {
        let mut timer = EchoTimer::new(Duration::from_millis(10));
        let echo_at = Instant::now() + Duration::from_millis(20);
        assert_eq!(timer.check_alive(echo_at), Liveness::SendEcho);
        timer.tick();
        assert_eq!(timer.check_alive(echo_at), Liveness::Alive);
    }
}
