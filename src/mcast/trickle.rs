//! The Trickle interval state machine of [RFC 6206], in the two-event
//! shape the multicast draft needs: a *transmit point* fires at a random
//! point in `[I/2, I)`, then the *interval end* doubles `I` and re-arms.
//!
//! Two timers run in parallel, one per parametrization; each buffered
//! packet and sliding window is bound to exactly one of them. The timers
//! are poll-driven: the engine asks [`TrickleTimer::due`] whenever the
//! host calls back, and re-arming displaces the pending event, so a reset
//! cancels whatever was outstanding.
//!
//! [RFC 6206]: https://datatracker.ietf.org/doc/html/rfc6206

use crate::rand::Rand;
use crate::time::{Duration, Instant};

/// Redundancy constant that disables suppression entirely.
pub const INFINITE_REDUNDANCY: u8 = 0xff;

/// One Trickle parametrization.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrickleParams {
    /// Minimum interval.
    pub i_min: Duration,
    /// Maximum number of interval doublings.
    pub i_max: u8,
    /// Redundancy constant. [`INFINITE_REDUNDANCY`] disables suppression.
    pub k: u8,
    /// Active lifetime budget, in units of `I_max`.
    pub t_active: u8,
    /// Dwell lifetime budget, in units of `I_max`. Must not be smaller
    /// than `t_active`.
    pub t_dwell: u8,
}

impl TrickleParams {
    /// The aggressive parametrization (M = 0): short intervals, no
    /// suppression.
    pub const AGGRESSIVE: TrickleParams = TrickleParams {
        i_min: Duration::from_millis(250),
        i_max: 1,
        k: INFINITE_REDUNDANCY,
        t_active: 3,
        t_dwell: 11,
    };

    /// The conservative parametrization (M = 1): long intervals,
    /// suppression with K = 1.
    pub const CONSERVATIVE: TrickleParams = TrickleParams {
        i_min: Duration::from_millis(500),
        i_max: 9,
        k: 1,
        t_active: 3,
        t_dwell: 12,
    };
}

/// The deferred callback a timer is armed for.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum TimerEvent {
    /// The random point in `[I/2, I)`: process lifetimes, re-transmit,
    /// advertise.
    TransmitPoint,
    /// The end of the current interval: double and re-arm.
    IntervalEnd,
}

#[derive(Debug)]
pub(crate) struct TrickleTimer {
    params: TrickleParams,
    /// Current number of doublings from `i_min`.
    pub i_current: u8,
    /// Start of the current interval.
    pub t_start: Instant,
    /// End of the current interval.
    pub t_end: Instant,
    /// When the last transmit-point pass ran.
    pub t_last_trigger: Instant,
    /// Consistency counter.
    pub c: u8,
    pub inconsistency: bool,
    event: TimerEvent,
    fire_at: Instant,
}

impl TrickleTimer {
    pub fn new(params: TrickleParams, now: Instant, rand: &mut Rand) -> TrickleTimer {
        let mut timer = TrickleTimer {
            params,
            i_current: 0,
            t_start: now,
            t_end: now,
            t_last_trigger: now,
            c: 0,
            inconsistency: false,
            event: TimerEvent::TransmitPoint,
            fire_at: now,
        };
        timer.reset(now, rand);
        timer
    }

    pub const fn params(&self) -> &TrickleParams {
        &self.params
    }

    /// The interval length after `d` doublings.
    fn interval(&self, d: u8) -> Duration {
        self.params.i_min << d as u32
    }

    /// A random point in `[I/2, I)` of the current interval.
    fn random_point(&self, rand: &mut Rand) -> Duration {
        let min = (self.params.i_min / 2) << self.i_current as u32;
        let span = (self.interval(self.i_current).total_millis() - 1)
            .saturating_sub(min.total_millis())
            .max(1);
        min + Duration::from_millis(rand.rand_u32() as u64 % span)
    }

    /// Start a fresh minimum interval, displacing any pending event.
    /// The consistency counter restarts; the inconsistency flag is left
    /// for the next transmit-point pass to consume.
    pub fn reset(&mut self, now: Instant, rand: &mut Rand) {
        self.t_start = now;
        self.t_end = now + self.params.i_min;
        self.i_current = 0;
        self.c = 0;
        let t_next = self.random_point(rand);
        self.event = TimerEvent::TransmitPoint;
        self.fire_at = now + t_next;

        net_trace!(
            "trickle: reset at {}, end {}, transmit in {}",
            now,
            self.t_end,
            t_next
        );
    }

    /// Called at the end of the current interval: double it and arm the
    /// next transmit point. A late callback is compensated by shortening
    /// the next delay, down to firing immediately.
    pub fn double_interval(&mut self, now: Instant, rand: &mut Rand) {
        let offset = if now >= self.t_end {
            now - self.t_end
        } else {
            Duration::ZERO
        };

        if self.i_current < self.params.i_max {
            self.i_current += 1;
        }

        self.t_start = self.t_end;
        self.t_end = self.t_start + self.interval(self.i_current);

        let next = self.random_point(rand);
        let next = if next > offset {
            next - offset
        } else {
            Duration::ZERO
        };
        self.event = TimerEvent::TransmitPoint;
        self.fire_at = now + next;

        net_trace!(
            "trickle: doubling at {} (offset {}), start {}, end {}, transmit in {}",
            now,
            offset,
            self.t_start,
            self.t_end,
            next
        );
    }

    /// Arm the interval-end callback, once the transmit-point pass is
    /// done. If the interval end already passed, fire as soon as the host
    /// polls again.
    pub fn schedule_interval_end(&mut self, now: Instant) {
        self.event = TimerEvent::IntervalEnd;
        self.fire_at = if now >= self.t_end { now } else { self.t_end };
    }

    /// The event to dispatch at `now`, if its time has come.
    pub fn due(&self, now: Instant) -> Option<TimerEvent> {
        (now >= self.fire_at).then_some(self.event)
    }

    /// When the pending event wants to run.
    pub const fn poll_at(&self) -> Instant {
        self.fire_at
    }

    pub fn suppression_enabled(&self) -> bool {
        self.params.k != INFINITE_REDUNDANCY
    }

    /// `I_max` expressed as a time span.
    pub fn i_max_interval(&self) -> Duration {
        self.interval(self.params.i_max)
    }

    /// How long a packet on this timer may still be re-transmitted.
    pub fn active_budget(&self) -> Duration {
        self.i_max_interval() * self.params.t_active as u32
    }

    /// How long a packet on this timer stays cached for advertisement.
    pub fn dwell_budget(&self) -> Duration {
        self.i_max_interval() * self.params.t_dwell as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: TrickleParams = TrickleParams {
        i_min: Duration::from_millis(100),
        i_max: 4,
        k: 2,
        t_active: 3,
        t_dwell: 5,
    };

    #[test]
    fn reset_arms_transmit_point_in_half_open_interval() {
        for seed in 0..64u64 {
            let mut rand = Rand::new(seed);
            let now = Instant::from_millis(1000);
            let timer = TrickleTimer::new(PARAMS, now, &mut rand);

            assert_eq!(timer.i_current, 0);
            assert_eq!(timer.c, 0);
            assert_eq!(timer.t_start, now);
            assert_eq!(timer.t_end, now + PARAMS.i_min);
            assert_eq!(timer.due(now), None);

            let delay = timer.poll_at() - now;
            assert!(delay >= PARAMS.i_min / 2);
            assert!(delay < PARAMS.i_min);
        }
    }

    #[test]
    fn interval_end_doubles_and_rearms() {
        let mut rand = Rand::new(0);
        let now = Instant::from_millis(0);
        let mut timer = TrickleTimer::new(PARAMS, now, &mut rand);

        timer.schedule_interval_end(now);
        assert_eq!(timer.poll_at(), timer.t_end);

        let end = timer.t_end;
        timer.double_interval(end, &mut rand);
        assert_eq!(timer.i_current, 1);
        assert_eq!(timer.t_start, end);
        assert_eq!(timer.t_end, end + (PARAMS.i_min << 1));
        assert_eq!(timer.due(end), None);

        // Transmit point within [I/2, I) of the doubled interval.
        let delay = timer.poll_at() - end;
        assert!(delay >= (PARAMS.i_min / 2) << 1);
        assert!(delay < PARAMS.i_min << 1);
    }

    #[test]
    fn doublings_cap_at_i_max() {
        let mut rand = Rand::new(0);
        let mut now = Instant::from_millis(0);
        let mut timer = TrickleTimer::new(PARAMS, now, &mut rand);

        for _ in 0..10 {
            now = timer.t_end;
            timer.double_interval(now, &mut rand);
        }
        assert_eq!(timer.i_current, PARAMS.i_max);
        assert_eq!(timer.t_end - timer.t_start, PARAMS.i_min << PARAMS.i_max as u32);
    }

    #[test]
    fn late_interval_end_is_compensated() {
        let mut rand = Rand::new(0);
        let now = Instant::from_millis(0);
        let mut timer = TrickleTimer::new(PARAMS, now, &mut rand);

        // Fire the interval end a full interval late; the accumulated
        // overshoot swallows the random delay and the transmit point runs
        // immediately.
        let late = timer.t_end + (PARAMS.i_min << 2);
        timer.double_interval(late, &mut rand);
        assert_eq!(timer.fire_at, late);
        assert_eq!(timer.due(late), Some(TimerEvent::TransmitPoint));
    }

    #[test]
    fn reset_displaces_pending_event() {
        let mut rand = Rand::new(0);
        let now = Instant::from_millis(0);
        let mut timer = TrickleTimer::new(PARAMS, now, &mut rand);

        timer.schedule_interval_end(now);
        assert_eq!(timer.due(timer.t_end), Some(TimerEvent::IntervalEnd));

        timer.reset(now, &mut rand);
        assert_eq!(
            timer.due(timer.poll_at()),
            Some(TimerEvent::TransmitPoint)
        );
    }

    #[test]
    fn lifetime_budgets() {
        let mut rand = Rand::new(0);
        let timer = TrickleTimer::new(PARAMS, Instant::from_millis(0), &mut rand);

        // I_max = 100 << 4 = 1600 ms.
        assert_eq!(timer.i_max_interval(), Duration::from_millis(1600));
        assert_eq!(timer.active_budget(), Duration::from_millis(4800));
        assert_eq!(timer.dwell_budget(), Duration::from_millis(8000));
    }

    #[test]
    fn suppression_sentinel() {
        let mut rand = Rand::new(0);
        let timer = TrickleTimer::new(PARAMS, Instant::ZERO, &mut rand);
        assert!(timer.suppression_enabled());

        let timer = TrickleTimer::new(
            TrickleParams::AGGRESSIVE,
            Instant::ZERO,
            &mut rand,
        );
        assert!(!timer.suppression_enabled());
    }
}
