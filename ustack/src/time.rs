/*! Time structures and the tick driver.

The `time` module contains structures used to represent both absolute and
relative time, plus the fixed-tick wheel that paces the protocol state
machines.

 - [Instant] is used to represent absolute time.
 - [Duration] is used to represent relative time.
 - [TimerWheel] turns the single base tick into per-protocol tick events.

[Instant]: struct.Instant.html
[Duration]: struct.Duration.html
[TimerWheel]: struct.TimerWheel.html
*/
use core::{cmp, fmt, ops};
pub use core::time::Duration;

use alloc::vec::Vec;

/// The base period of the timer wheel, in milliseconds.
///
/// Every registered timer period is an integer multiple of this. IGMP runs
/// at one base tick (100 ms), a DHCPv6 client would register five.
pub const TICK_MILLIS: u64 = 100;

/// A representation of an absolute time value.
///
/// The `Instant` type is a wrapper around a `i64` value that
/// represents a number of milliseconds, monotonically increasing
/// since an arbitrary moment in time, such as system startup.
///
/// * A value of `0` is inherently arbitrary.
/// * A value less than `0` indicates a time before the starting
///   point.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    pub millis: i64,
}

/// An expiration time, inversion of `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    When(Instant),
    Never,
}

use Expiration::{When, Never};

impl Instant {
    /// Create a new `Instant` from a number of milliseconds.
    pub fn from_millis<T: Into<i64>>(millis: T) -> Instant {
        Instant { millis: millis.into() }
    }

    /// Create a new `Instant` from a number of seconds.
    pub fn from_secs<T: Into<i64>>(secs: T) -> Instant {
        Instant { millis: secs.into() * 1000 }
    }

    /// Create a new `Instant` from the current [std::time::SystemTime].
    ///
    /// [std::time::SystemTime]: https://doc.rust-lang.org/std/time/struct.SystemTime.html
    #[cfg(feature = "std")]
    pub fn now() -> Instant {
        Self::from(::std::time::SystemTime::now())
    }

    /// The fractional number of milliseconds that have passed
    /// since the beginning of time.
    pub fn millis(&self) -> i64 {
        self.millis % 1000
    }

    /// The number of whole seconds that have passed since the
    /// beginning of time.
    pub fn secs(&self) -> i64 {
        self.millis / 1000
    }

    /// The total number of milliseconds that have passed since
    /// the beginning of time.
    pub fn total_millis(&self) -> i64 {
        self.millis
    }
}

#[cfg(feature = "std")]
impl From<::std::time::SystemTime> for Instant {
    fn from(other: ::std::time::SystemTime) -> Instant {
        let n = other.duration_since(::std::time::UNIX_EPOCH)
            .expect("start time must not be before the unix epoch");
        Self::from_millis(n.as_secs() as i64 * 1000 + (n.subsec_nanos() / 1000000) as i64)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}s", self.secs(), self.millis())
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant::from_millis(self.millis + rhs.as_millis() as i64)
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.millis += rhs.as_millis() as i64;
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant::from_millis(self.millis - rhs.as_millis() as i64)
    }
}

impl ops::SubAssign<Duration> for Instant {
    fn sub_assign(&mut self, rhs: Duration) {
        self.millis -= rhs.as_millis() as i64;
    }
}

impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        Duration::from_millis((self.millis - rhs.millis).abs() as u64)
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Expiration::Never
    }
}

impl From<Option<Instant>> for Expiration {
    fn from(opt: Option<Instant>) -> Self {
        match opt {
            Some(instant) => When(instant),
            None => Never,
        }
    }
}

impl From<Expiration> for Option<Instant> {
    fn from(opt: Expiration) -> Self {
        match opt {
            When(instant) => Some(instant),
            Never => None,
        }
    }
}

impl cmp::PartialOrd<Self> for Expiration {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl cmp::Ord for Expiration {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        match (*self, *other) {
            (Never, Never) => cmp::Ordering::Equal,
            (Never, When(_)) => cmp::Ordering::Greater,
            (When(_), Never) => cmp::Ordering::Less,
            (When(ref a), When(ref b)) => a.cmp(b),
        }
    }
}

/// A token naming one registered periodic timer.
///
/// Returned from [`TimerWheel::register`] and reported again every time the
/// timer's period elapses. The caller maps tokens back to its handlers; this
/// keeps the wheel free of closures and lets the due handlers borrow the
/// whole stack mutably.
///
/// [`TimerWheel::register`]: struct.TimerWheel.html#method.register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(usize);

#[derive(Debug)]
struct Slot {
    period: u32,
    remaining: u32,
}

/// Drives all protocol tick handlers from one fixed base tick.
///
/// Registration order is delivery order: when several timers come due on the
/// same base tick, their tokens are reported in the order they were
/// registered.
#[derive(Debug, Default)]
pub struct TimerWheel {
    slots: Vec<Slot>,
    ticks: u64,
}

impl TimerWheel {
    /// Create an empty wheel.
    pub fn new() -> Self {
        TimerWheel::default()
    }

    /// Register a periodic timer with a period in base ticks.
    ///
    /// A period of zero is rounded up to one.
    pub fn register(&mut self, period_ticks: u32) -> TimerToken {
        let period = period_ticks.max(1);
        self.slots.push(Slot { period, remaining: period });
        TimerToken(self.slots.len() - 1)
    }

    /// The number of base ticks that have elapsed so far.
    pub fn now_ticks(&self) -> u64 {
        self.ticks
    }

    /// Advance the wheel by one base tick.
    ///
    /// Appends the tokens of all timers that came due to `due`, in
    /// registration order.
    pub fn advance(&mut self, due: &mut Vec<TimerToken>) {
        self.ticks += 1;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            slot.remaining -= 1;
            if slot.remaining == 0 {
                slot.remaining = slot.period;
                due.push(TimerToken(index));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_instant_ops() {
        // std::ops::Add
        assert_eq!(Instant::from_millis(4) + Duration::from_millis(6), Instant::from_millis(10));
        // std::ops::Sub
        assert_eq!(Instant::from_millis(7) - Duration::from_millis(5), Instant::from_millis(2));
    }

    #[test]
    fn test_instant_getters() {
        let instant = Instant::from_millis(5674);
        assert_eq!(instant.secs(), 5);
        assert_eq!(instant.millis(), 674);
        assert_eq!(instant.total_millis(), 5674);
    }

    #[test]
    fn wheel_periods_and_order() {
        let mut wheel = TimerWheel::new();
        let igmp = wheel.register(1);
        let dhcp6 = wheel.register(5);

        let mut due = Vec::new();
        for _ in 0..4 {
            wheel.advance(&mut due);
        }
        assert_eq!(due, [igmp; 4]);

        due.clear();
        wheel.advance(&mut due);
        // Both due on the fifth tick, registration order preserved.
        assert_eq!(due, [igmp, dhcp6]);
        assert_eq!(wheel.now_ticks(), 5);
    }

    #[test]
    fn wheel_zero_period() {
        let mut wheel = TimerWheel::new();
        let token = wheel.register(0);
        let mut due = Vec::new();
        wheel.advance(&mut due);
        assert_eq!(due, [token]);
    }
}
