//! The random source for the stack.
//!
//! Ephemeral port selection, IGMP report jitter and the challenges of the
//! authentication exchanges all draw from one cryptographically adequate
//! generator owned by the stack, so that a deterministic seed reproduces a
//! whole run in tests.
use alloc::boxed::Box;

/// The bound on generators accepted by [`Rng::new`].
///
/// [`Rng::new`]: struct.Rng.html#method.new
pub trait StackRng: rand_core::RngCore + rand_core::CryptoRng {}
impl<T: rand_core::RngCore + rand_core::CryptoRng> StackRng for T {}

/// A boxed random generator handle.
///
/// Safe to call under the core lock; it never blocks after construction.
pub struct Rng {
    inner: Box<dyn StackRng>,
}

/// From http://www.iana.org/assignments/port-numbers:
/// "The Dynamic and/or Private Ports are those from 49152 through 65535".
pub(crate) const EPHEMERAL_PORT_START: u16 = 0xc000;
pub(crate) const EPHEMERAL_PORT_END: u16 = 0xffff;

impl Rng {
    /// Wrap a caller-provided generator.
    pub fn new(rng: impl StackRng + 'static) -> Self {
        Rng { inner: Box::new(rng) }
    }

    /// A generator seeded from the operating system.
    #[cfg(feature = "std")]
    pub fn from_system() -> Self {
        use rand_core::SeedableRng;
        let mut os = rand::rngs::OsRng;
        let chacha = rand_chacha::ChaChaRng::from_rng(&mut os)
            .expect("No initial randomness for internal RNG");
        Rng::new(chacha)
    }

    /// A deterministic generator for tests.
    #[cfg(any(feature = "std", test))]
    pub fn from_seed(seed: u64) -> Self {
        use rand_core::SeedableRng;
        Rng::new(rand_chacha::ChaChaRng::seed_from_u64(seed))
    }

    /// Fill `buf` with random bytes.
    pub fn fill(&mut self, buf: &mut [u8]) {
        self.inner.fill_bytes(buf)
    }

    pub fn next_u16(&mut self) -> u16 {
        self.inner.next_u32() as u16
    }

    pub fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    /// A random port in the dynamic/private range, used to seed the
    /// ephemeral port scan.
    pub(crate) fn ephemeral_port(&mut self) -> u16 {
        EPHEMERAL_PORT_START | (self.next_u16() & !EPHEMERAL_PORT_START)
    }

    /// A delay uniformly distributed over `[1, max_ticks]`.
    ///
    /// `max_ticks` of zero or one yields one tick, matching the smallest
    /// delay a tick-driven timer can express.
    pub(crate) fn delay_ticks(&mut self, max_ticks: u16) -> u16 {
        if max_ticks <= 1 {
            return 1;
        }
        1 + (self.next_u16() % max_ticks)
    }
}

impl core::fmt::Debug for Rng {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str("Rng { .. }")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ephemeral_port_in_range() {
        let mut rng = Rng::from_seed(0x7361_6d70_6c65);
        for _ in 0..1000 {
            let port = rng.ephemeral_port();
            assert!(port >= EPHEMERAL_PORT_START);
        }
    }

    #[test]
    fn delay_bounds() {
        let mut rng = Rng::from_seed(42);
        for _ in 0..1000 {
            let delay = rng.delay_ticks(100);
            assert!(delay >= 1 && delay <= 100);
        }
        assert_eq!(rng.delay_ticks(0), 1);
        assert_eq!(rng.delay_ticks(1), 1);
    }
}
