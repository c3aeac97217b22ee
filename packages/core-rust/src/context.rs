//! A `Context` carries everything that would otherwise be a process
//! global: the wall clock and whatever random identity generation a
//! partition needs. Passed explicitly into constructors so tests can inject
//! a fake clock instead of reading the system time (Design Note, §9).

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Abstracts wall-clock time so tests can hold it fixed or advance it
/// deterministically, the way `hlc.rs`'s `ClockSource`/`SystemClock` pair
/// decouples HLC generation from `SystemTime::now()`.
pub trait ServerClock: Send + Sync {
    fn unix_seconds(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ServerClock for SystemClock {
    fn unix_seconds(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs()
    }
}

/// Generates partition/author identities. Abstracted so tests can produce
/// deterministic uuids instead of random ones.
pub trait IdentitySource: Send + Sync {
    fn new_uuid(&self) -> Uuid;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdentitySource;

impl IdentitySource for RandomIdentitySource {
    fn new_uuid(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Explicit, constructor-injected environment. No part of this crate reads
/// `SystemTime::now()` or generates a `Uuid` directly outside of this type's
/// default implementations.
pub struct Context {
    pub clock: Box<dyn ServerClock>,
    pub identity: Box<dyn IdentitySource>,
}

impl Context {
    #[must_use]
    pub fn new(clock: Box<dyn ServerClock>, identity: Box<dyn IdentitySource>) -> Self {
        Self { clock, identity }
    }

    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock.unix_seconds()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Box::new(SystemClock), Box::new(RandomIdentitySource))
    }
}

#[cfg(test)]
pub mod test_support {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::{IdentitySource, ServerClock};
    use uuid::Uuid;

    /// A clock that only advances when told to; mirrors `hlc.rs`'s
    /// `FixedClock` test double.
    #[derive(Debug, Default)]
    pub struct FixedClock(AtomicU64);

    impl FixedClock {
        #[must_use]
        pub fn new(start: u64) -> Self {
            Self(AtomicU64::new(start))
        }

        pub fn advance(&self, secs: u64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl ServerClock for FixedClock {
        fn unix_seconds(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// A deterministic identity source that hands out sequential uuids.
    #[derive(Debug, Default)]
    pub struct SequentialIdentitySource(AtomicU64);

    impl IdentitySource for SequentialIdentitySource {
        fn new_uuid(&self) -> Uuid {
            let next = self.0.fetch_add(1, Ordering::SeqCst);
            Uuid::from_u128(u128::from(next) + 1)
        }
    }
}
