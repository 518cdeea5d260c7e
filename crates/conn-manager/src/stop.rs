//! Cooperative cancellation.
//!
//! A [`StopSignal`] holds a sticky bitmask of stop reasons. Blocking
//! operations receive a [`StopInfo`] (signal plus the reasons they honour)
//! and unwind with [`Stopped`] once any of those reasons is raised.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StopReason(u32);

impl StopReason {
    pub const NONE: StopReason = StopReason(0);
    pub const USER_DISCONNECT: StopReason = StopReason(1 << 0);
    pub const UNEXPECTED_DISCONNECT: StopReason = StopReason(1 << 1);
    pub const EXIT: StopReason = StopReason(1 << 2);
    pub const ALL: StopReason = StopReason(u32::MAX);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn intersects(self, other: StopReason) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn contains(self, other: StopReason) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for StopReason {
    type Output = StopReason;
    fn bitor(self, rhs: StopReason) -> StopReason {
        StopReason(self.0 | rhs.0)
    }
}

impl BitOrAssign for StopReason {
    fn bitor_assign(&mut self, rhs: StopReason) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("NONE");
        }
        if *self == StopReason::ALL {
            return f.write_str("ALL");
        }
        let names = [
            (StopReason::USER_DISCONNECT, "USER_DISCONNECT"),
            (StopReason::UNEXPECTED_DISCONNECT, "UNEXPECTED_DISCONNECT"),
            (StopReason::EXIT, "EXIT"),
        ];
        let mut first = true;
        for (r, name) in names {
            if self.contains(r) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        let known = StopReason::USER_DISCONNECT | StopReason::UNEXPECTED_DISCONNECT | StopReason::EXIT;
        let rest = self.0 & !known.0;
        if rest != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{rest:#x}")?;
        }
        Ok(())
    }
}

/// Cancellation observed; carries the reasons that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation stopped ({0:?})")]
pub struct Stopped(pub StopReason);

#[derive(Default)]
struct Inner {
    reasons: Mutex<u32>,
    cv: Condvar,
}

#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal").field("reasons", &self.reasons()).finish()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self, reason: StopReason) {
        let mut g = self.inner.reasons.lock();
        *g |= reason.bits();
        debug!(?reason, "stop signalled");
        self.inner.cv.notify_all();
    }

    /// Clear the given reasons. `EXIT` is never cleared.
    pub fn clear(&self, reason: StopReason) {
        let clearable = reason.bits() & !StopReason::EXIT.bits();
        *self.inner.reasons.lock() &= !clearable;
    }

    pub fn reasons(&self) -> StopReason {
        StopReason(*self.inner.reasons.lock())
    }

    pub fn check(&self, mask: StopReason) -> Result<(), Stopped> {
        let fired = *self.inner.reasons.lock() & mask.bits();
        if fired != 0 {
            Err(Stopped(StopReason(fired)))
        } else {
            Ok(())
        }
    }

    /// Sleep for `dur` unless one of `mask` is raised first.
    pub fn wait_timeout(&self, mask: StopReason, dur: Duration) -> Result<(), Stopped> {
        let deadline = Instant::now() + dur;
        let mut g = self.inner.reasons.lock();
        loop {
            let fired = *g & mask.bits();
            if fired != 0 {
                return Err(Stopped(StopReason(fired)));
            }
            if self.inner.cv.wait_until(&mut g, deadline).timed_out() {
                let fired = *g & mask.bits();
                return if fired != 0 { Err(Stopped(StopReason(fired))) } else { Ok(()) };
            }
        }
    }

    pub fn info(&self, mask: StopReason) -> StopInfo {
        StopInfo { signal: self.clone(), mask }
    }
}

/// The cancellation context handed to every blocking call.
#[derive(Clone, Debug)]
pub struct StopInfo {
    signal: StopSignal,
    mask: StopReason,
}

impl StopInfo {
    pub fn new(signal: StopSignal, mask: StopReason) -> Self {
        Self { signal, mask }
    }

    /// A context that is never cancelled.
    pub fn never() -> Self {
        Self { signal: StopSignal::new(), mask: StopReason::NONE }
    }

    pub fn mask(&self) -> StopReason {
        self.mask
    }

    pub fn signal(&self) -> &StopSignal {
        &self.signal
    }

    pub fn with_mask(&self, mask: StopReason) -> Self {
        Self { signal: self.signal.clone(), mask }
    }

    pub fn check(&self) -> Result<(), Stopped> {
        self.signal.check(self.mask)
    }

    pub fn is_stopped(&self) -> bool {
        self.check().is_err()
    }

    pub fn sleep(&self, dur: Duration) -> Result<(), Stopped> {
        self.signal.wait_timeout(self.mask, dur)
    }
}
