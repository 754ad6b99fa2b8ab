//! Kernel state locking mechanism.
//!
//! Every piece of mutable kernel state (ready queue, TCBs, counters, alarms,
//! schedule tables) lives inside a [`CpuLockCell`]. The only way to read or
//! write one is to hold a [`CpuLockToken`], and the only way to get a token is
//! to actually raise the CPU's interrupt mask via [`lock_cpu`]. The borrow
//! checker therefore enforces, at compile time, the rule a hand-written
//! kernel normally has to enforce by convention: no touching shared state
//! without the lock held.
use core::{fmt, ops};
use tokenlock::UnsyncTokenLock;

use crate::{port::Port, util::Init};

pub(crate) struct CpuLockTag<P>(P);

/// The key that "unlocks" [`CpuLockCell`].
pub(crate) type CpuLockToken<P> = tokenlock::UnsyncSingletonToken<CpuLockTag<P>>;

/// The keyhole type for [`UnsyncTokenLock`] that [`CpuLockToken`] unlocks.
pub(crate) type CpuLockKeyhole<P> = tokenlock::SingletonTokenId<CpuLockTag<P>>;

/// A cell that can only be read or written while holding a [`CpuLockToken`]
/// (obtained via [`lock_cpu`]).
pub(crate) struct CpuLockCell<P, T: ?Sized>(UnsyncTokenLock<T, CpuLockKeyhole<P>>);

impl<P, T> CpuLockCell<P, T> {
    pub(crate) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::INIT, x))
    }
}

impl<P, T: Copy> CpuLockCell<P, T> {
    /// Read the current value. Requires proof of CPU Lock in the form of a
    /// borrowed [`CpuLockToken`].
    pub(crate) fn get(&self, token: &CpuLockToken<P>) -> T {
        *self.0.read(token)
    }

    /// Overwrite the current value, returning the old one.
    pub(crate) fn set(&self, token: &mut CpuLockToken<P>, value: T) -> T {
        core::mem::replace(self.0.write(token), value)
    }
}

impl<P: Port, T: ?Sized> CpuLockCell<P, T> {
    /// Return a debug formatting proxy. CPU Lock is briefly acquired (and
    /// released before printing) so a nested `CpuLockCell` inside `T` can
    /// still be formatted by its own proxy.
    pub(crate) fn debug_fmt_with<'a, F: 'a + Fn(&T, &mut fmt::Formatter) -> fmt::Result>(
        &'a self,
        f: F,
    ) -> impl fmt::Debug + 'a {
        struct Proxy<'a, P, T: ?Sized, F> {
            cell: &'a CpuLockCell<P, T>,
            f: F,
        }

        impl<'a, P: Port, T: ?Sized, F: Fn(&T, &mut fmt::Formatter) -> fmt::Result> fmt::Debug
            for Proxy<'a, P, T, F>
        {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if let Ok(lock) = lock_cpu::<P>() {
                    f.write_str("CpuLockCell(")?;
                    (self.f)(self.cell.0.read(&*lock), f)?;
                    f.write_str(")")
                } else {
                    f.write_str("CpuLockCell(< locked >)")
                }
            }
        }

        Proxy { cell: self, f }
    }
}

impl<P: Port, T: fmt::Debug> fmt::Debug for CpuLockCell<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.debug_fmt_with(|x, f| x.fmt(f)).fmt(f)
    }
}

impl<P, T: Init> Init for CpuLockCell<P, T> {
    const INIT: Self = Self(Init::INIT);
}

impl<P, T> ops::Deref for CpuLockCell<P, T> {
    type Target = UnsyncTokenLock<T, CpuLockKeyhole<P>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<P, T> ops::DerefMut for CpuLockCell<P, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Error returned when a syscall that requires a particular calling context
/// (e.g. task context, or CPU Lock not already active) is called from the
/// wrong one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BadContext;

/// Attempt to enter a CPU Lock state and obtain an RAII guard.
///
/// Returns [`BadContext`] if CPU Lock is already active; OSEK kernels never
/// nest critical sections, so this is always a caller bug rather than
/// something to recover from silently.
pub(crate) fn lock_cpu<P: Port>() -> Result<CpuLockGuard<P>, BadContext> {
    if P::is_cpu_lock_active() {
        return Err(BadContext);
    }
    // Safety: we just confirmed CPU Lock wasn't active.
    unsafe { P::acquire_cpu_lock() };
    // Safety: CPU Lock is now active, and no `CpuLockGuard` existed before
    // this call (we hold the only handle to the port's interrupt mask).
    Ok(unsafe { assume_cpu_lock() })
}

/// Assume a CPU Lock state is already active and produce a [`CpuLockGuard`]
/// for it without touching the port's interrupt mask.
///
/// # Safety
///
/// CPU Lock must genuinely be active, and no other `CpuLockGuard` may exist.
pub(crate) unsafe fn assume_cpu_lock<P: Port>() -> CpuLockGuard<P> {
    debug_assert!(P::is_cpu_lock_active());
    CpuLockGuard {
        // Safety: caller guarantees uniqueness.
        token: unsafe { CpuLockToken::new_unchecked() },
    }
}

/// RAII guard for a CPU Lock state. Dropping it releases the port's
/// interrupt mask. A [`CpuLockToken`] can be borrowed from it to access any
/// [`CpuLockCell`].
pub(crate) struct CpuLockGuard<P: Port> {
    token: CpuLockToken<P>,
}

impl<P: Port> CpuLockGuard<P> {
    pub(crate) fn borrow_mut(&mut self) -> CpuLockTokenRefMut<'_, P> {
        self.token.borrow_mut()
    }
}

impl<P: Port> Drop for CpuLockGuard<P> {
    fn drop(&mut self) {
        // Safety: CPU Lock is active and we're the sole holder of it.
        unsafe { P::release_cpu_lock() };
    }
}

impl<P: Port> ops::Deref for CpuLockGuard<P> {
    type Target = CpuLockToken<P>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<P: Port> ops::DerefMut for CpuLockGuard<P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

/// Borrowed version of [`CpuLockGuard`]; equivalent to `&'a mut CpuLockGuard`
/// but doesn't require going through an extra indirection at every call site.
/// Reborrow explicitly with `.borrow_mut()` rather than relying on implicit
/// reborrowing, which doesn't kick in for this type.
pub(crate) type CpuLockTokenRefMut<'a, P> = tokenlock::UnsyncSingletonTokenRefMut<'a, CpuLockTag<P>>;
