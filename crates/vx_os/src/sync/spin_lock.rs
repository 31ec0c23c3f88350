#![expect(unsafe_code, reason = "SpinLock requires unsafe code.")]

use std::cell::UnsafeCell;
use std::fmt;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

// -----------------------------------------------------------------------------
// SpinLock

/// A mutual exclusion primitive for critical sections shorter than a cache
/// line write.
///
/// Acquisition is a test-and-set on an atomic flag; while the flag is held
/// the waiter spins on a relaxed load with a pause hint, so contended
/// acquisition does not bounce the cache line between cores. There is no
/// queueing and no OS blocking; for anything longer than a few stores, use
/// [`std::sync::Mutex`].
///
/// # Examples
///
/// ```
/// use std::{sync::Arc, thread};
/// use vx_os::sync::SpinLock;
///
/// let vec = Arc::new(SpinLock::new(Vec::new()));
///
/// thread::scope(|s| {
///     for _ in 0..100 {
///         s.spawn(|| vec.lock().push(1));
///     }
/// });
///
/// assert_eq!(vec.lock().len(), 100);
/// ```
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}
impl<T: ?Sized> UnwindSafe for SpinLock<T> {}
impl<T: ?Sized> RefUnwindSafe for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spin-lock in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the lock, spinning until it is available.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while self.locked.swap(true, Ordering::Acquire) {
            // Wait on a plain load so contending cores share the line in
            // read mode until it is released.
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
        SpinLockGuard { lock: self }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns [`None`] if the lock is currently held; otherwise an RAII
    /// guard that releases the lock when dropped.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.locked.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SpinLockGuard { lock: self })
        }
    }

    /// Returns `true` if the lock is currently held by someone.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Consumes this spin-lock, returning the underlying data.
    #[inline]
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.data.into_inner()
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// No locking is needed: the exclusive borrow guarantees there are no
    /// other users.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T> From<T> for SpinLock<T> {
    /// Creates a new spin-lock in an unlocked state ready for use.
    /// This is equivalent to [`SpinLock::new`].
    #[inline]
    fn from(t: T) -> Self {
        SpinLock::new(t)
    }
}

impl<T: Default> Default for SpinLock<T> {
    /// Creates a `SpinLock<T>`, with the `Default` value for T.
    #[inline]
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("SpinLock");
        match self.try_lock() {
            Some(guard) => {
                d.field("data", &&*guard);
            }
            None => {
                d.field("data", &format_args!("<locked>"));
            }
        }
        d.finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// SpinLockGuard

/// An RAII scoped lock of a [`SpinLock`].
///
/// The lock is released when this structure falls out of scope, on any exit
/// path.
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    lock: &'a SpinLock<T>,
}

// !Send
unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}
impl<T: UnwindSafe + ?Sized> UnwindSafe for SpinLockGuard<'_, T> {}
impl<T: RefUnwindSafe + ?Sized> RefUnwindSafe for SpinLockGuard<'_, T> {}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for SpinLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::thread;

    use super::SpinLock;

    #[test]
    fn smoke() {
        let m = SpinLock::new(());
        drop(m.lock());
        drop(m.lock());
    }

    #[test]
    fn lots_and_lots() {
        const J: u32 = 1000;
        const K: u32 = 3;

        let m = Arc::new(SpinLock::new(0));

        fn inc(m: &SpinLock<u32>) {
            for _ in 0..J {
                *m.lock() += 1;
            }
        }

        let (tx, rx) = channel();
        for _ in 0..K {
            let tx2 = tx.clone();
            let m2 = m.clone();
            thread::spawn(move || {
                inc(&m2);
                tx2.send(()).unwrap();
            });
            let tx2 = tx.clone();
            let m2 = m.clone();
            thread::spawn(move || {
                inc(&m2);
                tx2.send(()).unwrap();
            });
        }

        drop(tx);
        for _ in 0..2 * K {
            rx.recv().unwrap();
        }
        assert_eq!(*m.lock(), J * K * 2);
    }

    #[test]
    fn try_lock() {
        let m = SpinLock::new(());
        *m.try_lock().unwrap() = ();
    }

    #[test]
    fn try_lock_contended() {
        let m = SpinLock::new(0);
        let held = m.lock();
        assert!(m.try_lock().is_none());
        assert!(m.is_locked());
        drop(held);
        assert!(m.try_lock().is_some());
    }

    #[test]
    fn test_into_inner() {
        let m = SpinLock::new(10);
        assert_eq!(m.into_inner(), 10);
    }

    #[test]
    fn test_into_inner_drop() {
        struct Foo(Arc<AtomicUsize>);
        impl Drop for Foo {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let num_drops = Arc::new(AtomicUsize::new(0));
        let m = SpinLock::new(Foo(num_drops.clone()));
        assert_eq!(num_drops.load(Ordering::SeqCst), 0);
        {
            let _inner = m.into_inner();
            assert_eq!(num_drops.load(Ordering::SeqCst), 0);
        }
        assert_eq!(num_drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_mut() {
        let mut m = SpinLock::new(10);
        *m.get_mut() = 20;
        assert_eq!(m.into_inner(), 20);
    }

    #[test]
    fn test_lock_unsized() {
        let lock: &SpinLock<[i32]> = &SpinLock::new([1, 2, 3]);
        {
            let b = &mut *lock.lock();
            b[0] = 4;
            b[2] = 5;
        }
        let comp: &[i32] = &[4, 2, 5];
        assert_eq!(&*lock.lock(), comp);
    }

    #[test]
    fn guard_released_on_panic() {
        let lock = Arc::new(SpinLock::new(1));
        let lock2 = lock.clone();

        let _ = thread::spawn(move || {
            let _guard = lock2.lock();
            panic!("poison-free by construction");
        })
        .join();

        assert_eq!(*lock.lock(), 1);
    }
}
