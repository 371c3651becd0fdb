use std::ops::{Deref, DerefMut};

#[cfg(feature = "lock_tracking")]
mod tracking {
    use std::{
        fmt,
        time::{Duration, Instant},
    };

    use tracing::warn;

    use super::*;

    const SLOW: Duration = Duration::from_millis(1);

    struct Inner<T> {
        /// Purpose of the most recent holder, and how long it held the lock
        last_owner: Option<(&'static str, Duration)>,
        value: T,
    }

    /// Mutex that warns when acquiring or holding it takes 1ms or longer
    pub(crate) struct Mutex<T> {
        inner: std::sync::Mutex<Inner<T>>,
    }

    impl<T> Mutex<T> {
        pub(crate) fn new(value: T) -> Self {
            Self {
                inner: std::sync::Mutex::new(Inner {
                    last_owner: None,
                    value,
                }),
            }
        }

        /// Acquire the lock, naming why for diagnostics
        pub(crate) fn lock(&self, purpose: &'static str) -> MutexGuard<'_, T> {
            let start = Instant::now();
            let guard = self.inner.lock().unwrap();
            let acquired = Instant::now();
            let waited = acquired - start;
            if waited >= SLOW {
                warn!(
                    "waited {:?} to lock for {}; last owner {:?}",
                    waited, purpose, guard.last_owner
                );
            }
            MutexGuard {
                guard,
                acquired,
                purpose,
            }
        }
    }

    impl<T> fmt::Debug for Mutex<T> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Mutex").finish_non_exhaustive()
        }
    }

    pub(crate) struct MutexGuard<'a, T> {
        guard: std::sync::MutexGuard<'a, Inner<T>>,
        acquired: Instant,
        purpose: &'static str,
    }

    impl<T> Drop for MutexGuard<'_, T> {
        fn drop(&mut self) {
            let held = self.acquired.elapsed();
            if held >= SLOW {
                warn!("held lock for {} for {:?}", self.purpose, held);
            }
            self.guard.last_owner = Some((self.purpose, held));
        }
    }

    impl<T> Deref for MutexGuard<'_, T> {
        type Target = T;

        fn deref(&self) -> &T {
            &self.guard.value
        }
    }

    impl<T> DerefMut for MutexGuard<'_, T> {
        fn deref_mut(&mut self) -> &mut T {
            &mut self.guard.value
        }
    }
}

#[cfg(feature = "lock_tracking")]
pub(crate) use tracking::Mutex;

#[cfg(not(feature = "lock_tracking"))]
mod plain {
    use super::*;

    #[derive(Debug)]
    pub(crate) struct Mutex<T> {
        inner: std::sync::Mutex<T>,
    }

    impl<T> Mutex<T> {
        pub(crate) fn new(value: T) -> Self {
            Self {
                inner: std::sync::Mutex::new(value),
            }
        }

        /// Acquire the lock; `purpose` is only recorded with the `lock_tracking` feature
        pub(crate) fn lock(&self, _purpose: &'static str) -> MutexGuard<'_, T> {
            MutexGuard(self.inner.lock().unwrap())
        }
    }

    pub(crate) struct MutexGuard<'a, T>(std::sync::MutexGuard<'a, T>);

    impl<T> Deref for MutexGuard<'_, T> {
        type Target = T;

        fn deref(&self) -> &T {
            &self.0
        }
    }

    impl<T> DerefMut for MutexGuard<'_, T> {
        fn deref_mut(&mut self) -> &mut T {
            &mut self.0
        }
    }
}

#[cfg(not(feature = "lock_tracking"))]
pub(crate) use plain::Mutex;
