//! Safe once-initialized global slots.
//!
//! Provides an alternative to `static mut` for process-wide singletons such
//! as the trap vector's installed entry point.

use spin::Mutex;

/// A global slot that can be filled exactly once.
///
/// Backed by `spin::Mutex<Option<T>>` so it can be constructed in a `const`
/// context and used before any allocator is available.
pub struct GlobalState<T> {
    inner: Mutex<Option<T>>,
}

impl<T> GlobalState<T> {
    /// Create new uninitialized global state
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Initialize the global state.
    ///
    /// Returns the value back if the slot is already occupied.
    pub fn init(&self, value: T) -> Result<(), T> {
        let mut lock = self.inner.lock();
        if lock.is_some() {
            Err(value)
        } else {
            *lock = Some(value);
            Ok(())
        }
    }

    /// Whether the slot has been filled.
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }
}

impl<T: Clone> GlobalState<T> {
    /// Clone the stored value out of the slot.
    ///
    /// Lets callers run code against the value without holding the lock.
    pub fn get_cloned(&self) -> Option<T> {
        self.inner.lock().clone()
    }
}

impl<T> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}
