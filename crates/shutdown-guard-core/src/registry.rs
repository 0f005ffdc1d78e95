//! Ordered, thread-safe collection of cleanup callbacks

use parking_lot::Mutex;

use crate::error::GuardError;

/// A cleanup action. Runs at most once, on the coordinator's executor thread.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Registration token returned by [`CallbackRegistry::register`].
///
/// Monotonically increasing within one registry; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

impl Handle {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Inner {
    entries: Vec<(Handle, Callback)>,
    next_id: u64,
    sealed: bool,
}

/// FIFO registry: callbacks run in registration order.
///
/// The snapshot seals the registry under the same lock that `register` takes,
/// so every registration either lands in the snapshot or is rejected.
pub struct CallbackRegistry {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CallbackRegistry")
            .field("len", &inner.entries.len())
            .field("sealed", &inner.sealed)
            .finish_non_exhaustive()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                next_id: 1,
                sealed: false,
            }),
        }
    }

    /// Append a callback. Fails once the shutdown snapshot has been taken.
    pub fn register(&self, callback: Callback) -> Result<Handle, GuardError> {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return Err(GuardError::AlreadyShuttingDown);
        }
        let handle = Handle(inner.next_id);
        inner.next_id += 1;
        inner.entries.push((handle, callback));
        log::trace!("registered shutdown callback {handle}");
        Ok(handle)
    }

    /// Remove a callback. Unknown or already-removed handles are a no-op.
    ///
    /// Returns whether an entry was removed.
    pub fn unregister(&self, handle: Handle) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|(h, _)| *h != handle);
        let removed = inner.entries.len() != before;
        if removed {
            log::trace!("unregistered shutdown callback {handle}");
        }
        removed
    }

    /// Drop every registered callback. No effect once sealed.
    ///
    /// Returns how many callbacks were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return 0;
        }
        let removed = inner.entries.len();
        inner.entries.clear();
        log::debug!("cleared {removed} shutdown callbacks");
        removed
    }

    /// Seal the registry and take every callback, in execution order.
    ///
    /// Only the first call returns entries; later calls return an empty list.
    pub fn snapshot(&self) -> Vec<(Handle, Callback)> {
        let mut inner = self.inner.lock();
        inner.sealed = true;
        std::mem::take(&mut inner.entries)
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered handles in execution order
    pub fn handles(&self) -> Vec<Handle> {
        self.inner.lock().entries.iter().map(|(h, _)| *h).collect()
    }
}
