use super::{EffortError, EffortSnapshot, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Callback invoked with a read-only view of the step that just closed
pub type ProgressCallback = Arc<dyn Fn(&EffortSnapshot) + Send + Sync>;

/// Stable handle for one listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

struct Registration {
    callback: ProgressCallback,
    frequency: u64,
    steps_since_fired: u64,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("frequency", &self.frequency)
            .field("steps_since_fired", &self.steps_since_fired)
            .finish_non_exhaustive()
    }
}

/// Set of progress listeners, each firing every `frequency` steps
///
/// Registration is idempotent by callback identity: registering the same
/// `Arc` again updates its frequency and restarts its count instead of adding
/// a second entry. Invocation order among listeners due on the same step is
/// unspecified.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    registrations: BTreeMap<ListenerHandle, Registration>,
    next_handle: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to fire every `frequency` steps
    ///
    /// Returns the existing handle if this exact callback is already
    /// registered.
    pub fn register(&mut self, callback: ProgressCallback, frequency: u64) -> Result<ListenerHandle> {
        if frequency == 0 {
            return Err(EffortError::InvalidFrequency);
        }

        if let Some(handle) = self.find(&callback) {
            self.set_frequency(handle, frequency)?;
            return Ok(handle);
        }

        let handle = ListenerHandle(self.next_handle);
        self.next_handle += 1;
        self.registrations.insert(
            handle,
            Registration {
                callback,
                frequency,
                steps_since_fired: 0,
            },
        );
        tracing::debug!(?handle, frequency, "registered progress listener");
        Ok(handle)
    }

    /// Change a listener's frequency and restart its step count
    pub fn set_frequency(&mut self, handle: ListenerHandle, frequency: u64) -> Result<()> {
        if frequency == 0 {
            return Err(EffortError::InvalidFrequency);
        }
        let reg = self
            .registrations
            .get_mut(&handle)
            .ok_or(EffortError::UnknownListener)?;
        reg.frequency = frequency;
        reg.steps_since_fired = 0;
        Ok(())
    }

    /// Remove a listener; returns false if the handle was not registered
    pub fn unregister(&mut self, handle: ListenerHandle) -> bool {
        self.registrations.remove(&handle).is_some()
    }

    /// Remove the registration of `callback`, found by pointer identity
    pub fn unregister_callback(&mut self, callback: &ProgressCallback) -> bool {
        match self.find(callback) {
            Some(handle) => self.unregister(handle),
            None => false,
        }
    }

    /// Handle of an already-registered callback, by pointer identity
    pub fn find(&self, callback: &ProgressCallback) -> Option<ListenerHandle> {
        self.registrations
            .iter()
            .find(|(_, reg)| Arc::ptr_eq(&reg.callback, callback))
            .map(|(handle, _)| *handle)
    }

    pub fn frequency(&self, handle: ListenerHandle) -> Option<u64> {
        self.registrations.get(&handle).map(|r| r.frequency)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Advance every listener's count and fire the ones that are due
    ///
    /// Returns the number of listeners invoked.
    pub fn notify(&mut self, snapshot: &EffortSnapshot) -> usize {
        let mut fired = 0;
        for reg in self.registrations.values_mut() {
            reg.steps_since_fired += 1;
            if reg.steps_since_fired >= reg.frequency {
                reg.steps_since_fired = 0;
                (reg.callback)(snapshot);
                fired += 1;
            }
        }
        fired
    }
}
