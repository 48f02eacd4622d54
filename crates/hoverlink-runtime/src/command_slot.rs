//! Single-slot, overwrite-on-set hand-off between an external producer and
//! the control loop.
//!
//! Pending state is the slot's `Option`, not the value's contents, so any
//! value (including all-zero ones) can be queued.

use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug)]
pub struct CommandSlot<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for CommandSlot<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for CommandSlot<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> CommandSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `value`, replacing anything not yet consumed. Returns the
    /// replaced value.
    pub fn set(&self, value: T) -> Option<T> {
        self.slot.lock().replace(value)
    }

    /// Consume the pending value, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_and_take_clears() {
        let slot = CommandSlot::new();
        assert_eq!(slot.set(1), None);
        assert_eq!(slot.set(2), Some(1));
        assert!(slot.is_pending());
        assert_eq!(slot.take(), Some(2));
        assert!(!slot.is_pending());
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn zero_values_are_still_pending() {
        let producer = CommandSlot::new();
        let consumer = producer.clone();
        producer.set(0u32);
        assert_eq!(consumer.take(), Some(0));
    }
}
