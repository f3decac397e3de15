//! Latest-wins handoff slots.
//!
//! Acquisition and streaming run at independent rates, so they meet at
//! a slot that holds at most one value: a publisher replaces whatever
//! is pending, and a consumer takes the pending value or nothing.
//! Stale frames are dropped at the source instead of queueing behind a
//! slow connection.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::command::ControlCommand;
use crate::frame::Frame;

/// Single-value handoff between one producer and one consumer.
///
/// Both sides move the whole value under one lock, so a consumer can
/// never observe a half-written entry.
#[derive(Debug, Default)]
pub struct LatestSlot<T> {
    inner: Mutex<Option<T>>,
}

/// Slot carrying encoded image frames from acquisition to streaming.
pub type ImageSlot = LatestSlot<Frame>;

/// Slot carrying control commands from streaming to acquisition.
pub type CommandSlot = LatestSlot<ControlCommand>;

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        // A poisoned slot still holds a whole value or nothing.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a value, replacing any unconsumed one.
    ///
    /// Returns `true` when a pending value was replaced unread.
    pub fn publish(&self, value: T) -> bool {
        self.lock().replace(value).is_some()
    }

    /// Take the pending value, leaving the slot empty.
    pub fn try_consume(&self) -> Option<T> {
        self.lock().take()
    }

    /// Whether a value is waiting.
    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::frame::ImageMetadata;

    #[test]
    fn empty_slot_yields_nothing() {
        let slot: LatestSlot<u32> = LatestSlot::new();
        assert!(!slot.is_pending());
        assert_eq!(slot.try_consume(), None);
    }

    #[test]
    fn publish_then_consume() {
        let slot = LatestSlot::new();
        assert!(!slot.publish(7u32));
        assert!(slot.is_pending());
        assert_eq!(slot.try_consume(), Some(7));
        assert!(!slot.is_pending());
        assert_eq!(slot.try_consume(), None);
    }

    #[test]
    fn newer_value_replaces_pending() {
        let slot = LatestSlot::new();
        assert!(!slot.publish(1u32));
        assert!(slot.publish(2));
        assert!(slot.publish(3));
        assert_eq!(slot.try_consume(), Some(3));
    }

    #[test]
    fn concurrent_publish_never_tears() {
        // A frame whose timestamp and payload carry the same sequence
        // number; any disagreement on the consumer side would mean a
        // torn hand-off.
        let slot: Arc<ImageSlot> = Arc::new(LatestSlot::new());
        let iterations: u64 = 10_000;

        let producer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                for i in 0..iterations {
                    let mut meta = ImageMetadata::default();
                    meta.timestamp_us = i;
                    meta.payload_size = 8;
                    slot.publish(Frame {
                        meta,
                        payload: i.to_le_bytes().to_vec(),
                    });
                }
            })
        };

        let consumer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                let mut last_seen = None;
                while last_seen != Some(iterations - 1) {
                    if let Some(frame) = slot.try_consume() {
                        let tagged =
                            u64::from_le_bytes(frame.payload[..8].try_into().unwrap());
                        assert_eq!(frame.meta.timestamp_us, tagged);
                        if let Some(prev) = last_seen {
                            assert!(tagged > prev, "sequence went backwards");
                        }
                        last_seen = Some(tagged);
                    }
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
    }
}
