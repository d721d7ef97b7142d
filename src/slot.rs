//! Correlation slot pool.
//!
//! A fixed table of [`SLOT_COUNT`] slots, one per in-flight caller
//! transaction. Each slot carries a generation tag that advances by
//! [`GENERATION_STEP`] every time the slot is reclaimed, so a delayed
//! response for an old occupant can never be delivered to a new occupant of
//! the same index: delivery validates the full correlation tag first and
//! silently drops mismatches.
//!
//! Lifecycle: `Closed -> Opening` on [`SlotPool::acquire`];
//! `Opening -> Open` when a request is armed; `-> Closing` when the
//! [`SlotHandle`] is dropped; `Closing -> Closed` only in
//! [`SlotPool::collect_garbage`], which runs once per worker iteration. The
//! deferred reclamation is what lets the worker finish a late mailbox write
//! after the caller has already given up.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

/// Number of correlation slots. Bounds worst-case caller fan-in, not wire
/// concurrency: the connection is strictly one transaction at a time.
pub const SLOT_COUNT: usize = 4;

/// Amount the generation tag advances per reclamation. The low byte of the
/// tag is reserved for the raw slot index.
pub const GENERATION_STEP: u32 = 0x100;

/// A slot's (index, generation) pair.
///
/// Embedded in every request so the worker can route the response back and
/// reject stale ones. The two fields stay logically separate; they are packed
/// only when formatting the outbound wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correlation {
    /// Stable slot index, `0..SLOT_COUNT`.
    pub index: u8,
    /// Generation at acquisition time. Low byte is always zero.
    pub generation: u32,
}

impl Correlation {
    /// The packed tag formatted into outbound send-message requests.
    pub fn wire_tag(self) -> u32 {
        self.generation | u32::from(self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Closed,
    Opening,
    Open,
    Closing,
}

struct Slot {
    state: SlotState,
    generation: u32,
    /// Installed by [`SlotPool::arm`], taken by [`SlotPool::deliver`],
    /// dropped by [`SlotPool::collect_garbage`]. At most one write ever
    /// happens per installed sender.
    mailbox: Option<oneshot::Sender<u8>>,
}

/// The fixed pool of correlation slots.
///
/// Shared between caller tasks (acquire/arm) and the worker (validate,
/// deliver, collect_garbage). Every critical section is a short,
/// non-blocking scan of the fixed table.
pub struct SlotPool {
    slots: Mutex<Vec<Slot>>,
}

impl SlotPool {
    /// Create a pool with all slots closed at generation zero.
    pub fn new() -> SlotPool {
        let slots = (0..SLOT_COUNT)
            .map(|_| Slot {
                state: SlotState::Closed,
                generation: 0,
                mailbox: None,
            })
            .collect();
        SlotPool {
            slots: Mutex::new(slots),
        }
    }

    /// Acquire a free slot.
    ///
    /// Returns `None` when all slots are occupied; callers surface that as
    /// "system not available" rather than retrying within the same call.
    pub fn acquire(pool: &Arc<SlotPool>) -> Option<SlotHandle> {
        let mut slots = pool.slots.lock().expect("slot pool poisoned");
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.state == SlotState::Closed {
                slot.state = SlotState::Opening;
                return Some(SlotHandle {
                    correlation: Correlation {
                        index: index as u8,
                        generation: slot.generation,
                    },
                    pool: Arc::clone(pool),
                });
            }
        }
        None
    }

    /// Install a fresh one-shot mailbox for the next request on this slot and
    /// return its receiving end.
    ///
    /// Returns `None` if the correlation is stale or the slot is no longer
    /// held. Any previously installed (unread) sender is replaced; its
    /// receiver observes a closed channel.
    pub fn arm(&self, correlation: Correlation) -> Option<oneshot::Receiver<u8>> {
        let mut slots = self.slots.lock().expect("slot pool poisoned");
        let slot = slots.get_mut(usize::from(correlation.index))?;
        if slot.generation != correlation.generation {
            return None;
        }
        if !matches!(slot.state, SlotState::Opening | SlotState::Open) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        slot.mailbox = Some(tx);
        slot.state = SlotState::Open;
        Some(rx)
    }

    /// Whether this correlation still names the live occupant of its slot.
    ///
    /// The worker checks this before spending a server transaction on a
    /// dequeued request.
    pub fn is_current(&self, correlation: Correlation) -> bool {
        let slots = self.slots.lock().expect("slot pool poisoned");
        match slots.get(usize::from(correlation.index)) {
            Some(slot) => slot.generation == correlation.generation,
            None => false,
        }
    }

    /// Deliver a response byte into the slot's mailbox.
    ///
    /// Stale correlations are dropped silently (the original caller has
    /// already timed out and moved on). Returns whether a live mailbox
    /// accepted the byte.
    pub fn deliver(&self, correlation: Correlation, byte: u8) -> bool {
        let mut slots = self.slots.lock().expect("slot pool poisoned");
        let Some(slot) = slots.get_mut(usize::from(correlation.index)) else {
            return false;
        };
        if slot.generation != correlation.generation {
            return false;
        }
        match slot.mailbox.take() {
            // A send error means the caller stopped waiting; the late write
            // is absorbed here, which is fine.
            Some(tx) => tx.send(byte).is_ok(),
            None => false,
        }
    }

    /// Mark a slot for reclamation. Non-blocking; resources are destroyed by
    /// the worker's next [`collect_garbage`](SlotPool::collect_garbage) pass,
    /// never synchronously with release.
    fn release(&self, index: u8) {
        let mut slots = self.slots.lock().expect("slot pool poisoned");
        if let Some(slot) = slots.get_mut(usize::from(index)) {
            if matches!(slot.state, SlotState::Opening | SlotState::Open) {
                slot.state = SlotState::Closing;
            }
        }
    }

    /// Reclaim every released slot: drop its mailbox, advance the
    /// generation, and close it. Worker-side only, once per iteration.
    pub fn collect_garbage(&self) {
        let mut slots = self.slots.lock().expect("slot pool poisoned");
        for slot in slots.iter_mut() {
            if slot.state == SlotState::Closing {
                slot.mailbox = None;
                slot.generation = slot.generation.wrapping_add(GENERATION_STEP);
                slot.state = SlotState::Closed;
            }
        }
    }
}

impl Default for SlotPool {
    fn default() -> Self {
        SlotPool::new()
    }
}

impl std::fmt::Debug for SlotPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPool").finish_non_exhaustive()
    }
}

/// Exclusive handle to an acquired slot.
///
/// Dropping the handle releases the slot; the worker reclaims it on its next
/// garbage-collection pass. This is the destructor hook the calling
/// environment relies on when it attaches a slot to a call.
pub struct SlotHandle {
    correlation: Correlation,
    pool: Arc<SlotPool>,
}

impl SlotHandle {
    /// The correlation tag naming this acquisition.
    pub fn correlation(&self) -> Correlation {
        self.correlation
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        self.pool.release(self.correlation.index);
    }
}

impl std::fmt::Debug for SlotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotHandle")
            .field("correlation", &self.correlation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Arc<SlotPool> {
        Arc::new(SlotPool::new())
    }

    #[test]
    fn acquire_hands_out_each_index_once() {
        let pool = pool();
        let handles: Vec<_> = (0..SLOT_COUNT).map(|_| SlotPool::acquire(&pool).unwrap()).collect();

        let mut indices: Vec<_> = handles.iter().map(|h| h.correlation().index).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), SLOT_COUNT);

        // Pool exhausted.
        assert!(SlotPool::acquire(&pool).is_none());
    }

    #[test]
    fn release_needs_gc_before_reuse() {
        let pool = pool();
        let first = SlotPool::acquire(&pool).unwrap();
        let correlation = first.correlation();
        drop(first);

        // Closing slots are not acquirable until the worker reclaims them.
        let mut held = Vec::new();
        for _ in 0..SLOT_COUNT - 1 {
            let h = SlotPool::acquire(&pool).unwrap();
            assert_ne!(h.correlation().index, correlation.index);
            held.push(h);
        }
        assert!(SlotPool::acquire(&pool).is_none());

        pool.collect_garbage();
        let again = SlotPool::acquire(&pool).unwrap();
        assert_eq!(again.correlation().index, correlation.index);
        assert_eq!(
            again.correlation().generation,
            correlation.generation + GENERATION_STEP
        );
    }

    #[test]
    fn stale_delivery_is_rejected_after_reclamation() {
        let pool = pool();
        let first = SlotPool::acquire(&pool).unwrap();
        let old = first.correlation();
        let mut old_rx = pool.arm(old).unwrap();
        drop(first);
        pool.collect_garbage();

        // Same index, new occupant.
        let second = SlotPool::acquire(&pool).unwrap();
        assert_eq!(second.correlation().index, old.index);
        let mut new_rx = pool.arm(second.correlation()).unwrap();

        // The delayed response for the old occupant goes nowhere.
        assert!(!pool.deliver(old, b'0'));
        assert!(new_rx.try_recv().is_err());
        // The old receiver observes a closed channel, not a value.
        assert!(matches!(
            old_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn mailbox_receives_at_most_one_value() {
        let pool = pool();
        let handle = SlotPool::acquire(&pool).unwrap();
        let mut rx = pool.arm(handle.correlation()).unwrap();

        assert!(pool.deliver(handle.correlation(), b'a'));
        // Second delivery finds no mailbox.
        assert!(!pool.deliver(handle.correlation(), b'b'));
        assert_eq!(rx.try_recv().unwrap(), b'a');
    }

    #[test]
    fn rearming_supports_sequential_transactions_on_one_slot() {
        let pool = pool();
        let handle = SlotPool::acquire(&pool).unwrap();
        let c = handle.correlation();

        let mut rx1 = pool.arm(c).unwrap();
        pool.deliver(c, b'0');
        assert_eq!(rx1.try_recv().unwrap(), b'0');

        let mut rx2 = pool.arm(c).unwrap();
        pool.deliver(c, b'a');
        assert_eq!(rx2.try_recv().unwrap(), b'a');
    }

    #[test]
    fn arm_fails_on_stale_or_unheld_slot() {
        let pool = pool();
        let handle = SlotPool::acquire(&pool).unwrap();
        let c = handle.correlation();
        drop(handle);

        // Released but not yet reclaimed: the slot is Closing.
        assert!(pool.arm(c).is_none());

        pool.collect_garbage();
        // Reclaimed: generation no longer matches.
        assert!(pool.arm(c).is_none());
        assert!(!pool.is_current(c));
    }

    #[test]
    fn gc_closes_the_armed_mailbox() {
        let pool = pool();
        let handle = SlotPool::acquire(&pool).unwrap();
        let mut rx = pool.arm(handle.correlation()).unwrap();
        drop(handle);
        pool.collect_garbage();

        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn wire_tag_packs_generation_and_index() {
        let c = Correlation {
            index: 2,
            generation: 0x300,
        };
        assert_eq!(c.wire_tag(), 0x302);
    }
}
