use std::sync::{Condvar, Mutex};

/// Single-slot rendezvous between one producer and one consumer.
///
/// The slot is always in exactly one state. The producer may publish only
/// into `Empty`; the consumer takes from `Ready` and the slot stays occupied
/// (`Taken`) until `release`, so the producer cannot start the next cycle
/// while the consumer is still inside the current one. `close` wakes both
/// sides and makes every subsequent operation a no-op.
enum SlotState<T> {
    Empty,
    Ready(T),
    Taken,
    Closed,
}

pub struct HandoffSlot<T> {
    state: Mutex<SlotState<T>>,
    cond: Condvar,
}

impl<T> HandoffSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
            cond: Condvar::new(),
        }
    }

    /// Producer side: block until the slot is empty. Returns `false` once
    /// the slot is closed.
    pub fn wait_empty(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        loop {
            match *state {
                SlotState::Empty => return true,
                SlotState::Closed => return false,
                _ => state = self.cond.wait(state).unwrap(),
            }
        }
    }

    /// Producer side: publish into the empty slot. Blocks if the previous
    /// value has not been released yet. Returns `false` once closed; the
    /// value is dropped in that case.
    pub fn publish(&self, value: T) -> bool {
        let mut state = self.state.lock().unwrap();
        loop {
            match *state {
                SlotState::Empty => {
                    *state = SlotState::Ready(value);
                    self.cond.notify_all();
                    return true;
                }
                SlotState::Closed => return false,
                _ => state = self.cond.wait(state).unwrap(),
            }
        }
    }

    /// True iff a value is ready to take.
    pub fn ready(&self) -> bool {
        matches!(*self.state.lock().unwrap(), SlotState::Ready(_))
    }

    /// Consumer side: block until a value is ready. Returns `false` once
    /// the slot is closed.
    pub fn wait_ready(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        loop {
            match *state {
                SlotState::Ready(_) => return true,
                SlotState::Closed => return false,
                _ => state = self.cond.wait(state).unwrap(),
            }
        }
    }

    /// Consumer side: move the value out. The slot stays occupied until
    /// `release`. Returns `None` unless the slot is ready.
    pub fn take(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Ready(value) => Some(value),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Consumer side: hand the slot back to the producer.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, SlotState::Taken | SlotState::Ready(_)) {
            *state = SlotState::Empty;
            self.cond.notify_all();
        }
    }

    /// Tear the slot down, waking both sides. A value still pending is
    /// dropped.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        *state = SlotState::Closed;
        self.cond.notify_all();
    }
}

impl<T> Default for HandoffSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn publish_take_release_cycle() {
        let slot = HandoffSlot::new();
        assert!(!slot.ready());
        assert!(slot.publish(7u32));
        assert!(slot.ready());
        assert_eq!(slot.take(), Some(7));
        // Occupied until release: take again yields nothing, publish would block.
        assert!(!slot.ready());
        assert_eq!(slot.take(), None);
        slot.release();
        assert!(slot.publish(8));
        assert_eq!(slot.take(), Some(8));
    }

    #[test]
    fn producer_blocks_until_release() {
        let slot = Arc::new(HandoffSlot::new());
        assert!(slot.publish(0u32));

        let producer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.publish(1))
        };

        // The second publish must not land while frame 0 sits in the slot.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(slot.take(), Some(0));
        thread::sleep(Duration::from_millis(20));
        assert!(!slot.ready());

        slot.release();
        assert!(producer.join().unwrap());
        assert!(slot.wait_ready());
        assert_eq!(slot.take(), Some(1));
    }

    #[test]
    fn close_unblocks_waiters() {
        let slot: Arc<HandoffSlot<u32>> = Arc::new(HandoffSlot::new());
        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.wait_ready())
        };
        thread::sleep(Duration::from_millis(20));
        slot.close();
        assert!(!waiter.join().unwrap());
        assert!(!slot.publish(3));
    }
}
