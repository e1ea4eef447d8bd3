use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::Mutex;

use crate::device::OutputPort;
use crate::errors::{DeviceError, DeviceResult};
use crate::utils::{lock, wait_any, Outcome, Signal, UniqueId, Wait};

/// Fixed-capacity buffer that cycles between a [`SlotPool`] and a device driver.
///
/// A slot can't be cloned or constructed outside the pool. Whoever holds a slot owns its buffer:
/// the pool while it is free, the producer while it is filled, and the driver once submitted.
pub struct Slot {
    idx: usize,
    pool: UniqueId,
    data: Box<[u8]>,
    len: usize,
}

impl Slot {
    /// Slot index within its pool.
    pub fn index(&self) -> usize {
        self.idx
    }

    /// Bytes to transmit.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Slot capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    fn fill(&mut self, chunk: &[u8]) {
        let len = chunk.len().min(self.data.len());
        self.data[..len].copy_from_slice(&chunk[..len]);
        self.len = len;
    }
}

impl Debug for Slot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("idx", &self.idx)
            .field("pool", &self.pool)
            .field("len", &self.len)
            .finish()
    }
}

/// Pool of transmit buffers.
///
/// Slots are either free or in flight. The free list is guarded by a mutex, which is shared by
/// producers acquiring slots and the driver's completion handler recycling them. The number of
/// slots in flight never exceeds the pool capacity: a producer which finds no free slot blocks until
/// one is recycled or its stop signal is set.
pub struct SlotPool {
    id: UniqueId,
    capacity: usize,
    slot_size: usize,
    state: Mutex<PoolState>,
    available: Signal,
}

struct PoolState {
    free: VecDeque<Slot>,
    in_flight: Vec<bool>,
    open: bool,
}

impl SlotPool {
    /// Allocates `capacity` free slots of `slot_size` bytes each.
    pub fn new(capacity: usize, slot_size: usize) -> Self {
        let id = UniqueId::new();
        let free = (0..capacity)
            .map(|idx| Slot {
                idx,
                pool: id,
                data: vec![0u8; slot_size].into_boxed_slice(),
                len: 0,
            })
            .collect();

        let available = Signal::new();
        if capacity > 0 {
            available.set();
        }

        Self {
            id,
            capacity,
            slot_size,
            state: Mutex::new(PoolState {
                free,
                in_flight: vec![false; capacity],
                open: true,
            }),
            available,
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Capacity of a single slot.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of slots currently out of the pool.
    pub fn in_flight(&self) -> usize {
        lock(&self.state)
            .in_flight
            .iter()
            .filter(|in_flight| **in_flight)
            .count()
    }

    /// Returns `true` if pool was not closed.
    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Takes a free slot filled with `chunk`.
    ///
    /// Blocks while there are no free slots. Returns [`Outcome::Cancelled`] if `stop` is set
    /// before a slot becomes available.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NotOpen`] if pool is closed.
    pub fn acquire(&self, chunk: &[u8], stop: &Signal) -> DeviceResult<Outcome<Slot>> {
        loop {
            {
                let mut state = lock(&self.state);
                if !state.open {
                    return Err(DeviceError::NotOpen);
                }
                match state.free.pop_front() {
                    Some(mut slot) => {
                        state.in_flight[slot.idx] = true;
                        if state.free.is_empty() {
                            self.available.reset();
                        }
                        slot.fill(chunk);
                        return Ok(Outcome::Done(slot));
                    }
                    None => self.available.reset(),
                }
            }

            if let Wait::Cancelled = wait_any(&self.available, stop) {
                return Ok(Outcome::Cancelled);
            }
        }
    }

    /// Returns slot to the pool.
    ///
    /// Slots that do not belong to this pool or are not in flight are rejected and `false` is
    /// returned.
    pub fn recycle(&self, slot: Slot) -> bool {
        let mut state = lock(&self.state);

        if slot.pool != self.id {
            log::warn!(
                "[{:?}] rejected slot #{} owned by {:?}",
                self.id,
                slot.idx,
                slot.pool
            );
            return false;
        }
        if !state.in_flight.get(slot.idx).copied().unwrap_or(false) {
            log::warn!("[{:?}] slot #{} is already free", self.id, slot.idx);
            return false;
        }

        state.in_flight[slot.idx] = false;
        state.free.push_back(slot);
        self.available.set();
        true
    }

    /// Prepares all free slots with a driver.
    ///
    /// Either all slots are prepared or none: if preparation fails, previously prepared slots are
    /// unprepared and the error is returned.
    pub(crate) fn prepare(&self, port: &mut dyn OutputPort) -> DeviceResult<()> {
        let state = lock(&self.state);

        for (i, slot) in state.free.iter().enumerate() {
            if let Err(err) = port.prepare(slot) {
                for prepared in state.free.iter().take(i) {
                    port.unprepare(prepared);
                }
                return Err(err);
            }
        }

        Ok(())
    }

    /// Closes the pool and unprepares all free slots.
    ///
    /// Wakes up blocked producers. Returns the number of slots which were still in flight.
    pub(crate) fn close(&self, port: &mut dyn OutputPort) -> usize {
        let mut state = lock(&self.state);
        state.open = false;

        for slot in state.free.drain(..) {
            port.unprepare(&slot);
        }
        self.available.set();

        state.in_flight.iter().filter(|in_flight| **in_flight).count()
    }
}

impl Debug for SlotPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPool")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("slot_size", &self.slot_size)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
