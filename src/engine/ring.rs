//! Tick-scheduled input ring.
//!
//! A fixed-capacity array of per-tick slots, indexed by absolute tick id
//! modulo capacity. Each slot carries the tick it was stamped for; a slot
//! whose stamp mismatches the tick being touched is stale wrap-around and
//! its contents are cleared lazily on the next write. This gives O(1)
//! schedule and take with no steady-state allocation: slot storage is
//! reused across wraps.
//!
//! Inputs whose target tick has already passed land in a slot that either
//! mismatches the stamp check on take (the slot has moved on) or gets
//! overwritten by a future schedule. Either way they are silently dropped,
//! which is the intended late-arrival policy.

use crate::codec::ClientInput;

#[derive(Debug)]
struct Slot {
    /// Absolute tick this slot currently holds inputs for. `u64::MAX`
    /// marks a slot that has never been stamped.
    slot_tick: u64,
    inputs: Vec<ClientInput>,
}

#[derive(Debug)]
pub struct InputRing {
    slots: Vec<Slot>,
}

impl InputRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        let slots = (0..capacity)
            .map(|_| Slot {
                slot_tick: u64::MAX,
                inputs: Vec::new(),
            })
            .collect();
        InputRing { slots }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Append `input` to the slot for `target_tick`, restamping and
    /// clearing the slot first if it still holds another tick's inputs.
    pub fn schedule(&mut self, target_tick: u64, input: ClientInput) {
        let idx = (target_tick % self.slots.len() as u64) as usize;
        let slot = &mut self.slots[idx];
        if slot.slot_tick != target_tick {
            slot.slot_tick = target_tick;
            slot.inputs.clear();
        }
        slot.inputs.push(input);
    }

    /// Move the inputs stamped for `current_tick` into `out`. A slot whose
    /// stamp mismatches is treated as empty. The slot keeps its backing
    /// storage; a second take for the same tick yields nothing.
    pub fn take(&mut self, current_tick: u64, out: &mut Vec<ClientInput>) -> usize {
        let idx = (current_tick % self.slots.len() as u64) as usize;
        let slot = &mut self.slots[idx];
        if slot.slot_tick != current_tick {
            return 0;
        }
        let taken = slot.inputs.len();
        out.append(&mut slot.inputs);
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(seq: u32) -> ClientInput {
        ClientInput {
            client_id: 0,
            client_tick: seq,
            client_seq: seq,
            buttons: 0,
            axis_x: 0.0,
            axis_y: 0.0,
        }
    }

    #[test]
    fn test_schedule_then_take() {
        let mut ring = InputRing::new(8);
        ring.schedule(3, input(1));
        ring.schedule(3, input(2));

        let mut out = Vec::new();
        assert_eq!(ring.take(3, &mut out), 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].client_seq, 1);
        assert_eq!(out[1].client_seq, 2);
    }

    #[test]
    fn test_second_take_is_empty() {
        let mut ring = InputRing::new(8);
        ring.schedule(3, input(1));

        let mut out = Vec::new();
        ring.take(3, &mut out);
        out.clear();
        assert_eq!(ring.take(3, &mut out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_take_wrong_tick_is_empty() {
        let mut ring = InputRing::new(8);
        ring.schedule(3, input(1));

        let mut out = Vec::new();
        assert_eq!(ring.take(4, &mut out), 0);
    }

    #[test]
    fn test_wraparound_overwrites_stale_slot() {
        let capacity = 8;
        let mut ring = InputRing::new(capacity);
        ring.schedule(3, input(1));
        // Same index, one full revolution later.
        ring.schedule(3 + capacity as u64, input(2));

        let mut out = Vec::new();
        assert_eq!(ring.take(3, &mut out), 0, "stale tick must read empty");
        assert_eq!(ring.take(3 + capacity as u64, &mut out), 1);
        assert_eq!(out[0].client_seq, 2);
    }

    #[test]
    fn test_take_preserves_slot_storage() {
        let mut ring = InputRing::new(4);
        ring.schedule(1, input(1));
        let mut out = Vec::new();
        ring.take(1, &mut out);

        // Rescheduling the same index must not see the old input again.
        ring.schedule(5, input(9));
        out.clear();
        assert_eq!(ring.take(5, &mut out), 1);
        assert_eq!(out[0].client_seq, 9);
    }

    #[test]
    fn test_inputs_preserve_order_within_tick() {
        let mut ring = InputRing::new(16);
        for seq in 0..100 {
            ring.schedule(7, input(seq));
        }
        let mut out = Vec::new();
        ring.take(7, &mut out);
        for (i, taken) in out.iter().enumerate() {
            assert_eq!(taken.client_seq, i as u32);
        }
    }
}
