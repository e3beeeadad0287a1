//! Per-client acknowledgement counters.
//!
//! Two parallel arrays of atomic sequence numbers indexed by peer id:
//! `last_recv` is written only by the receiver worker, `last_applied` only
//! by the simulation. Each cell is an independent scalar reported verbatim
//! in snapshots, so relaxed ordering suffices; no invariant spans cells.
//! Writes for out-of-range ids are ignored.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug)]
pub struct AckTable {
    last_recv: Box<[AtomicU32]>,
    last_applied: Box<[AtomicU32]>,
}

impl AckTable {
    pub fn new(max_peers: usize) -> Self {
        let zeroed = |_| AtomicU32::new(0);
        AckTable {
            last_recv: (0..max_peers).map(zeroed).collect(),
            last_applied: (0..max_peers).map(zeroed).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.last_recv.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.last_recv.is_empty()
    }

    /// Record the highest input sequence seen from `client_id`. Receiver
    /// worker only.
    #[inline]
    pub fn record_received(&self, client_id: u32, seq: u32) {
        if let Some(cell) = self.last_recv.get(client_id as usize) {
            cell.store(seq, Ordering::Relaxed);
        }
    }

    /// Record the highest input sequence applied for `client_id`.
    /// Simulation side only.
    #[inline]
    pub fn record_applied(&self, client_id: u32, seq: u32) {
        if let Some(cell) = self.last_applied.get(client_id as usize) {
            cell.store(seq, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn received(&self, client_id: u32) -> u32 {
        self.last_recv
            .get(client_id as usize)
            .map_or(0, |cell| cell.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn applied(&self, client_id: u32) -> u32 {
        self.last_applied
            .get(client_id as usize)
            .map_or(0, |cell| cell.load(Ordering::Relaxed))
    }
}
