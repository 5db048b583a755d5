//! Exclusive accelerator claims for correction steps.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct State {
    free: VecDeque<usize>,
    next_ticket: u64,
    serving: u64,
}

/// A pool of device ids handed out one per claimant, first come first served.
///
/// Each `acquire` takes a ticket; a claimant proceeds only when its ticket is
/// the one being served and a device is free, so waiters are granted devices
/// in arrival order.
pub struct DevicePool {
    state: Mutex<State>,
    condvar: Condvar,
    size: usize,
}

/// Holds one device until dropped.
pub struct DeviceGuard<'a> {
    pool: &'a DevicePool,
    device: usize,
}

impl DevicePool {
    pub fn new(devices: &[usize]) -> Self {
        Self {
            state: Mutex::new(State {
                free: devices.iter().copied().collect(),
                next_ticket: 0,
                serving: 0,
            }),
            condvar: Condvar::new(),
            size: devices.len(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Blocks until a device is free and every earlier claimant has been
    /// served. Returns `None` for an empty pool (work runs on the host).
    pub fn acquire(&self) -> Option<DeviceGuard<'_>> {
        if self.size == 0 {
            return None;
        }
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.serving != ticket || state.free.is_empty() {
            self.condvar.wait(&mut state);
        }
        state.serving += 1;
        let device = state.free.pop_front()?;
        // The next ticket holder may already have a free device.
        self.condvar.notify_all();
        tracing::trace!(device, ticket, "device acquired");
        Some(DeviceGuard { pool: self, device })
    }

    /// Claimants currently blocked in `acquire`.
    pub fn waiting(&self) -> usize {
        let state = self.state.lock();
        (state.next_ticket - state.serving) as usize
    }
}

impl DeviceGuard<'_> {
    pub fn device(&self) -> usize {
        self.device
    }
}

impl Drop for DeviceGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.pool.state.lock();
        state.free.push_back(self.device);
        self.pool.condvar.notify_all();
    }
}
