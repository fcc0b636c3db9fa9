// SPDX-License-Identifier: BSD-3-Clause

use std::sync::Mutex;

use crate::{error::CoreError, protocol::MAX_COMMAND_ID};

/// A pool of free 8-bit command ids, initialized to `{0x00, ..., 0xFF}`.
///
/// `take`/`release` are plain (non-suspending) operations guarded by a
/// `std::sync::Mutex` rather than an async one: holding the lock never spans
/// an await point, so there is nothing to gain from an async mutex here.
#[derive(Debug)]
pub struct IdPool {
    taken: Mutex<[bool; MAX_COMMAND_ID as usize]>,
}

impl Default for IdPool {
    fn default() -> Self {
        Self::new()
    }
}

impl IdPool {
    pub fn new() -> Self {
        Self {
            taken: Mutex::new([false; MAX_COMMAND_ID as usize]),
        }
    }

    /// Removes and returns any free id. No ordering is guaranteed among
    /// callers or across calls.
    pub fn take(&self) -> Result<u8, CoreError> {
        let mut taken = self.taken.lock().unwrap_or_else(|e| e.into_inner());
        match taken.iter().position(|t| !t) {
            Some(idx) => {
                taken[idx] = true;
                Ok(idx as u8)
            },
            None => Err(CoreError::PoolExhausted),
        }
    }

    /// Reserves a specific id, failing if it is already in use.
    pub fn take_specific(&self, id: u8) -> Result<(), CoreError> {
        let mut taken = self.taken.lock().unwrap_or_else(|e| e.into_inner());
        if taken[id as usize] {
            return Err(CoreError::PoolExhausted);
        }
        taken[id as usize] = true;
        Ok(())
    }

    /// Returns `id` to the pool. Idempotent: releasing an id that is already
    /// free is a no-op.
    pub fn release(&self, id: u8) {
        let mut taken = self.taken.lock().unwrap_or_else(|e| e.into_inner());
        taken[id as usize] = false;
    }

    pub fn is_taken(&self, id: u8) -> bool {
        let taken = self.taken.lock().unwrap_or_else(|e| e.into_inner());
        taken[id as usize]
    }

    #[cfg(test)]
    pub fn free_count(&self) -> usize {
        let taken = self.taken.lock().unwrap_or_else(|e| e.into_inner());
        taken.iter().filter(|t| !**t).count()
    }
}
