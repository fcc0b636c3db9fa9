// SPDX-License-Identifier: BSD-3-Clause

use std::fmt;

use tokio::sync::watch;

bitflags::bitflags! {
    /// Bitmask-capable status of a single controller. In practice only one
    /// bit is ever set at a time (the transitions in §4.6 are exclusive),
    /// but the type itself admits combinations for forward compatibility.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControllerStatus: u16 {
        const UNKNOWN  = 0b0000_0001;
        const IDLE     = 0b0000_0010;
        const EXPOSING = 0b0000_0100;
        const READING  = 0b0000_1000;
        const FETCHING = 0b0001_0000;
        const ERROR    = 0b0010_0000;
    }
}

impl Default for ControllerStatus {
    fn default() -> Self {
        ControllerStatus::UNKNOWN
    }
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A current-value cell plus a coalescing broadcast, per the "status as
/// observable" design note: subscribers see the current value immediately
/// on subscription, then the latest value after each change.
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<ControllerStatus>,
}

impl StatusCell {
    pub fn new(initial: ControllerStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> ControllerStatus {
        *self.tx.borrow()
    }

    /// Sets a new status. A no-op write (same value) does not wake
    /// subscribers, matching the "signal then clear" one-shot semantics
    /// without needing an explicit event flag: `watch` already coalesces.
    pub fn set(&self, status: ControllerStatus) {
        self.tx.send_replace(status);
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.tx.subscribe()
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new(ControllerStatus::UNKNOWN)
    }
}
