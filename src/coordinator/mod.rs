// SPDX-License-Identifier: BSD-3-Clause

//! The multi-device exposure coordinator (§4.7): shutter handshake, readout
//! polling, parallel fan-out with failure-induced sibling cancellation, and
//! exposure-number sequencing under a file lock.

pub mod counter;
pub mod exposure;
pub mod template;

pub use exposure::{Coordinator, ExposureFlavor, ExposureParams};
