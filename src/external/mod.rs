// SPDX-License-Identifier: BSD-3-Clause

//! Narrow interfaces to the two collaborators the core treats as external
//! (§6.4, §6.5): the shutter actor and the FITS writer.

pub mod fits;
pub mod shutter;

pub use fits::{FitsSink, SimpleFitsSink};
pub use shutter::{parse_shutter_status, NullShutterActor, ShutterActor, ShutterReply, ShutterState};
