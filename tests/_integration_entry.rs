// SPDX-License-Identifier: BSD-3-Clause

#![allow(clippy::all)]

mod integration_tests {
    pub mod common;

    pub mod device_client;
    pub mod exposure_coordinator;
}
