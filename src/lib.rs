// SPDX-License-Identifier: BSD-3-Clause

pub mod cfg;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod external;
pub mod protocol;

pub use error::{CoreError, Result};
