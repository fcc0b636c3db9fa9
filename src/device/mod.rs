// SPDX-License-Identifier: BSD-3-Clause

//! The device state machine and its high-level operations (§4.5–§4.6):
//! the transport (`client`), the status cell (`status`), the `.acf` config
//! file format (`config_file`), the module-type symbol table (`modtype`),
//! and the operations built on top of all of them (`ops`).

pub mod client;
pub mod config_file;
pub mod modtype;
pub mod ops;
pub mod status;

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

pub use client::DeviceClient;
pub use ops::Frame;
pub use status::{ControllerStatus, StatusCell};

use crate::{cfg::config::CcdRegion, error::CoreError};

/// One physical controller: its transport, observable status, and the
/// named CCD regions carved out of its frame buffer.
#[derive(Debug)]
pub struct Device {
    pub name: String,
    pub client: Arc<DeviceClient>,
    pub status: StatusCell,
    pub ccds: HashMap<String, CcdRegion>,
}

impl Device {
    pub async fn connect(
        name: impl Into<String>,
        endpoint: SocketAddr,
        connect_timeout: Duration,
        ccds: HashMap<String, CcdRegion>,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        let client = DeviceClient::connect(name.clone(), endpoint, connect_timeout).await?;
        Ok(Self {
            name,
            client,
            status: StatusCell::new(ControllerStatus::UNKNOWN),
            ccds,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}
