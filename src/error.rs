// SPDX-License-Identifier: BSD-3-Clause

use crate::protocol::command::CommandStatus;

/// Every error kind the core can raise, matched on by kind rather than
/// downcast. Protocol-layer anomalies (parse errors, unknown ids, mid-binary
/// interleave) are logged as warnings at the call site and do not appear
/// here except through the command they caused to fail.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unparseable reply frame: {0:?}")]
    ProtocolParse(Vec<u8>),

    #[error("frame for command {new_id:02X} arrived while reassembling binary reply for {expected_id:02X}")]
    ProtocolInterleave { expected_id: u8, new_id: u8 },

    #[error("command id {0:#04x} is out of range 0x00-0xFF")]
    BadId(u32),

    #[error("command id pool is exhausted")]
    PoolExhausted,

    #[error("connection is closed")]
    ConnClosed,

    #[error("device command {command} failed with status {status:?}")]
    DeviceCmdFailed {
        command: String,
        status: CommandStatus,
    },

    #[error("operation requires device status {expected}, found {found}")]
    BadState { expected: String, found: String },

    #[error("read-out failed to start")]
    ReadoutNotStarted,

    #[error("timed out waiting for read-out to finish")]
    ReadoutTimeout,

    #[error("shutter actor command failed: {0}")]
    ShutterFailed(String),

    #[error("unknown shutter status {0:?}")]
    ShutterUnknown(String),

    #[error("exposure counter file is locked by another process")]
    CounterLocked,

    #[error("the coordinator is already exposing")]
    Busy,

    #[error("bad argument: {0}")]
    BadArg(String),

    #[error("configuration file is missing required section [{0}]")]
    ConfigMissingSection(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
