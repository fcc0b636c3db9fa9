// SPDX-License-Identifier: BSD-3-Clause

//! The wire protocol engine: reply framing/parsing, the outstanding-command
//! tracker, and the 8-bit command id pool. Pure and side-effect-free aside
//! from [`id_pool`], which is a small concurrent resource.

pub mod command;
pub mod id_pool;
pub mod reply;

pub use command::{Command, CommandStatus};
pub use id_pool::IdPool;
pub use reply::{Reply, ReplyKind, ReplyPayload};

/// One past the highest valid command id: ids run `0x00..MAX_COMMAND_ID`.
pub const MAX_COMMAND_ID: u16 = 0x100;

/// Size in bytes of one binary reply chunk's payload (body only, no header).
pub const BINARY_CHUNK_LEN: usize = 1024;

/// Size in bytes of one binary reply chunk on the wire (4-byte header +
/// 1024-byte body).
pub const BINARY_CHUNK_WIRE_LEN: usize = BINARY_CHUNK_LEN + 4;
