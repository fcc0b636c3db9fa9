//! This module handles configuration, command-line parsing, and logging.

// SPDX-License-Identifier: BSD-3-Clause

/// Command-line interface parsing.
pub mod cli;
/// Configuration file parsing and management.
pub mod config;
/// Logger initialization.
pub mod logger;
