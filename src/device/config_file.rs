// SPDX-License-Identifier: BSD-3-Clause

//! Reader/writer for the device's `.acf` configuration file (§6.2).
//!
//! No INI crate appears anywhere in the reference corpus, so this is a
//! narrow, purpose-built parser: two sections (`[SYSTEM]`, `[CONFIG]`),
//! `KEY=VALUE` lines, values double-quoted when they contain `;`, `=`, or
//! `,`, and `/` in a `[CONFIG]` key written out as `\` on disk.

use crate::error::CoreError;

/// The two sections this format recognizes, with order-preserving entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcfFile {
    pub system: Vec<(String, String)>,
    pub config: Vec<(String, String)>,
    saw_config_header: bool,
}

impl AcfFile {
    pub fn parse(text: &str) -> Result<AcfFile, CoreError> {
        let mut file = AcfFile::default();
        let mut section: Option<&str> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section = Some(match name {
                    "SYSTEM" => "SYSTEM",
                    "CONFIG" => {
                        file.saw_config_header = true;
                        "CONFIG"
                    },
                    other => {
                        return Err(CoreError::ConfigMissingSection(other.to_string()));
                    },
                });
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = unquote_value(value.trim());
            match section {
                Some("SYSTEM") => file.system.push((key.trim().to_string(), value)),
                Some("CONFIG") => file.config.push((key.trim().to_string(), value)),
                _ => continue,
            }
        }

        Ok(file)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("[SYSTEM]\n");
        for (key, value) in &self.system {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote_value_if_needed(value));
            out.push('\n');
        }
        out.push_str("[CONFIG]\n");
        for (key, value) in &self.config {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote_value_if_needed(value));
            out.push('\n');
        }
        out
    }

    /// Requires a `[CONFIG]` section be present (even if empty is fine, but
    /// the section header itself must have appeared).
    pub fn require_config_section(&self) -> Result<(), CoreError> {
        if !self.saw_config_header {
            return Err(CoreError::ConfigMissingSection("CONFIG".to_string()));
        }
        Ok(())
    }
}

/// `/` in a device-reported key is rewritten to `\` for on-disk storage.
pub fn device_key_to_disk_key(key: &str) -> String {
    key.replace('/', "\\")
}

/// Reconstitutes a `WCONFIG` line from a disk key: uppercase, `\` → `/`.
pub fn disk_key_to_device_key(key: &str) -> String {
    key.replace('\\', "/").to_uppercase()
}

fn quote_value_if_needed(value: &str) -> String {
    if value.contains([';', '=', ',']) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

fn unquote_value(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}
