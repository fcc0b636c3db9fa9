// SPDX-License-Identifier: BSD-3-Clause

//! Higher-level device operations (§4.5) built on `send_command`/`send_many`.

use std::{collections::HashMap, path::Path, time::Duration};

use crate::{
    device::{
        config_file::{device_key_to_disk_key, disk_key_to_device_key, AcfFile},
        modtype::ModType,
        ControllerStatus, Device,
    },
    error::CoreError,
    protocol::{command::CommandStatus, reply::ReplyPayload, BINARY_CHUNK_LEN},
};

const MAX_CONFIG_LINES: usize = 16384;

/// A value from `STATUS`/`SYSTEM`: a decimal integer when it parses as one,
/// a float otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
}

impl ScalarValue {
    fn parse(raw: &str) -> Option<Self> {
        if let Ok(v) = raw.parse::<i64>() {
            return Some(ScalarValue::Int(v));
        }
        raw.parse::<f64>().ok().map(ScalarValue::Float)
    }
}

/// A value from `FRAME`: a decimal integer, or a hex-encoded integer for
/// keys containing `TIME`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameValue {
    Int(i64),
    Hex(u64),
}

impl FrameValue {
    fn as_u64(&self) -> u64 {
        match self {
            FrameValue::Int(v) => *v as u64,
            FrameValue::Hex(v) => *v,
        }
    }
}

/// A decoded frame-buffer readout: a row-major `height * width` array of
/// little-endian unsigned samples.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub bytes_per_pixel: usize,
    pub pixels: Vec<u32>,
}

impl Frame {
    /// Slices out `[y0, y1) x [x0, x1)` as a row-major sub-array, for a
    /// named CCD region (§4.7.1 step 8).
    pub fn region(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> Vec<Vec<u32>> {
        let (x0, y0, x1, y1) = (x0 as usize, y0 as usize, x1 as usize, y1 as usize);
        (y0..y1)
            .map(|y| (x0..x1).map(|x| self.pixels[y * self.width + x]).collect())
            .collect()
    }
}

fn parse_kv_pairs(text: &str) -> Vec<(String, String)> {
    text.split_whitespace()
        .filter_map(|tok| tok.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
        .collect()
}

fn mod_type_number(key: &str) -> Option<u32> {
    let upper = key.to_uppercase();
    let rest = upper.strip_prefix("MOD")?.strip_suffix("_TYPE")?;
    if rest.is_empty() || rest.len() > 2 || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse::<u32>().ok()
}

impl Device {
    /// `SYSTEM`: whitespace-separated `KEY=VALUE` pairs, lowercased, plus a
    /// synthetic `modN_name` per `MODn_TYPE` key.
    pub async fn get_system(&self) -> Result<HashMap<String, String>, CoreError> {
        let cmd = self
            .client
            .send_command("SYSTEM", None, 1, Some(Duration::from_secs(1)))
            .await?;
        let status = cmd.wait().await;
        if status != CommandStatus::Done {
            return Err(CoreError::DeviceCmdFailed {
                command: "SYSTEM".to_string(),
                status,
            });
        }

        let text = reply_text(&cmd, "SYSTEM")?;
        let mut result = HashMap::new();
        let mut mod_types = Vec::new();
        for (key, value) in parse_kv_pairs(&text) {
            if let Some(n) = mod_type_number(&key) {
                if let Ok(code) = value.parse::<u64>() {
                    mod_types.push((n, code));
                }
            }
            result.insert(key.to_lowercase(), value);
        }
        for (n, code) in mod_types {
            result.insert(format!("mod{n}_name"), ModType::from_code(code).name());
        }
        Ok(result)
    }

    /// `STATUS`: key/value pairs, lowercased, typed as int or float.
    pub async fn get_status(&self) -> Result<HashMap<String, ScalarValue>, CoreError> {
        let cmd = self.client.send_command("STATUS", None, 1, None).await?;
        let status = cmd.wait().await;
        if status != CommandStatus::Done {
            return Err(CoreError::DeviceCmdFailed {
                command: "STATUS".to_string(),
                status,
            });
        }

        let text = reply_text(&cmd, "STATUS")?;
        let mut result = HashMap::new();
        for (key, value) in parse_kv_pairs(&text) {
            if let Some(parsed) = ScalarValue::parse(&value) {
                result.insert(key.to_lowercase(), parsed);
            }
        }
        Ok(result)
    }

    /// `FRAME`: key/value pairs, lowercased; decimal integers except keys
    /// containing `TIME`, which are hex-encoded.
    pub async fn get_frame(&self) -> Result<HashMap<String, FrameValue>, CoreError> {
        let cmd = self.client.send_command("FRAME", None, 1, None).await?;
        let status = cmd.wait().await;
        if status != CommandStatus::Done {
            return Err(CoreError::DeviceCmdFailed {
                command: "FRAME".to_string(),
                status,
            });
        }

        let text = reply_text(&cmd, "FRAME")?;
        let mut result = HashMap::new();
        for (key, value) in parse_kv_pairs(&text) {
            let parsed = if key.to_uppercase().contains("TIME") {
                u64::from_str_radix(&value, 16).ok().map(FrameValue::Hex)
            } else {
                value.parse::<i64>().ok().map(FrameValue::Int)
            };
            if let Some(v) = parsed {
                result.insert(key.to_lowercase(), v);
            }
        }
        Ok(result)
    }

    /// `RCONFIGhhhh` for every line address, reassembled in order. When
    /// `save` is set, also writes the ACF file at `path` (default
    /// `~/archon_<name>.acf`).
    pub async fn read_config(&self, save: bool, path: Option<&Path>) -> Result<AcfFile, CoreError> {
        let texts: Vec<String> = (0..MAX_CONFIG_LINES).map(|i| format!("RCONFIG{i:04X}")).collect();
        let (done, failed) = self.client.send_many(texts, 200, Some(Duration::from_millis(500))).await?;
        if let Some(first_failed) = failed.first() {
            return Err(CoreError::DeviceCmdFailed {
                command: "RCONFIG".to_string(),
                status: first_failed.status(),
            });
        }

        let mut indexed: Vec<(usize, String)> = done
            .iter()
            .map(|cmd| {
                let idx_hex = cmd.text().trim_start_matches("RCONFIG");
                let idx = usize::from_str_radix(idx_hex, 16).unwrap_or(usize::MAX);
                let line = cmd
                    .replies()
                    .first()
                    .and_then(|r| r.text().map(str::to_string))
                    .unwrap_or_default();
                (idx, line)
            })
            .collect();
        indexed.sort_unstable_by_key(|(idx, _)| *idx);

        let mut lines: Vec<String> = indexed.into_iter().map(|(_, line)| line).collect();
        while lines.last().is_some_and(String::is_empty) {
            lines.pop();
        }

        let mut acf = AcfFile::default();
        for line in &lines {
            if let Some((key, value)) = line.split_once('=') {
                acf.config.push((device_key_to_disk_key(key), value.to_string()));
            }
        }

        if save {
            let system = self.get_system().await?;
            for (key, value) in system {
                if key.ends_with("_name") {
                    continue;
                }
                acf.system.push((key.to_uppercase(), value));
            }

            let default_path;
            let target = match path {
                Some(p) => p,
                None => {
                    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                    default_path = std::path::PathBuf::from(format!("{home}/archon_{}.acf", self.name));
                    &default_path
                },
            };
            std::fs::write(target, acf.render())?;
        }

        Ok(acf)
    }

    /// Loads the `[CONFIG]` section of the ACF file at `path` and replays
    /// it onto the device via `CLEARCONFIG` + `WCONFIGhhhh` lines.
    pub async fn write_config(
        &self,
        path: &Path,
        applyall: bool,
        poweron: bool,
        timeout: Option<Duration>,
    ) -> Result<(), CoreError> {
        let text = std::fs::read_to_string(path)?;
        let acf = AcfFile::parse(&text)?;
        acf.require_config_section()?;

        let clear = self.client.send_command("CLEARCONFIG", None, 1, timeout).await?;
        if clear.wait().await != CommandStatus::Done {
            self.status.set(ControllerStatus::ERROR);
            return Err(CoreError::DeviceCmdFailed {
                command: "CLEARCONFIG".to_string(),
                status: clear.status(),
            });
        }

        let wconfig_texts: Vec<String> = acf
            .config
            .iter()
            .enumerate()
            .map(|(i, (key, value))| format!("WCONFIG{i:04X}{}={value}", disk_key_to_device_key(key)))
            .collect();
        let (_, failed) = self.client.send_many(wconfig_texts, 200, timeout).await?;
        if let Some(first_failed) = failed.first() {
            self.status.set(ControllerStatus::ERROR);
            return Err(CoreError::DeviceCmdFailed {
                command: "WCONFIG".to_string(),
                status: first_failed.status(),
            });
        }

        if applyall {
            let cmd = self
                .client
                .send_command("APPLYALL", None, 1, Some(Duration::from_secs(5)))
                .await?;
            if cmd.wait().await != CommandStatus::Done {
                self.status.set(ControllerStatus::ERROR);
                return Err(CoreError::DeviceCmdFailed {
                    command: "APPLYALL".to_string(),
                    status: cmd.status(),
                });
            }

            if poweron {
                let cmd = self.client.send_command("POWERON", None, 1, timeout).await?;
                if cmd.wait().await != CommandStatus::Done {
                    self.status.set(ControllerStatus::ERROR);
                    return Err(CoreError::DeviceCmdFailed {
                        command: "POWERON".to_string(),
                        status: cmd.status(),
                    });
                }
            }
        }

        self.status.set(ControllerStatus::IDLE);
        Ok(())
    }

    /// `FASTLOADPARAM <param> <value>`.
    pub async fn set_param(&self, param: &str, value: impl std::fmt::Display) -> Result<(), CoreError> {
        let text = format!("FASTLOADPARAM {param} {value}");
        let cmd = self.client.send_command(text, None, 1, None).await?;
        if cmd.wait().await != CommandStatus::Done {
            return Err(CoreError::DeviceCmdFailed {
                command: format!("FASTLOADPARAM {param}"),
                status: cmd.status(),
            });
        }
        Ok(())
    }

    pub async fn reset(&self) -> Result<(), CoreError> {
        self.set_param("ContinuousExposures", 0).await?;
        self.set_param("Exposures", 0).await?;
        let cmd = self
            .client
            .send_command("RESETTIMING", None, 1, Some(Duration::from_secs(1)))
            .await?;
        if cmd.wait().await != CommandStatus::Done {
            return Err(CoreError::DeviceCmdFailed {
                command: "RESETTIMING".to_string(),
                status: cmd.status(),
            });
        }
        self.status.set(ControllerStatus::IDLE);
        Ok(())
    }

    /// Polls `FRAME` once a second (§4.7.1 step 6) until the write buffer's
    /// completion flag reports the readout finished. Returns the write
    /// buffer number once complete.
    pub async fn poll_readout(&self, readout_max: Duration) -> Result<u32, CoreError> {
        let deadline = tokio::time::Instant::now() + readout_max;

        let frame = self.get_frame().await?;
        let wbuf = frame
            .get("wbuf")
            .map(FrameValue::as_u64)
            .ok_or_else(|| CoreError::BadArg("FRAME reply is missing wbuf".to_string()))? as u32;

        if buffer_field(&frame, wbuf, "complete") != Some(0) {
            self.status.set(ControllerStatus::ERROR);
            return Err(CoreError::ReadoutNotStarted);
        }

        loop {
            if tokio::time::Instant::now() >= deadline {
                self.status.set(ControllerStatus::ERROR);
                return Err(CoreError::ReadoutTimeout);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            let frame = self.get_frame().await?;
            if is_buffer_complete(&frame, wbuf) {
                return Ok(wbuf);
            }
        }
    }

    /// Begins an exposure. Requires the device to currently be IDLE.
    pub async fn integrate(&self, exposure_time_s: f64) -> Result<(), CoreError> {
        if self.status.get() != ControllerStatus::IDLE {
            return Err(CoreError::BadState {
                expected: "IDLE".to_string(),
                found: self.status.get().to_string(),
            });
        }

        self.set_param("IntMS", (exposure_time_s * 1000.0).round() as i64).await?;
        self.set_param("Exposures", 1).await?;
        self.status.set(ControllerStatus::EXPOSING);
        Ok(())
    }

    /// Fetches a completed frame buffer (`1`, `2`, `3`, or `-1` for
    /// "most recently completed").
    pub async fn fetch(&self, buffer_no: i32) -> Result<Frame, CoreError> {
        if !matches!(buffer_no, 1 | 2 | 3 | -1) {
            return Err(CoreError::BadArg(format!(
                "buffer_no must be 1, 2, 3, or -1, got {buffer_no}"
            )));
        }

        let frame = self.get_frame().await?;
        let n: u32 = if buffer_no == -1 {
            (1..=3)
                .filter(|n| is_buffer_complete(&frame, *n))
                .max_by_key(|n| buffer_field(&frame, *n, "timestamp"))
                .ok_or(CoreError::ReadoutNotStarted)?
        } else {
            let n = buffer_no as u32;
            if !is_buffer_complete(&frame, n) {
                return Err(CoreError::ReadoutNotStarted);
            }
            n
        };

        let width = buffer_field(&frame, n, "width").ok_or_else(|| CoreError::BadArg("missing width".to_string()))? as usize;
        let height =
            buffer_field(&frame, n, "height").ok_or_else(|| CoreError::BadArg("missing height".to_string()))? as usize;
        let sample = buffer_field(&frame, n, "sample").unwrap_or(0);
        let start = buffer_field(&frame, n, "base").ok_or_else(|| CoreError::BadArg("missing base".to_string()))?;

        let bytes_per_pixel: usize = if sample == 0 { 2 } else { 4 };
        let n_bytes = width * height * bytes_per_pixel;
        let n_blocks = n_bytes.div_ceil(BINARY_CHUNK_LEN);

        self.status.set(ControllerStatus::FETCHING);

        let lock_cmd = self.client.send_command(format!("LOCK{n}"), None, 1, None).await?;
        if lock_cmd.wait().await != CommandStatus::Done {
            self.status.set(ControllerStatus::ERROR);
            return Err(CoreError::DeviceCmdFailed {
                command: format!("LOCK{n}"),
                status: lock_cmd.status(),
            });
        }

        let fetch_text = format!("FETCH{start:08X}{n_blocks:08X}");
        let fetch_cmd = self
            .client
            .send_command_expecting_binary(fetch_text, n_blocks, None)
            .await?;
        let fetch_status = fetch_cmd.wait().await;
        if fetch_status != CommandStatus::Done {
            self.status.set(ControllerStatus::ERROR);
            return Err(CoreError::DeviceCmdFailed {
                command: "FETCH".to_string(),
                status: fetch_status,
            });
        }

        let lock0 = self.client.send_command("LOCK0", None, 1, None).await?;
        if lock0.wait().await != CommandStatus::Done {
            self.status.set(ControllerStatus::ERROR);
            return Err(CoreError::DeviceCmdFailed {
                command: "LOCK0".to_string(),
                status: lock0.status(),
            });
        }

        let body = match fetch_cmd.replies().into_iter().next().map(|r| r.payload) {
            Some(ReplyPayload::Binary(body)) => body,
            _ => return Err(CoreError::ProtocolParse(Vec::new())),
        };

        let pixels = decode_pixels(&body[..n_bytes], bytes_per_pixel);
        self.status.set(ControllerStatus::IDLE);
        Ok(Frame {
            width,
            height,
            bytes_per_pixel,
            pixels,
        })
    }
}

fn buffer_field(frame: &HashMap<String, FrameValue>, n: u32, field: &str) -> Option<u64> {
    frame.get(&format!("buf{n}{field}")).map(FrameValue::as_u64)
}

fn is_buffer_complete(frame: &HashMap<String, FrameValue>, n: u32) -> bool {
    buffer_field(frame, n, "complete") == Some(1)
}

fn decode_pixels(bytes: &[u8], bytes_per_pixel: usize) -> Vec<u32> {
    bytes
        .chunks_exact(bytes_per_pixel)
        .map(|chunk| match bytes_per_pixel {
            2 => u16::from_le_bytes([chunk[0], chunk[1]]) as u32,
            _ => u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
        })
        .collect()
}

fn reply_text(cmd: &crate::protocol::command::Command, command_name: &str) -> Result<String, CoreError> {
    cmd.replies()
        .first()
        .and_then(|r| r.text().map(str::to_string))
        .ok_or_else(|| CoreError::DeviceCmdFailed {
            command: command_name.to_string(),
            status: cmd.status(),
        })
}
