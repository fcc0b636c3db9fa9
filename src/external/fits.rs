// SPDX-License-Identifier: BSD-3-Clause

//! A narrow, self-contained FITS writer (§6.5). No FITS crate appears in
//! the reference corpus, so this implements just enough of the standard to
//! be readable by any compliant reader: 2880-byte header blocks, a minimal
//! `SIMPLE` primary HDU (no data), and one `XTENSION= 'IMAGE'` extension per
//! named region, big-endian pixel data zero-padded to a block boundary.

use std::path::Path;

use async_trait::async_trait;

use crate::error::CoreError;

const BLOCK_LEN: usize = 2880;
const CARD_LEN: usize = 80;

/// Given an output path, an extension name, and a 2-D array of pixel
/// values, appends an image HDU, creating the file (with an empty primary
/// HDU) on first call.
#[async_trait]
pub trait FitsSink: Send + Sync {
    async fn write_extension(&self, path: &Path, extname: &str, data: &[Vec<u32>]) -> Result<(), CoreError>;
}

/// The bundled implementation: BITPIX=32 (signed 32-bit, matching the
/// widest sample the device can emit), one extension appended per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleFitsSink;

#[async_trait]
impl FitsSink for SimpleFitsSink {
    async fn write_extension(&self, path: &Path, extname: &str, data: &[Vec<u32>]) -> Result<(), CoreError> {
        let path = path.to_path_buf();
        let extname = extname.to_string();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || write_extension_blocking(&path, &extname, &data))
            .await
            .map_err(|e| CoreError::BadArg(format!("FITS writer task panicked: {e}")))?
    }
}

fn write_extension_blocking(path: &Path, extname: &str, data: &[Vec<u32>]) -> Result<(), CoreError> {
    use std::io::Write;

    if !path.exists() {
        std::fs::write(path, primary_hdu())?;
    }

    let height = data.len();
    let width = data.first().map_or(0, Vec::len);
    let mut out = Vec::new();
    out.extend_from_slice(&image_extension_header(extname, width, height));
    out.extend_from_slice(&pixel_data_block(data, width, height));

    let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
    file.write_all(&out)?;
    Ok(())
}

fn primary_hdu() -> Vec<u8> {
    let cards = [
        card("SIMPLE", "T", "file does conform to FITS standard"),
        card("BITPIX", "8", "number of bits per data pixel"),
        card("NAXIS", "0", "number of data axes"),
        card("EXTEND", "T", "FITS dataset may contain extensions"),
    ];
    pad_to_block(cards_to_header(&cards))
}

fn image_extension_header(extname: &str, width: usize, height: usize) -> Vec<u8> {
    let cards = [
        card("XTENSION", "'IMAGE   '", "IMAGE extension"),
        card("BITPIX", "32", "number of bits per data pixel"),
        card("NAXIS", "2", "number of data axes"),
        card("NAXIS1", &width.to_string(), "length of data axis 1"),
        card("NAXIS2", &height.to_string(), "length of data axis 2"),
        card("PCOUNT", "0", "number of parameter bytes"),
        card("GCOUNT", "1", "number of groups"),
        card("EXTNAME", &format!("'{extname:<8}'"), "extension name"),
    ];
    pad_to_block(cards_to_header(&cards))
}

fn card(keyword: &str, value: &str, comment: &str) -> String {
    let line = format!("{keyword:<8}= {value:<20} / {comment}");
    let mut line = line;
    line.truncate(CARD_LEN);
    format!("{line:<CARD_LEN$}")
}

fn cards_to_header(cards: &[String]) -> Vec<u8> {
    let mut header = String::new();
    for c in cards {
        header.push_str(c);
    }
    header.push_str(&format!("{:<CARD_LEN$}", "END"));
    header.into_bytes()
}

fn pad_to_block(mut bytes: Vec<u8>) -> Vec<u8> {
    let remainder = bytes.len() % BLOCK_LEN;
    if remainder != 0 {
        bytes.resize(bytes.len() + (BLOCK_LEN - remainder), b' ');
    }
    bytes
}

fn pixel_data_block(data: &[Vec<u32>], width: usize, height: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(width * height * 4);
    for row in data {
        for &pixel in row {
            bytes.extend_from_slice(&(pixel as i32).to_be_bytes());
        }
    }
    let remainder = bytes.len() % BLOCK_LEN;
    if remainder != 0 {
        bytes.resize(bytes.len() + (BLOCK_LEN - remainder), 0);
    }
    bytes
}
