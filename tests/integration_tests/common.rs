// SPDX-License-Identifier: BSD-3-Clause

//! A hand-rolled fake device: just enough of the wire protocol (§6.1) to
//! drive [`archon_driver::device::Device`] end to end without real hardware.

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

/// Reads one `>hhCOMMAND\n` request line. Returns `None` on EOF.
pub async fn read_command(socket: &mut TcpStream) -> Option<(u8, String)> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if socket.read_exact(&mut byte).await.is_err() {
            return None;
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    if line.first() != Some(&b'>') || line.len() < 3 {
        return None;
    }
    let id = u8::from_str_radix(std::str::from_utf8(&line[1..3]).ok()?, 16).ok()?;
    let text = String::from_utf8(line[3..].to_vec()).ok()?;
    Some((id, text))
}

pub async fn write_ok(socket: &mut TcpStream, id: u8, text: &str) {
    let frame = format!("<{id:02X}{text}\n");
    socket.write_all(frame.as_bytes()).await.expect("write ok reply");
}

pub async fn write_err(socket: &mut TcpStream, id: u8) {
    let frame = format!("?{id:02X}\n");
    socket.write_all(frame.as_bytes()).await.expect("write error reply");
}

pub async fn write_binary_chunk(socket: &mut TcpStream, id: u8, body: &[u8; 1024]) {
    let mut frame = vec![b'<', hex_upper(id >> 4), hex_upper(id & 0xF), b':'];
    frame.extend_from_slice(body);
    socket.write_all(&frame).await.expect("write binary chunk");
}

/// A single 1024-byte block with `pixels` (little-endian u16) at the front,
/// zero-padded to fill the rest, per the FETCH reply layout (§6.1).
pub fn chunk_with_u16_pixels(pixels: &[u16]) -> [u8; 1024] {
    let mut body = [0u8; 1024];
    for (i, &p) in pixels.iter().enumerate() {
        let bytes = p.to_le_bytes();
        body[i * 2] = bytes[0];
        body[i * 2 + 1] = bytes[1];
    }
    body
}

fn hex_upper(nibble: u8) -> u8 {
    match nibble {
        0..=9 => b'0' + nibble,
        _ => b'A' + (nibble - 10),
    }
}
