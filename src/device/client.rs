// SPDX-License-Identifier: BSD-3-Clause

use std::{
    net::SocketAddr,
    sync::{atomic::{AtomicBool, Ordering}, Arc},
    time::Duration,
};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex as AsyncMutex,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::CoreError,
    protocol::{
        command::{Command, CommandStatus},
        id_pool::IdPool,
        reply::{Reply, ReplyKind, ReplyPayload},
        BINARY_CHUNK_LEN,
    },
};

const JANITOR_INTERVAL: Duration = Duration::from_millis(500);

/// Accumulator for an in-progress binary reassembly (§4.4.1). Pre-allocated
/// once per fetch; the reader loop index-writes into it, never concatenates.
#[derive(Debug)]
struct Reassembly {
    command_id: u8,
    n_blocks: usize,
    received: usize,
    body: Vec<u8>,
}

impl Reassembly {
    fn new(command_id: u8, n_blocks: usize) -> Self {
        Self {
            command_id,
            n_blocks,
            received: 0,
            body: vec![0u8; n_blocks * BINARY_CHUNK_LEN],
        }
    }

    fn push_chunk(&mut self, chunk: &[u8]) {
        let offset = self.received * BINARY_CHUNK_LEN;
        self.body[offset..offset + BINARY_CHUNK_LEN].copy_from_slice(chunk);
        self.received += 1;
    }

    fn is_complete(&self) -> bool {
        self.received >= self.n_blocks
    }
}

/// Owns one TCP connection to a controller: the serialized write half, the
/// in-flight command map, and the id pool. `connect` spawns a reader loop
/// and a janitor task that run for the lifetime of the connection.
#[derive(Debug)]
pub struct DeviceClient {
    pub name: String,
    pub endpoint: SocketAddr,
    writer: AsyncMutex<OwnedWriteHalf>,
    running: DashMap<u8, Arc<Command>>,
    pool: IdPool,
    reassembly: std::sync::Mutex<Option<Reassembly>>,
    cancel: CancellationToken,
    connected: AtomicBool,
}

impl DeviceClient {
    pub async fn connect(
        name: impl Into<String>,
        endpoint: SocketAddr,
        connect_timeout: Duration,
    ) -> Result<Arc<Self>, CoreError> {
        let name = name.into();
        let stream = time::timeout(connect_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| CoreError::ConnClosed)??;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let client = Arc::new(Self {
            name,
            endpoint,
            writer: AsyncMutex::new(write_half),
            running: DashMap::new(),
            pool: IdPool::new(),
            reassembly: std::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
            connected: AtomicBool::new(true),
        });

        let reader_client = client.clone();
        let reader_cancel = client.cancel.clone();
        tokio::spawn(async move { reader_client.reader_loop(read_half, reader_cancel).await });

        let janitor_client = client.clone();
        let janitor_cancel = client.cancel.clone();
        tokio::spawn(async move { janitor_client.janitor_loop(janitor_cancel).await });

        tracing::info!(device = %client.name, endpoint = %client.endpoint, "connected to controller");
        Ok(client)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Stops the reader and janitor tasks. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Arms the reader loop to treat the next chunks addressed to
    /// `command_id` as a binary reassembly of `n_blocks` blocks, per the
    /// `fetch()` protocol in §4.4.1/§4.5. Must be called before the command
    /// that will receive the binary reply is sent.
    pub fn begin_binary_reassembly(&self, command_id: u8, n_blocks: usize) {
        let mut guard = self.reassembly.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Reassembly::new(command_id, n_blocks));
    }

    pub async fn send_command(
        &self,
        text: impl Into<String>,
        id: Option<u8>,
        expected_replies: usize,
        timeout: Option<Duration>,
    ) -> Result<Arc<Command>, CoreError> {
        let id = match id {
            Some(id) => {
                self.pool.take_specific(id)?;
                id
            },
            None => self.pool.take()?,
        };

        let command = match Command::new(text, id as u32, expected_replies, timeout) {
            Ok(command) => Arc::new(command),
            Err(e) => {
                self.pool.release(id);
                return Err(e);
            },
        };

        self.running.insert(id, command.clone());
        let wire = command.to_wire_bytes();

        if let Err(e) = self.write_bytes(&wire).await {
            command.cancel();
            self.running.remove(&id);
            self.pool.release(id);
            return Err(e);
        }

        tracing::debug!(device = %self.name, command = %command.raw(), "sent command");
        Ok(command)
    }

    /// Like [`DeviceClient::send_command`], but arms binary reassembly for
    /// `n_blocks` blocks on the reserved id before the request line is
    /// written, so the reader loop is ready for the first continuation
    /// chunk the instant the device starts replying.
    pub async fn send_command_expecting_binary(
        &self,
        text: impl Into<String>,
        n_blocks: usize,
        timeout: Option<Duration>,
    ) -> Result<Arc<Command>, CoreError> {
        let id = self.pool.take()?;
        self.begin_binary_reassembly(id, n_blocks);

        let command = match Command::new(text, id as u32, 1, timeout) {
            Ok(command) => Arc::new(command),
            Err(e) => {
                *self.reassembly.lock().unwrap_or_else(|e| e.into_inner()) = None;
                self.pool.release(id);
                return Err(e);
            },
        };

        self.running.insert(id, command.clone());
        let wire = command.to_wire_bytes();

        if let Err(e) = self.write_bytes(&wire).await {
            command.cancel();
            self.running.remove(&id);
            *self.reassembly.lock().unwrap_or_else(|e| e.into_inner()) = None;
            self.pool.release(id);
            return Err(e);
        }

        tracing::debug!(
            device = %self.name,
            command = %command.raw(),
            n_blocks,
            "sent command expecting binary reassembly"
        );
        Ok(command)
    }

    /// Sends `texts` in chunks of at most `max_chunk`, waiting for each
    /// chunk to resolve before sending the next. Stops collecting a chunk
    /// early if the id pool is exhausted; stops sending further chunks at
    /// all as soon as one chunk contains a failure.
    pub async fn send_many(
        &self,
        texts: Vec<String>,
        max_chunk: usize,
        timeout: Option<Duration>,
    ) -> Result<(Vec<Arc<Command>>, Vec<Arc<Command>>), CoreError> {
        let max_chunk = max_chunk.max(1);
        let mut done = Vec::new();
        let mut failed = Vec::new();
        let mut texts = texts.into_iter();

        loop {
            let mut chunk = Vec::new();
            for _ in 0..max_chunk {
                let Some(text) = texts.next() else { break };
                match self.send_command(text, None, 1, timeout).await {
                    Ok(command) => chunk.push(command),
                    Err(CoreError::PoolExhausted) => break,
                    Err(e) => return Err(e),
                }
            }
            if chunk.is_empty() {
                break;
            }

            for command in chunk {
                match command.wait().await {
                    CommandStatus::Done => done.push(command),
                    _ => failed.push(command),
                }
            }
            if !failed.is_empty() {
                return Ok((done, failed));
            }
        }

        Ok((done, failed))
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<(), CoreError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    fn dispatch(&self, reply: Reply) {
        match self.running.get(&reply.command_id) {
            Some(entry) => {
                entry.value().accept(reply);
            },
            None => {
                tracing::warn!(
                    device = %self.name,
                    id = format!("{:02X}", reply.command_id),
                    "reply for unknown or already-released command id dropped"
                );
            },
        }
    }

    /// Marks every currently in-flight command FAILED. Called when the
    /// connection is lost so that no caller is left awaiting forever.
    fn fail_all_running(&self) {
        for entry in self.running.iter() {
            entry.value().cancel();
        }
    }

    async fn reader_loop(self: Arc<Self>, mut reader: OwnedReadHalf, cancel: CancellationToken) {
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = self.read_and_dispatch_one(&mut reader) => outcome,
            };
            if let Err(e) = outcome {
                tracing::warn!(device = %self.name, error = %e, "reader loop terminated; failing in-flight commands");
                self.connected.store(false, Ordering::Release);
                self.fail_all_running();
                return;
            }
        }
    }

    async fn read_and_dispatch_one(&self, reader: &mut OwnedReadHalf) -> Result<(), CoreError> {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await?;

        let active_id = {
            let guard = self.reassembly.lock().unwrap_or_else(|e| e.into_inner());
            guard.as_ref().map(|r| r.command_id)
        };

        if let Some(expected_id) = active_id {
            let header_id = decode_hex_id(header[1], header[2]);
            if header[3] == b':' && header_id == Some(expected_id) {
                let mut body = vec![0u8; BINARY_CHUNK_LEN];
                reader.read_exact(&mut body).await?;

                let finished = {
                    let mut guard = self.reassembly.lock().unwrap_or_else(|e| e.into_inner());
                    let reassembly = guard
                        .as_mut()
                        .expect("reassembly state checked present above");
                    reassembly.push_chunk(&body);
                    reassembly.is_complete()
                };

                if finished {
                    let body = {
                        let mut guard = self.reassembly.lock().unwrap_or_else(|e| e.into_inner());
                        guard
                            .take()
                            .expect("reassembly state checked present above")
                            .body
                    };
                    self.dispatch(Reply {
                        marker: b'<',
                        kind: ReplyKind::Binary,
                        command_id: expected_id,
                        payload: ReplyPayload::Binary(Bytes::from(body)),
                    });
                }
                return Ok(());
            }

            let new_id = header_id.unwrap_or(0);
            let violation = CoreError::ProtocolInterleave {
                expected_id,
                new_id,
            };
            tracing::warn!(device = %self.name, error = %violation, "protocol violation");
            if let Some(command) = self.running.get(&expected_id) {
                command.value().cancel();
            }
            *self.reassembly.lock().unwrap_or_else(|e| e.into_inner()) = None;
            // Fall through: the frame we already read the header of may
            // still belong to some other, non-reassembling command.
        }

        let frame = self.read_rest_of_frame(reader, header).await?;
        match Reply::parse(&frame) {
            Ok(reply) => self.dispatch(reply),
            Err(e) => tracing::warn!(device = %self.name, error = %e, "dropping unparseable frame"),
        }
        Ok(())
    }

    async fn read_rest_of_frame(
        &self,
        reader: &mut OwnedReadHalf,
        header: [u8; 4],
    ) -> Result<Vec<u8>, CoreError> {
        let mut frame = header.to_vec();
        match header[3] {
            b'\n' => Ok(frame),
            b':' => {
                let mut body = vec![0u8; BINARY_CHUNK_LEN];
                reader.read_exact(&mut body).await?;
                frame.extend_from_slice(&body);
                Ok(frame)
            },
            _ => {
                loop {
                    let mut byte = [0u8; 1];
                    reader.read_exact(&mut byte).await?;
                    frame.push(byte[0]);
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                Ok(frame)
            },
        }
    }

    async fn janitor_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = time::interval(JANITOR_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.sweep(),
            }
        }
    }

    /// Scans the running map: times out overdue commands, then releases
    /// the ids of anything terminal (§4.4.2).
    fn sweep(&self) {
        let now = time::Instant::now();
        let mut terminal_ids = Vec::new();
        for entry in self.running.iter() {
            entry.value().expire_if_overdue(now);
            if entry.value().status() != CommandStatus::Running {
                terminal_ids.push(*entry.key());
            }
        }
        for id in terminal_ids {
            self.running.remove(&id);
            self.pool.release(id);
        }
    }
}

fn decode_hex_id(hi: u8, lo: u8) -> Option<u8> {
    Some((hex_nibble(hi)? << 4) | hex_nibble(lo)?)
}

fn hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}
