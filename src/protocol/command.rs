// SPDX-License-Identifier: BSD-3-Clause

use std::{fmt, sync::Mutex, time::Duration};

use tokio::{sync::watch, time::Instant};

use crate::{
    error::CoreError,
    protocol::reply::Reply,
};

/// Lifecycle state of an outstanding [`Command`]. Once a command leaves
/// `Running` it is frozen: no further replies are accepted and its id is
/// eligible for release back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandStatus {
    Running,
    Done,
    Failed,
    Timedout,
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandStatus::Running => "RUNNING",
            CommandStatus::Done => "DONE",
            CommandStatus::Failed => "FAILED",
            CommandStatus::Timedout => "TIMEDOUT",
        })
    }
}

/// Tracks one outstanding request sent to the device.
///
/// `Command` is the typed, awaitable handle called for in the design notes:
/// instead of subclassing a future (as the Python original does), completion
/// is observed through a single-writer [`watch`] channel that the dispatcher
/// (or the janitor, on timeout) updates exactly once.
#[derive(Debug)]
pub struct Command {
    id: u8,
    text: String,
    expected_replies: usize,
    timeout: Option<Duration>,
    replies: Mutex<Vec<Reply>>,
    deadline: Mutex<Option<Instant>>,
    status_tx: watch::Sender<CommandStatus>,
    status_rx: watch::Receiver<CommandStatus>,
}

impl Command {
    pub fn new(
        text: impl Into<String>,
        id: u32,
        expected_replies: usize,
        timeout: Option<Duration>,
    ) -> Result<Self, CoreError> {
        if id > 0xFF {
            return Err(CoreError::BadId(id));
        }
        let expected_replies = expected_replies.max(1);
        let (status_tx, status_rx) = watch::channel(CommandStatus::Running);
        Ok(Self {
            id: id as u8,
            text: text.into().to_uppercase(),
            expected_replies,
            timeout,
            replies: Mutex::new(Vec::with_capacity(expected_replies)),
            deadline: Mutex::new(timeout.map(|d| Instant::now() + d)),
            status_tx,
            status_rx,
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn expected_replies(&self) -> usize {
        self.expected_replies
    }

    pub fn status(&self) -> CommandStatus {
        *self.status_rx.borrow()
    }

    pub fn succeeded(&self) -> bool {
        self.status() == CommandStatus::Done
    }

    pub fn replies(&self) -> Vec<Reply> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Serializes to `>hhBODY` (no trailing newline); §4.2.
    pub fn raw(&self) -> String {
        format!(">{:02X}{}", self.id, self.text)
    }

    /// The exact bytes written to the socket: [`Command::raw`] plus `\n`.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut line = self.raw();
        line.push('\n');
        line.into_bytes()
    }

    /// Applies an incoming reply per §4.2. Returns `true` once the command
    /// has reached a terminal state (whether by this call or a prior one).
    pub fn accept(&self, reply: Reply) -> bool {
        if self.status() != CommandStatus::Running {
            return true;
        }

        if reply.command_id != self.id {
            tracing::warn!(
                command = %self.raw(),
                reply_id = format!("{:02X}", reply.command_id),
                "reply command id does not match the command it was routed to"
            );
            self.mark_done(CommandStatus::Failed);
            return true;
        }

        let is_err = reply.is_error();
        let reached_expected_count = {
            let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
            replies.push(reply);
            replies.len() >= self.expected_replies
        };

        if let Some(timeout) = self.timeout {
            let mut deadline = self.deadline.lock().unwrap_or_else(|e| e.into_inner());
            *deadline = Some(Instant::now() + timeout);
        }

        if is_err {
            self.mark_done(CommandStatus::Failed);
            return true;
        }

        if reached_expected_count {
            self.mark_done(CommandStatus::Done);
            return true;
        }

        false
    }

    /// Cancels the command: marks it FAILED if still running. Does not send
    /// a protocol-level abort (the device has none); the id is reclaimed by
    /// the janitor's next sweep, same as any other terminal command.
    pub fn cancel(&self) {
        self.mark_done(CommandStatus::Failed);
    }

    fn mark_done(&self, status: CommandStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == CommandStatus::Running {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called by the janitor sweep (§4.4.2): if this command is still
    /// running and its deadline has passed, marks it TIMEDOUT.
    pub(crate) fn expire_if_overdue(&self, now: Instant) -> bool {
        if self.status() != CommandStatus::Running {
            return false;
        }
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.mark_done(CommandStatus::Timedout);
                true
            },
            _ => false,
        }
    }

    /// Suspends until the command reaches a terminal state.
    pub async fn wait(&self) -> CommandStatus {
        let mut rx = self.status_rx.clone();
        loop {
            let status = *rx.borrow();
            if status != CommandStatus::Running {
                return status;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::reply::{ReplyKind, ReplyPayload};

    use super::*;

    fn ok_reply(id: u8, text: &str) -> Reply {
        Reply {
            marker: b'<',
            kind: ReplyKind::Ok,
            command_id: id,
            payload: ReplyPayload::Text(text.to_string()),
        }
    }

    fn err_reply(id: u8) -> Reply {
        Reply {
            marker: b'?',
            kind: ReplyKind::Err,
            command_id: id,
            payload: ReplyPayload::Text(String::new()),
        }
    }

    #[test]
    fn rejects_out_of_range_id() {
        assert!(matches!(
            Command::new("STATUS", 0x100, 1, None),
            Err(CoreError::BadId(_))
        ));
    }

    #[test]
    fn uppercases_text_and_serializes_raw() {
        let cmd = Command::new("status", 0x01, 1, None).expect("new");
        assert_eq!(cmd.raw(), ">01STATUS");
        assert_eq!(cmd.to_wire_bytes(), b">01STATUS\n");
    }

    #[test]
    fn single_reply_completes_command() {
        let cmd = Command::new("STATUS", 0x01, 1, None).expect("new");
        assert!(cmd.accept(ok_reply(0x01, "KEY=1")));
        assert!(cmd.succeeded());
        assert_eq!(cmd.replies().len(), 1);
    }

    #[test]
    fn error_reply_fails_immediately_even_before_expected_count() {
        let cmd = Command::new("RCONFIG0000", 0x02, 3, None).expect("new");
        assert!(cmd.accept(err_reply(0x02)));
        assert_eq!(cmd.status(), CommandStatus::Failed);
    }

    #[test]
    fn mismatched_command_id_fails_the_command() {
        let cmd = Command::new("STATUS", 0x01, 1, None).expect("new");
        assert!(cmd.accept(ok_reply(0x02, "oops")));
        assert_eq!(cmd.status(), CommandStatus::Failed);
    }

    #[test]
    fn waits_for_multiple_replies() {
        let cmd = Command::new("RCONFIG0000", 0x03, 2, None).expect("new");
        assert!(!cmd.accept(ok_reply(0x03, "line one")));
        assert_eq!(cmd.status(), CommandStatus::Running);
        assert!(cmd.accept(ok_reply(0x03, "line two")));
        assert_eq!(cmd.status(), CommandStatus::Done);
        assert_eq!(cmd.replies().len(), 2);
    }

    #[test]
    fn terminal_command_ignores_further_replies() {
        let cmd = Command::new("STATUS", 0x01, 1, None).expect("new");
        assert!(cmd.accept(ok_reply(0x01, "first")));
        assert!(cmd.accept(ok_reply(0x01, "second")));
        assert_eq!(cmd.replies().len(), 1);
    }

    #[test]
    fn cancel_marks_failed_and_is_idempotent() {
        let cmd = Command::new("STATUS", 0x01, 1, None).expect("new");
        cmd.cancel();
        assert_eq!(cmd.status(), CommandStatus::Failed);
        cmd.cancel();
        assert_eq!(cmd.status(), CommandStatus::Failed);
    }

    #[tokio::test]
    async fn wait_resolves_once_terminal() {
        let cmd = std::sync::Arc::new(Command::new("STATUS", 0x01, 1, None).expect("new"));
        let waiter = {
            let cmd = cmd.clone();
            tokio::spawn(async move { cmd.wait().await })
        };
        tokio::task::yield_now().await;
        cmd.accept(ok_reply(0x01, "done"));
        assert_eq!(waiter.await.expect("join"), CommandStatus::Done);
    }

    #[test]
    fn expire_if_overdue_times_out_running_commands() {
        let cmd = Command::new("STATUS", 0x01, 1, Some(Duration::from_millis(1))).expect("new");
        let future = Instant::now() + Duration::from_secs(10);
        assert!(!cmd.expire_if_overdue(Instant::now()));
        assert!(cmd.expire_if_overdue(future));
        assert_eq!(cmd.status(), CommandStatus::Timedout);
    }
}
