// SPDX-License-Identifier: BSD-3-Clause

use async_trait::async_trait;

use crate::error::CoreError;

/// The shutter's reported position, as carried in the last message of an
/// `open`/`close` reply (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterState {
    Open,
    Closed,
}

impl ShutterState {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(ShutterState::Open),
            "closed" => Some(ShutterState::Closed),
            _ => None,
        }
    }
}

/// The shutter actor's raw reply to an `open`/`close` request. `status`
/// carries whatever string the actor reported verbatim; callers run it
/// through [`parse_shutter_status`] rather than trusting it directly, since
/// an actor can reply successfully (no transport error) with a status that
/// isn't `"open"`/`"closed"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutterReply {
    pub status: String,
}

/// A request-reply facility external to the core (§6.4). The production
/// binary and the coordinator's tests are the only code aware of a concrete
/// implementation; the exposure coordinator only ever sees this trait.
/// An `Err` return means the request itself failed (e.g. a transport error
/// or the actor rejecting the command); callers map that to
/// `CoreError::ShutterFailed`. A successful reply still needs its `status`
/// validated, since the actor can answer with neither `"open"` nor
/// `"closed"`.
#[async_trait]
pub trait ShutterActor: Send + Sync {
    async fn open(&self) -> Result<ShutterReply, CoreError>;
    async fn close(&self) -> Result<ShutterReply, CoreError>;
}

/// Interprets a raw `shutter` status string per the handshake rule in
/// §4.7.1 step 2/5: unrecognized strings are `SHUTTER_UNKNOWN`.
pub fn parse_shutter_status(raw: &str) -> Result<ShutterState, CoreError> {
    ShutterState::parse(raw).ok_or_else(|| CoreError::ShutterUnknown(raw.to_string()))
}

/// A shutter actor that answers instantly without talking to any hardware.
/// The actual actor's RPC surface is out of scope for this crate (§1); this
/// stand-in lets the production binary run exposures end to end against a
/// site that has no shutter actor wired up yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullShutterActor;

#[async_trait]
impl ShutterActor for NullShutterActor {
    async fn open(&self) -> Result<ShutterReply, CoreError> {
        Ok(ShutterReply { status: "open".to_string() })
    }

    async fn close(&self) -> Result<ShutterReply, CoreError> {
        Ok(ShutterReply { status: "closed".to_string() })
    }
}
