//! Commands sent from connection handles to the transport task.

use tokio::sync::oneshot;

use crate::error::Result;
use crate::{ScpRequest, ScpResponse};

pub(crate) enum Command {
    /// Enqueue a logical request. The responder fires exactly once: with the
    /// response, or with the error that terminated the request.
    SendScp {
        request: ScpRequest,
        responder: oneshot::Sender<Result<ScpResponse>>,
    },
    /// Shut the connection down, cancelling all queued and in-flight work.
    Shutdown,
}
