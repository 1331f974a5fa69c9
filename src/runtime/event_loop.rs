//! # SCP Transport Task
//!
//! The per-connection event loop. It owns the UDP socket and the whole of
//! [`ConnState`], and handles:
//!
//! - dispatching queued requests into free channels
//! - transmission, per-attempt timeouts and retransmission
//! - demultiplexing responses by sequence number
//! - cancellation of all pending work at shutdown
//!
//! Sends are awaited inline, so a channel slot is never observable while a
//! datagram is being handed to the socket; the retransmission deadline is
//! armed only once the send has completed.

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::Error;
use crate::net::UdpSocket;
use crate::runtime::command::Command;
use crate::runtime::state::{Channel, ConnState, QueuedRequest};
use crate::wire;
use crate::ScpResponse;

/// The main transport task. Runs until `Shutdown` arrives or every handle
/// has been dropped; either way all pending requests complete with
/// `Error::Cancelled` and dropping the socket closes the endpoint.
pub(crate) async fn transport_task<U: UdpSocket>(
    socket: U,
    mut state: ConnState,
    mut cmd_rx: mpsc::Receiver<Command>,
) {
    let mut buf = [0u8; 65535];

    loop {
        let next_deadline = state.next_deadline();

        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, _from)) => {
                        handle_datagram(&buf[..len], &mut state);
                        process_request_queue(&socket, &mut state).await;
                    }
                    Err(e) => {
                        // Receive errors are rare and difficult to interpret;
                        // retransmission covers any datagram that got lost.
                        tracing::debug!("ignoring receive error: {}", e);
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::SendScp { request, responder }) => {
                        state.queue.push_back(QueuedRequest { request, responder });
                        process_request_queue(&socket, &mut state).await;
                    }
                    Some(Command::Shutdown) | None => {
                        shutdown(&mut state);
                        break;
                    }
                }
            }

            () = async {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                handle_expired_timers(&socket, &mut state).await;
                process_request_queue(&socket, &mut state).await;
            }
        }
    }
}

/// Dispatch a received datagram to the channel whose sequence number it
/// echoes. Short datagrams and unknown sequence numbers are dropped
/// silently; the machine emits stray packets and the protocol tolerates
/// them.
fn handle_datagram(datagram: &[u8], state: &mut ConnState) {
    let Some(seq) = wire::peek_seq(datagram) else {
        tracing::trace!("dropping {}-byte datagram, too short for SCP", datagram.len());
        return;
    };

    let Some(idx) = state.index_of_seq(seq) else {
        tracing::trace!("dropping datagram with unmatched sequence {}", seq);
        return;
    };

    let n_args_resp = state
        .channel(idx)
        .map(|channel| channel.n_args_resp)
        .unwrap_or_default();
    let Some(frame) = wire::unpack(datagram, n_args_resp) else {
        return;
    };

    if let Some(channel) = state.take_channel(idx) {
        tracing::trace!(seq, cmd_rc = frame.cmd_rc, "response matched");
        let _ = channel.responder.send(Ok(ScpResponse {
            cmd_rc: frame.cmd_rc,
            n_args: frame.n_args,
            arg1: frame.args[0],
            arg2: frame.args[1],
            arg3: frame.args[2],
            data: frame.data,
        }));
    }
}

/// Move requests from the queue into free channels until one of the two
/// runs out. Each dispatched request gets a fresh sequence number and its
/// packet serialized into the channel before the first transmission.
async fn process_request_queue<U: UdpSocket>(socket: &U, state: &mut ConnState) {
    loop {
        let Some(idx) = state.idle_slot() else { break };
        let Some(QueuedRequest { request, responder }) = state.queue.pop_front() else {
            break;
        };

        let seq = state.allocate_seq();
        let mut packet = wire::pack(
            request.dest,
            request.cpu,
            request.cmd,
            &request.args[..request.n_args],
            &request.data,
        );
        wire::stamp_seq(&mut packet, seq);

        state.install(
            idx,
            Channel {
                seq,
                n_tries: 0,
                deadline: None,
                packet: packet.freeze(),
                n_args_resp: request.n_args_resp,
                responder,
            },
        );
        attempt_transmission(socket, state, idx).await;
    }
}

/// Transmit (or retransmit) the packet held by a channel.
///
/// Increments the attempt counter first; past the configured budget the
/// channel completes with `Timeout`. A send failure completes it with the
/// I/O error. On success the retransmission deadline is armed.
async fn attempt_transmission<U: UdpSocket>(socket: &U, state: &mut ConnState, idx: usize) {
    let peer = state.peer;
    let n_tries_max = state.config.n_tries;
    let timeout = state.config.timeout;

    let (packet, exhausted) = {
        let Some(channel) = state.channel_mut(idx) else {
            return;
        };
        channel.n_tries += 1;
        channel.deadline = None;
        (channel.packet.clone(), channel.n_tries > n_tries_max)
    };

    if exhausted {
        if let Some(channel) = state.take_channel(idx) {
            tracing::debug!(seq = channel.seq, "retry budget exhausted");
            let _ = channel.responder.send(Err(Error::Timeout));
        }
        return;
    }

    match socket.send_to(&packet, peer).await {
        Ok(_) => {
            if let Some(channel) = state.channel_mut(idx) {
                channel.deadline = Some(Instant::now() + timeout);
            }
        }
        Err(e) => {
            if let Some(channel) = state.take_channel(idx) {
                tracing::debug!(seq = channel.seq, "send failed: {}", e);
                let _ = channel.responder.send(Err(Error::Io(e)));
            }
        }
    }
}

async fn handle_expired_timers<U: UdpSocket>(socket: &U, state: &mut ConnState) {
    let now = Instant::now();
    for idx in state.expired_channels(now) {
        attempt_transmission(socket, state, idx).await;
    }
}

/// Cancel everything: every occupied channel and every queued request
/// completes with `Error::Cancelled`. The caller breaks out of the loop
/// afterwards, dropping the socket and closing the endpoint.
fn shutdown(state: &mut ConnState) {
    let (channels, queue) = state.drain_all();
    if !channels.is_empty() || !queue.is_empty() {
        tracing::debug!(
            "shutting down with {} outstanding and {} queued request(s)",
            channels.len(),
            queue.len()
        );
    }
    for channel in channels {
        let _ = channel.responder.send(Err(Error::Cancelled));
    }
    for queued in queue {
        let _ = queued.responder.send(Err(Error::Cancelled));
    }
}
