//! # Bulk Memory Transfers
//!
//! Segmentation of large reads and writes into SCP memory commands, and the
//! windowed driver that keeps up to `n_outstanding` segments in flight on
//! the transport at once.
//!
//! Segments may complete in any order. Read payloads land in disjoint
//! ranges of the destination buffer, so reordering is harmless; the single
//! completion the caller sees carries the first segment error, if any.

use bytes::{Bytes, BytesMut};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, ProtocolError, Result};
use crate::runtime::command::Command;
use crate::wire::{AccessMode, CMD_OK, CMD_READ, CMD_WRITE};
use crate::{ChipAddr, ScpRequest, ScpResponse};

/// One slice of a bulk transfer: `len` bytes of machine memory at
/// `address`, mapping to `offset` within the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segment {
    pub offset: usize,
    pub address: u32,
    pub len: usize,
}

/// Split a transfer into segments of at most `max_segment` bytes.
pub(crate) fn plan_segments(address: u32, len: usize, max_segment: usize) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(len.div_ceil(max_segment));
    let mut offset = 0usize;
    while offset < len {
        let seg_len = (len - offset).min(max_segment);
        segments.push(Segment {
            offset,
            address: address + offset as u32,
            len: seg_len,
        });
        offset += seg_len;
    }
    segments
}

/// Read `length` bytes of machine memory starting at `address`.
pub(crate) async fn bulk_read(
    cmd_tx: &mpsc::Sender<Command>,
    window: usize,
    max_segment: usize,
    dest: ChipAddr,
    cpu: u8,
    address: u32,
    length: u32,
) -> Result<Bytes> {
    let mut buf = BytesMut::zeroed(length as usize);
    let mut segments = plan_segments(address, length as usize, max_segment).into_iter();
    let mut in_flight = FuturesUnordered::new();
    let mut first_error: Option<Error> = None;

    for segment in segments.by_ref().take(window) {
        in_flight.push(read_segment(cmd_tx.clone(), dest, cpu, segment));
    }

    while let Some((segment, result)) = in_flight.next().await {
        match result {
            Ok(data) if first_error.is_none() => {
                buf[segment.offset..segment.offset + segment.len].copy_from_slice(&data);
            }
            // Segments completing after a failure drain internally so the
            // transport can recycle their channels; their data is discarded.
            Ok(_) => {}
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        if first_error.is_none() {
            if let Some(segment) = segments.next() {
                in_flight.push(read_segment(cmd_tx.clone(), dest, cpu, segment));
            }
        }
    }

    match first_error {
        None => Ok(buf.freeze()),
        Some(e) => Err(e),
    }
}

/// Write `data` to machine memory starting at `address`.
pub(crate) async fn bulk_write(
    cmd_tx: &mpsc::Sender<Command>,
    window: usize,
    max_segment: usize,
    dest: ChipAddr,
    cpu: u8,
    address: u32,
    data: Bytes,
) -> Result<()> {
    let mut segments = plan_segments(address, data.len(), max_segment).into_iter();
    let mut in_flight = FuturesUnordered::new();
    let mut first_error: Option<Error> = None;

    for segment in segments.by_ref().take(window) {
        let payload = data.slice(segment.offset..segment.offset + segment.len);
        in_flight.push(write_segment(cmd_tx.clone(), dest, cpu, segment, payload));
    }

    while let Some((_segment, result)) = in_flight.next().await {
        if let Err(e) = result {
            if first_error.is_none() {
                first_error = Some(e);
            }
        }

        if first_error.is_none() {
            if let Some(segment) = segments.next() {
                let payload = data.slice(segment.offset..segment.offset + segment.len);
                in_flight.push(write_segment(cmd_tx.clone(), dest, cpu, segment, payload));
            }
        }
    }

    match first_error {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

async fn read_segment(
    cmd_tx: mpsc::Sender<Command>,
    dest: ChipAddr,
    cpu: u8,
    segment: Segment,
) -> (Segment, Result<Bytes>) {
    let mode = AccessMode::for_transfer(segment.address, segment.len as u32);
    let request = ScpRequest::new(dest, cpu, CMD_READ).with_args(&[
        segment.address,
        segment.len as u32,
        mode.value(),
    ]);

    let result = exchange(&cmd_tx, request).await.and_then(|response| {
        check_segment_rc(&response)?;
        if response.data.len() != segment.len {
            return Err(Error::Protocol(ProtocolError::new(format!(
                "read segment at {:#010x} returned {} bytes, expected {}",
                segment.address,
                response.data.len(),
                segment.len
            ))));
        }
        Ok(response.data)
    });
    (segment, result)
}

async fn write_segment(
    cmd_tx: mpsc::Sender<Command>,
    dest: ChipAddr,
    cpu: u8,
    segment: Segment,
    payload: Bytes,
) -> (Segment, Result<()>) {
    let mode = AccessMode::for_transfer(segment.address, segment.len as u32);
    let request = ScpRequest::new(dest, cpu, CMD_WRITE)
        .with_args(&[segment.address, segment.len as u32, mode.value()])
        .with_data(payload);

    let result = exchange(&cmd_tx, request)
        .await
        .and_then(|response| check_segment_rc(&response));
    (segment, result)
}

/// A segment response with a failure code cannot be trusted, so unlike
/// plain `send_scp` it fails the segment.
fn check_segment_rc(response: &ScpResponse) -> Result<()> {
    if response.cmd_rc == CMD_OK {
        Ok(())
    } else {
        Err(Error::Remote {
            cmd_rc: response.cmd_rc,
        })
    }
}

async fn exchange(cmd_tx: &mpsc::Sender<Command>, request: ScpRequest) -> Result<ScpResponse> {
    let (responder, rx) = oneshot::channel();
    cmd_tx
        .send(Command::SendScp { request, responder })
        .await
        .map_err(|_| Error::ConnectionClosed)?;
    match rx.await {
        Ok(result) => result,
        Err(_) => Err(Error::ConnectionClosed),
    }
}
