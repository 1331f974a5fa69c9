//! Per-connection transport state.
//!
//! `ConnState` is owned by the transport task and mutated only there: the
//! fixed pool of outstanding channels, the FIFO queue of requests waiting
//! for a free channel, and the sequence-number allocator. Channels are
//! addressed by pool index; completion takes the channel out of its slot,
//! which is what frees it for reuse.

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::{ScpRequest, ScpResponse};

/// A logical request that has not yet been assigned a channel.
pub(crate) struct QueuedRequest {
    pub request: ScpRequest,
    pub responder: oneshot::Sender<Result<ScpResponse>>,
}

/// One outstanding slot: a dispatched request awaiting its response.
pub(crate) struct Channel {
    /// Sequence number assigned for this request; unique among occupied slots
    pub seq: u16,
    /// Transmission attempts made so far
    pub n_tries: u32,
    /// Retransmission deadline; `None` until a send has completed
    pub deadline: Option<Instant>,
    /// The serialized packet, sequence number stamped
    pub packet: Bytes,
    /// Argument words expected in the response
    pub n_args_resp: usize,
    pub responder: oneshot::Sender<Result<ScpResponse>>,
}

pub(crate) struct ConnState {
    pub config: ConnectionConfig,
    pub peer: SocketAddr,
    pub queue: VecDeque<QueuedRequest>,
    channels: Vec<Option<Channel>>,
    next_seq: u16,
}

impl ConnState {
    pub fn new(peer: SocketAddr, config: ConnectionConfig) -> Self {
        let mut channels = Vec::with_capacity(config.n_outstanding);
        channels.resize_with(config.n_outstanding, || None);
        Self {
            config,
            peer,
            queue: VecDeque::new(),
            channels,
            next_seq: 0,
        }
    }

    /// Index of any free slot, if one exists.
    pub fn idle_slot(&self) -> Option<usize> {
        self.channels.iter().position(Option::is_none)
    }

    /// Allocate a sequence number not held by any occupied channel.
    ///
    /// Monotonic modulo 2¹⁶ with linear probing; the window is far smaller
    /// than the sequence space, so this terminates.
    pub fn allocate_seq(&mut self) -> u16 {
        loop {
            let seq = self.next_seq;
            self.next_seq = self.next_seq.wrapping_add(1);
            if !self
                .channels
                .iter()
                .flatten()
                .any(|channel| channel.seq == seq)
            {
                return seq;
            }
        }
    }

    /// Find the occupied slot holding the given sequence number.
    pub fn index_of_seq(&self, seq: u16) -> Option<usize> {
        self.channels
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|channel| channel.seq == seq))
    }

    pub fn install(&mut self, idx: usize, channel: Channel) {
        debug_assert!(self.channels[idx].is_none());
        self.channels[idx] = Some(channel);
    }

    pub fn channel_mut(&mut self, idx: usize) -> Option<&mut Channel> {
        self.channels.get_mut(idx).and_then(Option::as_mut)
    }

    pub fn channel(&self, idx: usize) -> Option<&Channel> {
        self.channels.get(idx).and_then(Option::as_ref)
    }

    /// Take the channel out of its slot, freeing the slot for reuse.
    pub fn take_channel(&mut self, idx: usize) -> Option<Channel> {
        self.channels.get_mut(idx).and_then(Option::take)
    }

    /// The earliest armed retransmission deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.channels
            .iter()
            .flatten()
            .filter_map(|channel| channel.deadline)
            .min()
    }

    /// Indices of channels whose deadline has passed.
    pub fn expired_channels(&self, now: Instant) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.as_ref()
                    .and_then(|channel| channel.deadline)
                    .is_some_and(|deadline| deadline <= now)
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Remove everything for teardown: all occupied channels and the queue.
    pub fn drain_all(&mut self) -> (Vec<Channel>, Vec<QueuedRequest>) {
        let channels = self
            .channels
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        let queue = self.queue.drain(..).collect();
        (channels, queue)
    }
}
