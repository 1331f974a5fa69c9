//! Shared test support: tracing setup and an in-memory mock of a SpiNNaker
//! machine sitting behind the `UdpSocket` trait, with scriptable loss,
//! response reordering and a byte-addressable memory image.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use scp_runtime::net::UdpSocket;
use scp_runtime::wire;
use scp_runtime::ChipAddr;

/// Where the mock machine's memory image lives.
pub const MEMORY_BASE: u32 = 0x6024_0000;

const PEER_ADDR: &str = "10.0.0.42:17893";
const LOCAL_ADDR: &str = "10.0.0.1:49152";

pub fn configure_tracing() {
    use std::sync::OnceLock;
    static TRACING_INIT: OnceLock<()> = OnceLock::new();
    TRACING_INIT.get_or_init(|| {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::builder()
                        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                        .from_env_lossy(),
                )
                .with_test_writer()
                .finish(),
        )
        .expect("Configure tracing");
    });
}

/// Which inbound datagrams the mock machine pretends never arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossPolicy {
    /// Deliver everything
    None,
    /// Drop the first N attempts of every request (counted per sequence number)
    DropFirstAttempts(u32),
    /// Drop every other datagram, starting with the first
    DropEveryOther,
    /// Drop everything
    DropAll,
}

/// When the mock machine releases its responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Respond as soon as a request arrives
    Immediate,
    /// Keep responses until the test releases them
    Hold,
    /// Collect batches of N responses, then release each batch in reverse order
    ReverseBatches(usize),
}

struct PeerState {
    inbound_tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    loss: LossPolicy,
    release: ReleaseMode,
    fail_sends: bool,
    rc_override: Option<u16>,
    fail_reads_at: Option<(u32, u16)>,
    memory: Vec<u8>,
    datagrams_received: usize,
    attempts: HashMap<u16, u32>,
    seen: HashSet<u16>,
    requests_seen: usize,
    pending: usize,
    max_pending: usize,
    held: VecDeque<Vec<u8>>,
    socket_dropped: bool,
}

impl PeerState {
    fn handle_datagram(&mut self, datagram: &[u8]) {
        self.datagrams_received += 1;

        let Some(frame) = wire::unpack(datagram, 3) else {
            return;
        };
        let seq = frame.seq;

        if self.seen.insert(seq) {
            self.requests_seen += 1;
            self.pending += 1;
            self.max_pending = self.max_pending.max(self.pending);
        }
        let attempt = {
            let counter = self.attempts.entry(seq).or_insert(0);
            *counter += 1;
            *counter
        };

        let dropped = match self.loss {
            LossPolicy::None => false,
            LossPolicy::DropAll => true,
            LossPolicy::DropFirstAttempts(n) => attempt <= n,
            LossPolicy::DropEveryOther => self.datagrams_received % 2 == 1,
        };
        if dropped {
            return;
        }

        let cpu = datagram[4] & 0x1F;
        let dest = u16::from_le_bytes([datagram[6], datagram[7]]);
        let (rc, args, data) = self.execute(&frame, dest, cpu);

        let mut packet = wire::pack(ChipAddr::from_raw(dest), cpu, rc, &args, &data);
        wire::stamp_seq(&mut packet, seq);
        self.queue_response(packet.to_vec());
    }

    fn execute(&mut self, frame: &wire::ScpFrame, dest: u16, cpu: u8) -> (u16, Vec<u32>, Vec<u8>) {
        if let Some(rc) = self.rc_override {
            return (rc, vec![], vec![]);
        }

        match frame.cmd_rc {
            wire::CMD_VER => {
                let x = u32::from(dest >> 8);
                let y = u32::from(dest & 0xFF);
                let arg1 = (x << 24) | (y << 16) | u32::from(cpu);
                let arg2 = 270 << 16; // v2.70
                (wire::CMD_OK, vec![arg1, arg2, 0], b"Mock/SC&MP\0".to_vec())
            }
            wire::CMD_READ => {
                let addr = frame.args[0];
                let len = frame.args[1] as usize;
                if let Some((fail_addr, rc)) = self.fail_reads_at {
                    if addr == fail_addr {
                        return (rc, vec![], vec![]);
                    }
                }
                if wire::AccessMode::for_transfer(addr, frame.args[1]).value() != frame.args[2] {
                    return (0xDC, vec![], vec![]);
                }
                match self.memory_range(addr, len) {
                    Some(range) => (wire::CMD_OK, vec![], self.memory[range].to_vec()),
                    None => (0xFF, vec![], vec![]),
                }
            }
            wire::CMD_WRITE => {
                let addr = frame.args[0];
                let len = frame.args[1] as usize;
                if frame.data.len() != len {
                    return (0xDE, vec![], vec![]);
                }
                if wire::AccessMode::for_transfer(addr, frame.args[1]).value() != frame.args[2] {
                    return (0xDC, vec![], vec![]);
                }
                match self.memory_range(addr, len) {
                    Some(range) => {
                        self.memory[range].copy_from_slice(&frame.data);
                        (wire::CMD_OK, vec![], vec![])
                    }
                    None => (0xFF, vec![], vec![]),
                }
            }
            _ => (0xFF, vec![], vec![]),
        }
    }

    fn memory_range(&self, addr: u32, len: usize) -> Option<std::ops::Range<usize>> {
        let offset = addr.checked_sub(MEMORY_BASE)? as usize;
        let end = offset.checked_add(len)?;
        (end <= self.memory.len()).then_some(offset..end)
    }

    fn queue_response(&mut self, packet: Vec<u8>) {
        match self.release {
            ReleaseMode::Immediate => self.deliver(packet),
            ReleaseMode::Hold => self.held.push_back(packet),
            ReleaseMode::ReverseBatches(batch_size) => {
                self.held.push_back(packet);
                if self.held.len() >= batch_size {
                    let batch: Vec<_> = self.held.drain(..).collect();
                    for packet in batch.into_iter().rev() {
                        self.deliver(packet);
                    }
                }
            }
        }
    }

    fn deliver(&mut self, packet: Vec<u8>) {
        self.pending = self.pending.saturating_sub(1);
        let _ = self.inbound_tx.send(packet);
    }
}

/// Test-side control handle for the mock machine.
#[derive(Clone)]
pub struct MockNet {
    shared: Arc<Mutex<PeerState>>,
}

/// The client-side socket handed to `ScpConnection::from_socket`.
pub struct MockSocket {
    shared: Arc<Mutex<PeerState>>,
    inbound_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// Create a mock machine and the socket connected to it.
pub fn mock_link() -> (MockNet, MockSocket) {
    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let shared = Arc::new(Mutex::new(PeerState {
        inbound_tx,
        loss: LossPolicy::None,
        release: ReleaseMode::Immediate,
        fail_sends: false,
        rc_override: None,
        fail_reads_at: None,
        memory: Vec::new(),
        datagrams_received: 0,
        attempts: HashMap::new(),
        seen: HashSet::new(),
        requests_seen: 0,
        pending: 0,
        max_pending: 0,
        held: VecDeque::new(),
        socket_dropped: false,
    }));
    (
        MockNet {
            shared: Arc::clone(&shared),
        },
        MockSocket {
            shared,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        },
    )
}

/// The peer address tests connect to.
pub fn peer_addr() -> SocketAddr {
    PEER_ADDR.parse().unwrap()
}

impl MockNet {
    pub fn set_loss(&self, loss: LossPolicy) {
        self.shared.lock().unwrap().loss = loss;
    }

    pub fn set_release(&self, release: ReleaseMode) {
        self.shared.lock().unwrap().release = release;
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.shared.lock().unwrap().fail_sends = fail;
    }

    pub fn set_rc_override(&self, rc: Option<u16>) {
        self.shared.lock().unwrap().rc_override = rc;
    }

    pub fn fail_reads_at(&self, addr: u32, rc: u16) {
        self.shared.lock().unwrap().fail_reads_at = Some((addr, rc));
    }

    /// Give the machine a zeroed memory image of `size` bytes at [`MEMORY_BASE`].
    pub fn set_memory(&self, size: usize) {
        self.shared.lock().unwrap().memory = vec![0; size];
    }

    /// Give the machine a pre-filled memory image at [`MEMORY_BASE`].
    pub fn load_memory(&self, image: Vec<u8>) {
        self.shared.lock().unwrap().memory = image;
    }

    pub fn memory(&self) -> Vec<u8> {
        self.shared.lock().unwrap().memory.clone()
    }

    pub fn datagrams_received(&self) -> usize {
        self.shared.lock().unwrap().datagrams_received
    }

    /// Distinct requests (by sequence number) the machine has seen.
    pub fn requests_seen(&self) -> usize {
        self.shared.lock().unwrap().requests_seen
    }

    /// High-water mark of simultaneously unanswered requests.
    pub fn max_pending(&self) -> usize {
        self.shared.lock().unwrap().max_pending
    }

    pub fn held_count(&self) -> usize {
        self.shared.lock().unwrap().held.len()
    }

    /// Release the oldest held response.
    pub fn release_one(&self) {
        let mut state = self.shared.lock().unwrap();
        if let Some(packet) = state.held.pop_front() {
            state.deliver(packet);
        }
    }

    /// Release every held response in arrival order.
    pub fn release_all(&self) {
        let mut state = self.shared.lock().unwrap();
        while let Some(packet) = state.held.pop_front() {
            state.deliver(packet);
        }
    }

    /// Push an arbitrary datagram at the client, bypassing the machine model.
    pub fn inject(&self, datagram: Vec<u8>) {
        let state = self.shared.lock().unwrap();
        let _ = state.inbound_tx.send(datagram);
    }

    /// Whether the client side has dropped its socket.
    pub fn socket_closed(&self) -> bool {
        self.shared.lock().unwrap().socket_dropped
    }
}

impl UdpSocket for MockSocket {
    async fn bind(_addr: SocketAddr) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "mock sockets are created with mock_link()",
        ))
    }

    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> io::Result<usize> {
        let mut state = self.shared.lock().unwrap();
        if state.fail_sends {
            return Err(io::Error::other("injected send failure"));
        }
        state.handle_datagram(buf);
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
            Some(datagram) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok((len, peer_addr()))
            }
            // Both halves hold the shared state, so the sender cannot drop
            // while this socket is alive.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(LOCAL_ADDR.parse().unwrap())
    }
}

impl Drop for MockSocket {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            state.socket_dropped = true;
        }
    }
}

/// Let the transport task run until it has nothing left to do right now.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
}
