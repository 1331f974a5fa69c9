//! # scp-runtime
//!
//! An async client for the SpiNNaker Command Protocol (SCP) over UDP,
//! built on tokio.
//!
//! SCP is a request/response protocol spoken by the SC&MP monitor running on
//! every SpiNNaker chip. Each request carries a 16-bit sequence number; the
//! response echoes it. The machine answers on UDP port 17893 and tolerates a
//! small window of simultaneously outstanding commands. This crate hides
//! packetisation, sequence-number management, windowing, retransmission,
//! response reordering and bulk-transfer segmentation behind a handful of
//! async methods.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scp_runtime::{ChipAddr, ConnectionConfig, ScpConnection};
//!
//! #[tokio::main]
//! async fn main() -> scp_runtime::Result<()> {
//!     let peer = "192.168.240.1:17893".parse().unwrap();
//!     let conn = ScpConnection::connect(peer, ConnectionConfig::default()).await?;
//!
//!     // Query the monitor processor
//!     let ver = conn.version(ChipAddr::new(0, 0), 0).await?;
//!     println!("running {} v{:.2}", ver.name, ver.version);
//!
//!     // Bulk memory access; segmentation and windowing are automatic
//!     let data = bytes::Bytes::from(vec![0xA5; 128 * 1024]);
//!     conn.write(ChipAddr::new(0, 0), 0, 0x6024_0000, data.clone()).await?;
//!     let back = conn.read(ChipAddr::new(0, 0), 0, 0x6024_0000, 128 * 1024).await?;
//!     assert_eq!(data, back);
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Each [`ScpConnection`] spawns one event-loop task that owns the UDP socket
//! and all transport state: a fixed pool of outstanding-request channels, the
//! FIFO request queue, the sequence allocator and the per-attempt retry
//! timers. Handles are cheap clones that talk to the loop over a command
//! channel; every request resolves exactly once, with a response or with one
//! of the [`Error`] kinds.

use bytes::Bytes;

pub mod config;
pub mod error;
pub mod net;

/// Wire format packing/unpacking for SCP-over-SDP datagrams.
/// Exposed for testing and interoperability verification.
pub mod wire;

mod handle;
mod runtime;

pub use config::{ConnectionConfig, ConnectionConfigBuilder};
pub use error::{Error, Result};
pub use handle::ScpConnection;
pub use wire::{AccessMode, CMD_OK, CMD_READ, CMD_VER, CMD_WRITE};

// ============================================================================
// PROTOCOL IDENTIFIERS
// ============================================================================

/// Packed chip address: `(x << 8) | y`, as carried in the SDP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChipAddr(u16);

impl ChipAddr {
    /// Pack an (x, y) chip coordinate.
    pub const fn new(x: u8, y: u8) -> Self {
        Self((x as u16) << 8 | y as u16)
    }

    /// Wrap a raw packed address.
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn x(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn y(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Get the raw packed value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for ChipAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x(), self.y())
    }
}

// ============================================================================
// REQUESTS AND RESPONSES
// ============================================================================

/// A single SCP command to be exchanged with the machine.
///
/// Built with [`ScpRequest::new`] and the chained setters; defaults are no
/// arguments, no payload and no argument words expected in the response.
#[derive(Debug, Clone)]
pub struct ScpRequest {
    /// Destination chip
    pub dest: ChipAddr,
    /// Destination CPU on that chip (0-17)
    pub cpu: u8,
    /// Command code (e.g. [`CMD_VER`])
    pub cmd: u16,
    /// Argument words to send (0 to 3 used)
    pub args: [u32; 3],
    /// Number of argument words to send
    pub n_args: usize,
    /// Data payload; at most `scp_data_length` bytes
    pub data: Bytes,
    /// Number of argument words expected in the response (0 to 3).
    /// Anything beyond these in the response datagram is payload.
    pub n_args_resp: usize,
}

impl ScpRequest {
    /// Create a request with no arguments and no payload.
    pub fn new(dest: ChipAddr, cpu: u8, cmd: u16) -> Self {
        Self {
            dest,
            cpu,
            cmd,
            args: [0; 3],
            n_args: 0,
            data: Bytes::new(),
            n_args_resp: 0,
        }
    }

    /// Set the argument words. At most three are sent.
    pub fn with_args(mut self, args: &[u32]) -> Self {
        debug_assert!(args.len() <= wire::MAX_ARGS);
        let n = args.len().min(wire::MAX_ARGS);
        self.args[..n].copy_from_slice(&args[..n]);
        self.n_args = n;
        self
    }

    /// Set the data payload.
    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = data;
        self
    }

    /// Set how many argument words the response carries.
    pub fn expect_args(mut self, n: usize) -> Self {
        debug_assert!(n <= wire::MAX_ARGS);
        self.n_args_resp = n.min(wire::MAX_ARGS);
        self
    }
}

/// Response to a single SCP command.
///
/// Note that a response is delivered even when the machine reports a failure
/// code: check [`ScpResponse::is_ok`] or inspect `cmd_rc` directly. Only
/// transport-level failures (timeout, I/O, cancellation) surface as [`Error`].
#[derive(Debug, Clone)]
pub struct ScpResponse {
    /// Response code; [`CMD_OK`] on success
    pub cmd_rc: u16,
    /// Number of argument words actually present
    pub n_args: usize,
    pub arg1: u32,
    pub arg2: u32,
    pub arg3: u32,
    /// Data payload after the argument words
    pub data: Bytes,
}

impl ScpResponse {
    pub fn is_ok(&self) -> bool {
        self.cmd_rc == CMD_OK
    }
}

/// Decoded `CMD_VER` response from a monitor processor.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Chip the response came from
    pub chip: ChipAddr,
    /// CPU number on that chip
    pub cpu: u8,
    /// Software version, e.g. 2.70
    pub version: f64,
    /// Software name string, e.g. "SC&MP"
    pub name: String,
}

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub mod prelude {
    pub use crate::{
        ChipAddr, ConnectionConfig, Error, Result, ScpConnection, ScpRequest, ScpResponse,
        VersionInfo,
    };
}
