//! # SCP Wire Format
//!
//! Packing and unpacking of SCP commands encapsulated in SDP, as carried in
//! UDP datagrams to and from a SpiNNaker machine. This module is pure
//! functions over byte buffers; sequence numbers are assigned by the
//! transport and stamped into an already-packed packet.
//!
//! ## Datagram layout
//!
//! All numeric fields are little-endian.
//!
//! ```text
//! Offset  Size  Field
//! ──────────────────────────────────────────────────────
//!   0      2    Padding (0x00 0x00)
//!   2      1    SDP flags (0x87: reply expected)
//!   3      1    SDP tag
//!   4      1    Destination port/CPU ((port << 5) | cpu)
//!   5      1    Source port/CPU
//!   6      2    Destination chip address ((x << 8) | y)
//!   8      2    Source chip address
//!  10      2    cmd_rc (command code / response code)
//!  12      2    Sequence number
//!  14    4·n    Argument words, n ∈ {0..3}
//!   …      …    Data payload
//! ──────────────────────────────────────────────────────
//! ```
//!
//! A response echoes the request's sequence number at the same offset, which
//! is all the transport needs to demultiplex it. The number of argument
//! words in a response is not self-describing: the command that was sent
//! determines how many of the trailing bytes are arguments, so [`unpack`]
//! takes the expected count and derives the actual one from the datagram
//! length.
//!
//! The codec fails only on short buffers; all other bytes are accepted.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ChipAddr;

/// Bytes before the argument words: padding + SDP header + cmd_rc + seq.
pub const HEADER_LEN: usize = 14;

/// Byte offset of the 16-bit sequence-number slot.
pub const SEQ_OFFSET: usize = 12;

/// Maximum number of 32-bit argument words per packet.
pub const MAX_ARGS: usize = 3;

/// Response code indicating success.
pub const CMD_OK: u16 = 0x80;

/// Command code: query version information.
pub const CMD_VER: u16 = 0;

/// Command code: read machine memory.
pub const CMD_READ: u16 = 2;

/// Command code: write machine memory.
pub const CMD_WRITE: u16 = 3;

/// SDP flags byte requesting a reply.
const SDP_FLAGS_REPLY: u8 = 0x87;

/// IP tag for externally originated packets.
const SDP_TAG: u8 = 0xFF;

/// Source port/CPU marker for packets originating off-machine.
const SDP_SRCE_PORT_CPU: u8 = 0xFF;

/// Memory access granularity for read/write commands, encoded in the third
/// argument word. The machine rejects transfers whose address or length is
/// not a multiple of the granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AccessMode {
    Byte = 0,
    Half = 1,
    Word = 2,
}

impl AccessMode {
    /// Pick the widest granularity both the address and length are aligned to.
    pub fn for_transfer(address: u32, len: u32) -> Self {
        if address % 4 == 0 && len % 4 == 0 {
            Self::Word
        } else if address % 2 == 0 && len % 2 == 0 {
            Self::Half
        } else {
            Self::Byte
        }
    }

    pub fn value(self) -> u32 {
        self as u32
    }
}

/// Serialize an SCP packet. The sequence-number slot is written as zero;
/// the transport stamps the assigned value with [`stamp_seq`] before the
/// first transmission.
///
/// `args` may hold at most [`MAX_ARGS`] words and `data` at most the
/// connection's `scp_data_length` bytes; both are enforced by the caller.
pub fn pack(dest: ChipAddr, cpu: u8, cmd_rc: u16, args: &[u32], data: &[u8]) -> BytesMut {
    debug_assert!(args.len() <= MAX_ARGS);

    let mut buf = BytesMut::with_capacity(HEADER_LEN + 4 * args.len() + data.len());
    buf.put_u16(0); // UDP framing padding
    buf.put_u8(SDP_FLAGS_REPLY);
    buf.put_u8(SDP_TAG);
    buf.put_u8(cpu & 0x1F); // SDP port 0: SC&MP
    buf.put_u8(SDP_SRCE_PORT_CPU);
    buf.put_u16_le(dest.value());
    buf.put_u16_le(0); // source chip address
    buf.put_u16_le(cmd_rc);
    buf.put_u16_le(0); // sequence number, stamped later
    for &arg in args {
        buf.put_u32_le(arg);
    }
    buf.put_slice(data);
    buf
}

/// Write the assigned sequence number into a packed packet.
pub fn stamp_seq(packet: &mut [u8], seq: u16) {
    debug_assert!(packet.len() >= HEADER_LEN);
    packet[SEQ_OFFSET..SEQ_OFFSET + 2].copy_from_slice(&seq.to_le_bytes());
}

/// Extract the sequence number from a datagram, if it is long enough to be
/// an SCP packet at all.
pub fn peek_seq(datagram: &[u8]) -> Option<u16> {
    if datagram.len() < HEADER_LEN {
        return None;
    }
    Some(u16::from_le_bytes([
        datagram[SEQ_OFFSET],
        datagram[SEQ_OFFSET + 1],
    ]))
}

/// A decoded SCP datagram.
#[derive(Debug, Clone)]
pub struct ScpFrame {
    pub seq: u16,
    pub cmd_rc: u16,
    /// Argument words actually present (≤ the expected count)
    pub n_args: usize,
    /// Argument values; zero for those not present
    pub args: [u32; MAX_ARGS],
    /// Payload after the argument words
    pub data: Bytes,
}

/// Decode a received datagram, splitting the trailing bytes into up to
/// `n_args_expected` argument words and a data payload. Returns `None` only
/// when the datagram is too short to carry an SCP header.
pub fn unpack(datagram: &[u8], n_args_expected: usize) -> Option<ScpFrame> {
    if datagram.len() < HEADER_LEN {
        return None;
    }

    let mut cursor = &datagram[..];
    cursor.advance(10); // padding + SDP header
    let cmd_rc = cursor.get_u16_le();
    let seq = cursor.get_u16_le();

    let n_args = n_args_expected
        .min(MAX_ARGS)
        .min(cursor.remaining() / 4);
    let mut args = [0u32; MAX_ARGS];
    for arg in args.iter_mut().take(n_args) {
        *arg = cursor.get_u32_le();
    }

    Some(ScpFrame {
        seq,
        cmd_rc,
        n_args,
        args,
        data: Bytes::copy_from_slice(cursor),
    })
}
