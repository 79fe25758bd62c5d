//! Parsed view of an inbound TCP segment and requests for outbound ones.

use crate::{debug, error, seq};

bitflags::bitflags! {
    /// TCP header control flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TcpFlags: u8 {
        /// No more data from sender.
        const FIN = 0x01;
        /// Synchronize sequence numbers.
        const SYN = 0x02;
        /// Reset the connection.
        const RST = 0x04;
        /// Push function.
        const PSH = 0x08;
        /// Acknowledgment field is significant.
        const ACK = 0x10;
        /// Urgent pointer field is significant.
        const URG = 0x20;
    }
}

impl TcpFlags {
    /// The flags that determine how a segment is dispatched.
    pub const CTL: TcpFlags = TcpFlags::SYN
        .union(TcpFlags::ACK)
        .union(TcpFlags::RST)
        .union(TcpFlags::FIN);
}

/// Address family the segment arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

/// A borrowed, already-validated view of one inbound segment.
///
/// Header parsing and checksum verification happen below this layer; the
/// engine only sees fields in host byte order plus the raw option area and
/// payload. The view is mutable because duplicate data is trimmed in place
/// before the segment reaches the state machine.
#[derive(Debug)]
pub struct SegmentView<'a> {
    /// Control flags from the header.
    pub flags: TcpFlags,
    /// Sequence number of the first octet (or of the SYN, if set).
    pub seqno: u32,
    /// Acknowledgment number, meaningful when [TcpFlags::ACK] is set.
    pub ackno: u32,
    /// Advertised receive window, unscaled as it appears on the wire.
    pub wnd: u16,
    /// Urgent pointer, meaningful when [TcpFlags::URG] is set.
    pub urgent_pointer: u16,
    /// Raw option area between the fixed header and the payload.
    pub options: &'a [u8],
    /// Segment payload.
    pub payload: &'a [u8],
    /// Address family the segment arrived over.
    pub family: Family,
}

impl SegmentView<'_> {
    /// Sequence space the segment occupies: payload length plus one for SYN
    /// and one for FIN (RFC 793 `SEG.LEN`).
    pub fn seg_len(&self) -> u32 {
        let mut len = self.payload.len() as u32;
        if self.flags.contains(TcpFlags::SYN) {
            len += 1;
        }
        if self.flags.contains(TcpFlags::FIN) {
            len += 1;
        }
        len
    }

    /// Drops the first `trimlen` units of sequence space from the segment.
    ///
    /// A leading SYN is consumed first, then payload octets, then a trailing
    /// FIN, advancing `seqno` for each unit removed. The urgent pointer is
    /// pulled back by the amount trimmed and cleared once it no longer points
    /// into the segment.
    ///
    /// Returns `true` when nothing deliverable remains (no payload and
    /// neither SYN nor FIN survive), in which case the caller should answer
    /// with a bare ACK and drop the segment.
    pub fn trim_head(&mut self, mut trimlen: u32) -> bool {
        let mut trimmed: u32 = 0;

        debug!(
            "trimming {trimlen} units: seq={}, flags={:?}, len={}, urg_ptr={}",
            self.seqno,
            self.flags,
            self.payload.len(),
            self.urgent_pointer
        );

        if trimlen > 0 && self.flags.contains(TcpFlags::SYN) {
            self.seqno = seq::seq_add(self.seqno, 1);
            self.flags.remove(TcpFlags::SYN);
            trimmed += 1;
            trimlen -= 1;
        }

        if trimlen > 0 && !self.payload.is_empty() {
            let len = (trimlen as usize).min(self.payload.len());
            self.seqno = seq::seq_add(self.seqno, len as u32);
            self.payload = &self.payload[len..];
            trimmed += len as u32;
            trimlen -= len as u32;
        }

        if trimlen > 0 && self.flags.contains(TcpFlags::FIN) {
            self.seqno = seq::seq_add(self.seqno, 1);
            self.flags.remove(TcpFlags::FIN);
            trimmed += 1;
            trimlen -= 1;
        }

        if self.flags.contains(TcpFlags::URG) {
            if trimmed >= u32::from(self.urgent_pointer) {
                self.flags.remove(TcpFlags::URG);
                self.urgent_pointer = 0;
            } else {
                self.urgent_pointer -= trimmed as u16;
            }
        }

        if self.payload.is_empty() && !self.flags.intersects(TcpFlags::SYN | TcpFlags::FIN) {
            return true;
        }

        if trimlen != 0 {
            // The caller asked to trim past the end of the segment while
            // deliverable content remains, which the sequence check should
            // have made impossible.
            error!("residual trim of {trimlen} units on a non-empty segment");
            debug_assert_eq!(trimlen, 0);
        }

        false
    }
}

/// An outbound segment the engine wants transmitted on the connection.
///
/// Sequence and acknowledgment numbers are not included; the transmit path
/// fills them from the connection's current `sndseq`/`rcvseq` when it builds
/// the header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendRequest {
    /// Control flags for the outgoing header.
    pub flags: TcpFlags,
    /// Payload to carry, empty for pure control segments.
    pub payload: Vec<u8>,
}

impl SendRequest {
    /// A payload-less control segment with the given flags.
    pub fn control(flags: TcpFlags) -> Self {
        Self {
            flags,
            payload: Vec::new(),
        }
    }
}
