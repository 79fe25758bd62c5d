//! Building RST replies to offending segments (RFC 793 3.4).

use crate::segment::{SegmentView, TcpFlags};
use crate::seq;

/// A reset to transmit in answer to a specific inbound segment.
///
/// Unlike [crate::segment::SendRequest], the sequence numbers here are fixed
/// by the offending segment rather than by connection state, since most
/// resets answer segments for which no connection exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetReply {
    /// Sequence number for the outgoing reset.
    pub seqno: u32,
    /// Acknowledgment number for the outgoing reset.
    pub ackno: u32,
    /// `RST`, plus `ACK` when the offender carried no acknowledgment.
    pub flags: TcpFlags,
}

/// Derives the reset that answers `seg`, or `None` when the segment itself
/// is a reset. Never answer a reset with a reset: two confused endpoints
/// would volley them forever.
///
/// If the offender carried an acknowledgment, the reset borrows it as its
/// own sequence number so the offender will take it seriously. Otherwise
/// the reset takes sequence zero and acknowledges everything the offender
/// occupied, SYN and FIN included.
pub fn reset_for(seg: &SegmentView<'_>) -> Option<ResetReply> {
    if seg.flags.contains(TcpFlags::RST) {
        return None;
    }

    if seg.flags.contains(TcpFlags::ACK) {
        Some(ResetReply {
            seqno: seg.ackno,
            ackno: 0,
            flags: TcpFlags::RST,
        })
    } else {
        Some(ResetReply {
            seqno: 0,
            ackno: seq::seq_add(seg.seqno, seg.seg_len()),
            flags: TcpFlags::RST | TcpFlags::ACK,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Family;

    fn seg<'a>(flags: TcpFlags, seqno: u32, ackno: u32, payload: &'a [u8]) -> SegmentView<'a> {
        SegmentView {
            flags,
            seqno,
            ackno,
            wnd: 0,
            urgent_pointer: 0,
            options: &[],
            payload,
            family: Family::V4,
        }
    }

    #[test]
    fn reset_borrows_the_offenders_ack() {
        let reply = reset_for(&seg(TcpFlags::ACK, 100, 5000, b"xy")).unwrap();
        assert_eq!(reply.seqno, 5000);
        assert_eq!(reply.ackno, 0);
        assert_eq!(reply.flags, TcpFlags::RST);
    }

    #[test]
    fn reset_to_a_syn_acknowledges_it() {
        let reply = reset_for(&seg(TcpFlags::SYN, 100, 0, b"")).unwrap();
        assert_eq!(reply.seqno, 0);
        assert_eq!(reply.ackno, 101);
        assert_eq!(reply.flags, TcpFlags::RST | TcpFlags::ACK);
    }

    #[test]
    fn reset_without_ack_covers_payload_and_fin() {
        let reply = reset_for(&seg(TcpFlags::FIN, 100, 0, b"abc")).unwrap();
        assert_eq!(reply.ackno, 104);
    }

    #[test]
    fn never_reset_a_reset() {
        assert!(reset_for(&seg(TcpFlags::RST, 100, 0, b"")).is_none());
        assert!(reset_for(&seg(TcpFlags::RST | TcpFlags::ACK, 100, 7, b"")).is_none());
    }
}
