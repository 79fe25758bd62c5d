//! Send-window tracking and round-trip estimation.

use crate::conn::Connection;
use crate::segment::{SegmentView, TcpFlags};
use crate::{debug, seq};

/// Seeds the send-window bookkeeping from the segment that opened the
/// connection (the SYN-ACK, or the ACK completing a passive open).
///
/// `snd_wl1` is set one before the segment's sequence number so that the
/// very next window update cannot be mistaken for a duplicate, and the
/// window itself starts at zero so that the first real update always takes
/// effect.
pub fn init_send_window(conn: &mut Connection, seg: &SegmentView<'_>) {
    debug_assert!(seg.flags.contains(TcpFlags::ACK));

    conn.snd_wl1 = seg.seqno.wrapping_sub(1);
    conn.snd_wl2 = seg.ackno;
    conn.snd_wnd = 0;
}

/// Applies a segment's advertised window, following the RFC 1122 4.2.2.16
/// freshness rule: accept the advertisement only from a segment that is new
/// (`wl1 < seq`), acknowledges new data (`wl1 == seq && wl2 < ack`), or
/// repeats the latest acknowledgment with a larger window.
///
/// Before the freshness test, octets newly acknowledged since `wl2` are
/// subtracted from the current window (flooring at zero), since the peer's
/// advertisement was made relative to its old acknowledgment point.
///
/// Returns `true` if the usable window changed.
pub fn update_send_window(conn: &mut Connection, seg: &SegmentView<'_>) -> bool {
    debug_assert!(seg.flags.contains(TcpFlags::ACK));

    let seqno = seg.seqno;
    let ackno = seg.ackno;

    let unscaled = u32::from(seg.wnd);
    let wnd = if conn.wscale_ok {
        unscaled << conn.snd_scale
    } else {
        unscaled
    };

    if seq::seq_lt(conn.snd_wl2, ackno) {
        let nacked = seq::seq_sub(ackno, conn.snd_wl2);
        conn.snd_wnd = conn.snd_wnd.saturating_sub(nacked);
        conn.snd_wl2 = ackno;
    }

    if seq::seq_lt(conn.snd_wl1, seqno)
        || (conn.snd_wl1 == seqno && seq::seq_lt(conn.snd_wl2, ackno))
        || (conn.snd_wl2 == ackno && conn.snd_wnd < wnd)
    {
        conn.snd_wl1 = seqno;
        conn.snd_wl2 = ackno;

        if conn.snd_wnd != wnd {
            debug!("send window update: {} -> {wnd}", conn.snd_wnd);
            conn.snd_wnd = wnd;
            return true;
        }
    }

    false
}

/// Folds the just-measured round trip into the smoothed estimate and
/// deviation, Van Jacobson style, and derives the new retransmission
/// timeout.
///
/// The measurement is how far the retransmission timer had run down when
/// the acknowledgment arrived (`rto - timer`, in half-second ticks). All
/// arithmetic is deliberately 8-bit with wraparound, keeping `sa` scaled by
/// 8 and `sv` by 4. Skipped entirely while a retransmission is outstanding
/// (Karn's rule): such a sample cannot be attributed to a send.
pub fn rtt_sample(conn: &mut Connection) {
    if conn.nrtx != 0 {
        return;
    }

    // Signed 8-bit difference, truncating like the scaled counters it feeds.
    let mut m = (i32::from(conn.rto) - i32::from(conn.timer)) as i8;

    m = m.wrapping_sub((conn.sa >> 3) as i8);
    conn.sa = conn.sa.wrapping_add(m as u8);

    if m < 0 {
        m = m.wrapping_neg();
    }

    m = m.wrapping_sub((conn.sv >> 2) as i8);
    conn.sv = conn.sv.wrapping_add(m as u8);

    conn.rto = (conn.sa >> 3).wrapping_add(conn.sv);

    debug!(
        "rtt sample folded in: sa={}, sv={}, rto={}",
        conn.sa, conn.sv, conn.rto
    );
}

/// Retires an outstanding zero-window probe once the segment shows the peer
/// has reopened its window, resetting the retransmission counter and timer
/// so the probe backoff does not bleed into normal sending.
pub fn clear_zero_probe(conn: &mut Connection, seg: &SegmentView<'_>) {
    if seg.wnd != 0 && conn.zero_probe && seg.flags.contains(TcpFlags::ACK) {
        debug!("window reopened to {}: zero-window probe cleared", seg.wnd);
        conn.zero_probe = false;
        conn.nrtx = 0;
        conn.timer = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Family;

    fn ack_seg(seqno: u32, ackno: u32, wnd: u16) -> SegmentView<'static> {
        SegmentView {
            flags: TcpFlags::ACK,
            seqno,
            ackno,
            wnd,
            urgent_pointer: 0,
            options: &[],
            payload: &[],
            family: Family::V4,
        }
    }

    #[test]
    fn init_then_first_update_always_applies() {
        let mut conn = Connection::established(1000, 2000);
        let seg = ack_seg(1000, 2000, 500);

        init_send_window(&mut conn, &seg);
        assert_eq!(conn.snd_wl1, 999);
        assert_eq!(conn.snd_wl2, 2000);
        assert_eq!(conn.snd_wnd, 0);

        assert!(update_send_window(&mut conn, &seg));
        assert_eq!(conn.snd_wnd, 500);
        assert_eq!(conn.snd_wl1, 1000);
        assert_eq!(conn.snd_wl2, 2000);
    }

    #[test]
    fn repeated_segment_does_not_change_window() {
        let mut conn = Connection::established(1000, 2000);
        let seg = ack_seg(1000, 2000, 500);

        init_send_window(&mut conn, &seg);
        assert!(update_send_window(&mut conn, &seg));
        assert!(!update_send_window(&mut conn, &seg));
        assert_eq!(conn.snd_wnd, 500);
    }

    #[test]
    fn stale_segment_cannot_shrink_window() {
        let mut conn = Connection::established(1000, 2000);
        init_send_window(&mut conn, &ack_seg(1000, 2000, 500));
        assert!(update_send_window(&mut conn, &ack_seg(1005, 2000, 500)));

        // Older sequence number, smaller window: fails the freshness rule.
        assert!(!update_send_window(&mut conn, &ack_seg(1001, 2000, 100)));
        assert_eq!(conn.snd_wnd, 500);
    }

    #[test]
    fn same_ack_point_accepts_only_growth() {
        let mut conn = Connection::established(1000, 2000);
        init_send_window(&mut conn, &ack_seg(1000, 2000, 500));
        assert!(update_send_window(&mut conn, &ack_seg(1000, 2000, 500)));

        assert!(!update_send_window(&mut conn, &ack_seg(1000, 2000, 400)));
        assert_eq!(conn.snd_wnd, 500);

        assert!(update_send_window(&mut conn, &ack_seg(1000, 2000, 800)));
        assert_eq!(conn.snd_wnd, 800);
    }

    #[test]
    fn newly_acked_octets_shrink_the_usable_window() {
        let mut conn = Connection::established(1000, 2000);
        init_send_window(&mut conn, &ack_seg(1000, 2000, 500));
        assert!(update_send_window(&mut conn, &ack_seg(1000, 2000, 500)));

        // Peer acks 100 more octets: the pre-adjustment shrinks the usable
        // window to 400, then the repeated advertisement restores it.
        assert!(update_send_window(&mut conn, &ack_seg(1000, 2100, 500)));
        assert_eq!(conn.snd_wnd, 500);
        assert_eq!(conn.snd_wl2, 2100);

        // An ack with no fresh advertisement floors at zero, never wraps.
        conn.snd_wl1 = 1000;
        assert!(!update_send_window(&mut conn, &ack_seg(999, 3000, 0)));
        assert_eq!(conn.snd_wnd, 0);
    }

    #[test]
    fn scaled_advertisement_is_shifted() {
        let mut conn = Connection::established(1000, 2000);
        conn.wscale_ok = true;
        conn.snd_scale = 4;

        init_send_window(&mut conn, &ack_seg(1000, 2000, 100));
        assert!(update_send_window(&mut conn, &ack_seg(1000, 2000, 100)));
        assert_eq!(conn.snd_wnd, 1600);
    }

    #[test]
    fn rtt_sample_from_cold_start() {
        let mut conn = Connection::established(0, 0);
        conn.sa = 0;
        conn.sv = 0;
        conn.rto = 6;
        conn.timer = 2; // four ticks elapsed

        rtt_sample(&mut conn);

        // m = 4: sa becomes 4, sv becomes 4, rto = (4 >> 3) + 4.
        assert_eq!(conn.sa, 4);
        assert_eq!(conn.sv, 4);
        assert_eq!(conn.rto, 4);
    }

    #[test]
    fn rtt_sample_skipped_after_retransmit() {
        let mut conn = Connection::established(0, 0);
        conn.sa = 32;
        conn.sv = 8;
        conn.rto = 12;
        conn.timer = 2;
        conn.nrtx = 1;

        rtt_sample(&mut conn);

        assert_eq!(conn.sa, 32);
        assert_eq!(conn.sv, 8);
        assert_eq!(conn.rto, 12);
    }

    #[test]
    fn zero_probe_cleared_by_window_reopening() {
        let mut conn = Connection::established(1000, 2000);
        conn.zero_probe = true;
        conn.nrtx = 3;
        conn.timer = 24;

        // A zero-window ack leaves the probe outstanding.
        clear_zero_probe(&mut conn, &ack_seg(1000, 2000, 0));
        assert!(conn.zero_probe);

        // So does a non-ack segment.
        let mut seg = ack_seg(1000, 2000, 100);
        seg.flags = TcpFlags::empty();
        clear_zero_probe(&mut conn, &seg);
        assert!(conn.zero_probe);

        clear_zero_probe(&mut conn, &ack_seg(1000, 2000, 100));
        assert!(!conn.zero_probe);
        assert_eq!(conn.nrtx, 0);
        assert_eq!(conn.timer, 0);
    }
}
