//! TCP option parsing for SYN and SYN-ACK segments.

use crate::conn::Connection;
use crate::debug;

/// End of option list.
pub const OPT_END: u8 = 0;
/// No-operation padding.
pub const OPT_NOOP: u8 = 1;
/// Maximum segment size (RFC 793).
pub const OPT_MSS: u8 = 2;
/// Window scale (RFC 7323).
pub const OPT_WS: u8 = 3;
/// SACK permitted (RFC 2018).
pub const OPT_SACK_PERM: u8 = 4;

const OPT_MSS_LEN: u8 = 4;
const OPT_WS_LEN: u8 = 3;
const OPT_SACK_PERM_LEN: u8 = 2;

/// Largest usable window-scale shift (RFC 7323 section 2.3).
const WS_SHIFT_MAX: u8 = 14;

/// Walks the option area of a SYN or SYN-ACK and applies the recognized
/// options to the connection.
///
/// - MSS: the negotiated value is the smaller of the peer's advertisement
///   and our own limit (interface MSS, further capped by any user request).
/// - Window scale: records the peer's shift and marks scaling as agreed.
/// - SACK permitted: marks the peer as SACK-capable.
///
/// Unknown options are skipped over their declared length. A zero length
/// byte would otherwise wedge the walk in place, so it aborts parsing, as
/// does any option that claims more octets than the area holds.
pub fn parse(conn: &mut Connection, opts: &[u8]) {
    let mut i = 0usize;

    while i < opts.len() {
        let opt = opts[i];

        if opt == OPT_END {
            break;
        }
        if opt == OPT_NOOP {
            i += 1;
            continue;
        }

        // Every remaining option kind carries a length octet.
        let Some(&len) = opts.get(i + 1) else {
            break;
        };
        if len < 2 || i + usize::from(len) > opts.len() {
            // Malformed; bail before the walk stalls or overruns.
            break;
        }

        match opt {
            OPT_MSS if len == OPT_MSS_LEN => {
                let mut limit = conn.config.mss;
                if let Some(user_mss) = conn.config.user_mss {
                    if user_mss > 0 && user_mss < limit {
                        limit = user_mss;
                    }
                }

                let peer = u16::from_be_bytes([opts[i + 2], opts[i + 3]]);
                conn.mss = peer.min(limit);

                debug!("peer advertised MSS {peer}: negotiated {}", conn.mss);
            }
            OPT_WS if len == OPT_WS_LEN => {
                // RFC 7323 requires a shift above 14 to be treated as 14,
                // not taken at face value; an unclamped value would also
                // overflow the scaling shift later.
                conn.snd_scale = opts[i + 2].min(WS_SHIFT_MAX);
                conn.rcv_scale = conn.config.wscale;
                conn.wscale_ok = true;

                debug!("window scaling agreed: snd_scale={}", conn.snd_scale);
            }
            OPT_SACK_PERM if len == OPT_SACK_PERM_LEN => {
                conn.sack_ok = true;
            }
            _ => {}
        }

        i += usize::from(len);
    }
}
