//! Per-connection state: the transmission control block and its knobs.

use crate::ofoseg::OfoPool;
use crate::segment::{SegmentView, SendRequest, TcpFlags};
use crate::{options, seq};

/// Initial retransmission timeout, in half-second ticks.
pub const RTO_INITIAL: u8 = 3;

/// Maximum Segment Lifetime, in seconds.
pub const MSL: u16 = 60;

/// How long a connection lingers in `TIME_WAIT`, in half-second ticks
/// (2 * MSL, RFC 793 3.5).
pub const TIME_WAIT_TIMEOUT: u16 = 2 * MSL * 2;

/// Default send MSS when the peer advertises none (RFC 1122 4.2.2.6).
pub const DEFAULT_MSS: u16 = 536;

/// TCP connection states (RFC 793 3.2).
///
/// `LISTEN` has no representation here; listening is a demultiplexer concern
/// and a connection only comes into existence once a SYN is accepted.
/// `CLOSE_WAIT` is likewise absent: an inbound FIN is either consented to,
/// moving straight to `LAST_ACK`, or refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum State {
    /// SYN received, SYN-ACK sent, waiting for the completing ACK.
    SYN_RCVD,
    /// SYN sent, waiting for a matching SYN-ACK.
    SYN_SENT,
    /// Connection open, data flows both ways.
    ESTABLISHED,
    /// Our FIN sent, neither it nor the peer's FIN acknowledged yet.
    FIN_WAIT_1,
    /// Our FIN acknowledged, waiting for the peer's FIN.
    FIN_WAIT_2,
    /// Both sides sent FIN, ours not yet acknowledged.
    CLOSING,
    /// Both FINs exchanged, lingering to absorb stray retransmits.
    TIME_WAIT,
    /// Peer's FIN consumed, waiting for the ACK of our FIN.
    LAST_ACK,
    /// Connection is finished; freed once the last reference drops.
    CLOSED,
}

/// Tunables fixed at connection creation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Receive window advertised to the peer.
    pub rcv_wnd: u16,
    /// MSS derived from the local interface MTU.
    pub mss: u16,
    /// Application-requested MSS cap, applied on top of [Config::mss].
    pub user_mss: Option<u16>,
    /// Window scale shift we request for our receive window.
    pub wscale: u8,
    /// Byte budget for buffered out-of-order data.
    pub ofo_bufsize: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rcv_wnd: 4096,
            mss: 1460,
            user_mss: None,
            wscale: 0,
            ofo_bufsize: 16384,
        }
    }
}

/// Counters for segments the engine received, refused, or discarded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Segments handed to the engine.
    pub recv: u32,
    /// Segments dropped without effect.
    pub drop: u32,
    /// Resets sent in response to offending segments.
    pub synrst: u32,
    /// SYNs dropped for want of a listener or backlog slot.
    pub syndrop: u32,
    /// Out-of-order segments the pool refused to buffer.
    pub ofodrop: u32,
}

/// The transmission control block for one connection.
///
/// Sequence variables follow RFC 793 3.2: `sndseq` is the oldest
/// unacknowledged octet (`SND.UNA`), `sndseq_max` the next sequence number to
/// send, `rcvseq` the next expected inbound octet (`RCV.NXT`).
#[derive(Debug)]
pub struct Connection {
    /// Current connection state.
    pub state: State,
    /// Our initial send sequence number.
    pub iss: u32,
    /// Oldest unacknowledged outbound sequence number.
    pub sndseq: u32,
    /// Next outbound sequence number past everything queued.
    pub sndseq_max: u32,
    /// Next inbound sequence number we expect.
    pub rcvseq: u32,
    /// Peer's receive window, scaled into octets.
    pub snd_wnd: u32,
    /// Sequence number of the segment that last updated [Connection::snd_wnd].
    pub snd_wl1: u32,
    /// Acknowledgment number of the segment that last updated [Connection::snd_wnd].
    pub snd_wl2: u32,
    /// Octets (plus SYN/FIN units) sent but not yet acknowledged.
    pub tx_unacked: u32,
    /// Retransmissions of the oldest outstanding segment.
    pub nrtx: u8,
    /// Smoothed round-trip average, scaled by 8 (Van Jacobson).
    pub sa: u8,
    /// Round-trip deviation, scaled by 4.
    pub sv: u8,
    /// Current retransmission timeout, in half-second ticks.
    pub rto: u8,
    /// Ticks until the pending timer event fires; 0 means no event pending.
    pub timer: u16,
    /// A zero-window probe is outstanding.
    pub zero_probe: bool,
    /// Receive window we advertise.
    pub rcv_wnd: u16,
    /// Scale shift to apply to windows the peer advertises.
    pub snd_scale: u8,
    /// Scale shift the peer applies to windows we advertise.
    pub rcv_scale: u8,
    /// Negotiated maximum segment size for sending.
    pub mss: u16,
    /// Both sides agreed on window scaling.
    pub wscale_ok: bool,
    /// Peer permits selective acknowledgments.
    pub sack_ok: bool,
    /// Buffered out-of-order segments awaiting the gap fill.
    pub ofosegs: OfoPool,
    /// References held on this connection; freed when it reaches zero.
    pub crefs: u8,
    /// Tunables the connection was created with.
    pub config: Config,
}

impl Connection {
    fn new(state: State, iss: u32, config: Config) -> Self {
        Self {
            state,
            iss,
            sndseq: iss,
            // The SYN we are about to send occupies one unit.
            sndseq_max: seq::seq_add(iss, 1),
            rcvseq: 0,
            snd_wnd: 0,
            snd_wl1: 0,
            snd_wl2: 0,
            tx_unacked: 1,
            nrtx: 0,
            sa: 0,
            // Seeding the deviation high keeps the first samples from
            // collapsing the timeout before the estimate settles.
            sv: 16,
            rto: RTO_INITIAL,
            timer: u16::from(RTO_INITIAL),
            zero_probe: false,
            rcv_wnd: config.rcv_wnd,
            snd_scale: 0,
            rcv_scale: 0,
            mss: DEFAULT_MSS,
            wscale_ok: false,
            sack_ok: false,
            ofosegs: OfoPool::new(config.ofo_bufsize),
            crefs: 0,
            config,
        }
    }

    /// Accepts an inbound SYN, creating a `SYN_RCVD` connection and the
    /// SYN-ACK that answers it.
    ///
    /// The SYN's options are applied before the reply is built, so the
    /// SYN-ACK can mirror the negotiated MSS, window scale, and SACK
    /// permission.
    pub fn accept(seg: &SegmentView<'_>, iss: u32, config: Config) -> (Self, SendRequest) {
        let mut conn = Self::new(State::SYN_RCVD, iss, config);

        // The peer's SYN consumes one unit of its sequence space.
        conn.rcvseq = seq::seq_add(seg.seqno, 1);
        conn.snd_wnd = u32::from(seg.wnd);

        options::parse(&mut conn, seg.options);

        (conn, SendRequest::control(TcpFlags::SYN | TcpFlags::ACK))
    }

    /// Starts an active open, creating a `SYN_SENT` connection and the SYN
    /// to transmit.
    pub fn open_active(iss: u32, config: Config) -> (Self, SendRequest) {
        let mut conn = Self::new(State::SYN_SENT, iss, config);
        // The opening application holds the only reference.
        conn.crefs = 1;
        (conn, SendRequest::control(TcpFlags::SYN))
    }
}

#[cfg(test)]
impl Connection {
    /// An `ESTABLISHED` connection with quiet sequence state, for tests.
    pub(crate) fn established(rcvseq: u32, sndseq: u32) -> Self {
        let mut conn = Self::new(State::ESTABLISHED, sndseq, Config::default());
        conn.state = State::ESTABLISHED;
        conn.sndseq = sndseq;
        conn.sndseq_max = sndseq;
        conn.rcvseq = rcvseq;
        conn.snd_wnd = 4096;
        conn.snd_wl1 = rcvseq.wrapping_sub(1);
        conn.snd_wl2 = sndseq;
        conn.tx_unacked = 0;
        conn.timer = 0;
        conn.crefs = 1;
        conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Family;

    #[test]
    fn accept_answers_a_syn_with_a_syn_ack() {
        let syn = SegmentView {
            flags: TcpFlags::SYN,
            seqno: 5000,
            ackno: 0,
            wnd: 1024,
            urgent_pointer: 0,
            options: &[2, 4, 0x05, 0xb4], // MSS 1460
            payload: &[],
            family: Family::V4,
        };

        let (conn, reply) = Connection::accept(&syn, 100, Config::default());

        assert_eq!(conn.state, State::SYN_RCVD);
        assert_eq!(conn.iss, 100);
        assert_eq!(conn.sndseq, 100);
        assert_eq!(conn.sndseq_max, 101);
        assert_eq!(conn.rcvseq, 5001);
        assert_eq!(conn.tx_unacked, 1);
        assert_eq!(conn.snd_wnd, 1024);
        assert_eq!(conn.mss, 1460);
        assert_eq!(reply, SendRequest::control(TcpFlags::SYN | TcpFlags::ACK));
    }

    #[test]
    fn open_active_queues_a_syn() {
        let (conn, reply) = Connection::open_active(700, Config::default());

        assert_eq!(conn.state, State::SYN_SENT);
        assert_eq!(conn.sndseq, 700);
        assert_eq!(conn.sndseq_max, 701);
        assert_eq!(conn.tx_unacked, 1);
        assert_eq!(conn.timer, u16::from(RTO_INITIAL));
        assert_eq!(reply, SendRequest::control(TcpFlags::SYN));
    }
}
