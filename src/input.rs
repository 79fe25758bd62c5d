//! The receive-side dispatcher: one inbound segment in, state transitions,
//! application upcalls, and outbound segments out.

use crate::conn::{Config, Connection, State, Stats, TIME_WAIT_TIMEOUT};
use crate::reset::{self, ResetReply};
use crate::segment::{SegmentView, SendRequest, TcpFlags};
use crate::{debug, info, options, seq, warn, window};

bitflags::bitflags! {
    /// What a dispatch means to the application, passed to
    /// [Bindings::on_event].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Events: u8 {
        /// The connection just became established.
        const CONNECTED = 0x01;
        /// In-order payload accompanies the event.
        const NEWDATA = 0x02;
        /// The peer acknowledged previously sent data, or reopened its
        /// window; more may now be sent.
        const ACKDATA = 0x04;
        /// The peer is closing, or the close handshake advanced.
        const CLOSE = 0x08;
        /// The connection was torn down abnormally.
        const ABORT = 0x10;
    }
}

/// The application's answer to an [Bindings::on_event] upcall.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Response {
    /// Consent to a close the peer initiated ([Events::CLOSE]); ignored for
    /// other events.
    pub close: bool,
    /// Data to send on the connection, piggybacked on the acknowledgment.
    pub payload: Vec<u8>,
}

/// What a listener needs to supply to turn a SYN into a connection.
#[derive(Debug, Clone)]
pub struct AcceptParams {
    /// Initial send sequence number for the new connection.
    pub iss: u32,
    /// Tunables for the new connection.
    pub config: Config,
}

/// The environment the engine calls back into: listener lookup, accept
/// completion, and application event delivery.
pub trait Bindings {
    /// A SYN arrived for which no connection exists. Returns the parameters
    /// for a new connection if a listener matches the segment and has
    /// backlog room, `None` to drop the SYN silently.
    fn listener(&mut self, seg: &SegmentView<'_>) -> Option<AcceptParams>;

    /// The handshake on a passively opened connection just completed.
    /// Returns `false` if the listener has gone away, in which case the
    /// connection is reset and freed.
    fn accept(&mut self, conn: &Connection) -> bool;

    /// Delivers connection events and in-order data. `urgent` is the
    /// out-of-band byte range, non-empty only when urgent delivery is
    /// compiled in and the segment carried urgent octets.
    fn on_event(
        &mut self,
        conn: &mut Connection,
        events: Events,
        data: &[u8],
        urgent: &[u8],
    ) -> Response;
}

/// Hooks for a congestion controller observing the receive path.
pub trait CongestionControl {
    /// An acknowledgment arrived on an open connection.
    fn on_ack_received(&mut self, conn: &mut Connection, seg: &SegmentView<'_>);

    /// The connection just reached `ESTABLISHED`.
    fn on_established(&mut self, conn: &mut Connection) {
        let _ = conn;
    }

    /// A segment is about to be retransmitted.
    fn on_retransmit(&mut self, conn: &mut Connection) {
        let _ = conn;
    }
}

/// A controller that imposes no congestion window at all; flow is limited
/// only by the peer's advertised window.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCongestionControl;

impl CongestionControl for NoCongestionControl {
    fn on_ack_received(&mut self, _conn: &mut Connection, _seg: &SegmentView<'_>) {}
}

/// Everything one dispatched segment asks the caller to do.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Segments to transmit on the connection, in order.
    pub sends: Vec<SendRequest>,
    /// A reset to transmit, addressed by the offending segment.
    pub reset: Option<ResetReply>,
    /// A connection newly created from an inbound SYN; the caller owns it
    /// and must register it for demultiplexing.
    pub accepted: Option<Box<Connection>>,
    /// The dispatched connection is finished and must be released.
    pub free: bool,
}

impl Dispatch {
    fn none() -> Self {
        Self::default()
    }

    fn ack() -> Self {
        Self {
            sends: vec![SendRequest::control(TcpFlags::ACK)],
            ..Self::default()
        }
    }

    fn reset(reply: Option<ResetReply>) -> Self {
        Self {
            reset: reply,
            ..Self::default()
        }
    }
}

/// Dispatches one inbound segment.
///
/// `conn` is the connection the demultiplexer matched the segment to, or
/// `None` if there was no match. The segment is trimmed in place if it
/// overlaps data already received, so the caller must not reuse it.
pub fn tcp_input(
    conn: Option<&mut Connection>,
    seg: &mut SegmentView<'_>,
    bindings: &mut dyn Bindings,
    cc: &mut dyn CongestionControl,
    stats: &mut Stats,
) -> Dispatch {
    stats.recv += 1;

    match conn {
        Some(conn) => dispatch(conn, seg, bindings, cc, stats),
        None => dispatch_unmatched(seg, bindings, stats),
    }
}

/// Handles a segment no connection claimed: a SYN may create one, anything
/// else (bar a reset) is answered with a reset.
fn dispatch_unmatched(
    seg: &mut SegmentView<'_>,
    bindings: &mut dyn Bindings,
    stats: &mut Stats,
) -> Dispatch {
    if (seg.flags & TcpFlags::CTL) == TcpFlags::SYN {
        let Some(params) = bindings.listener(seg) else {
            debug!("SYN with no listener or backlog room: dropping");
            stats.syndrop += 1;
            stats.drop += 1;
            return Dispatch::none();
        };

        let (conn, syn_ack) = Connection::accept(seg, params.iss, params.config);
        debug!(
            "SYN accepted: iss={}, rcvseq={}, mss={}",
            conn.iss, conn.rcvseq, conn.mss
        );

        return Dispatch {
            sends: vec![syn_ack],
            accepted: Some(Box::new(conn)),
            ..Dispatch::default()
        };
    }

    if seg.flags.contains(TcpFlags::RST) {
        stats.drop += 1;
        return Dispatch::none();
    }

    warn!(
        "unmatched segment ({:?}, seq={}): sending reset",
        seg.flags, seg.seqno
    );
    stats.synrst += 1;

    Dispatch::reset(reset::reset_for(seg))
}

/// Handles a segment on an existing connection.
fn dispatch(
    conn: &mut Connection,
    seg: &mut SegmentView<'_>,
    bindings: &mut dyn Bindings,
    cc: &mut dyn CongestionControl,
    stats: &mut Stats,
) -> Dispatch {
    // A bare SYN on a live connection is a new connection request reusing
    // our addresses; outside SYN_RCVD (where it may be the original SYN
    // retransmitted) it gets a reset.
    if conn.state != State::SYN_RCVD && (seg.flags & TcpFlags::CTL) == TcpFlags::SYN {
        warn!("({:?}) unexpected SYN: sending reset", conn.state);
        stats.synrst += 1;
        return Dispatch::reset(reset::reset_for(seg));
    }

    if seg.flags.contains(TcpFlags::RST) {
        return handle_reset(conn, bindings, stats);
    }

    let mut events = Events::empty();

    // Acknowledgment bookkeeping.
    if seg.flags.contains(TcpFlags::ACK) && conn.tx_unacked > 0 {
        let unackseq = conn.sndseq_max;
        let ackno = seg.ackno;

        if seq::seq_lte(ackno, unackseq) {
            conn.tx_unacked = seq::seq_sub(unackseq, ackno);
        } else if conn.state == State::ESTABLISHED {
            warn!(
                "({:?}) ack beyond everything sent: ackno={ackno}, unackseq={unackseq}",
                conn.state
            );
            conn.tx_unacked = 0;
        }

        // Slide the unacknowledged boundary forward; a fresh ack also
        // retires the retransmission count for the data it covers.
        if seq::seq_lt(conn.sndseq, ackno) {
            conn.sndseq = ackno;
            conn.nrtx = 0;
        }

        window::rtt_sample(conn);

        events |= Events::ACKDATA;

        conn.timer = if conn.tx_unacked == 0 && conn.state == State::ESTABLISHED {
            0
        } else {
            u16::from(conn.rto)
        };
    }

    // Sequence acceptance. A SYN-ACK answering our SYN and a retransmitted
    // SYN while in SYN_RCVD carry sequence numbers we have not synchronized
    // to yet, so they bypass the check.
    let synchronizing = (conn.state == State::SYN_SENT
        && (seg.flags & TcpFlags::CTL) == (TcpFlags::SYN | TcpFlags::ACK))
        || (conn.state == State::SYN_RCVD && (seg.flags & TcpFlags::CTL) == TcpFlags::SYN);

    if !synchronizing {
        if conn.state == State::SYN_SENT
            && !seg.flags.contains(TcpFlags::SYN)
            && seg.flags.contains(TcpFlags::ACK)
        {
            // RFC 793 3.4, half-open peer: reset it and retry our SYN on the
            // next timer tick.
            warn!("(SYN_SENT) ack without SYN: resetting peer, retrying SYN");
            conn.timer = 1;
            return Dispatch::reset(reset::reset_for(seg));
        }

        if seg.seqno != conn.rcvseq {
            if seq::seq_lt(seg.seqno, conn.rcvseq) {
                // Starts behind the next expected octet: drop what we have
                // already received and keep whatever extends past it.
                let trimlen = seq::seq_sub(conn.rcvseq, seg.seqno);
                if seg.trim_head(trimlen) {
                    // Wholly duplicate, likely a needless retransmission or
                    // a keep-alive probe. Re-ack so the peer resynchronizes.
                    return Dispatch::ack();
                }
            } else if matches!(
                conn.state,
                State::SYN_RCVD | State::SYN_SENT | State::ESTABLISHED
            ) {
                // Ahead of the next expected octet: park the payload until
                // the gap fills, and ack to tell the peer where the gap is.
                if !seg.payload.is_empty() && !conn.ofosegs.insert(seg.seqno, seg.payload) {
                    stats.ofodrop += 1;
                }
                return Dispatch::ack();
            }
        }
    }

    window::clear_zero_probe(conn, seg);

    if seg.flags.contains(TcpFlags::ACK) && conn.state != State::SYN_RCVD {
        cc.on_ack_received(conn, seg);
        if window::update_send_window(conn, seg) {
            events |= Events::ACKDATA;
        }
    }

    match conn.state {
        State::SYN_RCVD => {
            if events.contains(Events::ACKDATA) {
                // Our SYN-ACK was acknowledged: the handshake is complete.
                conn.state = State::ESTABLISHED;
                info!("(SYN_RCVD) handshake complete: SYN_RCVD -> ESTABLISHED");

                if !bindings.accept(conn) {
                    warn!("(ESTABLISHED) listener gone before accept: resetting");
                    conn.state = State::CLOSED;
                    stats.synrst += 1;
                    return Dispatch {
                        reset: reset::reset_for(seg),
                        free: true,
                        ..Dispatch::default()
                    };
                }
                conn.crefs = 1;

                conn.tx_unacked = 0;
                window::init_send_window(conn, seg);
                window::update_send_window(conn, seg);
                cc.on_established(conn);

                let mut events = Events::CONNECTED;
                if !seg.payload.is_empty() {
                    events |= Events::NEWDATA;
                }
                return deliver(conn, seg.payload, events, &[], bindings);
            }

            if (seg.flags & TcpFlags::CTL) == TcpFlags::SYN {
                // Our SYN-ACK was lost; wind the send sequence back over it
                // and transmit it again.
                debug!("(SYN_RCVD) retransmitted SYN: resending SYN-ACK");
                conn.sndseq = conn.iss;
                cc.on_retransmit(conn);
                return Dispatch {
                    sends: vec![SendRequest::control(TcpFlags::SYN | TcpFlags::ACK)],
                    ..Dispatch::default()
                };
            }

            stats.drop += 1;
            Dispatch::none()
        }

        State::SYN_SENT => {
            if events.contains(Events::ACKDATA)
                && (seg.flags & TcpFlags::CTL) == (TcpFlags::SYN | TcpFlags::ACK)
            {
                // The peer answered our SYN; options ride on the SYN-ACK.
                options::parse(conn, seg.options);

                conn.state = State::ESTABLISHED;
                conn.rcvseq = seq::seq_add(seg.seqno, 1);
                conn.tx_unacked = 0;
                window::init_send_window(conn, seg);
                window::update_send_window(conn, seg);
                cc.on_established(conn);

                info!("(SYN_SENT) SYN-ACK received: SYN_SENT -> ESTABLISHED");

                // Any payload on the SYN-ACK is discarded; the peer will
                // retransmit it in order once the handshake settles.
                return deliver(conn, &[], Events::CONNECTED | Events::NEWDATA, &[], bindings);
            }

            // Anything else here means the connection attempt failed.
            warn!("(SYN_SENT) connection refused: SYN_SENT -> CLOSED");
            conn.state = State::CLOSED;
            bindings.on_event(conn, Events::ABORT, &[], &[]);

            if seg.flags.contains(TcpFlags::RST) {
                stats.drop += 1;
                return Dispatch::none();
            }
            Dispatch::reset(reset::reset_for(seg))
        }

        State::ESTABLISHED => {
            if seg.flags.contains(TcpFlags::FIN) {
                // The FIN ends the peer's stream; buffered out-of-order
                // data past it is unreachable.
                conn.ofosegs.clear();

                events |= Events::CLOSE;
                if !seg.payload.is_empty() {
                    events |= Events::NEWDATA;
                }

                let response = bindings.on_event(conn, events, seg.payload, &[]);
                let payload_len = seg.payload.len() as u32;

                if response.close {
                    conn.state = State::LAST_ACK;
                    conn.tx_unacked = 1;
                    conn.nrtx = 0;
                    // The peer's FIN consumes one unit, as will ours.
                    conn.rcvseq = seq::seq_add(conn.rcvseq, payload_len + 1);
                    conn.sndseq_max = seq::seq_add(conn.sndseq, 1);

                    info!("(ESTABLISHED) FIN received: ESTABLISHED -> LAST_ACK");
                    return Dispatch {
                        sends: vec![SendRequest::control(TcpFlags::FIN | TcpFlags::ACK)],
                        ..Dispatch::default()
                    };
                }

                // The application is not done with the connection; take the
                // data but leave the FIN unacknowledged.
                debug!("(ESTABLISHED) FIN refused by application");
                conn.rcvseq = seq::seq_add(conn.rcvseq, payload_len);
                return reply(conn, events, response);
            }

            let mut payload = seg.payload;
            let mut urgent: &[u8] = &[];

            if seg.flags.contains(TcpFlags::URG) {
                // Octets up to the urgent pointer are out-of-band; they
                // consume sequence space either way.
                let urglen = usize::from(seg.urgent_pointer).min(payload.len());
                conn.rcvseq = seq::seq_add(conn.rcvseq, urglen as u32);

                let (oob, rest) = payload.split_at(urglen);
                payload = rest;

                #[cfg(feature = "urgent-delivery")]
                {
                    urgent = oob;
                }
                #[cfg(not(feature = "urgent-delivery"))]
                {
                    let _ = oob;
                }
            }

            if !payload.is_empty() {
                events |= Events::NEWDATA;
            }

            if events.intersects(Events::NEWDATA | Events::ACKDATA) {
                return deliver(conn, payload, events, urgent, bindings);
            }

            stats.drop += 1;
            Dispatch::none()
        }

        State::LAST_ACK => {
            if events.contains(Events::ACKDATA) {
                // Our FIN is acknowledged; nothing remains on either side.
                conn.state = State::CLOSED;
                info!("(LAST_ACK) FIN acknowledged: LAST_ACK -> CLOSED");
                bindings.on_event(conn, Events::CLOSE, &[], &[]);
                return Dispatch::none();
            }
            stats.drop += 1;
            Dispatch::none()
        }

        State::FIN_WAIT_1 => {
            let payload_len = seg.payload.len() as u32;
            if payload_len > 0 {
                conn.rcvseq = seq::seq_add(conn.rcvseq, payload_len);
            }

            if seg.flags.contains(TcpFlags::FIN) {
                conn.ofosegs.clear();

                if events.contains(Events::ACKDATA) && conn.tx_unacked == 0 {
                    // Both our FIN and theirs are resolved at once.
                    conn.state = State::TIME_WAIT;
                    conn.timer = TIME_WAIT_TIMEOUT;
                    info!("(FIN_WAIT_1) FIN and ack: FIN_WAIT_1 -> TIME_WAIT");
                } else {
                    conn.state = State::CLOSING;
                    info!("(FIN_WAIT_1) simultaneous close: FIN_WAIT_1 -> CLOSING");
                }

                conn.rcvseq = seq::seq_add(conn.rcvseq, 1);
                bindings.on_event(conn, Events::CLOSE, &[], &[]);
                return Dispatch::ack();
            }

            if events.contains(Events::ACKDATA) && conn.tx_unacked == 0 {
                conn.state = State::FIN_WAIT_2;
                info!("(FIN_WAIT_1) FIN acknowledged: FIN_WAIT_1 -> FIN_WAIT_2");
                stats.drop += 1;
                return Dispatch::none();
            }

            if payload_len > 0 {
                return close_on_unreadable_data(conn, seg, bindings);
            }

            stats.drop += 1;
            Dispatch::none()
        }

        State::FIN_WAIT_2 => {
            let payload_len = seg.payload.len() as u32;
            if payload_len > 0 {
                conn.rcvseq = seq::seq_add(conn.rcvseq, payload_len);
            }

            if seg.flags.contains(TcpFlags::FIN) {
                conn.ofosegs.clear();
                conn.state = State::TIME_WAIT;
                conn.timer = TIME_WAIT_TIMEOUT;
                info!("(FIN_WAIT_2) FIN received: FIN_WAIT_2 -> TIME_WAIT");

                conn.rcvseq = seq::seq_add(conn.rcvseq, 1);
                bindings.on_event(conn, Events::CLOSE, &[], &[]);
                return Dispatch::ack();
            }

            if payload_len > 0 {
                return close_on_unreadable_data(conn, seg, bindings);
            }

            stats.drop += 1;
            Dispatch::none()
        }

        State::TIME_WAIT => {
            // Whatever the peer retransmits here, the answer is the same
            // acknowledgment it already got.
            Dispatch::ack()
        }

        State::CLOSING => {
            if events.contains(Events::ACKDATA) {
                conn.state = State::TIME_WAIT;
                conn.timer = TIME_WAIT_TIMEOUT;
                info!("(CLOSING) FIN acknowledged: CLOSING -> TIME_WAIT");
            }
            stats.drop += 1;
            Dispatch::none()
        }

        State::CLOSED => {
            stats.drop += 1;
            Dispatch::none()
        }
    }
}

/// Tears the connection down in response to an inbound reset.
fn handle_reset(conn: &mut Connection, bindings: &mut dyn Bindings, stats: &mut Stats) -> Dispatch {
    stats.drop += 1;

    if conn.state == State::SYN_RCVD {
        // Nothing has been handed to an application yet; the connection can
        // be released on the spot.
        warn!("(SYN_RCVD) reset received: dropping half-open connection");
        conn.state = State::CLOSED;
        debug_assert_eq!(conn.crefs, 0);
        return Dispatch {
            free: true,
            ..Dispatch::default()
        };
    }

    warn!("({:?}) reset received: aborting connection", conn.state);
    conn.state = State::CLOSED;
    bindings.on_event(conn, Events::ABORT, &[], &[]);

    // The application still holds its reference; it releases the
    // connection once it observes the abort.
    Dispatch::none()
}

/// Data arrived after the application closed its receive side; there is no
/// reader left for it. Per RFC 2525 2.17 the honest answer is a reset, not
/// an acknowledgment of data that will never be delivered.
fn close_on_unreadable_data(
    conn: &mut Connection,
    seg: &SegmentView<'_>,
    bindings: &mut dyn Bindings,
) -> Dispatch {
    warn!(
        "({:?}) data with no reader: resetting connection",
        conn.state
    );
    conn.state = State::CLOSED;
    bindings.on_event(conn, Events::CLOSE, &[], &[]);
    Dispatch::reset(reset::reset_for(seg))
}

/// Delivers in-order payload (plus anything it unblocked in the
/// out-of-order pool) to the application, then builds the reply the
/// application's response calls for.
fn deliver(
    conn: &mut Connection,
    payload: &[u8],
    mut events: Events,
    urgent: &[u8],
    bindings: &mut dyn Bindings,
) -> Dispatch {
    let mut assembled: Vec<u8> = Vec::new();
    let mut drained = false;

    if !payload.is_empty() {
        conn.rcvseq = seq::seq_add(conn.rcvseq, payload.len() as u32);
    }

    // This segment may have plugged the gap in front of buffered
    // out-of-order data, or re-covered part of it in order; deliver
    // everything now contiguous in one pass and let the pool reclaim
    // whatever delivery overtook.
    while let Some(ofoseg) = conn.ofosegs.take_ready(conn.rcvseq) {
        if !drained {
            assembled = payload.to_vec();
            drained = true;
        }
        conn.rcvseq = seq::seq_add(conn.rcvseq, ofoseg.data.len() as u32);
        assembled.extend_from_slice(&ofoseg.data);
    }

    if drained {
        events |= Events::NEWDATA;
        debug!(
            "({:?}) gap filled: delivering {} buffered octets with the segment",
            conn.state,
            assembled.len() - payload.len()
        );
    }

    let data: &[u8] = if drained { &assembled } else { payload };
    let response = bindings.on_event(conn, events, data, urgent);

    reply(conn, events, response)
}

/// Builds the outbound reply after an application upcall: an acknowledgment
/// when data was delivered, carrying whatever payload the application
/// queued in response.
fn reply(conn: &mut Connection, events: Events, response: Response) -> Dispatch {
    if !events.contains(Events::NEWDATA) && response.payload.is_empty() {
        // Nothing was delivered and nothing is queued. A refused FIN with
        // no data lands here too: the FIN stays unacknowledged so the peer
        // retransmits it, re-asking the application until it consents.
        return Dispatch::none();
    }

    let mut flags = TcpFlags::ACK;

    if !response.payload.is_empty() {
        flags |= TcpFlags::PSH;

        let len = response.payload.len() as u32;
        conn.sndseq_max = seq::seq_add(conn.sndseq_max, len);
        conn.tx_unacked += len;
        conn.timer = u16::from(conn.rto);
    }

    Dispatch {
        sends: vec![SendRequest {
            flags,
            payload: response.payload,
        }],
        ..Dispatch::default()
    }
}
