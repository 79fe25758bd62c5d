//! Receive-side TCP protocol engine.
//!
//! One call, [tcp_input], takes a parsed inbound segment plus the connection
//! it was demultiplexed to and produces the full effect of that segment:
//! state transitions, application upcalls through [Bindings], and the
//! segments or resets to transmit in response. Header parsing, checksums,
//! timers, and the actual sending all live in the caller; the engine is the
//! part in between, the one RFC 793 and RFC 1122 have opinions about.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

#[cfg(not(unix))]
compile_error!("This crate relies on libc time facilities and requires a Unix-like system.");

pub mod conn;
pub mod input;
pub mod log;
pub mod ofoseg;
pub mod options;
pub mod reset;
pub mod segment;
pub mod seq;
pub mod window;

pub use conn::{Config, Connection, State, Stats};
pub use input::{
    AcceptParams, Bindings, CongestionControl, Dispatch, Events, NoCongestionControl, Response,
    tcp_input,
};
pub use reset::{ResetReply, reset_for};
pub use segment::{Family, SegmentView, SendRequest, TcpFlags};
