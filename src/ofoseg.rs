//! Buffering and coalescing of out-of-order segments.
//!
//! Data that arrives ahead of the next expected sequence number is held here
//! until the gap fills. Entries are kept sorted by left edge with no two
//! ranges overlapping, so the pool doubles as the source of SACK blocks.

use std::mem;

use crate::{debug, seq};

/// Most disjoint ranges the pool will hold, matching the SACK block limit a
/// TCP header has room to echo.
pub const SACK_RANGES_MAX: usize = 4;

/// One contiguous run of buffered out-of-order data.
///
/// Covers sequence numbers `left` up to but not including `right`, with
/// `right - left == data.len()` always.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfoSegment {
    /// Sequence number of the first buffered octet.
    pub left: u32,
    /// Sequence number one past the last buffered octet.
    pub right: u32,
    /// The buffered octets.
    pub data: Vec<u8>,
}

/// The per-connection pool of out-of-order segments.
#[derive(Debug)]
pub struct OfoPool {
    segs: Vec<OfoSegment>,
    bufsize_budget: u32,
}

impl OfoPool {
    /// An empty pool with the given byte budget.
    pub fn new(bufsize_budget: u32) -> Self {
        Self {
            segs: Vec::new(),
            bufsize_budget,
        }
    }

    /// Number of disjoint ranges currently held.
    pub fn len(&self) -> usize {
        self.segs.len()
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.segs.is_empty()
    }

    /// Total octets currently buffered.
    pub fn bufsize(&self) -> u32 {
        self.segs.iter().map(|s| s.data.len() as u32).sum()
    }

    /// The held ranges, sorted by left edge. Suitable for building SACK
    /// blocks.
    pub fn segments(&self) -> &[OfoSegment] {
        &self.segs
    }

    /// Offers a segment starting at `left` to the pool.
    ///
    /// The segment is merged into any entry it touches or overlaps;
    /// otherwise it becomes a new entry. Returns `false` when the pool
    /// refuses it: either the byte budget is exhausted and the segment would
    /// not lower the pool's lowest left edge, or all entry slots are taken
    /// and it touches none of them. Refusing the higher data keeps the
    /// octets nearest the gap, which are the ones that unblock delivery.
    pub fn insert(&mut self, left: u32, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }

        if self.bufsize() > self.bufsize_budget
            && !self.segs.is_empty()
            && seq::seq_gte(left, self.segs[0].left)
        {
            debug!(
                "out-of-order budget exhausted ({} buffered): refusing [{left}, {})",
                self.bufsize(),
                seq::seq_add(left, data.len() as u32),
            );
            return false;
        }

        let mut incoming = OfoSegment {
            left,
            right: seq::seq_add(left, data.len() as u32),
            data: data.to_vec(),
        };

        if !self.merge(&mut incoming, 0) {
            if self.segs.len() == SACK_RANGES_MAX {
                debug!("out-of-order slots full: refusing [{left}, {})", incoming.right);
                return false;
            }
            self.segs.push(incoming);
        }

        self.sort_by_left_edge();
        self.coalesce();

        true
    }

    /// Removes and returns the first entry whose data is now contiguous
    /// with `rcvseq`, i.e. the gap in front of it has just been filled.
    ///
    /// Delivery can also overtake buffered data, when a retransmission or
    /// an overlapping segment re-covers a buffered range in order. Entries
    /// wholly behind `rcvseq` are discarded here; an entry straddling it
    /// has its already-delivered head trimmed off and the rest returned.
    pub fn take_ready(&mut self, rcvseq: u32) -> Option<OfoSegment> {
        while let Some(first) = self.segs.first() {
            if seq::seq_gt(first.left, rcvseq) {
                return None;
            }

            let mut seg = self.segs.remove(0);
            if seq::seq_lte(seg.right, rcvseq) {
                // Everything in this entry already reached the application
                // through another segment.
                debug!("discarding overtaken range [{}, {})", seg.left, seg.right);
                continue;
            }
            if seq::seq_lt(seg.left, rcvseq) {
                let delivered = seq::seq_sub(rcvseq, seg.left) as usize;
                seg.data.drain(..delivered);
                seg.left = rcvseq;
            }
            return Some(seg);
        }
        None
    }

    /// Discards everything buffered. Used when the peer's FIN is processed;
    /// no data can legitimately follow it.
    pub fn clear(&mut self) {
        self.segs.clear();
    }

    /// Merges `incoming` into any entry at index `start` or later that it
    /// touches or overlaps, draining its data on success.
    ///
    /// Returns `true` once `incoming` has been fully absorbed.
    fn merge(&mut self, incoming: &mut OfoSegment, start: usize) -> bool {
        for seg in &mut self.segs[start..] {
            if incoming.data.is_empty() {
                break;
            }

            if seq::seq_gte(incoming.left, seg.left) {
                if seq::seq_gt(incoming.left, seg.right) {
                    // Disjoint, past this entry.
                    continue;
                } else if incoming.left == seg.right {
                    // Extends the entry to the right, edge to edge.
                    seg.data.append(&mut incoming.data);
                    seg.right = incoming.right;
                } else if seq::seq_lte(incoming.right, seg.right) {
                    // Entirely inside the entry already.
                    incoming.data.clear();
                } else {
                    // Overlaps the entry's tail and extends past it.
                    let skip = seq::seq_sub(seg.right, incoming.left) as usize;
                    seg.data.extend_from_slice(&incoming.data[skip..]);
                    seg.right = incoming.right;
                    incoming.data.clear();
                }
            } else if incoming.right == seg.left {
                // Extends the entry to the left, edge to edge.
                let mut merged = mem::take(&mut incoming.data);
                merged.append(&mut seg.data);
                seg.data = merged;
                seg.left = incoming.left;
            } else if seq::seq_lt(incoming.right, seg.left) {
                // Disjoint, before this entry.
                continue;
            } else if seq::seq_gte(incoming.right, seg.right) {
                // Covers the entry completely; replace its contents.
                seg.left = incoming.left;
                seg.right = incoming.right;
                seg.data = mem::take(&mut incoming.data);
            } else {
                // Overlaps the entry's head and extends before it.
                let keep = incoming.data.len() - seq::seq_sub(incoming.right, seg.left) as usize;
                let mut merged = mem::take(&mut incoming.data);
                merged.truncate(keep);
                merged.append(&mut seg.data);
                seg.data = merged;
                seg.left = incoming.left;
            }
        }

        incoming.data.is_empty()
    }

    /// Bubble sort by left edge. The pool holds at most
    /// [SACK_RANGES_MAX] entries, so anything fancier is wasted.
    fn sort_by_left_edge(&mut self) {
        let n = self.segs.len();
        for i in 0..n.saturating_sub(1) {
            for j in 0..n - 1 - i {
                if seq::seq_gt(self.segs[j].left, self.segs[j + 1].left) {
                    self.segs.swap(j, j + 1);
                }
            }
        }
    }

    /// Second merge pass over the sorted entries.
    ///
    /// A single insertion can grow one entry until it touches its neighbor,
    /// so each entry is re-offered to the ones after it until no pair merges.
    fn coalesce(&mut self) {
        let mut i = 0;
        while i + 1 < self.segs.len() {
            let mut cur = self.segs.remove(i);
            if self.merge(&mut cur, i) {
                i = 0;
            } else {
                self.segs.insert(i, cur);
                i += 1;
            }
        }
    }
}
