//! Per-client sliding request windows.
//!
//! A client window tracks, for a contiguous range of request numbers,
//! which requests this replica holds, which digests the other
//! replicas have acknowledged, and which requests have already been
//! ordered. Requests outside the window are rejected outright, which
//! is what bounds the memory a client can pin.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::bft::collections::{self, HashMap, HashSet, OrderedMap};
use crate::bft::crypto::hash::Digest;
use crate::bft::message::{ClientId, NodeId, Request};
use crate::bft::ordering::{self, ReqNo, SeqNo};

/// How many request numbers a fresh client window spans.
///
/// The window starts at `[1, INITIAL_WINDOW]` and slides forward as
/// ordered requests are garbage collected at stable checkpoints.
pub const INITIAL_WINDOW: u64 = 100;

struct Slot {
    allocated: Option<(Digest, Request)>,
    acks: HashMap<Digest, HashSet<NodeId>>,
    committed_at: Option<SeqNo>,
}

impl Slot {
    fn new() -> Self {
        Self {
            allocated: None,
            acks: collections::hash_map(),
            committed_at: None,
        }
    }
}

/// The sliding window of one client.
pub struct ClientWindow {
    low: ReqNo,
    high: ReqNo,
    slots: VecDeque<Slot>,
    waiters: Vec<oneshot::Sender<(ReqNo, ReqNo)>>,
}

impl ClientWindow {
    pub fn new() -> Self {
        Self {
            low: 1,
            high: INITIAL_WINDOW,
            slots: VecDeque::new(),
            waiters: Vec::new(),
        }
    }

    fn width(&self) -> u64 {
        self.high - self.low + 1
    }

    fn slot_mut(&mut self, req_no: ReqNo) -> Option<&mut Slot> {
        let index = match ordering::window_index(req_no, self.low, self.width()) {
            either::Either::Right(index) => index,
            either::Either::Left(_) => return None,
        };
        while self.slots.len() <= index {
            self.slots.push_back(Slot::new());
        }
        Some(&mut self.slots[index])
    }

    fn slot(&self, req_no: ReqNo) -> Option<&Slot> {
        let index = match ordering::window_index(req_no, self.low, self.width()) {
            either::Either::Right(index) => index,
            either::Either::Left(_) => return None,
        };
        self.slots.get(index)
    }

    /// Records that `source` vouches for `(req_no, digest)`. Returns
    /// false when the request number lies outside the window.
    pub fn ack(&mut self, source: NodeId, req_no: ReqNo, digest: Digest) -> bool {
        match self.slot_mut(req_no) {
            Some(slot) => {
                slot.acks
                    .entry(digest)
                    .or_insert_with(collections::hash_set)
                    .insert(source);
                true
            }
            None => {
                debug!(req_no, "ack outside client window");
                false
            }
        }
    }

    /// Stores the request payload once its digest is known. Storing
    /// the same request again is a no-op; a conflicting payload for an
    /// already filled slot is refused.
    pub fn allocate(&mut self, request: Request, digest: Digest) -> bool {
        let req_no = request.req_no;
        let slot = match self.slot_mut(req_no) {
            Some(slot) => slot,
            None => {
                debug!(req_no, "allocate outside client window");
                return false;
            }
        };
        match &slot.allocated {
            None => {
                slot.allocated = Some((digest, request));
                true
            }
            Some((prev, _)) if *prev == digest => true,
            Some(_) => {
                warn!(req_no, "conflicting payload for allocated request");
                false
            }
        }
    }

    /// Whether this replica holds the payload of `(req_no, digest)`.
    pub fn has_request(&self, req_no: ReqNo, digest: &Digest) -> bool {
        matches!(
            self.slot(req_no).and_then(|s| s.allocated.as_ref()),
            Some((held, _)) if held == digest
        )
    }

    /// The digest of the allocated request at `req_no`, if any.
    pub fn allocated_digest(&self, req_no: ReqNo) -> Option<Digest> {
        self.slot(req_no)
            .and_then(|s| s.allocated.as_ref())
            .map(|(digest, _)| *digest)
    }

    /// The allocated request payload at `req_no`, if any.
    pub fn request_data(&self, req_no: ReqNo) -> Option<&Request> {
        self.slot(req_no)
            .and_then(|s| s.allocated.as_ref())
            .map(|(_, request)| request)
    }

    /// How many replicas have acknowledged `(req_no, digest)`.
    pub fn agreements(&self, req_no: ReqNo, digest: &Digest) -> usize {
        self.slot(req_no)
            .and_then(|s| s.acks.get(digest))
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Whether `req_no` has already been ordered.
    pub fn is_committed(&self, req_no: ReqNo) -> bool {
        matches!(self.slot(req_no), Some(slot) if slot.committed_at.is_some())
    }

    /// Marks `req_no` as ordered at slot `seq_no`.
    pub fn mark_committed(&mut self, req_no: ReqNo, seq_no: SeqNo) {
        if let Some(slot) = self.slot_mut(req_no) {
            if slot.committed_at.is_none() {
                slot.committed_at = Some(seq_no);
            }
        }
    }

    /// Slides the window past requests whose ordering slot is covered
    /// by the stable checkpoint at `stable`. Returns whether the
    /// window advanced; waiters are signalled when it did.
    pub fn garbage_collect(&mut self, stable: SeqNo) -> bool {
        let mut advanced = false;
        loop {
            let concluded = matches!(
                self.slots.front().and_then(|s| s.committed_at),
                Some(at) if at <= stable
            );
            if !concluded {
                break;
            }
            self.slots.pop_front();
            self.low += 1;
            advanced = true;
        }
        if advanced {
            self.high = self.low + INITIAL_WINDOW - 1;
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send((self.low, self.high));
            }
        }
        advanced
    }

    /// The current `[low, high]` request number watermarks.
    pub fn watermarks(&self) -> (ReqNo, ReqNo) {
        (self.low, self.high)
    }

    /// A handle resolved with the new watermarks the next time this
    /// window advances. Hosts use it to await acceptance of a
    /// submitted request.
    pub fn waiter(&mut self) -> oneshot::Receiver<(ReqNo, ReqNo)> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    /// How many slots currently hold an allocated request.
    pub fn allocated_count(&self) -> usize {
        self.slots.iter().filter(|s| s.allocated.is_some()).count()
    }
}

/// Every client window known to the replica, in first-seen order.
pub struct ClientWindows {
    windows: OrderedMap<ClientId, ClientWindow>,
}

impl ClientWindows {
    pub fn new() -> Self {
        Self {
            windows: collections::ordered_map(),
        }
    }

    pub fn window(&self, client: &ClientId) -> Option<&ClientWindow> {
        self.windows.get(client)
    }

    /// The window of `client`, created on first reference.
    pub fn window_mut(&mut self, client: &ClientId) -> &mut ClientWindow {
        if !self.windows.contains_key(client) {
            self.windows.insert(client.clone(), ClientWindow::new());
        }
        match self.windows.get_mut(client) {
            Some(window) => window,
            None => unreachable!("just inserted"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &ClientWindow)> {
        self.windows.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ClientId, &mut ClientWindow)> {
        self.windows.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::crypto::hash::digest_chunks;
    use crate::bft::message::request_chunks;

    fn request(req_no: ReqNo) -> (Request, Digest) {
        let request = Request {
            client_id: ClientId::new(&b"c"[..]),
            req_no,
            data: vec![req_no as u8],
        };
        let digest = digest_chunks(request_chunks(&request).iter().map(Vec::as_slice));
        (request, digest)
    }

    #[test]
    fn test_window_bounds() {
        let mut window = ClientWindow::new();
        let (req, digest) = request(101);
        assert!(!window.allocate(req, digest));
        assert!(!window.ack(NodeId::from(0), 0, digest));
        assert_eq!(window.watermarks(), (1, 100));
    }

    #[test]
    fn test_allocate_idempotent() {
        let mut window = ClientWindow::new();
        let (req, digest) = request(1);
        assert!(window.allocate(req.clone(), digest));
        assert!(window.allocate(req.clone(), digest));
        assert_eq!(window.allocated_count(), 1);

        // same slot, conflicting payload
        let (other, other_digest) = request(2);
        let conflicting = Request { req_no: 1, ..other };
        assert!(!window.allocate(conflicting, other_digest));
        assert_eq!(window.allocated_digest(1), Some(digest));
    }

    #[test]
    fn test_ack_tally() {
        let mut window = ClientWindow::new();
        let (_, digest) = request(4);
        window.ack(NodeId::from(0), 4, digest);
        window.ack(NodeId::from(1), 4, digest);
        window.ack(NodeId::from(1), 4, digest);
        assert_eq!(window.agreements(4, &digest), 2);
    }

    #[test]
    fn test_garbage_collection_slides_window() {
        let mut window = ClientWindow::new();
        for req_no in 1..=3 {
            let (req, digest) = request(req_no);
            assert!(window.allocate(req, digest));
            window.mark_committed(req_no, SeqNo::from(req_no * 10));
        }
        let waiter = window.waiter();

        // nothing concluded by a checkpoint below every commit slot
        assert!(!window.garbage_collect(SeqNo::from(5)));

        // two of three commit slots are covered
        assert!(window.garbage_collect(SeqNo::from(20)));
        assert_eq!(window.watermarks(), (3, 102));
        assert_eq!(waiter.try_recv().ok(), Some((3, 102)));

        // the remaining one
        assert!(window.garbage_collect(SeqNo::from(30)));
        assert_eq!(window.watermarks(), (4, 103));
    }
}
