//! Outbound half of the fragmentation protocol: splits an oversized
//! packet into sized fragments, drives allocation, re-send and optional
//! equality verification, and surfaces completed packet-ids.
//!
//! Grounded on reliudp's `SentDataTracker`/`RUdpSocket::inner_tick` pair
//! in `sent_data_tracker.rs`/`rudp.rs`, which likewise hold one registry of
//! in-flight messages keyed by id and decide, tick by tick, what to
//! (re-)send next — generalized here from reliudp's priority/delay
//! timers into the allocation-uuid + packet-id state machine this protocol
//! specifies.

use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use fnv::FnvHashMap;
use uuid::Uuid;

use crate::error::{FragmentError, FragmentResult};
use crate::fragment::options::FragmentationOptions;
use crate::packet::fragment::{
    FragmentAllocate, FragmentAllocation, FragmentMessage, FragmentMessageResponse,
    FragmentRetrySend, FragmentSendComplete, FragmentSendStop, FragmentSendVerifyComplete,
};
use crate::packet::AnyPacket;

fn split_into_fragments(bytes: &[u8], split_size: usize) -> Vec<Vec<u8>> {
    if bytes.is_empty() {
        return vec![Vec::new()];
    }
    bytes.chunks(split_size).map(|chunk| chunk.to_vec()).collect()
}

#[derive(Debug, Clone)]
enum SenderEntryState {
    PrimarySend { next: u32 },
    Resending { resend_ids: Vec<u32>, cursor: usize, emit_marker: bool },
    Completed,
}

#[derive(Debug)]
struct SenderEntry {
    fragments: Vec<Vec<u8>>,
    acked: HashSet<u32>,
    state: SenderEntryState,
    created_at: Instant,
}

impl SenderEntry {
    fn new(fragments: Vec<Vec<u8>>) -> Self {
        SenderEntry { fragments, acked: HashSet::new(), state: SenderEntryState::PrimarySend { next: 0 }, created_at: Instant::now() }
    }

    fn unacked_ids(&self) -> Vec<u32> {
        (0..self.fragments.len() as u32).filter(|id| !self.acked.contains(id)).collect()
    }

    fn record_response(&mut self, fragment_id: u32, body: &[u8], verify_responses: bool) {
        if fragment_id as usize >= self.fragments.len() {
            return;
        }
        let matches = !verify_responses || self.fragments[fragment_id as usize] == body;
        if matches {
            self.acked.insert(fragment_id);
        }
    }
}

struct SenderState {
    allocation_inputs: FnvHashMap<Uuid, Vec<u8>>,
    input_order: VecDeque<Uuid>,
    registry: FnvHashMap<u32, SenderEntry>,
}

/// Outbound fragmentation engine: one instance serves one peer.
pub struct FragmentSender {
    state: Mutex<SenderState>,
    finished: Mutex<VecDeque<u32>>,
    finished_cv: Condvar,
    closed: Mutex<bool>,
    options: FragmentationOptions,
}

impl FragmentSender {
    pub fn new(options: FragmentationOptions) -> FragmentResult<Self> {
        options.validate()?;
        Ok(FragmentSender {
            state: Mutex::new(SenderState {
                allocation_inputs: FnvHashMap::default(),
                input_order: VecDeque::new(),
                registry: FnvHashMap::default(),
            }),
            finished: Mutex::new(VecDeque::new()),
            finished_cv: Condvar::new(),
            closed: Mutex::new(false),
            options,
        })
    }

    pub fn options(&self) -> &FragmentationOptions {
        &self.options
    }

    /// Enqueues `bytes` (already a framed inner packet) for allocation.
    /// Non-blocking.
    pub fn submit(&self, bytes: Vec<u8>) -> FragmentResult<Uuid> {
        if bytes.is_empty() {
            return Err(FragmentError::InvalidInput("cannot submit an empty message".into()));
        }
        let uuid = Uuid::new_v4();
        let mut state = self.state.lock().expect("sender mutex poisoned");
        state.allocation_inputs.insert(uuid, bytes);
        state.input_order.push_back(uuid);
        log::debug!("fragment sender: queued allocation request {}", uuid);
        Ok(uuid)
    }

    /// Packets to transmit this round: one `FragmentAllocate` per pending
    /// allocation plus at most one packet per active registry entry.
    pub fn poll_outbound(&self) -> Vec<AnyPacket> {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        let mut out = Vec::new();

        for uuid in &state.input_order {
            if let Some(bytes) = state.allocation_inputs.get(uuid) {
                let fragment_count = ((bytes.len().max(1) + self.options.fragmentation_split_size - 1)
                    / self.options.fragmentation_split_size)
                    .max(1) as u32;
                out.push(AnyPacket::FragmentAllocate(FragmentAllocate::new(fragment_count, *uuid)));
            }
        }

        let verify_equality = self.options.equality_verify_fragments;
        let packet_ids: Vec<u32> = state.registry.keys().copied().collect();
        for packet_id in packet_ids {
            if let Some(packet) = Self::poll_entry(&mut state.registry, packet_id, verify_equality) {
                out.push(packet);
            }
        }
        out
    }

    fn poll_entry(registry: &mut FnvHashMap<u32, SenderEntry>, packet_id: u32, verify_equality: bool) -> Option<AnyPacket> {
        let entry = registry.get_mut(&packet_id)?;
        // A state transition (PrimarySend exhausted, a resend pass
        // finishing) may land in a state with its own packet to emit; retry
        // within this call instead of making the caller wait a full extra
        // poll cycle for a no-op tick. Each state only cascades forward, so
        // this terminates in at most three iterations.
        for _ in 0..4 {
            if let Some(packet) = Self::poll_entry_once(entry, packet_id, verify_equality) {
                return Some(packet);
            }
        }
        None
    }

    fn poll_entry_once(entry: &mut SenderEntry, packet_id: u32, verify_equality: bool) -> Option<AnyPacket> {
        match &mut entry.state {
            SenderEntryState::PrimarySend { next } => {
                if (*next as usize) < entry.fragments.len() {
                    let id = *next;
                    *next += 1;
                    let body = entry.fragments[id as usize].clone();
                    return Some(AnyPacket::FragmentMessage(FragmentMessage::new(packet_id, id, body)));
                }
                entry.state = if verify_equality {
                    let resend_ids = entry.unacked_ids();
                    SenderEntryState::Resending { resend_ids, cursor: 0, emit_marker: false }
                } else {
                    SenderEntryState::Completed
                };
                None
            }
            SenderEntryState::Resending { resend_ids, cursor, emit_marker } => {
                if *emit_marker {
                    *emit_marker = false;
                    return Some(AnyPacket::FragmentRetrySend(FragmentRetrySend::new(packet_id, true)));
                }
                while *cursor < resend_ids.len() && entry.acked.contains(&resend_ids[*cursor]) {
                    *cursor += 1;
                }
                if *cursor < resend_ids.len() {
                    let id = resend_ids[*cursor];
                    *cursor += 1;
                    let body = entry.fragments[id as usize].clone();
                    return Some(AnyPacket::FragmentMessage(FragmentMessage::new(packet_id, id, body)));
                }
                let remaining = entry.unacked_ids();
                entry.state = if remaining.is_empty() || !verify_equality {
                    SenderEntryState::Completed
                } else {
                    SenderEntryState::Resending { resend_ids: remaining, cursor: 0, emit_marker: false }
                };
                None
            }
            SenderEntryState::Completed => {
                if verify_equality && entry.unacked_ids().is_empty() {
                    Some(AnyPacket::FragmentSendVerifyComplete(FragmentSendVerifyComplete::new(packet_id)))
                } else {
                    Some(AnyPacket::FragmentSendComplete(FragmentSendComplete::new(packet_id, false)))
                }
            }
        }
    }

    /// Feeds a fragment-protocol packet into the engine. Returns whether
    /// `packet` was one of the variants this engine recognizes.
    pub fn ingest(&self, packet: &AnyPacket) -> bool {
        match packet {
            AnyPacket::FragmentAllocation(alloc) => {
                self.ingest_allocation(alloc);
                true
            }
            AnyPacket::FragmentMessageResponse(resp) => {
                self.ingest_response(resp);
                true
            }
            AnyPacket::FragmentRetrySend(retry) => {
                self.ingest_retry(retry);
                true
            }
            AnyPacket::FragmentSendComplete(complete) => {
                if complete.ack {
                    self.finish(complete.packet_id);
                }
                true
            }
            AnyPacket::FragmentSendStop(stop) => {
                let mut state = self.state.lock().expect("sender mutex poisoned");
                state.registry.remove(&stop.packet_id);
                drop(state);
                self.finish(stop.packet_id);
                true
            }
            _ => false,
        }
    }

    fn ingest_allocation(&self, alloc: &FragmentAllocation) {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        let Some(bytes) = state.allocation_inputs.remove(&alloc.allocation_uuid) else { return };
        state.input_order.retain(|u| *u != alloc.allocation_uuid);
        if !alloc.success {
            log::warn!("fragment sender: allocation {} rejected by peer", alloc.allocation_uuid);
            return;
        }
        let fragments = split_into_fragments(&bytes, self.options.fragmentation_split_size);
        log::info!(
            "fragment sender: allocation granted, packet-id {} ({} fragments)",
            alloc.packet_id,
            fragments.len()
        );
        state.registry.insert(alloc.packet_id, SenderEntry::new(fragments));
    }

    fn ingest_response(&self, resp: &FragmentMessageResponse) {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        if let Some(entry) = state.registry.get_mut(&resp.packet_id) {
            entry.record_response(resp.fragment_id, &resp.body, self.options.verify_fragments);
        }
    }

    fn ingest_retry(&self, retry: &FragmentRetrySend) {
        if retry.ack {
            return;
        }
        let mut state = self.state.lock().expect("sender mutex poisoned");
        if let Some(entry) = state.registry.get_mut(&retry.packet_id) {
            if matches!(entry.state, SenderEntryState::PrimarySend { .. }) {
                log::debug!("fragment sender: peer requested retry for packet-id {}", retry.packet_id);
                let resend_ids = entry.unacked_ids();
                entry.state = SenderEntryState::Resending { resend_ids, cursor: 0, emit_marker: true };
            }
        }
    }

    fn finish(&self, packet_id: u32) {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        if state.registry.remove(&packet_id).is_none() {
            return;
        }
        drop(state);
        log::info!("fragment sender: packet-id {} complete", packet_id);
        let mut finished = self.finished.lock().expect("finished mutex poisoned");
        finished.push_back(packet_id);
        self.finished_cv.notify_one();
    }

    /// Drops a registry entry without notifying the peer.
    pub fn delete(&self, packet_id: u32) {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        state.registry.remove(&packet_id);
    }

    pub fn clear_pending(&self) {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        state.allocation_inputs.clear();
        state.input_order.clear();
    }

    pub fn clear_registry(&self) {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        state.registry.clear();
    }

    pub fn clear_finished(&self) {
        let mut finished = self.finished.lock().expect("finished mutex poisoned");
        finished.clear();
    }

    /// Blocks until a packet-id completes, or the engine is closed (returns
    /// `None`).
    pub fn block_on_finished(&self) -> Option<u32> {
        let mut finished = self.finished.lock().expect("finished mutex poisoned");
        loop {
            if let Some(id) = finished.pop_front() {
                return Some(id);
            }
            if *self.closed.lock().expect("closed mutex poisoned") {
                return None;
            }
            finished = self.finished_cv.wait(finished).expect("finished mutex poisoned");
        }
    }

    /// Non-blocking variant of [`block_on_finished`].
    pub fn poll_finished(&self) -> Option<u32> {
        self.finished.lock().expect("finished mutex poisoned").pop_front()
    }

    /// Closes the engine: clears all queues and registries, then wakes any
    /// blocked `block_on_finished` waiters with a closing sentinel.
    pub fn close(&self) {
        *self.closed.lock().expect("closed mutex poisoned") = true;
        {
            let mut state = self.state.lock().expect("sender mutex poisoned");
            state.allocation_inputs.clear();
            state.input_order.clear();
            state.registry.clear();
        }
        self.finished.lock().expect("finished mutex poisoned").clear();
        self.finished_cv.notify_all();
    }

    /// Registry entries older than `max_age`, for an external marshal that
    /// wants to time out stalled transfers per `maximum_fragment_age_secs`.
    pub fn expire_older_than(&self, max_age: Duration) -> Vec<u32> {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        let now = Instant::now();
        let stale: Vec<u32> = state
            .registry
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.created_at) >= max_age)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            state.registry.remove(id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> FragmentationOptions {
        FragmentationOptions::new().with_fragmentation_split_size(4)
    }

    #[test]
    fn submit_then_allocate_then_primary_send() {
        let sender = FragmentSender::new(opts()).unwrap();
        let uuid = sender.submit(vec![1, 2, 3, 4, 5, 6, 7]).unwrap();

        let out = sender.poll_outbound();
        assert_eq!(out.len(), 1);
        let AnyPacket::FragmentAllocate(alloc) = &out[0] else { panic!("expected allocate") };
        assert_eq!(alloc.allocation_uuid, uuid);
        assert_eq!(alloc.fragment_count, 2);

        sender.ingest(&AnyPacket::FragmentAllocation(FragmentAllocation::new(9, uuid, true)));
        assert!(sender.poll_outbound().iter().all(|p| !matches!(p, AnyPacket::FragmentAllocate(_))));

        let first = sender.poll_outbound();
        assert_eq!(first.len(), 1);
        assert!(matches!(&first[0], AnyPacket::FragmentMessage(m) if m.fragment_id == 0 && m.packet_id == 9));
        let second = sender.poll_outbound();
        assert!(matches!(&second[0], AnyPacket::FragmentMessage(m) if m.fragment_id == 1));
    }

    #[test]
    fn completion_without_equality_is_immediate_after_primary_send() {
        let sender = FragmentSender::new(opts()).unwrap();
        let uuid = sender.submit(vec![1, 2, 3]).unwrap();
        sender.poll_outbound();
        sender.ingest(&AnyPacket::FragmentAllocation(FragmentAllocation::new(1, uuid, true)));
        let _ = sender.poll_outbound(); // emits the single fragment
        let out = sender.poll_outbound();
        assert!(matches!(&out[0], AnyPacket::FragmentSendComplete(c) if c.packet_id == 1 && !c.ack));

        sender.ingest(&AnyPacket::FragmentSendComplete(FragmentSendComplete::new(1, true)));
        assert_eq!(sender.poll_finished(), Some(1));
    }

    #[test]
    fn allocation_rejected_drops_pending_input() {
        let sender = FragmentSender::new(opts()).unwrap();
        let uuid = sender.submit(vec![1, 2, 3]).unwrap();
        sender.ingest(&AnyPacket::FragmentAllocation(FragmentAllocation::new(0, uuid, false)));
        assert!(sender.poll_outbound().is_empty());
    }

    #[test]
    fn retry_send_from_peer_triggers_resend_marker_then_fragments() {
        let sender = FragmentSender::new(opts()).unwrap();
        let uuid = sender.submit(vec![1, 2, 3, 4, 5]).unwrap();
        sender.poll_outbound();
        sender.ingest(&AnyPacket::FragmentAllocation(FragmentAllocation::new(5, uuid, true)));
        let _ = sender.poll_outbound(); // fragment 0
        sender.ingest(&AnyPacket::FragmentRetrySend(FragmentRetrySend::new(5, false)));
        let out = sender.poll_outbound();
        assert!(matches!(&out[0], AnyPacket::FragmentRetrySend(r) if r.packet_id == 5 && r.ack));
    }

    #[test]
    fn equality_verification_loops_until_acks_match() {
        let sender = FragmentSender::new(opts().with_verify_fragments(true).with_equality_verify_fragments(true))
            .unwrap();
        let uuid = sender.submit(vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap(); // 2 fragments @ split 4
        sender.poll_outbound();
        sender.ingest(&AnyPacket::FragmentAllocation(FragmentAllocation::new(1, uuid, true)));
        let _ = sender.poll_outbound(); // fragment 0
        let _ = sender.poll_outbound(); // fragment 1
        // entering Resending(zero_index): resend both since nothing acked yet
        let out = sender.poll_outbound();
        assert!(matches!(&out[0], AnyPacket::FragmentMessage(m) if m.fragment_id == 0));

        sender.ingest(&AnyPacket::FragmentMessageResponse(FragmentMessageResponse::new(1, 0, vec![1, 2, 3, 4])));
        let out = sender.poll_outbound();
        assert!(matches!(&out[0], AnyPacket::FragmentMessage(m) if m.fragment_id == 1));

        sender.ingest(&AnyPacket::FragmentMessageResponse(FragmentMessageResponse::new(1, 1, vec![5, 6, 7, 8])));
        let out = sender.poll_outbound();
        assert!(matches!(&out[0], AnyPacket::FragmentSendVerifyComplete(v) if v.packet_id == 1));
    }

    #[test]
    fn delete_purges_silently() {
        let sender = FragmentSender::new(opts()).unwrap();
        let uuid = sender.submit(vec![1, 2, 3]).unwrap();
        sender.poll_outbound();
        sender.ingest(&AnyPacket::FragmentAllocation(FragmentAllocation::new(1, uuid, true)));
        sender.delete(1);
        assert!(sender.poll_outbound().is_empty());
        assert_eq!(sender.poll_finished(), None);
    }
}
