//! Inbound half of the fragmentation protocol: allocates packet-ids
//! for novel transfers, reassembles fragment bodies in order, acknowledges
//! them, and forces completion when the peer goes quiet.
//!
//! Grounded on reliudp's `FragmentCombiner`/`UdpPacketHandler` pair in
//! `fragment_combiner.rs`/`udp_packet_handler.rs`, which likewise buffer
//! incoming fragments per message id and decide when to ack/expire —
//! generalized here from reliudp's fixed ack-interval tick into the
//! per-entry forced-completion countdown this protocol specifies.

use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use fnv::FnvHashMap;
use uuid::Uuid;

use crate::error::{FragmentError, FragmentResult};
use crate::factory::PacketFactory;
use crate::fragment::options::FragmentationOptions;
use crate::packet::fragment::{
    FragmentAllocate, FragmentAllocation, FragmentMessage, FragmentMessageResponse,
    FragmentRetrySend, FragmentSendComplete, FragmentSendStop, FragmentSendVerifyComplete,
};
use crate::packet::AnyPacket;

struct ReceiverEntry {
    allocation_uuid: Uuid,
    fragment_count: u32,
    fragments: FnvHashMap<u32, Vec<u8>>,
    ids_to_receive: HashSet<u32>,
    ids_to_akn: VecDeque<u32>,
    akn_pending: HashSet<u32>,
    sends_till_complete_forced: u32,
    verify_received: bool,
    consumed: bool,
    created_at: Instant,
}

impl ReceiverEntry {
    fn new(allocation_uuid: Uuid, fragment_count: u32, initial_countdown: u32) -> Self {
        ReceiverEntry {
            allocation_uuid,
            fragment_count,
            fragments: FnvHashMap::default(),
            ids_to_receive: (0..fragment_count).collect(),
            ids_to_akn: VecDeque::new(),
            akn_pending: HashSet::new(),
            sends_till_complete_forced: initial_countdown,
            verify_received: false,
            consumed: false,
            created_at: Instant::now(),
        }
    }

    fn store_fragment(&mut self, fragment_id: u32, body: Vec<u8>) {
        self.fragments.insert(fragment_id, body);
        self.ids_to_receive.remove(&fragment_id);
        if self.akn_pending.insert(fragment_id) {
            self.ids_to_akn.push_back(fragment_id);
        }
    }

    fn reassembled_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for id in 0..self.fragment_count {
            if let Some(body) = self.fragments.get(&id) {
                out.extend_from_slice(body);
            }
        }
        out
    }
}

struct ReceiverState {
    next_candidate: Option<u32>,
    uuid_to_id: FnvHashMap<Uuid, u32>,
    registry: FnvHashMap<u32, ReceiverEntry>,
    pending_allocations: VecDeque<FragmentAllocation>,
    pending_stops: VecDeque<u32>,
}

impl ReceiverState {
    fn allocate_id(&mut self) -> Option<u32> {
        loop {
            let candidate = self.next_candidate?;
            if self.registry.contains_key(&candidate) {
                self.next_candidate = candidate.checked_add(1);
                continue;
            }
            self.next_candidate = candidate.checked_add(1);
            return Some(candidate);
        }
    }
}

/// Inbound fragmentation engine: one instance serves one peer.
pub struct FragmentReceiver {
    state: Mutex<ReceiverState>,
    output: Mutex<VecDeque<AnyPacket>>,
    output_cv: Condvar,
    finished: Mutex<VecDeque<u32>>,
    closed: Mutex<bool>,
    options: FragmentationOptions,
    factory: PacketFactory,
}

impl FragmentReceiver {
    pub fn new(options: FragmentationOptions) -> FragmentResult<Self> {
        Self::with_factory(options, PacketFactory::new())
    }

    pub fn with_factory(options: FragmentationOptions, factory: PacketFactory) -> FragmentResult<Self> {
        options.validate()?;
        Ok(FragmentReceiver {
            state: Mutex::new(ReceiverState {
                next_candidate: Some(0),
                uuid_to_id: FnvHashMap::default(),
                registry: FnvHashMap::default(),
                pending_allocations: VecDeque::new(),
                pending_stops: VecDeque::new(),
            }),
            output: Mutex::new(VecDeque::new()),
            output_cv: Condvar::new(),
            finished: Mutex::new(VecDeque::new()),
            closed: Mutex::new(false),
            options,
            factory,
        })
    }

    pub fn options(&self) -> &FragmentationOptions {
        &self.options
    }

    /// Feeds a fragment-protocol packet into the correct entry, or creates a
    /// new one for a novel `FragmentAllocate`. Returns whether `packet` was
    /// one of the variants this engine recognizes.
    pub fn ingest(&self, packet: &AnyPacket) -> bool {
        match packet {
            AnyPacket::FragmentAllocate(alloc) => {
                self.ingest_allocate(alloc);
                true
            }
            AnyPacket::FragmentMessage(msg) => {
                let mut state = self.state.lock().expect("receiver mutex poisoned");
                if let Some(entry) = state.registry.get_mut(&msg.packet_id) {
                    entry.store_fragment(msg.fragment_id, msg.body.clone());
                    log::trace!("fragment receiver: stored fragment {} for packet-id {}", msg.fragment_id, msg.packet_id);
                }
                true
            }
            AnyPacket::FragmentSendComplete(complete) => {
                if !complete.ack {
                    let mut state = self.state.lock().expect("receiver mutex poisoned");
                    if let Some(entry) = state.registry.get_mut(&complete.packet_id) {
                        entry.sends_till_complete_forced = 0;
                    }
                }
                true
            }
            AnyPacket::FragmentSendVerifyComplete(verify) => {
                let mut state = self.state.lock().expect("receiver mutex poisoned");
                if let Some(entry) = state.registry.get_mut(&verify.packet_id) {
                    entry.sends_till_complete_forced = 0;
                    entry.verify_received = true;
                }
                true
            }
            AnyPacket::FragmentRetrySend(retry) => {
                if retry.ack {
                    let mut state = self.state.lock().expect("receiver mutex poisoned");
                    if let Some(entry) = state.registry.get_mut(&retry.packet_id) {
                        entry.sends_till_complete_forced = self.options.empty_sends_till_forced + 1;
                    }
                }
                true
            }
            AnyPacket::FragmentSendStop(stop) => {
                let mut state = self.state.lock().expect("receiver mutex poisoned");
                if let Some(entry) = state.registry.remove(&stop.packet_id) {
                    state.uuid_to_id.remove(&entry.allocation_uuid);
                    log::debug!("fragment receiver: peer stopped packet-id {}", stop.packet_id);
                }
                true
            }
            _ => false,
        }
    }

    fn ingest_allocate(&self, alloc: &FragmentAllocate) {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        if state.uuid_to_id.contains_key(&alloc.allocation_uuid) {
            log::warn!("fragment receiver: duplicate allocation uuid {}", alloc.allocation_uuid);
            return;
        }
        match state.allocate_id() {
            Some(id) => {
                log::info!("fragment receiver: allocation granted, packet-id {} ({} fragments)", id, alloc.fragment_count);
                state.uuid_to_id.insert(alloc.allocation_uuid, id);
                let initial = self.options.empty_sends_till_forced + 1;
                state.registry.insert(id, ReceiverEntry::new(alloc.allocation_uuid, alloc.fragment_count, initial));
                state.pending_allocations.push_back(FragmentAllocation::new(id, alloc.allocation_uuid, true));
            }
            None => {
                log::warn!("fragment receiver: packet-id space exhausted, rejecting allocation {}", alloc.allocation_uuid);
                state.pending_allocations.push_back(FragmentAllocation::new(0, alloc.allocation_uuid, false));
            }
        }
    }

    /// Control packets to emit this round: outstanding allocation answers,
    /// per-entry next ack/control packet, and any queued `SendStop`s.
    pub fn poll_outbound(&self) -> Vec<AnyPacket> {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        let mut out = Vec::new();

        while let Some(alloc) = state.pending_allocations.pop_front() {
            out.push(AnyPacket::FragmentAllocation(alloc));
        }
        while let Some(packet_id) = state.pending_stops.pop_front() {
            out.push(AnyPacket::FragmentSendStop(FragmentSendStop::new(packet_id)));
        }

        let verify_fragments = self.options.verify_fragments;
        let equality_verify = self.options.equality_verify_fragments;
        let packet_ids: Vec<u32> = state.registry.keys().copied().collect();
        let mut to_finish = Vec::new();
        for packet_id in &packet_ids {
            if let Some(entry) = state.registry.get_mut(packet_id) {
                if let Some(packet) = Self::poll_entry(
                    entry,
                    *packet_id,
                    verify_fragments,
                    equality_verify,
                    self.options.empty_sends_till_forced,
                ) {
                    if matches!(&packet, AnyPacket::FragmentSendComplete(c) if c.ack) {
                        to_finish.push(*packet_id);
                    }
                    out.push(packet);
                }
            }
        }

        let mut newly_ready = Vec::new();
        for packet_id in &packet_ids {
            if let Some(entry) = state.registry.get(packet_id) {
                if !entry.consumed
                    && entry.ids_to_receive.is_empty()
                    && (!equality_verify || entry.verify_received)
                {
                    newly_ready.push(*packet_id);
                }
            }
        }
        for packet_id in newly_ready {
            self.consume_entry(&mut state, packet_id);
        }

        for packet_id in to_finish {
            if let Some(entry) = state.registry.remove(&packet_id) {
                state.uuid_to_id.remove(&entry.allocation_uuid);
                let mut finished = self.finished.lock().expect("finished mutex poisoned");
                finished.push_back(packet_id);
            }
        }

        out
    }

    fn poll_entry(
        entry: &mut ReceiverEntry,
        packet_id: u32,
        verify_fragments: bool,
        equality_verify: bool,
        empty_sends_till_forced: u32,
    ) -> Option<AnyPacket> {
        if let Some(id) = entry.ids_to_akn.pop_front() {
            entry.akn_pending.remove(&id);
            let body = if verify_fragments { entry.fragments.get(&id).cloned().unwrap_or_default() } else { Vec::new() };
            entry.sends_till_complete_forced = empty_sends_till_forced + 1;
            return Some(AnyPacket::FragmentMessageResponse(FragmentMessageResponse::new(packet_id, id, body)));
        }
        let blocked = equality_verify && !entry.verify_received;
        if blocked {
            return None;
        }
        entry.sends_till_complete_forced = entry.sends_till_complete_forced.saturating_sub(1);
        if entry.sends_till_complete_forced == 0 {
            if entry.ids_to_receive.is_empty() {
                Some(AnyPacket::FragmentSendComplete(FragmentSendComplete::new(packet_id, true)))
            } else {
                Some(AnyPacket::FragmentRetrySend(FragmentRetrySend::new(packet_id, false)))
            }
        } else {
            None
        }
    }

    fn consume_entry(&self, state: &mut ReceiverState, packet_id: u32) {
        let Some(entry) = state.registry.get_mut(&packet_id) else { return };
        let bytes = entry.reassembled_bytes();
        entry.consumed = true;
        match AnyPacket::decode_frame(&bytes, &self.factory) {
            Ok((packet, _consumed)) => {
                log::info!("fragment receiver: packet-id {} reassembled and decoded", packet_id);
                let mut output = self.output.lock().expect("output mutex poisoned");
                output.push_back(packet);
                self.output_cv.notify_one();
            }
            Err(err) => {
                log::warn!("fragment receiver: packet-id {} reassembled bytes failed to decode: {}", packet_id, err);
            }
        }
    }

    /// Whether a reconstructed packet is waiting in the output queue.
    pub fn receive_ready(&self) -> bool {
        !self.output.lock().expect("output mutex poisoned").is_empty()
    }

    /// Non-blocking pop of a reconstructed packet.
    pub fn poll_recv(&self) -> Option<AnyPacket> {
        self.output.lock().expect("output mutex poisoned").pop_front()
    }

    /// Blocks until a reconstructed packet is available, or the engine is
    /// closed (returns `None`).
    pub fn recv_blocking(&self) -> Option<AnyPacket> {
        let mut output = self.output.lock().expect("output mutex poisoned");
        loop {
            if let Some(packet) = output.pop_front() {
                return Some(packet);
            }
            if *self.closed.lock().expect("closed mutex poisoned") {
                return None;
            }
            output = self.output_cv.wait(output).expect("output mutex poisoned");
        }
    }

    pub fn poll_finished(&self) -> Option<u32> {
        self.finished.lock().expect("finished mutex poisoned").pop_front()
    }

    pub fn clear_finished(&self) {
        self.finished.lock().expect("finished mutex poisoned").clear();
    }

    /// Schedules a `SendStop` for the peer and drops the entry.
    pub fn delete(&self, packet_id: u32) {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        if let Some(entry) = state.registry.remove(&packet_id) {
            state.uuid_to_id.remove(&entry.allocation_uuid);
        }
        state.pending_stops.push_back(packet_id);
    }

    pub fn clear_pending(&self) {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        state.pending_allocations.clear();
        state.pending_stops.clear();
    }

    pub fn clear_registry(&self) {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        state.registry.clear();
        state.uuid_to_id.clear();
    }

    pub fn close(&self) {
        *self.closed.lock().expect("closed mutex poisoned") = true;
        {
            let mut state = self.state.lock().expect("receiver mutex poisoned");
            state.registry.clear();
            state.uuid_to_id.clear();
            state.pending_allocations.clear();
            state.pending_stops.clear();
        }
        self.output.lock().expect("output mutex poisoned").clear();
        self.output_cv.notify_all();
    }

    /// Registry entries older than `max_age`, for an external marshal that
    /// wants to time out stalled transfers.
    pub fn expire_older_than(&self, max_age: Duration) -> Vec<u32> {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        let now = Instant::now();
        let stale: Vec<u32> = state
            .registry
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.created_at) >= max_age)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            if let Some(entry) = state.registry.remove(id) {
                state.uuid_to_id.remove(&entry.allocation_uuid);
            }
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::fragment::FragmentSendStop;

    fn opts() -> FragmentationOptions {
        FragmentationOptions::new().with_fragmentation_split_size(4)
    }

    #[test]
    fn allocate_then_single_fragment_reassembles() {
        let receiver = FragmentReceiver::new(opts()).unwrap();
        let uuid = Uuid::new_v4();
        receiver.ingest(&AnyPacket::FragmentAllocate(FragmentAllocate::new(1, uuid)));
        let out = receiver.poll_outbound();
        assert!(matches!(&out[0], AnyPacket::FragmentAllocation(a) if a.success && a.allocation_uuid == uuid));
        let AnyPacket::FragmentAllocation(alloc) = &out[0] else { unreachable!() };
        let packet_id = alloc.packet_id;

        let stop = AnyPacket::FragmentSendStop(FragmentSendStop::new(7));
        let framed = stop.encode_frame().unwrap();
        receiver.ingest(&AnyPacket::FragmentMessage(FragmentMessage::new(packet_id, 0, framed)));

        let out = receiver.poll_outbound();
        assert!(matches!(&out[0], AnyPacket::FragmentMessageResponse(r) if r.fragment_id == 0));
        assert!(receiver.receive_ready());
        let decoded = receiver.poll_recv().unwrap();
        assert_eq!(decoded, stop);
    }

    #[test]
    fn duplicate_allocation_uuid_is_ignored() {
        let receiver = FragmentReceiver::new(opts()).unwrap();
        let uuid = Uuid::new_v4();
        receiver.ingest(&AnyPacket::FragmentAllocate(FragmentAllocate::new(1, uuid)));
        receiver.poll_outbound();
        receiver.ingest(&AnyPacket::FragmentAllocate(FragmentAllocate::new(1, uuid)));
        assert!(receiver.poll_outbound().is_empty());
    }

    #[test]
    fn forced_completion_after_k_plus_one_barren_polls() {
        let options = opts().with_empty_sends_till_forced(2);
        let receiver = FragmentReceiver::new(options).unwrap();
        let uuid = Uuid::new_v4();
        receiver.ingest(&AnyPacket::FragmentAllocate(FragmentAllocate::new(1, uuid)));
        let out = receiver.poll_outbound();
        let AnyPacket::FragmentAllocation(alloc) = &out[0] else { unreachable!() };
        let packet_id = alloc.packet_id;

        let stop = AnyPacket::FragmentSendStop(FragmentSendStop::new(7));
        let framed = stop.encode_frame().unwrap();
        receiver.ingest(&AnyPacket::FragmentMessage(FragmentMessage::new(packet_id, 0, framed)));
        let _ = receiver.poll_outbound(); // emits MessageResponse, consumes

        assert!(receiver.poll_outbound().is_empty());
        assert!(receiver.poll_outbound().is_empty());
        let out = receiver.poll_outbound();
        assert!(matches!(&out[0], AnyPacket::FragmentSendComplete(c) if c.ack && c.packet_id == packet_id));
    }

    #[test]
    fn missing_fragments_trigger_retry_send() {
        let options = opts().with_empty_sends_till_forced(1);
        let receiver = FragmentReceiver::new(options).unwrap();
        let uuid = Uuid::new_v4();
        receiver.ingest(&AnyPacket::FragmentAllocate(FragmentAllocate::new(2, uuid)));
        let _ = receiver.poll_outbound();

        let out = receiver.poll_outbound();
        assert!(out.is_empty());
        let out = receiver.poll_outbound();
        assert!(matches!(&out[0], AnyPacket::FragmentRetrySend(r) if !r.ack));
    }

    #[test]
    fn packet_id_allocator_skips_ids_in_use() {
        let receiver = FragmentReceiver::new(opts()).unwrap();
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        receiver.ingest(&AnyPacket::FragmentAllocate(FragmentAllocate::new(1, u1)));
        receiver.ingest(&AnyPacket::FragmentAllocate(FragmentAllocate::new(1, u2)));
        let out = receiver.poll_outbound();
        let ids: Vec<u32> = out
            .iter()
            .map(|p| if let AnyPacket::FragmentAllocation(a) = p { a.packet_id } else { panic!() })
            .collect();
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn delete_queues_send_stop() {
        let receiver = FragmentReceiver::new(opts()).unwrap();
        let uuid = Uuid::new_v4();
        receiver.ingest(&AnyPacket::FragmentAllocate(FragmentAllocate::new(1, uuid)));
        let out = receiver.poll_outbound();
        let AnyPacket::FragmentAllocation(alloc) = &out[0] else { unreachable!() };
        receiver.delete(alloc.packet_id);
        let out = receiver.poll_outbound();
        assert!(matches!(&out[0], AnyPacket::FragmentSendStop(s) if s.packet_id == alloc.packet_id));
    }
}
