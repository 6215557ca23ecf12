//! End-to-end scenarios spanning a `FragmentSender` and a `FragmentReceiver`
//! wired directly to each other (no socket in the loop) — the counterpart to
//! reliudp's top-level `examples/test_expect_client.rs`/
//! `test_expect_server.rs` smoke tests, but run as `cargo test` rather than
//! two binaries that have to be started by hand.

use relipak::packet::{
    AnyPacket, FragmentAllocate, FragmentAllocation, FragmentMessage, FragmentMessageResponse,
    FragmentSendComplete, FragmentSendStop, FragmentSendVerifyComplete, NetworkIdentifier,
};
use relipak::{FragmentReceiver, FragmentSender, FragmentationOptions};

/// Drains both sides' outbound queues into each other, round by round.
/// `drop` filters sender->receiver fragment traffic only, modeling a single
/// lossy hop; it is never applied to control traffic flowing the other way.
struct Pump<'a> {
    sender: &'a FragmentSender,
    receiver: &'a FragmentReceiver,
}

impl<'a> Pump<'a> {
    fn new(sender: &'a FragmentSender, receiver: &'a FragmentReceiver) -> Self {
        Pump { sender, receiver }
    }

    fn round(&self, drop: &mut dyn FnMut(&AnyPacket) -> bool) {
        for packet in self.sender.poll_outbound() {
            if !drop(&packet) {
                self.receiver.ingest(&packet);
            }
        }
        for packet in self.receiver.poll_outbound() {
            self.sender.ingest(&packet);
        }
    }

    fn run(&self, rounds: usize, drop: &mut dyn FnMut(&AnyPacket) -> bool) {
        for _ in 0..rounds {
            self.round(drop);
        }
    }
}

fn no_drop(_: &AnyPacket) -> bool {
    false
}

/// S1 (spec §8): a single-fragment message completes end to end and the
/// sender's packet-id is posted to `finished` once the receiver's
/// `SendComplete(ack=true)` reaches it back.
#[test]
fn s1_single_fragment_message_completes_end_to_end() {
    let options = FragmentationOptions::new()
        .with_fragmentation_split_size(16)
        .with_empty_sends_till_forced(2);
    let sender = FragmentSender::new(options).unwrap();
    let receiver = FragmentReceiver::new(options).unwrap();
    let pump = Pump::new(&sender, &receiver);

    let inner = AnyPacket::FragmentSendStop(FragmentSendStop::new(7));
    sender.submit(inner.encode_frame().unwrap()).unwrap();

    pump.run(8, &mut no_drop);

    let delivered = receiver.poll_recv().expect("inner packet should have reassembled");
    assert_eq!(delivered, inner);
    assert_eq!(sender.poll_finished(), Some(0));
}

/// S2 (spec §8): with equality verification on, a fragment that never makes
/// it to the receiver keeps its allocation alive — the sender's resend pass
/// cycles back to every still-unacked fragment — until a later attempt gets
/// through and is acknowledged, after which the transfer still completes.
#[test]
fn s2_a_lost_fragment_is_resent_on_a_later_pass_and_completes() {
    let options = FragmentationOptions::new()
        .with_fragmentation_split_size(8)
        .with_verify_fragments(true)
        .with_equality_verify_fragments(true);
    let sender = FragmentSender::new(options).unwrap();
    let receiver = FragmentReceiver::new(options).unwrap();
    let pump = Pump::new(&sender, &receiver);

    // encode_frame() adds 6 bytes of tag+length overhead; a 14-byte payload
    // gives a 20-byte frame, split 8/8/4 at this split size.
    let inner = AnyPacket::NetworkIdentifier(NetworkIdentifier::new("abcdefghijklmn"));
    sender.submit(inner.encode_frame().unwrap()).unwrap();

    let mut dropped_once = false;
    pump.run(60, &mut |packet| {
        if let AnyPacket::FragmentMessage(FragmentMessage { fragment_id: 1, .. }) = packet {
            if !dropped_once {
                dropped_once = true;
                return true;
            }
        }
        false
    });

    assert!(dropped_once, "fragment 1 should have been dropped on its first send");
    let delivered = receiver.poll_recv().expect("message should reassemble once the retried fragment lands");
    assert_eq!(delivered, inner);
    assert_eq!(sender.poll_finished(), Some(0));
}

/// S3 (spec §8): with equality verification on, a response whose echoed
/// body doesn't match the fragment that was sent does not count as an ack —
/// the fragment stays in the resend set across passes until the peer
/// echoes back the correct bytes, and only then does the sender close out
/// with `FragmentSendVerifyComplete`.
#[test]
fn s3_equality_mismatch_keeps_resending_until_it_matches() {
    let options = FragmentationOptions::new()
        .with_fragmentation_split_size(400)
        .with_verify_fragments(true)
        .with_equality_verify_fragments(true);
    let sender = FragmentSender::new(options).unwrap();

    let body: Vec<u8> = (0..800u32).map(|v| v as u8).collect(); // 2 fragments
    let uuid = sender.submit(body).unwrap();

    let allocs = sender.poll_outbound();
    assert!(matches!(&allocs[0], AnyPacket::FragmentAllocate(a) if a.allocation_uuid == uuid));
    sender.ingest(&AnyPacket::FragmentAllocation(FragmentAllocation::new(1, uuid, true)));

    // primary send: fragments 0 and 1, one per poll
    let f0 = sender.poll_outbound();
    assert!(matches!(&f0[0], AnyPacket::FragmentMessage(m) if m.fragment_id == 0));
    let f1 = sender.poll_outbound();
    assert!(matches!(&f1[0], AnyPacket::FragmentMessage(m) if m.fragment_id == 1));

    // entering Resending: re-emits fragment 0 first; echo back corrupted bytes
    let out = sender.poll_outbound();
    let AnyPacket::FragmentMessage(m0) = &out[0] else { panic!("expected a fragment message") };
    let mut corrupted = m0.body.clone();
    corrupted[0] ^= 0xFF;
    sender.ingest(&AnyPacket::FragmentMessageResponse(FragmentMessageResponse::new(1, 0, corrupted)));

    // fragment 1 still outstanding in this pass
    let out = sender.poll_outbound();
    let AnyPacket::FragmentMessage(m1) = &out[0] else { panic!("expected a fragment message") };
    sender.ingest(&AnyPacket::FragmentMessageResponse(FragmentMessageResponse::new(1, 1, m1.body.clone())));

    // the pass restarts: fragment 0 is retried because the echo was wrong
    let out = sender.poll_outbound();
    let AnyPacket::FragmentMessage(m0_retry) = &out[0] else { panic!("fragment 0 should still be outstanding") };
    assert_eq!(m0_retry.fragment_id, 0);
    sender.ingest(&AnyPacket::FragmentMessageResponse(FragmentMessageResponse::new(1, 0, m0_retry.body.clone())));

    let out = sender.poll_outbound();
    assert!(matches!(&out[0], AnyPacket::FragmentSendVerifyComplete(v) if v.packet_id == 1));
}

/// Invariant 4 (spec §8): delivering the same `MessageResponse` twice does
/// not disturb the completion path — the ack is idempotent.
#[test]
fn idempotent_acks_do_not_break_completion() {
    let options = FragmentationOptions::new().with_fragmentation_split_size(16);
    let sender = FragmentSender::new(options).unwrap();

    let uuid = sender.submit(vec![1, 2, 3]).unwrap();
    let allocs = sender.poll_outbound();
    assert!(matches!(&allocs[0], AnyPacket::FragmentAllocate(a) if a.allocation_uuid == uuid));
    sender.ingest(&AnyPacket::FragmentAllocation(FragmentAllocation::new(1, uuid, true)));

    let frag = sender.poll_outbound();
    let AnyPacket::FragmentMessage(m) = &frag[0] else { panic!("expected a single fragment") };
    let resp = AnyPacket::FragmentMessageResponse(FragmentMessageResponse::new(1, m.fragment_id, Vec::new()));

    sender.ingest(&resp);
    sender.ingest(&resp); // duplicate: must be a no-op, not a double-completion

    let out = sender.poll_outbound();
    assert!(out.iter().any(|p| matches!(p, AnyPacket::FragmentSendComplete(c) if c.packet_id == 1 && !c.ack)));
    sender.ingest(&AnyPacket::FragmentSendComplete(FragmentSendComplete::new(1, true)));
    assert_eq!(sender.poll_finished(), Some(1));
}

/// Invariant 7 (spec §8): two `Allocate`s carrying the same uuid produce at
/// most one receiver-side entry, observable here as only one `Allocation`
/// answer ever being handed out for that uuid.
#[test]
fn uuid_uniqueness_produces_at_most_one_entry() {
    let receiver = FragmentReceiver::new(FragmentationOptions::default()).unwrap();
    let uuid = uuid::Uuid::new_v4();
    receiver.ingest(&AnyPacket::FragmentAllocate(FragmentAllocate::new(3, uuid)));
    receiver.ingest(&AnyPacket::FragmentAllocate(FragmentAllocate::new(3, uuid)));

    let out = receiver.poll_outbound();
    let allocations: Vec<_> = out.iter().filter(|p| matches!(p, AnyPacket::FragmentAllocation(_))).collect();
    assert_eq!(allocations.len(), 1);
}
