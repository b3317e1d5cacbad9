//! Fragment loss and recovery: a large transaction split over the radio
//! link survives 50% fragment loss through signed retransmission requests,
//! and cumulative ACKs shrink the missing set.

use lorad::crypto::{verify_signature, NodeIdentity};
use lorad::mesh::fragment::{Fragmenter, FragmenterConfig, FragmentProgress, SessionState};
use lorad::mesh::message::AckList;
use lorad::network_type::NetworkType;
use lorad::types::{now_ms, OutPoint, PayloadKind, Transaction, TxInput, TxOutput};
use std::sync::Arc;

fn wide_transaction() -> Transaction {
    Transaction {
        inputs: (0..20)
            .map(|i| TxInput {
                previous_output: OutPoint::new([i as u8; 32], i),
                script_sig: vec![i as u8; 40],
                sequence: 0xFFFFFFFF,
            })
            .collect(),
        outputs: (0..20)
            .map(|i| TxOutput {
                value: 1_000 + i as u64,
                script_pubkey: vec![0x50 + i as u8; 24],
            })
            .collect(),
        lock_time: 0,
        timestamp: 1_700_000_000,
        fee: 150,
    }
}

fn sender_and_receiver() -> (Fragmenter, Fragmenter) {
    let sender = Fragmenter::new(
        Arc::new(NodeIdentity::generate(NetworkType::Testnet)),
        FragmenterConfig::default(),
    );
    let receiver = Fragmenter::new(
        Arc::new(NodeIdentity::generate(NetworkType::Testnet)),
        FragmenterConfig::default(),
    );
    (sender, receiver)
}

#[test]
fn recovery_after_half_loss() {
    let (mut sender, mut receiver) = sender_and_receiver();
    let original = wide_transaction();
    let payload = bincode::serialize(&original).unwrap();

    let fragments = sender
        .fragment(PayloadKind::UtxoTransaction, &payload)
        .unwrap();
    let n = fragments.len();
    assert!(n > 2, "wide transaction must span several fragments, got {n}");
    let message_id = fragments[0].header.message_id;

    // Deliver only the even half
    let delivered = n.div_ceil(2);
    for fragment in fragments.iter().step_by(2).take(delivered) {
        let progress = receiver.accept(fragment.clone()).unwrap();
        assert!(!matches!(progress, FragmentProgress::Complete { .. }));
    }

    let session = receiver.session(&message_id).unwrap();
    assert_eq!(session.state, SessionState::Receiving);
    let missing = session.missing();
    let expected_missing: Vec<u16> = (0..n as u16).filter(|seq| seq % 2 == 1).collect();
    assert_eq!(missing, expected_missing);

    // The backoff timer fires and produces a signed retransmission request
    let requests = receiver.due_retransmission_requests(now_ms() + 10_000);
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.missing_fragments, expected_missing);

    let mut region = vec![0x52u8];
    region.extend_from_slice(&request.message_id);
    for seq in &request.missing_fragments {
        region.extend_from_slice(&seq.to_be_bytes());
    }
    region.extend_from_slice(&request.timestamp_ms.to_be_bytes());
    region.extend_from_slice(&request.node_id);
    assert!(verify_signature(&request.node_id, &region, &request.signature).is_ok());

    // The originator serves the request, completing the session
    let served = sender.handle_retransmission_request(request).unwrap();
    assert_eq!(served.len(), expected_missing.len());

    let mut completed = None;
    for fragment in served {
        if let FragmentProgress::Complete { payload } = receiver.accept(fragment).unwrap() {
            completed = Some(payload);
        }
    }

    let reassembled: Transaction = bincode::deserialize(&completed.unwrap()).unwrap();
    assert_eq!(reassembled.txid(), original.txid());
    assert_eq!(reassembled, original);
}

#[test]
fn cumulative_ack_then_partial_arrival() {
    let (mut sender, mut receiver) = sender_and_receiver();

    // Exactly 8 fragments of transaction payload
    let payload = vec![0xA5u8; 8 * 180];
    let fragments = sender
        .fragment(PayloadKind::UtxoTransaction, &payload)
        .unwrap();
    assert_eq!(fragments.len(), 8);
    let message_id = fragments[0].header.message_id;

    receiver.accept(fragments[0].clone()).unwrap();

    let ack = sender.make_ack(message_id, AckList::Cumulative(2));
    receiver.apply_ack(&ack).unwrap();

    let session = receiver.session(&message_id).unwrap();
    let missing = session.missing();
    assert!(!missing.contains(&0));
    assert!(!missing.contains(&1));
    assert!(!missing.contains(&2));

    receiver.accept(fragments[4].clone()).unwrap();
    assert_eq!(
        receiver.session(&message_id).unwrap().missing(),
        vec![3, 5, 6, 7]
    );
}

#[test]
fn single_fragment_payload_has_no_missing_set() {
    let (mut sender, mut receiver) = sender_and_receiver();

    let fragments = sender
        .fragment(PayloadKind::UtxoTransaction, b"tiny")
        .unwrap();
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].header.total_fragments, 1);

    match receiver.accept(fragments.into_iter().next().unwrap()).unwrap() {
        FragmentProgress::Complete { payload } => assert_eq!(payload, b"tiny"),
        other => panic!("expected completion, got {other:?}"),
    }
}
