use bridge::{
    domain::ApprovalAction,
    infra::{
        rpc_mock::MockRpc,
        signer_mock::{MockFailure, MockSigner},
    },
    ApprovalKind,
};
use bridge_core::{
    encode, sign_request, MessageEncoding, PageInfo, RpcContext, SendOptions, SolanaMethod,
    UnsignedRequest, INTERNAL_ERROR, INVALID_REQUEST, LOG_METHOD, UNAUTHORIZED, UNEXPECTED,
    USER_DECLINED,
};
use ed25519_dalek::{Signature, Signer, Verifier};
use futures::future::join_all;
use serde_json::{json, Value};
use std::{cell::RefCell, rc::Rc, sync::Arc, time::Duration};

use crate::helpers::{transaction, wallet_key, AutoApprover, Harness};

type Seen = Rc<RefCell<Vec<Vec<Value>>>>;

fn listen(harness: &Harness, name: &str) -> Seen {
    let seen: Seen = Rc::new(RefCell::new(Vec::new()));
    let record = seen.clone();
    harness
        .provider
        .on(name, move |args| record.borrow_mut().push(args.to_vec()));
    seen
}

fn page(url: &str) -> PageInfo {
    PageInfo {
        url: url.to_string(),
        title: Some(String::from("Example dApp")),
        icon_url: Some(format!("{}favicon.ico", url)),
    }
}

fn wallet_address() -> String {
    bs58::encode(wallet_key().verifying_key().to_bytes()).into_string()
}

async fn wait_for_gate(harness: &Harness) {
    while harness.approvals.pending().await.is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_connect_accept_sets_public_key_and_fires_event() {
    let h = Harness::builder().build();
    let approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);
    let connects = listen(&h, "connect");

    h.drive(h.provider.post_page_info(&page("https://app.example.com/")))
        .await
        .unwrap();
    let address = h.drive(h.provider.connect()).await.unwrap();
    h.settle().await;

    let expected = bs58::encode(MockSigner::default().public_key_bytes()).into_string();
    assert_eq!(address, expected);
    assert_eq!(h.provider.public_key(), Some(expected.clone()));
    assert!(h.provider.is_connected());
    assert_eq!(*connects.borrow(), vec![vec![json!(expected)]]);

    let seen = approver.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind, ApprovalKind::Connect);
    assert_eq!(seen[0].domain, "app.example.com");
    assert_eq!(seen[0].title.as_deref(), Some("Example dApp"));

    h.shutdown().await;
}

#[tokio::test]
async fn test_declined_connect_rejects_without_event() {
    let h = Harness::builder().build();
    let _approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Reject);
    let connects = listen(&h, "connect");

    let err = h.drive(h.provider.connect()).await.unwrap_err();
    h.settle().await;

    assert_eq!(err.code, USER_DECLINED);
    assert_eq!(err.message, "User declined the request");
    assert!(!h.provider.is_connected());
    assert!(connects.borrow().is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_while_disconnected_stays_local() {
    let h = Harness::builder().build();
    let disconnects = listen(&h, "disconnect");

    h.drive(h.provider.disconnect()).await.unwrap();
    h.settle().await;

    assert!(disconnects.borrow().is_empty());
    assert_eq!(h.provider.pending_calls(), 0);

    h.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_round_trip_clears_connection() {
    let h = Harness::builder().build();
    let _approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);
    let disconnects = listen(&h, "disconnect");

    h.drive(h.provider.connect()).await.unwrap();
    h.drive(h.provider.disconnect()).await.unwrap();
    h.settle().await;

    assert!(!h.provider.is_connected());
    assert_eq!(disconnects.borrow().len(), 1);

    h.shutdown().await;
}

#[tokio::test]
async fn test_sign_message_returns_backend_signature() {
    let h = Harness::builder().local_signer(MockRpc::default()).build();
    let approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);

    h.drive(h.provider.connect()).await.unwrap();
    let signed = h
        .drive(h.provider.sign_message(b"hello", MessageEncoding::Utf8))
        .await
        .unwrap();

    let expected = wallet_key().sign(b"hello").to_bytes();
    assert_eq!(signed.signature, expected.to_vec());
    assert_eq!(signed.public_key, wallet_address());

    let seen = approver.seen();
    assert_eq!(seen[1].kind, ApprovalKind::SignMessage);
    assert_eq!(seen[1].context["message"], json!("hello"));

    h.shutdown().await;
}

#[tokio::test]
async fn test_sign_and_send_legacy_transaction_resolves_single_result() {
    let rpc = MockRpc::default();
    let h = Harness::builder().local_signer(rpc.clone()).build();
    let _approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);

    let key = wallet_key().verifying_key().to_bytes();
    let unsigned = transaction(key, [0u8; 32], false);
    let options = SendOptions {
        skip_preflight: Some(true),
        ..Default::default()
    };

    h.drive(h.provider.connect()).await.unwrap();
    let result = h
        .drive(h.provider.sign_and_send_transaction(&unsigned, Some(options.clone())))
        .await
        .unwrap();

    let sent = rpc.sent();
    assert_eq!(sent.len(), 1);
    let broadcast = &sent[0].transaction;
    assert!(!broadcast.is_versioned());
    assert_eq!(*broadcast.recent_blockhash(), rpc.blockhash());
    assert_eq!(sent[0].options, options);

    let signature = Signature::from_slice(broadcast.signature().unwrap().as_ref()).unwrap();
    wallet_key()
        .verifying_key()
        .verify(&broadcast.message_data(), &signature)
        .unwrap();
    assert_eq!(result.public_key, wallet_address());
    assert_eq!(
        result.signature,
        bs58::encode(signature.to_bytes()).into_string()
    );

    h.shutdown().await;
}

#[tokio::test]
async fn test_sign_all_transactions_keeps_order_in_one_round_trip() {
    let h = Harness::builder().local_signer(MockRpc::default()).build();
    let approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);

    let key = wallet_key().verifying_key().to_bytes();
    let batch = vec![
        transaction(key, [1u8; 32], false),
        transaction(key, [2u8; 32], true),
        transaction(key, [3u8; 32], false),
    ];

    h.drive(h.provider.connect()).await.unwrap();
    let signed = h
        .drive(h.provider.sign_all_transactions(&batch))
        .await
        .unwrap();

    assert_eq!(signed.len(), 3);
    for (signed, unsigned) in signed.iter().zip(&batch) {
        assert_eq!(signed.message_data(), unsigned.message_data());
        assert_eq!(signed.is_versioned(), unsigned.is_versioned());
        let signature = Signature::from_slice(signed.signature().unwrap().as_ref()).unwrap();
        wallet_key()
            .verifying_key()
            .verify(&signed.message_data(), &signature)
            .unwrap();
    }
    // connect plus a single gate for the whole batch
    assert_eq!(approver.seen().len(), 2);

    h.shutdown().await;
}

#[tokio::test]
async fn test_batch_with_malformed_transaction_signs_nothing() {
    let signer = MockSigner::default();
    let h = Harness::builder().signer(Arc::new(signer.clone())).build();
    let _approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);
    let disconnects = listen(&h, "disconnect");

    h.drive(h.provider.connect()).await.unwrap();
    let good = transaction(signer.public_key_bytes(), [4u8; 32], false)
        .to_hex()
        .unwrap();
    let params = json!([[good, false], ["c0ffee", false], [good, false]]);
    let err = h
        .drive(
            h.provider
                .rpc_request(RpcContext::new(SolanaMethod::SignTransactions, params)),
        )
        .await
        .unwrap_err();
    h.settle().await;

    assert_eq!(err.code, INTERNAL_ERROR);
    assert_eq!(signer.calls(), 0);
    assert_eq!(disconnects.borrow().len(), 1);
    assert!(!h.provider.is_connected());

    h.shutdown().await;
}

#[tokio::test]
async fn test_backend_failure_declines_and_disconnects_once() {
    let h = Harness::builder()
        .signer(Arc::new(MockSigner::default().failing(MockFailure::Error)))
        .build();
    let _approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);
    let disconnects = listen(&h, "disconnect");

    h.drive(h.provider.connect()).await.unwrap();
    let err = h
        .drive(h.provider.sign_message(b"hi", MessageEncoding::Utf8))
        .await
        .unwrap_err();
    h.settle().await;

    assert_eq!(err.code, INTERNAL_ERROR);
    assert_eq!(err.message, "Something went wrong");
    assert_eq!(disconnects.borrow().len(), 1);
    assert!(!h.provider.is_connected());

    h.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_requests_resolve_with_their_own_results() {
    let h = Harness::builder().local_signer(MockRpc::default()).build();
    let _approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);

    let messages: Vec<Vec<u8>> = (0..5u8).map(|i| vec![b'm', i]).collect();
    h.drive(h.provider.connect()).await.unwrap();
    let results = h
        .drive(join_all(
            messages
                .iter()
                .map(|message| h.provider.sign_message(message, MessageEncoding::Hex)),
        ))
        .await;

    assert_eq!(h.provider.pending_calls(), 0);
    for (message, result) in messages.iter().zip(results) {
        let signed = result.unwrap();
        assert_eq!(signed.signature, wallet_key().sign(message).to_bytes().to_vec());
    }

    h.shutdown().await;
}

#[tokio::test]
async fn test_connect_completes_before_queued_signing_starts() {
    let h = Harness::builder().local_signer(MockRpc::default()).build();
    let _approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);

    // Both requests hit the wire before the host answers either one
    let (address, signed) = h
        .drive(async {
            futures::join!(
                h.provider.connect(),
                h.provider.sign_message(b"queued", MessageEncoding::Utf8)
            )
        })
        .await;

    assert_eq!(address.unwrap(), wallet_address());
    assert_eq!(signed.unwrap().public_key, wallet_address());

    h.shutdown().await;
}

#[tokio::test]
async fn test_signing_without_connection_is_unauthorized() {
    let h = Harness::builder().build();
    let approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);

    let err = h
        .drive(h.provider.sign_message(b"hi", MessageEncoding::Utf8))
        .await
        .unwrap_err();

    assert_eq!(err.code, UNAUTHORIZED);
    assert!(approver.seen().is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn test_malformed_params_keep_session_connected() {
    let h = Harness::builder().build();
    let _approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);
    let disconnects = listen(&h, "disconnect");

    h.drive(h.provider.connect()).await.unwrap();
    let err = h
        .drive(h.provider.rpc_request(RpcContext::new(
            SolanaMethod::SignMessage,
            json!({"not": "a tuple"}),
        )))
        .await
        .unwrap_err();
    h.settle().await;

    assert_eq!(err.code, INVALID_REQUEST);
    assert_eq!(err.message, "Invalid sol_signMessage request");
    assert!(h.provider.is_connected());
    assert!(disconnects.borrow().is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn test_navigation_ends_queued_requests() {
    let h = Harness::builder().build();
    let disconnects = listen(&h, "disconnect");

    h.drive(h.provider.post_page_info(&page("https://a.example.com/")))
        .await
        .unwrap();

    let (connect, sign, ()) = h
        .drive(async {
            futures::join!(
                h.provider.connect(),
                h.provider.sign_message(b"hi", MessageEncoding::Utf8),
                async {
                    wait_for_gate(&h).await;
                    h.provider
                        .post_page_info(&page("https://b.example.com/"))
                        .await
                        .unwrap();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            )
        })
        .await;
    h.settle().await;

    for err in [connect.unwrap_err(), sign.unwrap_err()] {
        assert_eq!(err.code, UNEXPECTED);
        assert_eq!(err.message, "Session ended");
    }
    assert_eq!(disconnects.borrow().len(), 1);
    assert_eq!(h.provider.pending_calls(), 0);
    assert!(h.approvals.pending().await.is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn test_gate_accepted_after_navigation_authorizes_nothing() {
    let h = Harness::builder().build();
    let connects = listen(&h, "connect");

    h.drive(h.provider.post_page_info(&page("https://a.example.com/")))
        .await
        .unwrap();

    let (connect, (shown, accepted)) = h
        .drive(async {
            futures::join!(h.provider.connect(), async {
                wait_for_gate(&h).await;
                let shown = h.approvals.pending().await.remove(0);
                h.provider
                    .post_page_info(&page("https://evil.example.com/"))
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
                let accepted = h.approvals.resolve(shown.id, ApprovalAction::Accept).await;
                (shown, accepted)
            })
        })
        .await;
    h.settle().await;

    assert_eq!(shown.domain, "a.example.com");
    assert!(!accepted);
    let err = connect.unwrap_err();
    assert_eq!(err.code, UNEXPECTED);
    assert_eq!(err.message, "Session ended");
    assert!(connects.borrow().is_empty());
    assert_eq!(h.provider.public_key(), None);
    assert_eq!(h.bridge.session().active_address().await, None);
    assert_eq!(
        h.bridge.session().snapshot().await.page_url.as_deref(),
        Some("https://evil.example.com/")
    );

    h.shutdown().await;
}

#[tokio::test]
async fn test_unanswered_gate_times_out_and_disconnects() {
    let h = Harness::builder()
        .approval_timeout(Duration::from_millis(50))
        .build();
    let disconnects = listen(&h, "disconnect");

    let err = h.drive(h.provider.connect()).await.unwrap_err();
    h.settle().await;

    assert_eq!(err.code, USER_DECLINED);
    assert_eq!(err.message, "Approval request timed out");
    assert_eq!(disconnects.borrow().len(), 1);
    assert!(h.approvals.pending().await.is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn test_foreign_signature_is_refused() {
    let h = Harness::builder().page_secret(b"not-the-host-secret").build();
    let approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);

    let err = h.drive(h.provider.connect()).await.unwrap_err();

    assert_eq!(err.code, UNAUTHORIZED);
    assert_eq!(err.message, "Unauthorized request signature");
    assert!(approver.seen().is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn test_foreign_signature_passes_when_not_enforced() {
    let h = Harness::builder()
        .page_secret(b"not-the-host-secret")
        .enforce_signatures(false)
        .build();
    let _approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);

    assert!(h.drive(h.provider.connect()).await.is_ok());

    h.shutdown().await;
}

#[tokio::test]
async fn test_host_teardown_settles_in_flight_request() {
    let h = Harness::builder().build();

    let (connect, ()) = h
        .drive(async {
            futures::join!(h.provider.connect(), async {
                wait_for_gate(&h).await;
                h.bridge.shutdown();
            })
        })
        .await;

    let err = connect.unwrap_err();
    assert_eq!(err.code, UNEXPECTED);
    assert_eq!(err.message, "Session ended");
    assert!(h.approvals.pending().await.is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn test_noise_and_logs_do_not_disturb_the_queue() {
    let h = Harness::builder().build();
    let _approver = AutoApprover::spawn(h.approvals.clone(), ApprovalAction::Accept);

    h.inject("{\"source\":\"react-devtools\"}").await;
    h.inject("plain text").await;
    let log = sign_request(
        h.secret.expose(),
        UnsignedRequest::new(LOG_METHOD, json!({"message": "page booted"})),
    )
    .unwrap();
    h.inject(&encode(&log.into()).unwrap()).await;
    h.drive(h.provider.log("second line")).await.unwrap();

    assert!(h.drive(h.provider.connect()).await.is_ok());

    h.shutdown().await;
}
