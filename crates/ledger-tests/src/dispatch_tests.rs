//! Inbound dispatch tests: routing, ordering, backpressure and the fatal
//! error paths.

use crate::fixtures::{Height, Packet, Ping, Pong, Text};
use crate::harness::*;
use ledger_p2p::{Message, MessageType, PeerConfig, PeerError, TransportError};
use std::sync::Arc;
use std::time::Duration;

fn height_bytes(h: u64) -> Vec<u8> {
    Height::new(h, 0).encode().unwrap().to_vec()
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_payload_decoded_with_channel_type() {
    init_test_logging();
    let heights = RecordingReactor::new();
    let texts = RecordingReactor::new();
    let tp = TestPeer::builder()
        .remote_channels(&[0x20, 0x21])
        .channel(0x20, heights.clone(), MessageType::of::<Height>())
        .channel(0x21, texts.clone(), MessageType::of::<Text>())
        .build()
        .started()
        .await;

    let text = Text::new("hello").encode().unwrap();
    within(tp.transport.deliver(0x20, &height_bytes(5))).await.unwrap();
    within(tp.transport.deliver(0x21, &text)).await.unwrap();

    assert!(heights.wait_for(1).await);
    assert!(texts.wait_for(1).await);
    assert_eq!(heights.messages::<Height>(), vec![Height::new(5, 0)]);
    assert_eq!(texts.messages::<Text>(), vec![Text::new("hello")]);

    let id = tp.peer.id();
    heights.with_received(|r| {
        assert_eq!(r[0].channel, 0x20);
        assert_eq!(r[0].src, id);
    });
    within(tp.peer.stop()).await.unwrap();
}

#[tokio::test]
async fn test_payload_for_wrong_type_is_fatal() {
    init_test_logging();
    let heights = RecordingReactor::new();
    let texts = RecordingReactor::new();
    let tp = TestPeer::builder()
        .remote_channels(&[0x20, 0x21])
        .channel(0x20, heights.clone(), MessageType::of::<Height>())
        .channel(0x21, texts.clone(), MessageType::of::<Text>())
        .build()
        .started()
        .await;

    let bytes = height_bytes(11);
    within(tp.transport.deliver(0x20, &bytes)).await.unwrap();
    assert!(heights.wait_for(1).await);
    assert_eq!(heights.count(), 1);

    // Same bytes on the text channel.
    within(tp.transport.deliver(0x21, &bytes)).await.unwrap();
    assert!(tp.errors.wait_for_error().await);
    assert!(tp.errors.any(|e| matches!(
        e,
        PeerError::Decode { channel: 0x21, .. }
    )));
    assert!(tp.errors.any(PeerError::is_fatal));
    assert_eq!(tp.errors.peers(), vec![tp.peer.id()]);
    assert_eq!(texts.count(), 0);

    // Only the failed channel's processor is gone.
    assert!(eventually(|| tp.peer.running_processors() == 1).await);
    within(tp.transport.deliver(0x20, &height_bytes(12))).await.unwrap();
    assert!(heights.wait_for(2).await);
    within(tp.peer.stop()).await.unwrap();
}

#[tokio::test]
async fn test_unknown_inbound_channel_is_fatal() {
    let tp = TestPeer::builder()
        .remote_channels(&[0x20, 0x30])
        .channel(0x20, RecordingReactor::new(), MessageType::of::<Height>())
        .build()
        .started()
        .await;

    // 0x30 is announced by the remote but has no local reactor.
    let result = within(tp.transport.deliver(0x30, &height_bytes(1))).await;
    assert!(matches!(result, Err(PeerError::UnknownChannel(0x30))));
    assert!(tp
        .errors
        .any(|e| matches!(e, PeerError::UnknownChannel(0x30))));
    within(tp.peer.stop()).await.unwrap();
}

#[tokio::test]
async fn test_transport_error_reported() {
    let tp = TestPeer::builder()
        .remote_channels(&[0x20])
        .channel(0x20, RecordingReactor::new(), MessageType::of::<Height>())
        .build()
        .started()
        .await;

    tp.transport.fail(TransportError::Closed);
    assert!(tp.errors.wait_for_error().await);
    assert!(tp
        .errors
        .any(|e| matches!(e, PeerError::Transport(TransportError::Closed))));
    within(tp.peer.stop()).await.unwrap();
}

// ============================================================================
// Envelopes
// ============================================================================

#[tokio::test]
async fn test_envelope_unwrapped_before_delivery() {
    let reactor = RecordingReactor::new();
    let tp = TestPeer::builder()
        .remote_channels(&[0x40])
        .channel(0x40, reactor.clone(), MessageType::of::<Packet>())
        .build()
        .started()
        .await;

    let ping = Packet { kind: 1, nonce: 7 }.encode().unwrap();
    let pong = Packet { kind: 2, nonce: 8 }.encode().unwrap();
    within(tp.transport.deliver(0x40, &ping)).await.unwrap();
    within(tp.transport.deliver(0x40, &pong)).await.unwrap();

    assert!(reactor.wait_for(2).await);
    assert_eq!(reactor.messages::<Ping>(), vec![Ping(7)]);
    assert_eq!(reactor.messages::<Pong>(), vec![Pong(8)]);
    assert!(reactor.messages::<Packet>().is_empty());
    within(tp.peer.stop()).await.unwrap();
}

#[tokio::test]
async fn test_unwrap_failure_is_fatal() {
    let reactor = RecordingReactor::new();
    let tp = TestPeer::builder()
        .remote_channels(&[0x40])
        .channel(0x40, reactor.clone(), MessageType::of::<Packet>())
        .build()
        .started()
        .await;

    let bogus = Packet { kind: 0x7f, nonce: 1 }.encode().unwrap();
    within(tp.transport.deliver(0x40, &bogus)).await.unwrap();

    assert!(tp.errors.wait_for_error().await);
    assert!(tp
        .errors
        .any(|e| matches!(e, PeerError::Unwrap { channel: 0x40, .. })));
    assert_eq!(reactor.count(), 0);
    within(tp.peer.stop()).await.unwrap();
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test]
async fn test_reactor_panic_reported_as_error() {
    init_test_logging();
    let tp = TestPeer::builder()
        .remote_channels(&[0x20])
        .channel(0x20, Arc::new(PanickingReactor), MessageType::of::<Height>())
        .build()
        .started()
        .await;

    within(tp.transport.deliver(0x20, &height_bytes(1))).await.unwrap();

    assert!(tp.errors.wait_for_error().await);
    assert!(tp.errors.any(|e| match e {
        PeerError::Panic(msg) => msg.contains("reactor rejected message on channel 0x20"),
        _ => false,
    }));
    assert!(eventually(|| tp.peer.running_processors() == 0).await);

    // The peer itself is still usable until the supervisor stops it.
    assert!(tp.peer.is_running());
    within(tp.peer.stop()).await.unwrap();
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_fifo_per_channel_with_interleaving() {
    let heights = RecordingReactor::new();
    let texts = RecordingReactor::new();
    let tp = TestPeer::builder()
        .remote_channels(&[0x20, 0x21])
        .channel(0x20, heights.clone(), MessageType::of::<Height>())
        .channel(0x21, texts.clone(), MessageType::of::<Text>())
        .config(PeerConfig {
            dispatch_queue_capacity: 8,
            ..PeerConfig::default()
        })
        .build()
        .started()
        .await;

    const N: u64 = 200;
    for i in 0..N {
        within(tp.transport.deliver(0x20, &height_bytes(i))).await.unwrap();
        if i % 3 == 0 {
            let text = Text::new(format!("t{}", i)).encode().unwrap();
            within(tp.transport.deliver(0x21, &text)).await.unwrap();
        }
    }

    assert!(heights.wait_for(N as usize).await);
    let expected: Vec<_> = (0..N).map(|i| Height::new(i, 0)).collect();
    assert_eq!(heights.messages::<Height>(), expected);

    let expected_texts: Vec<_> = (0..N)
        .filter(|i| i % 3 == 0)
        .map(|i| Text::new(format!("t{}", i)))
        .collect();
    assert!(texts.wait_for(expected_texts.len()).await);
    assert_eq!(texts.messages::<Text>(), expected_texts);
    within(tp.peer.stop()).await.unwrap();
}

#[tokio::test]
async fn test_blocked_channel_does_not_stall_others() {
    let slow = RecordingReactor::gated();
    let fast = RecordingReactor::new();
    let tp = TestPeer::builder()
        .remote_channels(&[0x20, 0x21])
        .channel(0x20, slow.clone(), MessageType::of::<Height>())
        .channel(0x21, fast.clone(), MessageType::of::<Text>())
        .build()
        .started()
        .await;

    within(tp.transport.deliver(0x20, &height_bytes(1))).await.unwrap();
    assert!(slow.wait_for(1).await);

    for i in 0..5 {
        let text = Text::new(format!("m{}", i)).encode().unwrap();
        within(tp.transport.deliver(0x21, &text)).await.unwrap();
    }
    assert!(fast.wait_for(5).await);
    assert_eq!(slow.count(), 1);

    slow.release(1);
    within(tp.peer.stop()).await.unwrap();
}

// ============================================================================
// Backpressure
// ============================================================================

#[tokio::test]
async fn test_full_dispatch_queue_blocks_receive() {
    init_test_logging();
    let reactor = RecordingReactor::gated();
    let tp = TestPeer::builder()
        .remote_channels(&[0x20])
        .channel(0x20, reactor.clone(), MessageType::of::<Height>())
        .config(PeerConfig {
            dispatch_queue_capacity: 1,
            ..PeerConfig::default()
        })
        .build()
        .started()
        .await;

    // First payload is taken by the processor and held in the handler.
    within(tp.transport.deliver(0x20, &height_bytes(1))).await.unwrap();
    assert!(reactor.wait_for(1).await);

    // Second fills the queue.
    within(tp.transport.deliver(0x20, &height_bytes(2))).await.unwrap();

    // Third has nowhere to go until the processor drains one.
    let transport = Arc::clone(&tp.transport);
    let third = tokio::spawn(async move { transport.deliver(0x20, &height_bytes(3)).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!third.is_finished());

    reactor.release(1);
    within(third).await.unwrap().unwrap();

    reactor.release(10);
    assert!(reactor.wait_for(3).await);
    assert_eq!(
        reactor.messages::<Height>(),
        vec![Height::new(1, 0), Height::new(2, 0), Height::new(3, 0)]
    );
    assert_eq!(tp.errors.count(), 0);
    within(tp.peer.stop()).await.unwrap();
}
