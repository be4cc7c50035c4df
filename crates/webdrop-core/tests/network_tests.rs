//! End-to-end tests over the in-process transport.
//!
//! Two coordinators join a shared `MemoryNetwork`, so every message and
//! chunk goes through the real wire encoding.

mod common;

use std::sync::Arc;

use common::{assert_files_equal, create_temp_dir, create_test_file, random_bytes, wait_for_event};
use webdrop_core::file::OutgoingFile;
use webdrop_core::protocol::PeerId;
use webdrop_core::sink::{FsSinkFactory, MemorySinkFactory, SinkFactory, PARTIAL_SUFFIX};
use webdrop_core::transfer::{
    AutoAccept, EventReceiver, TransferCoordinator, TransferDirection, TransferEvent,
};
use webdrop_core::transport::MemoryNetwork;

/// Join `id` to the network and run its coordinator in the background.
async fn spawn_peer(
    network: &MemoryNetwork,
    id: &str,
    chunk_size: u64,
    sinks: Arc<dyn SinkFactory>,
) -> (Arc<TransferCoordinator>, EventReceiver) {
    let (transport, inbound) = network.join(PeerId::new(id)).await;
    let (coordinator, events) = common::coordinator(
        id,
        chunk_size,
        Arc::new(transport),
        sinks,
        Arc::new(AutoAccept),
    );
    let coordinator = Arc::new(coordinator);
    let runner = Arc::clone(&coordinator);
    tokio::spawn(async move { runner.run(inbound).await });
    (coordinator, events)
}

#[tokio::test]
async fn test_file_is_received_into_output_directory() {
    let source_dir = create_temp_dir();
    let inbox = create_temp_dir();
    let original = create_test_file(source_dir.path(), "photo.jpg", &random_bytes(300 * 1024 + 17));

    let network = MemoryNetwork::new();
    let (alice, mut alice_events) =
        spawn_peer(&network, "alice", 64 * 1024, Arc::new(MemorySinkFactory::new())).await;
    let (_bob, mut bob_events) = spawn_peer(
        &network,
        "bob",
        64 * 1024,
        Arc::new(FsSinkFactory::new(inbox.path())),
    )
    .await;

    wait_for_event(&mut alice_events, |e| {
        matches!(e, TransferEvent::PeerUpdated { peer_id, .. } if peer_id.as_str() == "bob")
    })
    .await;

    let file = OutgoingFile::open(&original).await.expect("open");
    assert_eq!(file.mime_type, "image/jpeg");
    alice
        .send_files(&PeerId::new("bob"), vec![file])
        .await
        .expect("send");

    let received = wait_for_event(&mut bob_events, |e| {
        matches!(e, TransferEvent::TransferCompleted { direction: TransferDirection::Receive, .. })
    })
    .await;
    assert_eq!(
        received.notification().as_deref(),
        Some("photo.jpg file transfer completed.")
    );
    wait_for_event(&mut alice_events, |e| {
        matches!(e, TransferEvent::TransferCompleted { direction: TransferDirection::Send, .. })
    })
    .await;

    assert_files_equal(&original, &inbox.path().join("photo.jpg"));
    let leftovers: Vec<_> = std::fs::read_dir(inbox.path())
        .expect("read inbox")
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX))
        .collect();
    assert!(leftovers.is_empty(), "no partial files left behind");
}

#[tokio::test]
async fn test_several_files_to_one_peer() {
    let network = MemoryNetwork::new();
    let sinks = MemorySinkFactory::new();
    let (alice, mut alice_events) =
        spawn_peer(&network, "alice", 1000, Arc::new(MemorySinkFactory::new())).await;
    let (_bob, mut bob_events) = spawn_peer(&network, "bob", 1000, Arc::new(sinks.clone())).await;
    wait_for_event(&mut alice_events, |e| matches!(e, TransferEvent::PeerJoined { .. })).await;

    let payloads: Vec<(String, Vec<u8>)> = (0..3)
        .map(|i| (format!("file-{i}.bin"), random_bytes(2500 + i * 700)))
        .collect();
    let files = payloads
        .iter()
        .map(|(name, data)| OutgoingFile::from_bytes(name.clone(), data.clone()))
        .collect();
    let metas = alice
        .send_files(&PeerId::new("bob"), files)
        .await
        .expect("send");
    assert_eq!(metas.len(), 3);

    for _ in 0..3 {
        wait_for_event(&mut bob_events, |e| matches!(e, TransferEvent::TransferCompleted { .. }))
            .await;
    }

    let received = sinks.by_name().await;
    for (name, data) in &payloads {
        assert_eq!(&received[name].data, data, "{name}");
    }
}

#[tokio::test]
async fn test_leaving_peer_is_forgotten() {
    let network = MemoryNetwork::new();
    let (alice, mut alice_events) =
        spawn_peer(&network, "alice", 1000, Arc::new(MemorySinkFactory::new())).await;
    let (_bob, _bob_events) =
        spawn_peer(&network, "bob", 1000, Arc::new(MemorySinkFactory::new())).await;
    wait_for_event(&mut alice_events, |e| matches!(e, TransferEvent::PeerJoined { .. })).await;

    network.leave(&PeerId::new("bob")).await;
    wait_for_event(&mut alice_events, |e| matches!(e, TransferEvent::PeerLeft { .. })).await;
    assert!(alice.peers().await.is_empty());
}

#[tokio::test]
async fn test_same_named_files_received_together_stay_separate() {
    let inbox = create_temp_dir();
    let network = MemoryNetwork::new();
    let (alice, mut alice_events) =
        spawn_peer(&network, "alice", 1024, Arc::new(MemorySinkFactory::new())).await;
    let (_bob, mut bob_events) = spawn_peer(
        &network,
        "bob",
        1024,
        Arc::new(FsSinkFactory::new(inbox.path())),
    )
    .await;
    wait_for_event(&mut alice_events, |e| matches!(e, TransferEvent::PeerJoined { .. })).await;

    let first = random_bytes(8 * 1024 + 3);
    let second = random_bytes(6 * 1024 + 11);
    alice
        .send_files(
            &PeerId::new("bob"),
            vec![
                OutgoingFile::from_bytes("x.txt", first.clone()),
                OutgoingFile::from_bytes("x.txt", second.clone()),
            ],
        )
        .await
        .expect("send");

    for _ in 0..2 {
        wait_for_event(&mut bob_events, |e| {
            matches!(e, TransferEvent::TransferCompleted { direction: TransferDirection::Receive, .. })
        })
        .await;
    }

    let mut received = vec![
        std::fs::read(inbox.path().join("x.txt")).expect("read x.txt"),
        std::fs::read(inbox.path().join("x (1).txt")).expect("read x (1).txt"),
    ];
    let mut expected = vec![first, second];
    received.sort();
    expected.sort();
    assert_eq!(received, expected);
    assert_eq!(std::fs::read_dir(inbox.path()).expect("read inbox").count(), 2);
}
