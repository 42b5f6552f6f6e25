/*
    streaming_supervision.rs - Supervisor behaviour with starts held in flight
*/

use std::sync::Arc;
use std::time::Duration;
use xmtp_engine_core::adapters::memory::{MemoryStreamProvider, RecordingErrorReporter};
use xmtp_engine_core::config::StreamingConfig;
use xmtp_engine_core::streaming::StartOutcome;
use xmtp_engine_core::test_utils::{assert_completes_within, assert_eventually};
use xmtp_engine_core::{AccountId, StreamKind, StreamSupervisor};

const WAIT: Duration = Duration::from_secs(2);

fn gated_supervisor() -> (StreamSupervisor, Arc<MemoryStreamProvider>) {
    let streams = Arc::new(MemoryStreamProvider::gated());
    let supervisor = StreamSupervisor::new(
        streams.clone(),
        Arc::new(RecordingErrorReporter::new()),
        StreamingConfig::default(),
    );
    (supervisor, streams)
}

#[tokio::test]
async fn test_overlapping_starts_never_double_start_a_kind() {
    let (supervisor, streams) = gated_supervisor();
    let a = AccountId::from("0xA");

    let first = {
        let supervisor = supervisor.clone();
        let a = a.clone();
        tokio::spawn(async move { supervisor.start_streaming(&[a]).await })
    };
    assert_eventually(WAIT, || streams.pending_starts() == 1, "first start in flight").await;

    let second = {
        let supervisor = supervisor.clone();
        let a = a.clone();
        tokio::spawn(async move { supervisor.start_streaming(&[a]).await })
    };
    assert_eventually(WAIT, || streams.pending_starts() == 2, "second start in flight").await;

    streams.release_starts(2);
    let first = assert_completes_within(WAIT, first).await.unwrap();
    let second = assert_completes_within(WAIT, second).await.unwrap();

    assert_eq!(first[0].conversations, StartOutcome::Started);
    assert_eq!(first[0].messages, StartOutcome::AlreadyActive);
    assert_eq!(second[0].conversations, StartOutcome::AlreadyActive);
    assert_eq!(second[0].messages, StartOutcome::Started);
    assert_eq!(streams.start_calls(&a, StreamKind::Conversations), 1);
    assert_eq!(streams.start_calls(&a, StreamKind::Messages), 1);

    let state = supervisor.streaming_state(&a);
    assert!(state.is_streaming_conversations && state.is_streaming_messages);
}

#[tokio::test]
async fn test_stop_cancels_start_in_flight() {
    let (supervisor, streams) = gated_supervisor();
    let a = AccountId::from("0xA");

    let start = {
        let supervisor = supervisor.clone();
        let a = a.clone();
        tokio::spawn(async move { supervisor.start_streaming(&[a]).await })
    };
    assert_eventually(WAIT, || streams.pending_starts() == 1, "start in flight").await;

    let stopped = supervisor.stop_streaming(&[a.clone()]).await;
    let started = assert_completes_within(WAIT, start).await.unwrap();

    assert!(stopped[0].failed.is_empty());
    assert_eq!(started[0].conversations, StartOutcome::Cancelled);
    assert_eq!(started[0].messages, StartOutcome::Cancelled);
    assert!(supervisor.streaming_state(&a).is_idle());
    assert_eq!(streams.start_calls(&a, StreamKind::Messages), 0);
}

#[tokio::test]
async fn test_shutdown_cancels_everything() {
    let (supervisor, streams) = gated_supervisor();
    let accounts = vec![AccountId::from("0xA"), AccountId::from("0xB")];

    let start = {
        let supervisor = supervisor.clone();
        let accounts = accounts.clone();
        tokio::spawn(async move { supervisor.start_streaming(&accounts).await })
    };
    assert_eventually(WAIT, || streams.pending_starts() == 2, "both starts in flight").await;

    supervisor.shutdown();
    let reports = assert_completes_within(WAIT, start).await.unwrap();

    assert!(supervisor.is_shut_down());
    assert!(reports
        .iter()
        .all(|r| r.conversations == StartOutcome::Cancelled));
    assert!(supervisor.snapshot().values().all(|s| s.is_idle()));
}
