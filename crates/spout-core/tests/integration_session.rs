//! Integration tests for the session lifecycle.
//!
//! These tests verify:
//! - Record delivery, ordering, and arrival statistics end to end
//! - Stop semantics (idempotent, early, and mid-run)
//! - Bounded deadlines and transport fault handling
//! - Transport call order across every exit path
//!
//! All of them drive a real session over the scripted transport, so they
//! run without a network peer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::oneshot;

use spout_core::{
    ArrivalStats, IngestListener, RecordBuffer, RecordDeliveryError, ScriptedFrame,
    ScriptedTransport, SessionConfig, SessionError, SessionState, StreamListener, StreamSession,
    StreamTransport, TransportFault,
};

fn build_session(
    transport: ScriptedTransport,
    config: SessionConfig,
) -> (Arc<StreamSession<ScriptedTransport>>, Arc<IngestListener>) {
    let stats = Arc::new(ArrivalStats::new());
    let buffer = Arc::new(RecordBuffer::new());
    let listener = Arc::new(IngestListener::new(stats, buffer));
    let session = Arc::new(StreamSession::new(transport, listener.clone(), config));
    (session, listener)
}

#[tokio::test]
async fn test_five_records_at_100ms_land_with_expected_mean() {
    let frames = (0..5)
        .map(|i| ScriptedFrame::record(100, &format!("tick-{i}")))
        .collect();
    let (session, _listener) =
        build_session(ScriptedTransport::new(frames), SessionConfig::unbounded());

    let runner = {
        let session = session.clone();
        tokio::spawn(async move { session.run().await })
    };
    tokio::time::sleep(Duration::from_millis(700)).await;
    session.stop();
    runner.await.unwrap().unwrap();

    let stats = session.stats().snapshot();
    assert_eq!(stats.arrivals, 5);
    assert!(!stats.poisoned);
    assert!(
        stats.mean_us > 60_000.0 && stats.mean_us < 140_000.0,
        "mean interval {} us out of band",
        stats.mean_us
    );
    assert_eq!(session.buffer().len(), 5);
    assert_eq!(
        session.buffer().drain(),
        vec!["tick-0", "tick-1", "tick-2", "tick-3", "tick-4"]
    );
    assert_eq!(
        session.transport().call_log(),
        vec!["open", "subscribe", "cleanup", "shutdown"]
    );
}

#[tokio::test]
async fn test_delivery_error_is_skipped_without_ending_the_session() {
    let frames = vec![
        ScriptedFrame::record(50, "good-1"),
        ScriptedFrame::delivery_error(
            50,
            RecordDeliveryError::Interrupted("flaky chunk".to_string()),
        ),
        ScriptedFrame::record(50, "good-2"),
    ];
    let (session, listener) =
        build_session(ScriptedTransport::new(frames), SessionConfig::unbounded());

    let runner = {
        let session = session.clone();
        tokio::spawn(async move { session.run().await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.buffer().len(), 2);
    assert_eq!(listener.delivery_errors(), 1);
    assert_eq!(session.stats().arrival_count(), 2);

    session.stop();
    runner.await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let transport = ScriptedTransport::new(vec![ScriptedFrame::record(20, "beat")]).looping();
    let (session, _listener) = build_session(transport, SessionConfig::unbounded());

    let runner = {
        let session = session.clone();
        tokio::spawn(async move { session.run().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    session.stop();
    session.stop();
    runner.await.unwrap().unwrap();
    session.stop();

    let log = session.transport().call_log();
    assert_eq!(log.iter().filter(|call| **call == "cleanup").count(), 1);
    assert_eq!(log.iter().filter(|call| **call == "shutdown").count(), 1);
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_stop_before_run_is_not_lost() {
    let transport = ScriptedTransport::new(vec![ScriptedFrame::record(5_000, "never")]).looping();
    let (session, _listener) = build_session(transport, SessionConfig::unbounded());

    session.stop();
    let started = Instant::now();
    session.run().await.unwrap();

    assert!(
        started.elapsed() < Duration::from_millis(1_000),
        "buffered stop should cancel the run promptly"
    );
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(
        session.transport().call_log(),
        vec!["open", "subscribe", "cleanup", "shutdown"]
    );
}

#[tokio::test]
async fn test_zero_arrivals_leave_stats_defined() {
    let (session, listener) = build_session(
        ScriptedTransport::new(Vec::new()),
        SessionConfig::unbounded(),
    );

    let runner = {
        let session = session.clone();
        tokio::spawn(async move { session.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.stop();
    runner.await.unwrap().unwrap();

    let stats = session.stats().snapshot();
    assert_eq!(stats.arrivals, 0);
    assert_eq!(stats.mean_us, 0.0);
    assert!(session.buffer().is_empty());
    assert_eq!(listener.delivery_errors(), 0);
}

#[tokio::test]
async fn test_bounded_run_closes_near_its_deadline() {
    let transport = ScriptedTransport::new(vec![ScriptedFrame::record(50, "tick")]).looping();
    let (session, _listener) = build_session(
        transport,
        SessionConfig::bounded(Duration::from_millis(2_000)),
    );

    let started = Instant::now();
    session.run().await.unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed >= Duration::from_millis(1_990),
        "closed early at {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(2_800),
        "overshoot at {elapsed:?}"
    );
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.stats().arrival_count() > 0);
}

#[tokio::test]
async fn test_midrun_fault_fails_the_run_after_teardown() {
    let frames = vec![
        ScriptedFrame::record(20, "solo"),
        ScriptedFrame::fault(20, TransportFault::StreamEnded("feed gone".to_string())),
    ];
    let (session, _listener) =
        build_session(ScriptedTransport::new(frames), SessionConfig::unbounded());

    let err = session.run().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Transport(TransportFault::StreamEnded(_))
    ));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.buffer().len(), 1);
    assert_eq!(
        session.transport().call_log(),
        vec!["open", "subscribe", "cleanup", "shutdown"]
    );
}

#[tokio::test]
async fn test_second_run_is_rejected() {
    let transport = ScriptedTransport::new(vec![ScriptedFrame::record(10, "x")]);
    let (session, _listener) = build_session(
        transport,
        SessionConfig::bounded(Duration::from_millis(100)),
    );

    session.run().await.unwrap();
    let err = session.run().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::AlreadyStarted(SessionState::Closed)
    ));
}

struct RefusingTransport;

#[async_trait]
impl StreamTransport for RefusingTransport {
    type Conn = ();

    async fn open(&self) -> Result<Self::Conn, TransportFault> {
        Err(TransportFault::Connection("refused".to_string()))
    }

    async fn subscribe(
        &self,
        _conn: &mut Self::Conn,
        _listener: Arc<dyn StreamListener>,
    ) -> Result<oneshot::Receiver<TransportFault>, TransportFault> {
        unreachable!("open never succeeds")
    }

    async fn cleanup(&self, _conn: &mut Self::Conn) -> Result<(), TransportFault> {
        Ok(())
    }

    async fn shutdown(&self, _conn: Self::Conn) -> Result<(), TransportFault> {
        Ok(())
    }
}

#[tokio::test]
async fn test_open_failure_surfaces_to_the_caller() {
    let stats = Arc::new(ArrivalStats::new());
    let buffer = Arc::new(RecordBuffer::new());
    let listener = Arc::new(IngestListener::new(stats, buffer));
    let session = StreamSession::new(RefusingTransport, listener, SessionConfig::unbounded());

    let err = session.run().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Transport(TransportFault::Connection(_))
    ));
    assert_eq!(session.state(), SessionState::Closed);
}
