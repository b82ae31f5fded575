//! Think session tests against a live server.
//!
//! Each test starts `serve` on 127.0.0.1:0 and speaks raw NDJSON frames,
//! the way a Requester does.

use librarian_shared::{
    frame, Action, Constraints, ErrorType, SearchResult, SearchState, ThinkRequest, ThinkResponse,
};
use librariand::{serve, Config, LibrarianService};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const QUERY: &str = "explain the Schrödinger equation";

struct TestServer {
    addr: SocketAddr,
    service: Arc<LibrarianService>,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = Arc::new(LibrarianService::new(config));
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve(listener, Arc::clone(&service), async move {
            let _ = stopped.await;
        }));
        Self {
            addr,
            service,
            stop: Some(stop),
            handle,
        }
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

struct Conn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Conn {
    async fn open(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, request: &ThinkRequest) {
        let line = frame::encode(request).unwrap();
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    /// Next response, or None once the server closed the stream.
    async fn recv(&mut self) -> Option<ThinkResponse> {
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for response")
            .unwrap();
        if n == 0 {
            None
        } else {
            Some(frame::decode(&line).unwrap())
        }
    }
}

fn opening(max_loops: i32, max_results: i32) -> ThinkRequest {
    ThinkRequest::opening(
        "r1",
        QUERY,
        "s1",
        Constraints {
            max_loops,
            max_results,
        },
    )
}

fn results_message(n: usize) -> ThinkRequest {
    let results = (0..n)
        .map(|i| {
            let mut hit = SearchResult::new(format!("chunk-{}", i), format!("content {}", i), 0.9);
            hit.file_name = Some("lecture01.pdf".to_string());
            hit.page_number = Some(i as i32 + 1);
            hit
        })
        .collect();
    ThinkRequest::with_state("r1", SearchState::new(results).to_payload().unwrap())
}

async fn expect_search(conn: &mut Conn) {
    let response = conn.recv().await.expect("stream closed before search");
    assert_eq!(response.request_id, "r1");
    match response.action {
        Action::Search(search) => {
            assert_eq!(search.queries_text, vec![QUERY.to_string()]);
            assert_eq!(search.queries_vector, vec![QUERY.to_string()]);
        }
        other => panic!("expected search, got {:?}", other),
    }
}

#[tokio::test]
async fn test_happy_path() {
    let server = TestServer::start(Config::default()).await;
    let mut conn = Conn::open(server.addr).await;

    conn.send(&opening(3, 10)).await;
    expect_search(&mut conn).await;

    conn.send(&results_message(3)).await;
    let response = conn.recv().await.unwrap();
    assert_eq!(response.request_id, "r1");
    match response.action {
        Action::Complete(complete) => {
            let indices: Vec<i32> = complete.evidence.iter().map(|e| e.temp_index).collect();
            assert_eq!(indices, vec![0, 1, 2]);
            assert!(complete.evidence.iter().all(|e| !e.why_relevant.is_empty()));
            assert!(complete.coverage_notes.contains('3'));
        }
        other => panic!("expected complete, got {:?}", other),
    }

    assert!(conn.recv().await.is_none(), "stream must close after complete");
    server.shutdown().await;
}

#[tokio::test]
async fn test_loop_limit() {
    let server = TestServer::start(Config::default()).await;
    let mut conn = Conn::open(server.addr).await;

    conn.send(&opening(1, 10)).await;
    expect_search(&mut conn).await;

    conn.send(&results_message(3)).await;
    match conn.recv().await.unwrap().action {
        Action::Error(error) => {
            assert_eq!(error.kind(), Some(ErrorType::LoopLimit));
            assert!(error.message.contains('1'));
        }
        other => panic!("expected loop limit error, got {:?}", other),
    }

    assert!(conn.recv().await.is_none());
    server.shutdown().await;
}

#[tokio::test]
async fn test_empty_results() {
    let server = TestServer::start(Config::default()).await;
    let mut conn = Conn::open(server.addr).await;

    conn.send(&opening(3, 10)).await;
    expect_search(&mut conn).await;

    conn.send(&results_message(0)).await;
    match conn.recv().await.unwrap().action {
        Action::Complete(complete) => {
            assert!(complete.evidence.is_empty());
            assert_eq!(complete.coverage_notes, "No relevant chunks found.");
        }
        other => panic!("expected complete, got {:?}", other),
    }
    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_state_behaves_like_empty_results() {
    let server = TestServer::start(Config::default()).await;
    let mut conn = Conn::open(server.addr).await;

    conn.send(&opening(3, 10)).await;
    expect_search(&mut conn).await;

    conn.send(&ThinkRequest::with_state("r1", "{\"search_results\": [oops")).await;
    match conn.recv().await.unwrap().action {
        Action::Complete(complete) => {
            assert!(complete.evidence.is_empty());
            assert_eq!(complete.coverage_notes, "No relevant chunks found.");
        }
        other => panic!("expected complete, got {:?}", other),
    }
    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_constraints_use_service_defaults() {
    let config = Config {
        max_results: 2,
        ..Config::default()
    };
    let server = TestServer::start(config).await;
    let mut conn = Conn::open(server.addr).await;

    conn.send_raw(&format!(
        "{{\"request_id\":\"r1\",\"user_query\":\"{}\",\"subject_id\":\"s1\"}}\n",
        QUERY
    ))
    .await;
    expect_search(&mut conn).await;

    conn.send(&results_message(5)).await;
    match conn.recv().await.unwrap().action {
        Action::Complete(complete) => assert_eq!(complete.evidence.len(), 2),
        other => panic!("expected complete, got {:?}", other),
    }
    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_reports_model_failure_then_closes() {
    let server = TestServer::start(Config::default()).await;
    let mut conn = Conn::open(server.addr).await;

    conn.send(&opening(3, 10)).await;
    expect_search(&mut conn).await;

    conn.send_raw("this is not a frame\n").await;
    let response = conn.recv().await.unwrap();
    assert_eq!(response.request_id, "r1");
    match response.action {
        Action::Error(error) => assert_eq!(error.kind(), Some(ErrorType::ModelFailure)),
        other => panic!("expected model failure, got {:?}", other),
    }
    assert!(conn.recv().await.is_none());

    let stats = server.service.stats.snapshot();
    assert_eq!(stats.faulted, 1);
    server.shutdown().await;
}

#[tokio::test]
async fn test_deadline_closes_stream_without_error_action() {
    let config = Config {
        timeout_ms: 200,
        ..Config::default()
    };
    let server = TestServer::start(config).await;
    let mut conn = Conn::open(server.addr).await;

    conn.send(&opening(3, 10)).await;
    expect_search(&mut conn).await;

    // Never send results; the transport deadline ends the session.
    assert!(conn.recv().await.is_none());
    assert_eq!(server.service.stats.snapshot().aborted, 1);
    server.shutdown().await;
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let server = TestServer::start(Config::default()).await;

    let mut first = Conn::open(server.addr).await;
    let mut second = Conn::open(server.addr).await;

    first.send(&opening(3, 10)).await;
    second.send(&opening(1, 10)).await;
    expect_search(&mut first).await;
    expect_search(&mut second).await;

    second.send(&results_message(2)).await;
    first.send(&results_message(2)).await;

    assert!(matches!(second.recv().await.unwrap().action, Action::Error(_)));
    assert!(matches!(first.recv().await.unwrap().action, Action::Complete(_)));
    server.shutdown().await;
}

#[tokio::test]
async fn test_worker_pool_bounds_concurrent_sessions() {
    let config = Config {
        max_sessions: 1,
        ..Config::default()
    };
    let server = TestServer::start(config).await;

    let mut busy = Conn::open(server.addr).await;
    busy.send(&opening(3, 10)).await;
    expect_search(&mut busy).await;

    // Second session queues until the first releases its worker.
    let mut queued = Conn::open(server.addr).await;
    queued.send(&opening(3, 10)).await;
    let mut line = String::new();
    let waited = tokio::time::timeout(Duration::from_millis(200), queued.reader.read_line(&mut line)).await;
    assert!(waited.is_err(), "second session must wait for a free worker");

    busy.send(&results_message(1)).await;
    assert!(matches!(busy.recv().await.unwrap().action, Action::Complete(_)));

    let response: ThinkResponse = if line.is_empty() {
        queued.recv().await.unwrap()
    } else {
        frame::decode(&line).unwrap()
    };
    assert!(matches!(response.action, Action::Search(_)));
    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_idle_sessions_after_grace() {
    let config = Config {
        shutdown_grace_ms: 100,
        ..Config::default()
    };
    let server = TestServer::start(config).await;
    let mut conn = Conn::open(server.addr).await;

    conn.send(&opening(3, 10)).await;
    expect_search(&mut conn).await;

    server.shutdown().await;
    assert!(conn.recv().await.is_none(), "cancelled session sends nothing more");
}
