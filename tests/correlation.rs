//! Request/response correlation against the in-memory mock transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use duplex_ws::core::{WsEvent, WsEventKind, WsFrame, frame_bytes};
use duplex_ws::testing::{MockHub, MockServer, MockTransport};
use duplex_ws::{WebSocketError, WsOptions, WsSession};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct WireRequest {
    id: String,
    action: String,
}

fn decode_request(frame: &WsFrame) -> WireRequest {
    sonic_rs::from_slice(frame_bytes(frame).expect("payload frame")).expect("request envelope")
}

async fn connected_session(
    options: WsOptions,
) -> (WsSession<MockTransport>, MockHub, MockServer) {
    let (transport, mut hub) = MockTransport::hub();
    let session = WsSession::with_transport("ws://mock", options, transport);
    session.connect().await.unwrap();
    let server = hub
        .next_conn_timeout(Duration::from_secs(2))
        .await
        .expect("session should open a mock connection");
    (session, hub, server)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requests_resolve_by_correlation_id_regardless_of_arrival_order() {
    let (session, _hub, mut server) = connected_session(WsOptions::default()).await;

    let server_task = tokio::spawn(async move {
        let first = decode_request(&server.recv_outbound().await.unwrap());
        let second = decode_request(&server.recv_outbound().await.unwrap());
        // Reply in reverse arrival order; correlation must still hold.
        server
            .send_text(format!(
                r#"{{"id":"{}","data":"{}-reply"}}"#,
                second.id, second.action
            ))
            .unwrap();
        server
            .send_text(format!(
                r#"{{"id":"{}","data":"{}-reply"}}"#,
                first.id, first.action
            ))
            .unwrap();
        server
    });

    let (alpha, beta) = tokio::join!(session.request("alpha"), session.request("beta"));
    assert_eq!(
        sonic_rs::to_string(&alpha.unwrap()).unwrap(),
        r#""alpha-reply""#
    );
    assert_eq!(
        sonic_rs::to_string(&beta.unwrap()).unwrap(),
        r#""beta-reply""#
    );

    let _server = server_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_resolves_with_peer_supplied_data() {
    let (session, _hub, mut server) = connected_session(WsOptions::default()).await;

    let server_task = tokio::spawn(async move {
        let req = decode_request(&server.recv_outbound().await.unwrap());
        assert_eq!(req.action, "ping");
        server
            .send_text(format!(r#"{{"id":"{}","data":"pong"}}"#, req.id))
            .unwrap();
        server
    });

    let value = session.request("ping").await.unwrap();
    assert_eq!(sonic_rs::to_string(&value).unwrap(), r#""pong""#);
    let _server = server_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn error_response_fails_with_structured_server_error() {
    let (session, _hub, mut server) = connected_session(WsOptions::default()).await;

    let server_task = tokio::spawn(async move {
        let req = decode_request(&server.recv_outbound().await.unwrap());
        assert_eq!(req.action, "fail");
        server
            .send_text(format!(
                r#"{{"id":"{}","error":"bad","data":{{"code":7}}}}"#,
                req.id
            ))
            .unwrap();
        server
    });

    match session.request("fail").await {
        Err(WebSocketError::ServerError { message, data }) => {
            assert_eq!(message, "bad");
            let data = data.expect("error context data");
            assert_eq!(sonic_rs::to_string(&data).unwrap(), r#"{"code":7}"#);
        }
        other => panic!("expected server error, got {other:?}"),
    }
    let _server = server_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_request_is_removed_and_late_response_is_ignored() {
    let options = WsOptions {
        request_timeout: Some(Duration::from_millis(50)),
        ..WsOptions::default()
    };
    let (session, _hub, mut server) = connected_session(options).await;

    let messages = Arc::new(AtomicUsize::new(0));
    let counter = messages.clone();
    session
        .on(WsEventKind::Message, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

    let requester = {
        let session = session.clone();
        tokio::spawn(async move { session.request("slow").await })
    };
    let stalled = decode_request(
        &server
            .recv_outbound_timeout(Duration::from_secs(2))
            .await
            .unwrap(),
    );

    match requester.await.unwrap() {
        Err(WebSocketError::RequestTimeout) => {}
        other => panic!("expected timeout, got {other:?}"),
    }

    // A late response for the dead id must not resurrect anything.
    server
        .send_text(format!(r#"{{"id":"{}","data":"late"}}"#, stalled.id))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(messages.load(Ordering::SeqCst), 0);

    // The session keeps working afterwards.
    let server_task = tokio::spawn(async move {
        let req = decode_request(&server.recv_outbound().await.unwrap());
        server
            .send_text(format!(r#"{{"id":"{}","data":"ok"}}"#, req.id))
            .unwrap();
        server
    });
    let value = session.request("after").await.unwrap();
    assert_eq!(sonic_rs::to_string(&value).unwrap(), r#""ok""#);
    let _server = server_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn keepalive_exchange_stays_invisible_to_interceptors_and_correlator() {
    let options = WsOptions {
        ping_timeout: Duration::from_millis(30),
        ..WsOptions::default()
    };
    let (session, _hub, mut server) = connected_session(options).await;

    let messages = Arc::new(AtomicUsize::new(0));
    let counter = messages.clone();
    session
        .on(WsEventKind::Message, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

    // The probe is the literal token, not JSON.
    let probe = server
        .recv_outbound_timeout(Duration::from_secs(1))
        .await
        .expect("keepalive probe");
    assert_eq!(probe, WsFrame::text_static("ping"));

    server.send_text("pong").unwrap();

    // The timer reschedules itself.
    let probe = server
        .recv_outbound_timeout(Duration::from_secs(1))
        .await
        .expect("second keepalive probe");
    assert_eq!(probe, WsFrame::text_static("ping"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(messages.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_inbound_text_is_dropped_without_invoking_interceptors() {
    let (session, _hub, server) = connected_session(WsOptions::default()).await;

    let messages = Arc::new(AtomicUsize::new(0));
    let counter = messages.clone();
    session
        .on(WsEventKind::Message, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

    server.send_text("not json{").unwrap();
    server.send_text(r#"{"data":5}"#).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while messages.load(Ordering::SeqCst) < 1 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "valid broadcast never arrived"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(messages.load(Ordering::SeqCst), 1);
}

#[derive(Serialize)]
struct Hello {
    op: &'static str,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_transmits_json_and_emits_the_send_event() {
    let (session, _hub, mut server) = connected_session(WsOptions::default()).await;

    let sent = Arc::new(Mutex::new(Vec::new()));
    let log = sent.clone();
    session
        .on(WsEventKind::Send, move |event| {
            if let WsEvent::Send { data } = event {
                log.lock().unwrap().push(sonic_rs::to_string(data).unwrap());
            }
        })
        .await
        .unwrap();

    session.send(&Hello { op: "hi" }).await.unwrap();

    let frame = server
        .recv_outbound_timeout(Duration::from_secs(2))
        .await
        .expect("outbound frame");
    assert_eq!(frame, WsFrame::Text(r#"{"op":"hi"}"#.into()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if sent.lock().unwrap().as_slice() == [r#"{"op":"hi"}"#.to_string()] {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "send event never observed"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
