//! Session attempt behaviour against an in-memory server.
//!
//! Tests cover:
//! - Handshake order and request ids
//! - Authentication (once, even with repeated 200s) and the listening phase
//! - Auth timeout, rejects, server error streaks, early closes
//! - Malformed frames, handler commands, shutdown

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use common::{MockConnector, ctrl, data, login_ok, pair, refused};
use tinode_sdk::session::Ending;
use tinode_sdk::{
    ConnectConfig, Credentials, Event, Session, SessionError, SessionOutcome, SessionState, Shutdown,
    event_handler,
};

fn creds() -> Credentials {
    Credentials::new("bot", "secret").unwrap()
}

async fn run(connector: &MockConnector, handler: Option<&tinode_sdk::EventHandler>) -> SessionOutcome {
    let (_trigger, mut shutdown) = Shutdown::new();
    Session::new(ConnectConfig::default(), creds())
        .run(connector, handler, &mut shutdown)
        .await
}

fn count(outcome: &SessionOutcome, state: &SessionState) -> usize {
    outcome.trail.iter().filter(|s| *s == state).count()
}

#[tokio::test(start_paused = true)]
async fn authenticates_then_listens_until_server_closes() {
    let (transport, mut peer) = pair();
    peer.push(ctrl("1", 201, "created"));
    peer.push(login_ok("2", "usrBot"));
    peer.push(ctrl("3", 200, "ok"));
    let connector = MockConnector::new(vec![Ok(transport)]);

    let inbound = peer.sender();
    peer.hang_up();
    let hang_up = async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(inbound);
    };
    let (outcome, ()) = tokio::join!(run(&connector, None), hang_up);

    assert!(outcome.authenticated);
    assert!(outcome.productive);
    assert_eq!(outcome.ending, Ending::Clean);
    assert_eq!(
        outcome.trail,
        vec![
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::AwaitingAuth,
            SessionState::Authenticated,
            SessionState::Draining,
            SessionState::Closed,
        ]
    );
    assert_eq!(peer.close_count(), 1);

    let sent = peer.sent_json();
    assert_eq!(sent.len(), 3);
    assert!(sent[0].get("hi").is_some());
    assert!(sent[1].get("login").is_some());
    assert_eq!(sent[2]["sub"]["topic"], "me");
    assert_eq!(peer.sent_ids(), vec!["1", "2", "3"]);
}

#[tokio::test(start_paused = true)]
async fn repeated_200_authenticates_exactly_once() {
    let (transport, mut peer) = pair();
    for id in ["1", "2", "3", "4"] {
        peer.push(ctrl(id, 200, "ok"));
    }
    let connector = MockConnector::new(vec![Ok(transport)]);

    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = events.clone();
    let handler = event_handler(move |_handle, event| {
        let seen = seen.clone();
        async move {
            if let Event::Authenticated { .. } = event {
                seen.lock().unwrap().push("auth");
            }
            Ok(())
        }
    });

    let inbound = peer.sender();
    peer.hang_up();
    let hang_up = async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(inbound);
    };
    let (outcome, ()) = tokio::join!(run(&connector, Some(&handler)), hang_up);

    assert_eq!(count(&outcome, &SessionState::Authenticated), 1);
    assert_eq!(events.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn auth_timeout_fails_and_closes_once() {
    let (transport, peer) = pair();
    peer.push(ctrl("1", 201, "created"));
    let connector = MockConnector::new(vec![Ok(transport)]);

    let started = Instant::now();
    let outcome = run(&connector, None).await;

    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(
        outcome.ending,
        Ending::Failed(SessionError::AuthTimeout(Duration::from_secs(30)))
    );
    assert!(!outcome.authenticated);
    assert!(!outcome.productive);
    assert_eq!(peer.close_count(), 1);
    assert_eq!(outcome.trail.last(), Some(&SessionState::Closed));
    assert_eq!(count(&outcome, &SessionState::Authenticated), 0);
}

#[tokio::test(start_paused = true)]
async fn login_reply_within_two_seconds_authenticates_within_two_seconds() {
    let (transport, mut peer) = pair();
    let connector = MockConnector::new(vec![Ok(transport)]);
    let authed_at = Arc::new(Mutex::new(None));
    let mark = authed_at.clone();
    let handler = event_handler(move |_handle, event| {
        let mark = mark.clone();
        async move {
            if let Event::Authenticated { .. } = event {
                *mark.lock().unwrap() = Some(Instant::now());
            }
            Ok(())
        }
    });

    let started = Instant::now();
    let inbound = peer.sender();
    peer.hang_up();
    let server = async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        inbound.send(Ok(ctrl("2", 200, "ok"))).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(inbound);
    };
    let (outcome, ()) = tokio::join!(run(&connector, Some(&handler)), server);

    let authed_at = authed_at.lock().unwrap().expect("authenticated");
    assert!(authed_at - started <= Duration::from_secs(2));
    assert!(outcome.productive);
}

#[tokio::test(start_paused = true)]
async fn fourth_consecutive_server_error_fails_attempt() {
    let (transport, peer) = pair();
    for _ in 0..4 {
        peer.push(ctrl("2", 500, "internal error"));
    }
    let connector = MockConnector::new(vec![Ok(transport)]);

    let outcome = run(&connector, None).await;

    match outcome.ending {
        Ending::Failed(SessionError::ServerError { count, code, .. }) => {
            assert_eq!(count, 4);
            assert_eq!(code, 500);
        }
        other => panic!("expected server error, got {other:?}"),
    }
    assert_eq!(peer.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn three_server_errors_are_tolerated() {
    let (transport, mut peer) = pair();
    for _ in 0..3 {
        peer.push(ctrl("1", 500, "internal error"));
    }
    peer.push(ctrl("2", 200, "ok"));
    let connector = MockConnector::new(vec![Ok(transport)]);
    // Server hangs up right after the login reply.
    peer.hang_up();

    let outcome = run(&connector, None).await;

    assert!(outcome.authenticated);
    assert_eq!(outcome.ending, Ending::Clean);
    // Closed before a full listening cycle.
    assert!(!outcome.productive);
}

#[tokio::test(start_paused = true)]
async fn client_error_rejects_attempt() {
    let (transport, peer) = pair();
    peer.push(ctrl("1", 201, "created"));
    peer.push(ctrl("2", 401, "authentication failed"));
    let connector = MockConnector::new(vec![Ok(transport)]);

    let outcome = run(&connector, None).await;

    assert_eq!(
        outcome.error(),
        Some(&SessionError::ProtocolReject {
            code: 401,
            text: "authentication failed".into()
        })
    );
    assert!(outcome.error().unwrap().is_credential_reject());
    assert_eq!(peer.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_skipped() {
    let (transport, mut peer) = pair();
    peer.push("this is not json");
    peer.push("{}");
    peer.push(r#"{"ctrl":{"code":200},"data":{"topic":"x"}}"#);
    peer.push(ctrl("2", 200, "ok"));
    let connector = MockConnector::new(vec![Ok(transport)]);
    peer.hang_up();

    let outcome = run(&connector, None).await;

    assert!(outcome.authenticated);
    assert_eq!(outcome.ending, Ending::Clean);
}

#[tokio::test(start_paused = true)]
async fn close_before_auth_is_a_transport_failure() {
    let (transport, mut peer) = pair();
    let connector = MockConnector::new(vec![Ok(transport)]);
    peer.hang_up();

    let outcome = run(&connector, None).await;

    assert!(matches!(outcome.ending, Ending::Failed(SessionError::Transport(_))));
    assert_eq!(peer.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_error_never_awaits_auth() {
    let connector = MockConnector::new(vec![refused()]);

    let outcome = run(&connector, None).await;

    assert_eq!(
        outcome.trail,
        vec![
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::Failed(SessionError::Connect("connection refused".into())),
            SessionState::Closed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_login_send_aborts_handshake() {
    let (transport, peer) = pair();
    let connector = MockConnector::new(vec![Ok(transport.failing_send_at(1))]);

    let outcome = run(&connector, None).await;

    assert!(matches!(outcome.ending, Ending::Failed(SessionError::Transport(_))));
    assert_eq!(peer.sent_ids(), vec!["1"]);
    assert_eq!(peer.close_count(), 1);
    assert_eq!(count(&outcome, &SessionState::AwaitingAuth), 0);
}

#[tokio::test(start_paused = true)]
async fn transport_error_after_listening_still_counts_as_productive() {
    let (transport, peer) = pair();
    peer.push(ctrl("2", 200, "ok"));
    let connector = MockConnector::new(vec![Ok(transport)]);

    let inbound = peer.sender();
    let breaker = async move {
        tokio::time::sleep(Duration::from_secs(90)).await;
        inbound
            .send(Err(SessionError::Transport("connection reset".into())))
            .unwrap();
    };
    let (outcome, ()) = tokio::join!(run(&connector, None), breaker);

    assert!(outcome.productive);
    assert_eq!(
        outcome.ending,
        Ending::Failed(SessionError::Transport("connection reset".into()))
    );
    assert_eq!(peer.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn handler_commands_use_following_request_ids() {
    let (transport, mut peer) = pair();
    peer.push(login_ok("2", "usrBot"));
    peer.push(data("usrAlice", "usrAlice", "ping"));
    let connector = MockConnector::new(vec![Ok(transport)]);

    let handler = echo_handler();

    let inbound = peer.sender();
    peer.hang_up();
    let hang_up = async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(inbound);
    };
    let (outcome, ()) = tokio::join!(run(&connector, Some(&handler)), hang_up);

    assert_eq!(outcome.ending, Ending::Clean);
    let sent = peer.sent_json();
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[3], json!({"pub": {"id": "4", "topic": "usrAlice", "noecho": true, "content": "ping"}}));
}

fn echo_handler() -> tinode_sdk::EventHandler {
    event_handler(|handle, event| async move {
        if let Event::Data(msg) = event {
            handle.publish(&msg.topic, msg.content.clone())?;
        }
        Ok(())
    })
}

#[tokio::test(start_paused = true)]
async fn burst_of_messages_keeps_replying_and_honours_shutdown() {
    let (transport, peer) = pair();
    peer.push(login_ok("2", "usrBot"));
    for n in 0..300 {
        peer.push(data("usrAlice", "usrAlice", &format!("msg {n}")));
    }
    let connector = MockConnector::new(vec![Ok(transport)]);
    let handler = echo_handler();
    let (trigger, mut shutdown) = Shutdown::new();

    let stopper = async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.trigger();
    };
    let session = Session::new(ConnectConfig::default(), creds()).run(&connector, Some(&handler), &mut shutdown);
    let (outcome, ()) = tokio::time::timeout(Duration::from_secs(120), async { tokio::join!(session, stopper) })
        .await
        .expect("session ignored shutdown");

    assert!(outcome.is_cancelled());
    assert_eq!(peer.close_count(), 1);
    let sent = peer.sent_json();
    assert_eq!(sent.len(), 3 + 300);
    assert_eq!(sent[302]["pub"]["id"], "303");
    assert_eq!(sent[302]["pub"]["content"], "msg 299");
}

#[tokio::test(start_paused = true)]
async fn stuck_handler_does_not_block_shutdown() {
    let (transport, peer) = pair();
    peer.push(login_ok("2", "usrBot"));
    peer.push(data("usrAlice", "usrAlice", "hello"));
    let connector = MockConnector::new(vec![Ok(transport)]);
    let handler = event_handler(|_handle, event| async move {
        if let Event::Data(_) = event {
            std::future::pending::<()>().await;
        }
        Ok(())
    });
    let (trigger, mut shutdown) = Shutdown::new();

    let start = Instant::now();
    let stopper = async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.trigger();
    };
    let session = Session::new(ConnectConfig::default(), creds()).run(&connector, Some(&handler), &mut shutdown);
    let (outcome, ()) = tokio::time::timeout(Duration::from_secs(120), async { tokio::join!(session, stopper) })
        .await
        .expect("session ignored shutdown");

    assert!(outcome.is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(11));
    assert_eq!(peer.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_listening_session() {
    let (transport, peer) = pair();
    peer.push(ctrl("2", 200, "ok"));
    let connector = MockConnector::new(vec![Ok(transport)]);
    let (trigger, mut shutdown) = Shutdown::new();

    let stopper = async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.trigger();
    };
    let session = Session::new(ConnectConfig::default(), creds()).run(&connector, None, &mut shutdown);
    let (outcome, ()) = tokio::join!(session, stopper);

    assert!(outcome.is_cancelled());
    assert!(outcome.authenticated);
    assert_eq!(peer.close_count(), 1);
    let n = outcome.trail.len();
    assert_eq!(&outcome.trail[n - 2..], &[SessionState::Draining, SessionState::Closed]);
}

#[tokio::test]
async fn shutdown_before_start_never_connects() {
    let connector = MockConnector::new(vec![]);
    let opens = connector.opens();
    let (trigger, mut shutdown) = Shutdown::new();
    trigger.trigger();

    let outcome = Session::new(ConnectConfig::default(), creds())
        .run(&connector, None, &mut shutdown)
        .await;

    assert!(outcome.is_cancelled());
    assert_eq!(outcome.trail, vec![SessionState::Idle, SessionState::Closed]);
    assert_eq!(opens.load(std::sync::atomic::Ordering::SeqCst), 0);
}
