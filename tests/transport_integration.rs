//! Integration tests for the client session against a scripted engine loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use lom_transport::client::{ClientError, ClientSession};
use lom_transport::config::TransportConfig;
use lom_transport::envelope::{
    codes, ActionRequest, ActionResponse, HeartbeatData, RegisterClientData, Request, RequestKind,
    RequestPayload, Response, ResponsePayload, ServerRequestData, ServerResponseData,
};
use lom_transport::server::{NextCall, PendingCall, RpcServer, ServerHandle, TransportCore};
use tokio_util::sync::CancellationToken;

/// Starts a listener on an ephemeral port and returns a config pointing at it.
async fn start_server(core: Arc<TransportCore>) -> (TransportConfig, ServerHandle) {
    let config = TransportConfig::default().with_address("127.0.0.1:0");
    let handle = RpcServer::new(&config, core)
        .start()
        .await
        .expect("Failed to start server");
    let config = config.with_address(handle.local_addr().to_string());
    (config, handle)
}

async fn next_call(core: &TransportCore) -> PendingCall {
    match core
        .next_pending_call(Duration::from_secs(5), &CancellationToken::new())
        .await
    {
        NextCall::Call(call) => call,
        other => panic!("Expected a call, got {other:?}"),
    }
}

/// Answers the next `count` calls with success and returns what was observed.
fn accept_all(core: &Arc<TransportCore>, count: usize) -> tokio::task::JoinHandle<Vec<Request>> {
    let core = Arc::clone(core);
    tokio::spawn(async move {
        let mut observed = Vec::new();
        for _ in 0..count {
            let call = next_call(&core).await;
            observed.push(call.request().clone());
            call.respond(Response::success());
        }
        observed
    })
}

/// Registering sends the name in the payload with an empty client id.
#[tokio::test]
async fn register_client_round_trip() {
    let core = Arc::new(TransportCore::new(8));
    let (config, _server) = start_server(Arc::clone(&core)).await;
    let engine = accept_all(&core, 1);

    let mut session = ClientSession::new(&config);
    session.register_client("Foo").await.unwrap();

    let observed = engine.await.unwrap();
    assert_eq!(observed[0].client, "");
    assert_eq!(observed[0].kind(), RequestKind::RegisterClient);
    assert_eq!(
        observed[0].payload,
        RequestPayload::RegisterClient(RegisterClientData {
            name: "Foo".to_string()
        })
    );
    assert_eq!(session.client_id(), "Foo");
    assert!(session.is_registered());
}

/// Operations that need a registration fail locally and send nothing.
#[tokio::test]
async fn register_action_before_registration_fails_locally() {
    let core = Arc::new(TransportCore::new(8));
    let (config, _server) = start_server(Arc::clone(&core)).await;

    let mut session = ClientSession::new(&config);
    let err = session.register_action("Detect-0").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::NotRegistered {
            op: RequestKind::RegisterAction
        }
    ));
    assert!(session.recv_server_request().await.is_err());

    let next = core
        .next_pending_call(Duration::from_millis(100), &CancellationToken::new())
        .await;
    assert!(matches!(next, NextCall::Timeout));
}

/// A remote failure surfaces the engine's message and leaves the session
/// unregistered.
#[tokio::test]
async fn remote_failure_carries_message() {
    let core = Arc::new(TransportCore::new(8));
    let (config, _server) = start_server(Arc::clone(&core)).await;

    let engine = {
        let core = Arc::clone(&core);
        tokio::spawn(async move {
            let call = next_call(&core).await;
            call.respond(Response::failure(codes::FAILED, "failed by design"));
        })
    };

    let mut session = ClientSession::new(&config);
    let err = session.register_client("Foo").await.unwrap_err();
    engine.await.unwrap();

    match &err {
        ClientError::Remote {
            op, code, client, ..
        } => {
            assert_eq!(*op, RequestKind::RegisterClient);
            assert_eq!(*code, codes::FAILED);
            assert_eq!(client, "Foo");
        }
        other => panic!("Expected a remote error, got {other:?}"),
    }
    assert!(err.to_string().contains("failed by design"));
    assert!(!session.is_registered());
    assert_eq!(session.client_id(), "");
}

/// A refused action registration names the action and keeps the client
/// registered.
#[tokio::test]
async fn refused_action_registration_carries_message() {
    let core = Arc::new(TransportCore::new(8));
    let (config, _server) = start_server(Arc::clone(&core)).await;

    let engine = {
        let core = Arc::clone(&core);
        tokio::spawn(async move {
            next_call(&core).await.respond(Response::success());
            let call = next_call(&core).await;
            let observed = call.request().clone();
            call.respond(Response::failure(codes::FAILED, "failed by design"));
            observed
        })
    };

    let mut session = ClientSession::new(&config);
    session.register_client("Foo").await.unwrap();
    let err = session.register_action("Detect-0").await.unwrap_err();
    let observed = engine.await.unwrap();

    assert_eq!(observed.client, "Foo");
    assert_eq!(observed.payload.action(), Some("Detect-0"));
    let message = err.to_string();
    assert!(message.contains("failed by design"), "{message}");
    assert!(message.contains("Detect-0"), "{message}");
    assert!(session.is_registered());
}

/// Concurrent callers each receive the response meant for them.
#[tokio::test]
async fn concurrent_registrations_are_not_crossed() {
    let core = Arc::new(TransportCore::new(8));
    let (config, _server) = start_server(Arc::clone(&core)).await;

    let engine = {
        let core = Arc::clone(&core);
        tokio::spawn(async move {
            let mut calls = vec![next_call(&core).await, next_call(&core).await];
            // Answer in reverse arrival order.
            while let Some(call) = calls.pop() {
                let RequestPayload::RegisterClient(data) = &call.request().payload else {
                    panic!("Expected a registration");
                };
                let message = format!("echo {}", data.name);
                call.respond(Response::failure(codes::FAILED, message));
            }
        })
    };

    let mut foo = ClientSession::new(&config);
    let mut bar = ClientSession::new(&config);
    let (foo_result, bar_result) =
        tokio::join!(foo.register_client("Foo"), bar.register_client("Bar"));
    engine.await.unwrap();

    assert!(foo_result.unwrap_err().to_string().contains("echo Foo"));
    assert!(bar_result.unwrap_err().to_string().contains("echo Bar"));
}

/// Payloads reach the engine unchanged and pulled commands reach the client
/// unchanged.
#[tokio::test]
async fn payloads_survive_the_round_trip() {
    let core = Arc::new(TransportCore::new(8));
    let (config, _server) = start_server(Arc::clone(&core)).await;

    let command = ServerRequestData::Action(ActionRequest {
        instance_id: "i-7".to_string(),
        anomaly_instance_id: "i-3".to_string(),
        anomaly_key: "Ethernet4".to_string(),
        timeout_secs: 9,
        context: vec![ActionResponse {
            action: "Detect-0".to_string(),
            instance_id: "i-3".to_string(),
            response: "flapping".to_string(),
            ..ActionResponse::default()
        }],
        ..ActionRequest::new("Safety-Check")
    });

    let engine = {
        let core = Arc::clone(&core);
        let command = command.clone();
        tokio::spawn(async move {
            let mut observed = Vec::new();

            let call = next_call(&core).await;
            call.respond(Response::success());

            let call = next_call(&core).await;
            observed.push(call.request().clone());
            call.respond(Response::with_payload(ResponsePayload::ServerRequest(command)));

            for _ in 0..2 {
                let call = next_call(&core).await;
                observed.push(call.request().clone());
                call.respond(Response::success());
            }
            observed
        })
    };

    let mut session = ClientSession::new(&config).with_timeout_secs(7);
    session.register_client("Foo").await.unwrap();

    let pulled = session.recv_server_request().await.unwrap();
    assert_eq!(pulled.as_ref(), Some(&command));

    let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
    session
        .notify_heartbeat("Safety-Check", timestamp)
        .await
        .unwrap();

    let ServerRequestData::Action(request) = &command else {
        unreachable!();
    };
    let response = ActionResponse {
        response: "safe".to_string(),
        result_str: "ok".to_string(),
        ..ActionResponse::for_request(request)
    };
    session
        .send_server_response(ServerResponseData::Action(response.clone()))
        .await
        .unwrap();

    let observed = engine.await.unwrap();
    assert_eq!(observed[0].kind(), RequestKind::RecvServerRequest);
    assert_eq!(observed[0].client, "Foo");
    assert_eq!(observed[0].timeout_secs, 7);
    assert_eq!(
        observed[1].payload,
        RequestPayload::NotifyActionHeartbeat(HeartbeatData {
            action: "Safety-Check".to_string(),
            timestamp,
        })
    );
    assert_eq!(
        observed[2].payload,
        RequestPayload::SendServerResponse(ServerResponseData::Action(response))
    );
}

/// Deregistration clears local state even when the engine refuses it.
#[tokio::test]
async fn deregister_clears_state_on_remote_failure() {
    let core = Arc::new(TransportCore::new(8));
    let (config, _server) = start_server(Arc::clone(&core)).await;

    let engine = {
        let core = Arc::clone(&core);
        tokio::spawn(async move {
            next_call(&core).await.respond(Response::success());
            next_call(&core)
                .await
                .respond(Response::failure(codes::NOT_REGISTERED, "unknown client"));
        })
    };

    let mut session = ClientSession::new(&config);
    session.register_client("Foo").await.unwrap();
    let err = session.deregister_client().await.unwrap_err();
    engine.await.unwrap();

    assert!(matches!(
        err,
        ClientError::Remote {
            code: codes::NOT_REGISTERED,
            ..
        }
    ));
    assert!(!session.is_registered());
    assert!(matches!(
        session.register_action("Detect-0").await.unwrap_err(),
        ClientError::NotRegistered { .. }
    ));
}

/// A second registration is refused locally without touching the engine.
#[tokio::test]
async fn register_twice_is_refused_locally() {
    let core = Arc::new(TransportCore::new(8));
    let (config, _server) = start_server(Arc::clone(&core)).await;
    let engine = accept_all(&core, 1);

    let mut session = ClientSession::new(&config);
    session.register_client("Foo").await.unwrap();
    engine.await.unwrap();

    let err = session.register_client("Bar").await.unwrap_err();
    assert!(matches!(err, ClientError::AlreadyRegistered { ref client } if client == "Foo"));
    assert_eq!(session.client_id(), "Foo");

    let next = core
        .next_pending_call(Duration::from_millis(100), &CancellationToken::new())
        .await;
    assert!(matches!(next, NextCall::Timeout));
}

/// An unexpected payload shape is reported instead of being coerced.
#[tokio::test]
async fn unexpected_payload_is_reported() {
    let core = Arc::new(TransportCore::new(8));
    let (config, _server) = start_server(Arc::clone(&core)).await;

    let engine = {
        let core = Arc::clone(&core);
        tokio::spawn(async move {
            next_call(&core)
                .await
                .respond(Response::with_payload(ResponsePayload::NoWork));
        })
    };

    let mut session = ClientSession::new(&config);
    let err = session.register_client("Foo").await.unwrap_err();
    engine.await.unwrap();

    assert!(matches!(err, ClientError::UnexpectedPayload { .. }));
    assert!(!session.is_registered());
}

/// Dialing an address with nothing listening fails with a connection error.
#[tokio::test]
async fn connect_failure_leaves_session_unregistered() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let config = TransportConfig::default().with_address(address);
    let mut session = ClientSession::new(&config);

    let started = Instant::now();
    let err = session.register_client("Foo").await.unwrap_err();
    assert!(err.is_connection_error());
    assert!(!session.is_registered());
    assert!(started.elapsed() < Duration::from_secs(5));
}
