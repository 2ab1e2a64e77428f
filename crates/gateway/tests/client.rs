//! Gateway client behavior against an in-memory transport: correlation,
//! disconnect semantics, reconnect backoff, and event fan-out.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use {
    std::{sync::Arc, time::Duration},
    tokio::sync::mpsc,
};

use {
    botdesk_gateway::{
        ClientOptions, ConnectionState, Error, EventKind, GatewayClient, GatewayEvent,
        TransportEvent,
        transport::pipe::{PipeTransport, ServerEnd},
    },
    botdesk_protocol::{GatewayFrame, Policy, RequestFrameInner, ResponseFrame},
    serde_json::{Value, json},
};

fn test_client(transport: Arc<PipeTransport>) -> GatewayClient {
    GatewayClient::new(transport, ClientOptions::new("pipe://test", "botdesk-test"))
}

fn hello_ok_payload() -> Value {
    json!({
        "type": "hello-ok",
        "protocol": 1,
        "server": { "version": "1.0.0", "connId": "conn-1" },
        "policy": Policy::default_policy(),
    })
}

async fn next_request(end: &mut ServerEnd) -> RequestFrameInner {
    let text = end.incoming.recv().await.expect("client hung up");
    match serde_json::from_str(&text).unwrap() {
        GatewayFrame::Request(req) => req,
        other => panic!("expected request frame, got {other:?}"),
    }
}

fn respond_ok(end: &ServerEnd, id: &str, payload: Value) {
    let frame = serde_json::to_string(&ResponseFrame::ok(id, payload)).unwrap();
    end.events.send(TransportEvent::Message(frame)).unwrap();
}

fn push_event(end: &ServerEnd, event: &str, payload: Value) {
    let frame =
        serde_json::to_string(&botdesk_protocol::EventFrame::new(event, payload)).unwrap();
    end.events.send(TransportEvent::Message(frame)).unwrap();
}

/// Accept the next pipe session and serve the handshake on it.
async fn accept_and_handshake(accept_rx: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    let mut end = accept_rx.recv().await.expect("no connect attempt");
    let req = next_request(&mut end).await;
    assert_eq!(req.method, "connect");
    respond_ok(&end, &req.id, hello_ok_payload());
    end
}

#[tokio::test]
async fn handshake_authenticates_and_negotiates() {
    let (transport, mut accept_rx) = PipeTransport::new();
    let client = test_client(Arc::new(transport));

    let (negotiated, end) =
        tokio::join!(client.connect(), accept_and_handshake(&mut accept_rx));
    let negotiated = negotiated.unwrap();

    assert_eq!(negotiated.protocol, 1);
    assert_eq!(negotiated.conn_id, "conn-1");
    assert_eq!(negotiated.policy.max_payload, botdesk_protocol::MAX_PAYLOAD_BYTES);
    assert_eq!(negotiated.policy.tick_interval_ms, botdesk_protocol::TICK_INTERVAL_MS);
    assert_eq!(client.state().await, ConnectionState::Authenticated);
    drop(end);
}

#[tokio::test]
async fn concurrent_requests_resolve_independently_in_any_order() {
    let (transport, mut accept_rx) = PipeTransport::new();
    let client = test_client(Arc::new(transport));
    let (_, mut end) = tokio::join!(client.connect(), accept_and_handshake(&mut accept_rx));

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.request("health", json!({})).await })
    };
    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.request("status", json!({})).await })
    };

    let req_a = next_request(&mut end).await;
    let req_b = next_request(&mut end).await;
    assert_ne!(req_a.id, req_b.id);

    // Respond in reverse arrival order.
    respond_ok(&end, &req_b.id, json!({ "for": req_b.method }));
    respond_ok(&end, &req_a.id, json!({ "for": req_a.method }));

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first["for"], "health");
    assert_eq!(second["for"], "status");
}

#[tokio::test]
async fn request_in_flight_at_disconnect_fails_with_client_disconnected() {
    let (transport, mut accept_rx) = PipeTransport::new();
    let client = test_client(Arc::new(transport));
    let (_, mut end) = tokio::join!(client.connect(), accept_and_handshake(&mut accept_rx));

    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move { client.request("send", json!({"to": "g1"})).await })
    };
    // Make sure the frame actually left before disconnecting.
    let _ = next_request(&mut end).await;

    client.disconnect().await;

    let result = in_flight.await.unwrap();
    assert!(matches!(result, Err(Error::ClientDisconnected)));
    assert_eq!(client.state().await, ConnectionState::Disconnected);

    // New requests are refused outright.
    let result = client.request("health", json!({})).await;
    assert!(matches!(result, Err(Error::ClientDisconnected)));
}

#[tokio::test(start_paused = true)]
async fn request_deadline_yields_request_timeout_with_method() {
    let (transport, mut accept_rx) = PipeTransport::new();
    let client = test_client(Arc::new(transport));
    let (_, mut end) = tokio::join!(client.connect(), accept_and_handshake(&mut accept_rx));

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.request("agent", json!({})).await })
    };
    let _ = next_request(&mut end).await; // swallow it, never respond

    let result = pending.await.unwrap();
    match result {
        Err(Error::RequestTimeout { method }) => assert_eq!(method, "agent"),
        other => panic!("expected RequestTimeout, got {other:?}"),
    }

    // A late response for the expired id is ignored, and the connection
    // remains usable for new requests.
    let health = {
        let client = client.clone();
        tokio::spawn(async move { client.request("health", json!({})).await })
    };
    let req = next_request(&mut end).await;
    respond_ok(&end, &req.id, json!({"ok": true}));
    assert!(health.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_is_connection_timeout() {
    let (transport, mut accept_rx) = PipeTransport::new();
    let client = test_client(Arc::new(transport));

    let silent_server = tokio::spawn(async move {
        // Accept but never answer the connect request.
        let mut end = accept_rx.recv().await.expect("no connect attempt");
        let _ = next_request(&mut end).await;
        end
    });

    let result = client.connect().await;
    assert!(matches!(result, Err(Error::ConnectionTimeout)));
    assert_eq!(client.state().await, ConnectionState::Disconnected);
    drop(silent_server);
}

#[tokio::test]
async fn auth_rejection_surfaces_from_handshake() {
    let (transport, mut accept_rx) = PipeTransport::new();
    let client = test_client(Arc::new(transport));

    let server = async {
        let mut end = accept_rx.recv().await.expect("no connect attempt");
        let req = next_request(&mut end).await;
        let frame = ResponseFrame::err(
            &req.id,
            botdesk_protocol::ErrorShape::new(
                botdesk_protocol::error_codes::AUTH_REJECTED,
                "bad token",
            ),
        );
        end.events
            .send(TransportEvent::Message(serde_json::to_string(&frame).unwrap()))
            .unwrap();
        end
    };

    let (result, _end) = tokio::join!(client.connect(), server);
    match result {
        Err(Error::AuthRejected(message)) => assert!(message.contains("bad token")),
        other => panic!("expected AuthRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn negotiated_protocol_outside_offer_is_mismatch() {
    let (transport, mut accept_rx) = PipeTransport::new();
    let client = test_client(Arc::new(transport));

    let server = async {
        let mut end = accept_rx.recv().await.expect("no connect attempt");
        let req = next_request(&mut end).await;
        let mut hello = hello_ok_payload();
        hello["protocol"] = json!(99);
        respond_ok(&end, &req.id, hello);
        end
    };

    let (result, _end) = tokio::join!(client.connect(), server);
    assert!(matches!(result, Err(Error::ProtocolMismatch(_))));
}

#[tokio::test(start_paused = true)]
async fn reconnect_backoff_doubles_per_attempt() {
    let (transport, mut accept_rx) = PipeTransport::new();
    let transport = Arc::new(transport);
    let client = test_client(Arc::clone(&transport));
    let (_, end) = tokio::join!(client.connect(), accept_and_handshake(&mut accept_rx));

    // Bring the gateway down: refuse reconnects and close the session.
    transport.set_refuse(true);
    end.events.send(TransportEvent::Closed).unwrap();

    // Initial connect + 3 failed reconnect attempts.
    while transport.connect_times().len() < 4 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let times = transport.connect_times();
    let deltas: Vec<u64> = times
        .windows(2)
        .map(|w| (w[1] - w[0]).as_millis() as u64)
        .collect();
    assert_eq!(deltas, vec![5_000, 10_000, 20_000]);
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_resets_backoff() {
    let (transport, mut accept_rx) = PipeTransport::new();
    let transport = Arc::new(transport);
    let client = test_client(Arc::clone(&transport));
    let (_, end) = tokio::join!(client.connect(), accept_and_handshake(&mut accept_rx));

    // First unexpected close: let the 5s reconnect succeed.
    end.events.send(TransportEvent::Closed).unwrap();
    let end = accept_and_handshake(&mut accept_rx).await;
    while client.state().await != ConnectionState::Authenticated {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Second unexpected close: the delay starts over at 5s, not 10s.
    transport.set_refuse(true);
    let closed_at = tokio::time::Instant::now();
    end.events.send(TransportEvent::Closed).unwrap();
    while transport.connect_times().len() < 3 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let times = transport.connect_times();
    let delta = (times[2] - closed_at).as_millis() as u64;
    assert_eq!(delta, 5_000);
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnects_emit_terminal_event_and_stop() {
    let (transport, mut accept_rx) = PipeTransport::new();
    let transport = Arc::new(transport);
    let client = test_client(Arc::clone(&transport));
    let (_, end) = tokio::join!(client.connect(), accept_and_handshake(&mut accept_rx));

    let (exhausted_tx, mut exhausted_rx) = mpsc::unbounded_channel();
    client.on(
        EventKind::ReconnectExhausted,
        Box::new(move |_| {
            let _ = exhausted_tx.send(());
            Ok(())
        }),
    );

    transport.set_refuse(true);
    end.events.send(TransportEvent::Closed).unwrap();

    exhausted_rx.recv().await.expect("no exhausted event");

    // Initial connect + the full attempt budget, then silence.
    let attempts = transport.connect_times().len();
    assert_eq!(attempts, 6);
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.connect_times().len(), attempts);
}

#[tokio::test]
async fn events_fan_out_globally_and_per_kind() {
    let (transport, mut accept_rx) = PipeTransport::new();
    let client = test_client(Arc::new(transport));
    let (_, end) = tokio::join!(client.connect(), accept_and_handshake(&mut accept_rx));

    let (all_tx, mut all_rx) = mpsc::unbounded_channel();
    client.on_any(Box::new(move |event| {
        let _ = all_tx.send(format!("{:?}", event.kind()));
        Ok(())
    }));
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    client.on(
        EventKind::MessageReceived,
        Box::new(move |event| {
            if let GatewayEvent::MessageReceived { message } = event {
                let _ = msg_tx.send(message.body.clone());
            }
            Ok(())
        }),
    );

    push_event(&end, "tick", json!({}));
    push_event(
        &end,
        "message.received",
        json!({"message": {"groupId": "g1", "sender": "u1", "body": "hello there"}}),
    );

    assert_eq!(all_rx.recv().await.unwrap(), "Tick");
    assert_eq!(all_rx.recv().await.unwrap(), "MessageReceived");
    assert_eq!(msg_rx.recv().await.unwrap(), "hello there");
}

#[tokio::test]
async fn stale_config_patch_is_hash_conflict() {
    let (transport, mut accept_rx) = PipeTransport::new();
    let client = test_client(Arc::new(transport));
    let (_, mut end) = tokio::join!(client.connect(), accept_and_handshake(&mut accept_rx));

    let patch = {
        let client = client.clone();
        tokio::spawn(async move {
            use botdesk_gateway::GatewayApi;
            client.patch_config("{}".into(), "stale-hash".into()).await
        })
    };

    let req = next_request(&mut end).await;
    assert_eq!(req.method, "config.patch");
    assert_eq!(req.params.unwrap()["baseHash"], "stale-hash");
    let frame = ResponseFrame::err(
        &req.id,
        botdesk_protocol::ErrorShape::new(
            botdesk_protocol::error_codes::CONFIG_HASH_CONFLICT,
            "config changed since base hash",
        ),
    );
    end.events
        .send(TransportEvent::Message(serde_json::to_string(&frame).unwrap()))
        .unwrap();

    let result = patch.await.unwrap();
    assert!(matches!(result, Err(Error::ConfigHashConflict(_))));
}

#[tokio::test]
async fn group_config_merges_wildcard_shallowly() {
    let (transport, mut accept_rx) = PipeTransport::new();
    let client = test_client(Arc::new(transport));
    let (_, mut end) = tokio::join!(client.connect(), accept_and_handshake(&mut accept_rx));

    let raw = json!({
        "groups": {
            "*": {
                "requireMention": true,
                "historyLimit": 50,
                "rateLimit": { "maxMessagesPerMinute": 10, "cooldownSeconds": 30 },
            },
            "g1": {
                "historyLimit": 10,
                "rateLimit": { "maxMessagesPerMinute": 5 },
            },
        },
    })
    .to_string();

    let get = {
        let client = client.clone();
        tokio::spawn(async move {
            use botdesk_gateway::GatewayApi;
            client.get_group_config("g1").await
        })
    };
    let req = next_request(&mut end).await;
    assert_eq!(req.method, "config.get");
    respond_ok(&end, &req.id, json!({ "raw": raw, "hash": "h1" }));

    let config = get.await.unwrap().unwrap();
    assert!(config.require_mention); // from the wildcard
    assert_eq!(config.history_limit, 10); // overridden
    let rate_limit = config.rate_limit.unwrap();
    assert_eq!(rate_limit.max_messages_per_minute, 5);
    // Shallow override: the wildcard's cooldown must not leak into the
    // replaced rate-limit block.
    assert_eq!(rate_limit.cooldown_seconds, None);
}
