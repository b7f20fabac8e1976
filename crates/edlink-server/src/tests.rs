//! Tests for the command server.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::{
    ClientInfo, CommandRegistry, ConnectionId, DisconnectReason, DispatchOutcome, FnHandler,
    FramingMode, Params, RecordingSink, RegistryError, Response, Server, ServerConfig,
    ServerError, ServerEvent, Status, dispatch,
};

// ============================================================================
// Helpers
// ============================================================================

fn test_client() -> ClientInfo {
    ClientInfo {
        id: ConnectionId::new(7),
        peer: "127.0.0.1:40000".parse().expect("valid addr"),
    }
}

fn echo_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry
        .register(
            FnHandler::new("echo", |params: &Params, _: &ClientInfo| {
                Response::success_with(Value::Object(params.clone()))
            })
            .boxed(),
        )
        .expect("register echo");
    registry
}

fn test_config() -> ServerConfig {
    ServerConfig::new(0).with_idle_timeout(Duration::from_secs(60))
}

fn started(config: ServerConfig, registry: CommandRegistry) -> (Server, RecordingSink) {
    let sink = RecordingSink::new();
    let mut server = Server::with_sink(config, registry, Box::new(sink.clone()));
    server.start().expect("server should start");
    (server, sink)
}

fn addr_of(server: &Server) -> SocketAddr {
    server.local_addr().expect("server should be bound")
}

/// Connects a non-blocking client and polls until the server has accepted it.
fn connect(server: &mut Server) -> TcpStream {
    let before = server.connection_count();
    let stream = TcpStream::connect(addr_of(server)).expect("connect");
    stream.set_nonblocking(true).expect("non-blocking client");
    poll_until(server, |s| s.connection_count() > before);
    stream
}

fn poll_until(server: &mut Server, done: impl Fn(&Server) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(server) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        server.poll(Duration::ZERO);
        thread::sleep(Duration::from_millis(2));
    }
}

/// Polls the server until `count` complete JSON values have been read.
fn read_values(server: &mut Server, client: &mut TcpStream, count: usize) -> Vec<Value> {
    let mut buf = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let values: Vec<Value> = serde_json::Deserializer::from_slice(&buf)
            .into_iter::<Value>()
            .map_while(Result::ok)
            .collect();
        if values.len() >= count {
            return values;
        }
        assert!(Instant::now() < deadline, "no response in time");

        server.poll(Duration::ZERO);
        let mut chunk = [0u8; 64 * 1024];
        match client.read(&mut chunk) {
            Ok(0) => panic!("server closed the connection"),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(2)),
            Err(e) => panic!("read failed: {e}"),
        }
    }
}

fn exchange(server: &mut Server, client: &mut TcpStream, request: &[u8]) -> Value {
    client.write_all(request).expect("write request");
    read_values(server, client, 1).remove(0)
}

/// Returns true once the client observes end-of-stream or a reset.
fn wait_for_close(client: &mut TcpStream) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut chunk = [0u8; 256];
    while Instant::now() < deadline {
        match client.read(&mut chunk) {
            Ok(0) => return true,
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(2)),
            Err(_) => return true,
        }
    }
    false
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn test_registry_rejects_duplicate_and_keeps_first() {
    let mut registry = echo_registry();
    let result = registry.register(
        FnHandler::new("echo", |_: &Params, _: &ClientInfo| Response::error("impostor")).boxed(),
    );

    assert_eq!(result, Err(RegistryError::AlreadyRegistered("echo".into())));
    assert_eq!(registry.len(), 1);

    let reply = dispatch(&registry, br#"{"type":"echo","params":{"a":1}}"#, &test_client());
    assert_eq!(reply.response.status, Status::Success);
}

#[test]
fn test_registry_unregister_unknown_fails() {
    let mut registry = echo_registry();

    assert_eq!(
        registry.unregister("missing"),
        Err(RegistryError::NotRegistered("missing".into()))
    );
    assert_eq!(registry.unregister(""), Err(RegistryError::EmptyName));
    assert_eq!(registry.names(), vec!["echo".to_string()]);

    registry.unregister("echo").expect("echo is registered");
    assert!(registry.is_empty());
}

#[test]
fn test_registry_rejects_empty_name() {
    let mut registry = CommandRegistry::new();
    let result = registry
        .register(FnHandler::new("", |_: &Params, _: &ClientInfo| Response::success()).boxed());
    assert_eq!(result, Err(RegistryError::EmptyName));
}

// ============================================================================
// Dispatcher
// ============================================================================

#[test]
fn test_dispatch_invalid_json() {
    let reply = dispatch(&echo_registry(), b"{not json", &test_client());
    assert_eq!(reply.outcome, DispatchOutcome::InvalidJson);
    assert_eq!(reply.response, Response::error("Invalid JSON format"));
}

#[test]
fn test_dispatch_non_object_is_invalid_json() {
    for input in [&b"[1,2,3]"[..], b"42", b"\"echo\"", b""] {
        let reply = dispatch(&echo_registry(), input, &test_client());
        assert_eq!(reply.outcome, DispatchOutcome::InvalidJson);
    }
}

#[test]
fn test_dispatch_missing_type() {
    let registry = echo_registry();
    for input in [&br#"{"params":{}}"#[..], br#"{"type":5}"#, b"{}"] {
        let reply = dispatch(&registry, input, &test_client());
        assert_eq!(reply.outcome, DispatchOutcome::MissingType);
        assert_eq!(reply.response, Response::error("Missing 'type' field"));
    }
}

#[test]
fn test_dispatch_unknown_command() {
    let reply = dispatch(&echo_registry(), br#"{"type":"nope"}"#, &test_client());
    assert_eq!(reply.outcome, DispatchOutcome::UnknownCommand("nope".into()));
    assert_eq!(reply.response, Response::error("Unknown command: nope"));
}

#[test]
fn test_dispatch_defaults_params_to_empty_object() {
    let registry = echo_registry();

    let absent = dispatch(&registry, br#"{"type":"echo"}"#, &test_client());
    assert_eq!(absent.response.result, Some(json!({})));

    let not_object = dispatch(&registry, br#"{"type":"echo","params":[1]}"#, &test_client());
    assert_eq!(not_object.response.result, Some(json!({})));
}

#[test]
fn test_dispatch_forwards_handler_envelope_verbatim() {
    let mut registry = CommandRegistry::new();
    registry
        .register(
            FnHandler::new("fail_with_detail", |_: &Params, _: &ClientInfo| {
                Response::error("Python execution failed with errors")
                    .with_result(json!({"output": "", "error": "Traceback"}))
            })
            .boxed(),
        )
        .expect("register");

    let reply = dispatch(&registry, br#"{"type":"fail_with_detail"}"#, &test_client());

    assert_eq!(reply.outcome, DispatchOutcome::Handled("fail_with_detail".into()));
    assert_eq!(
        serde_json::to_value(&reply.response).expect("serialize"),
        json!({
            "status": "error",
            "message": "Python execution failed with errors",
            "result": {"output": "", "error": "Traceback"}
        })
    );
}

#[test]
fn test_dispatch_passes_client_info() {
    let seen = Arc::new(Mutex::new(None));
    let captured = Arc::clone(&seen);
    let mut registry = CommandRegistry::new();
    registry
        .register(
            FnHandler::new("whoami", move |_: &Params, client: &ClientInfo| {
                *captured.lock().expect("lock") = Some(*client);
                Response::success()
            })
            .boxed(),
        )
        .expect("register");

    dispatch(&registry, br#"{"type":"whoami"}"#, &test_client());
    assert_eq!(*seen.lock().expect("lock"), Some(test_client()));
}

#[test]
fn test_response_serialization_omits_absent_fields() {
    let text = serde_json::to_string(&Response::success()).expect("serialize");
    assert_eq!(text, r#"{"status":"success"}"#);
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn unknown_commands_are_reported_by_name(name in "[a-z_]{1,24}") {
            prop_assume!(name != "echo");
            let request = json!({"type": name}).to_string();
            let reply = dispatch(&echo_registry(), request.as_bytes(), &test_client());
            prop_assert_eq!(reply.response, Response::unknown_command(&name));
        }

        #[test]
        fn registered_handler_sees_exact_params(
            params in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8)
        ) {
            let params: Params = params
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect();
            let request = json!({"type": "echo", "params": params}).to_string();
            let reply = dispatch(&echo_registry(), request.as_bytes(), &test_client());
            prop_assert_eq!(reply.response.result, Some(Value::Object(params)));
        }

        #[test]
        fn non_json_bytes_are_invalid(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assume!(serde_json::from_slice::<Value>(&bytes).map_or(true, |v| !v.is_object()));
            let reply = dispatch(&echo_registry(), &bytes, &test_client());
            prop_assert_eq!(reply.response, Response::invalid_json());
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_stop_before_start_is_safe() {
    let sink = RecordingSink::new();
    let mut server =
        Server::with_sink(test_config(), CommandRegistry::new(), Box::new(sink.clone()));

    server.stop();
    server.stop();

    assert!(!server.is_running());
    assert_eq!(server.connection_count(), 0);
    assert!(server.local_addr().is_none());
    assert!(sink.events().is_empty());
}

#[test]
fn test_start_twice_keeps_single_listener() {
    let (mut server, sink) = started(test_config(), CommandRegistry::new());
    let first = addr_of(&server);

    server.start().expect("second start succeeds");

    assert!(server.is_running());
    assert_eq!(addr_of(&server), first);
    assert!(sink.any(|e| matches!(e, ServerEvent::AlreadyRunning)));
}

#[test]
fn test_start_fails_when_port_taken() {
    let occupied = TcpListener::bind("127.0.0.1:0").expect("bind placeholder");
    let port = occupied.local_addr().expect("addr").port();

    let sink = RecordingSink::new();
    let mut server =
        Server::with_sink(ServerConfig::new(port), CommandRegistry::new(), Box::new(sink.clone()));

    let result = server.start();

    assert!(matches!(result, Err(ServerError::BindFailed { .. })));
    assert!(!server.is_running());
    assert!(!server.tick(Duration::from_secs(1)));
    assert!(sink.any(|e| matches!(e, ServerEvent::BindFailed { .. })));
}

#[test]
fn test_stop_closes_connections_and_releases_listener() {
    let (mut server, sink) = started(test_config(), echo_registry());
    let addr = addr_of(&server);
    let mut first = connect(&mut server);
    let mut second = connect(&mut server);
    assert_eq!(server.connection_count(), 2);

    server.stop();

    assert_eq!(server.connection_count(), 0);
    assert!(!server.is_running());
    assert!(server.local_addr().is_none());
    assert!(sink.any(|e| *e == ServerEvent::Stopped { connections_closed: 2 }));
    assert!(wait_for_close(&mut first));
    assert!(wait_for_close(&mut second));

    // The port is free again.
    let (again, _) = started(ServerConfig::new(addr.port()), CommandRegistry::new());
    assert_eq!(addr_of(&again).port(), addr.port());
}

#[test]
fn test_restart_after_stop() {
    let (mut server, _) = started(test_config(), echo_registry());
    server.stop();
    server.start().expect("restart");

    let mut client = connect(&mut server);
    let reply = exchange(&mut server, &mut client, br#"{"type":"echo"}"#);
    assert_eq!(reply["status"], "success");
}

#[test]
fn test_tick_waits_for_poll_interval() {
    let config = test_config().with_poll_interval(Duration::from_millis(100));
    let (mut server, _) = started(config, CommandRegistry::new());
    let _client = TcpStream::connect(addr_of(&server)).expect("connect");
    thread::sleep(Duration::from_millis(20));

    assert!(server.tick(Duration::from_millis(40)));
    assert_eq!(server.connection_count(), 0, "no poll before the interval");

    assert!(server.tick(Duration::from_millis(70)));
    assert_eq!(server.connection_count(), 1);

    server.stop();
    assert!(!server.tick(Duration::from_millis(100)));
}

#[test]
fn test_one_poll_accepts_every_pending_connection() {
    let (mut server, sink) = started(test_config(), echo_registry());
    let addr = addr_of(&server);

    let _clients: Vec<TcpStream> = (0..3)
        .map(|_| TcpStream::connect(addr).expect("connect"))
        .collect();
    server.poll(Duration::ZERO);

    assert_eq!(server.connection_count(), 3);
    let accepted = sink
        .events()
        .iter()
        .filter(|e| matches!(e, ServerEvent::ClientConnected { .. }))
        .count();
    assert_eq!(accepted, 3);
}

// ============================================================================
// Request handling over sockets
// ============================================================================

#[test]
fn test_protocol_errors_keep_connection_open() {
    let (mut server, sink) = started(test_config(), echo_registry());
    let mut client = connect(&mut server);

    let unknown = exchange(&mut server, &mut client, br#"{"type":"nope"}"#);
    assert_eq!(unknown, json!({"status": "error", "message": "Unknown command: nope"}));

    let garbage = exchange(&mut server, &mut client, b"definitely not json");
    assert_eq!(garbage, json!({"status": "error", "message": "Invalid JSON format"}));

    let untyped = exchange(&mut server, &mut client, br#"{"params":{}}"#);
    assert_eq!(untyped, json!({"status": "error", "message": "Missing 'type' field"}));

    let echoed = exchange(&mut server, &mut client, br#"{"type":"echo","params":{"x":1}}"#);
    assert_eq!(echoed, json!({"status": "success", "result": {"x": 1}}));

    assert_eq!(server.connection_count(), 1);
    assert!(sink.any(
        |e| matches!(e, ServerEvent::UnknownCommand { command, .. } if command == "nope")
    ));
}

#[test]
fn test_handler_sees_connection_id() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&seen);
    let mut registry = CommandRegistry::new();
    registry
        .register(
            FnHandler::new("record", move |_: &Params, client: &ClientInfo| {
                captured.lock().expect("lock").push(client.id);
                Response::success()
            })
            .boxed(),
        )
        .expect("register");
    let (mut server, _) = started(test_config(), registry);
    let mut client = connect(&mut server);
    let id = server.connection_ids()[0];

    exchange(&mut server, &mut client, br#"{"type":"record"}"#);

    assert_eq!(*seen.lock().expect("lock"), vec![id]);
}

#[test]
fn test_peer_disconnect_is_evicted() {
    let (mut server, sink) = started(test_config(), echo_registry());
    let client = connect(&mut server);

    drop(client);
    poll_until(&mut server, |s| s.connection_count() == 0);

    assert!(sink.any(|e| matches!(
        e,
        ServerEvent::ClientDisconnected {
            reason: DisconnectReason::PeerClosed | DisconnectReason::SocketError(_),
            ..
        }
    )));
}

#[test]
fn test_idle_connection_is_evicted_after_timeout() {
    let config = test_config().with_idle_timeout(Duration::from_secs(1));
    let (mut server, sink) = started(config, echo_registry());
    let mut client = connect(&mut server);

    server.poll(Duration::from_millis(600));
    assert_eq!(server.connection_count(), 1);

    server.poll(Duration::from_millis(600));
    assert_eq!(server.connection_count(), 0);

    assert!(sink.any(|e| matches!(
        e,
        ServerEvent::ClientDisconnected { reason: DisconnectReason::IdleTimeout { .. }, .. }
    )));
    assert!(wait_for_close(&mut client));
}

#[test]
fn test_read_resets_idle_duration() {
    let config = test_config().with_idle_timeout(Duration::from_secs(1));
    let (mut server, _) = started(config, echo_registry());
    let mut client = connect(&mut server);
    let id = server.connection_ids()[0];

    server.poll(Duration::from_millis(800));
    assert_eq!(server.connection(id).expect("alive").idle(), Duration::from_millis(800));

    client.write_all(br#"{"type":"echo"}"#).expect("write");
    thread::sleep(Duration::from_millis(20));
    server.poll(Duration::from_millis(800));

    // Reset to zero by the read, then aged by this tick only.
    let conn = server.connection(id).expect("read keeps the connection alive");
    assert_eq!(conn.idle(), Duration::from_millis(800));
    assert_eq!(read_values(&mut server, &mut client, 1)[0]["status"], "success");
}

#[test]
fn test_verbose_logging_reports_reads() {
    let (mut quiet, quiet_sink) = started(test_config(), echo_registry());
    let mut client = connect(&mut quiet);
    exchange(&mut quiet, &mut client, br#"{"type":"echo"}"#);
    assert!(!quiet_sink.any(|e| matches!(e, ServerEvent::BytesRead { .. })));

    let (mut verbose, verbose_sink) =
        started(test_config().with_verbose_logging(true), echo_registry());
    let mut client = connect(&mut verbose);
    exchange(&mut verbose, &mut client, br#"{"type":"echo"}"#);
    assert!(verbose_sink.any(|e| matches!(e, ServerEvent::BytesRead { bytes: 15, .. })));
    assert!(verbose_sink.any(|e| matches!(e, ServerEvent::RequestReceived { .. })));
}

#[test]
fn test_per_read_framing_rejects_coalesced_messages() {
    let (mut server, _) = started(test_config(), echo_registry());
    let mut client = connect(&mut server);

    let reply = exchange(&mut server, &mut client, br#"{"type":"echo"}{"type":"echo"}"#);

    assert_eq!(reply, json!({"status": "error", "message": "Invalid JSON format"}));
}

#[test]
fn test_streaming_framing_splits_coalesced_messages() {
    let config = test_config().with_framing(FramingMode::Streaming);
    let (mut server, _) = started(config, echo_registry());
    let mut client = connect(&mut server);

    client
        .write_all(br#"{"type":"echo","params":{"n":1}}
{"type":"echo","params":{"n":2}}"#)
        .expect("write");
    let replies = read_values(&mut server, &mut client, 2);

    assert_eq!(replies[0]["result"]["n"], 1);
    assert_eq!(replies[1]["result"]["n"], 2);
}

#[test]
fn test_streaming_framing_waits_for_fragments() {
    let config = test_config().with_framing(FramingMode::Streaming);
    let (mut server, _) = started(config, echo_registry());
    let mut client = connect(&mut server);

    client.write_all(br#"{"type":"ec"#).expect("write first half");
    thread::sleep(Duration::from_millis(20));
    server.poll(Duration::ZERO);

    client.write_all(br#"ho","params":{"done":true}}"#).expect("write second half");
    let reply = read_values(&mut server, &mut client, 1).remove(0);

    assert_eq!(reply, json!({"status": "success", "result": {"done": true}}));
}

#[test]
fn test_streaming_framing_discards_oversized_message() {
    let config = test_config()
        .with_framing(FramingMode::Streaming)
        .with_receive_buffer_size(16);
    let (mut server, sink) = started(config, echo_registry());
    let mut client = connect(&mut server);

    let reply = exchange(
        &mut server,
        &mut client,
        br#"{"type":"echo","params":{"padding":"xxxxxxxx"#,
    );

    assert_eq!(reply, json!({"status": "error", "message": "Invalid JSON format"}));
    assert!(sink.any(|e| matches!(e, ServerEvent::MessageTooLarge { bytes: 15, .. })));
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_large_response_is_delivered_in_full() {
    let mut registry = CommandRegistry::new();
    registry
        .register(
            FnHandler::new("bulk", |_: &Params, _: &ClientInfo| {
                Response::success_with(json!({"blob": "z".repeat(1024 * 1024)}))
            })
            .boxed(),
        )
        .expect("register");
    let (mut server, _) = started(test_config(), registry);
    let mut client = connect(&mut server);

    let reply = exchange(&mut server, &mut client, br#"{"type":"bulk"}"#);

    assert_eq!(reply["result"]["blob"].as_str().map(str::len), Some(1024 * 1024));
}

#[test]
fn test_client_that_never_reads_is_evicted_at_outbound_cap() {
    const CAP: usize = 1024 * 1024;
    let mut registry = CommandRegistry::new();
    registry
        .register(
            FnHandler::new("bulk", |_: &Params, _: &ClientInfo| {
                Response::success_with(json!({"blob": "y".repeat(256 * 1024)}))
            })
            .boxed(),
        )
        .expect("register");
    let config = test_config().with_max_outbound_size(CAP);
    let (mut server, sink) = started(config, registry);
    let mut client = connect(&mut server);

    // Keep asking without ever reading a reply.
    let mut sent = 0;
    while server.connection_count() == 1 {
        assert!(sent < 500, "connection kept after {sent} unread replies");
        if client.write_all(br#"{"type":"bulk"}"#).is_err() {
            break;
        }
        sent += 1;
        server.poll(Duration::ZERO);
        thread::sleep(Duration::from_millis(1));
    }
    poll_until(&mut server, |s| s.connection_count() == 0);

    assert!(sink.any(|e| matches!(
        e,
        ServerEvent::ClientDisconnected {
            reason: DisconnectReason::OutboundOverflow { queued, limit },
            ..
        } if *limit == CAP && *queued > CAP
    )));
}

// ============================================================================
// External handlers
// ============================================================================

#[test]
fn test_external_handler_registration() {
    let (mut server, sink) = started(test_config(), echo_registry());
    let mut client = connect(&mut server);

    server
        .register_external_handler(
            FnHandler::new("ping", |_: &Params, _: &ClientInfo| {
                Response::success_with(json!({"pong": true}))
            })
            .boxed(),
        )
        .expect("ping is new");
    let reply = exchange(&mut server, &mut client, br#"{"type":"ping"}"#);
    assert_eq!(reply["result"]["pong"], true);

    let clash = server.register_external_handler(
        FnHandler::new("echo", |_: &Params, _: &ClientInfo| Response::error("shadowed")).boxed(),
    );
    assert_eq!(clash, Err(RegistryError::AlreadyRegistered("echo".into())));
    let reply = exchange(&mut server, &mut client, br#"{"type":"echo"}"#);
    assert_eq!(reply["status"], "success");

    server.unregister_external_handler("ping").expect("ping registered");
    assert_eq!(
        server.unregister_external_handler("ping"),
        Err(RegistryError::NotRegistered("ping".into()))
    );
    let reply = exchange(&mut server, &mut client, br#"{"type":"ping"}"#);
    assert_eq!(reply["message"], "Unknown command: ping");

    assert!(sink.any(|e| matches!(
        e,
        ServerEvent::HandlerRegistered { name, external: true } if name == "ping"
    )));
    assert!(sink.any(|e| matches!(e, ServerEvent::HandlerRejected { name, .. } if name == "echo")));
    assert!(sink.any(|e| matches!(e, ServerEvent::HandlerUnregistered { name } if name == "ping")));
}

#[test]
fn test_command_names_are_sorted() {
    let mut registry = echo_registry();
    registry
        .register(FnHandler::new("alpha", |_: &Params, _: &ClientInfo| Response::success()).boxed())
        .expect("register");
    let server = Server::new(test_config(), registry);

    assert_eq!(server.command_names(), vec!["alpha".to_string(), "echo".to_string()]);
    assert!(server.has_handler("alpha"));
    assert!(!server.has_handler("beta"));
}
