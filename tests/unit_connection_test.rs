use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchboard::config::HubConfig;
use switchboard::connection::memory::{self, MemoryTransport};
use switchboard::connection::{Connection, Frame, Ready};
use switchboard::core::hub::LogSink;
use switchboard::{Command, Hub};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

fn capture_sink() -> (LogSink, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = lines.clone();
    let sink: LogSink = Arc::new(move |line| captured.lock().unwrap().push(line));
    (sink, lines)
}

fn quiet_config() -> HubConfig {
    HubConfig {
        ping_period: Duration::from_secs(60),
        write_timeout: Duration::from_secs(1),
        ..HubConfig::default()
    }
}

async fn wait_for_log(lines: &Arc<Mutex<Vec<String>>>, needle: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if lines.lock().unwrap().iter().any(|l| l.contains(needle)) {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("log line containing '{needle}' never appeared");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn send_command(client: &mut MemoryTransport, cmd: &Command) {
    client.send(Frame::Message(cmd.encode())).await.unwrap();
}

async fn recv_command(client: &mut MemoryTransport) -> Option<Command> {
    loop {
        match timeout(Duration::from_secs(1), client.recv()).await.ok()?? {
            Frame::Message(raw) => return Some(Command::decode(&raw).unwrap()),
            Frame::Ping => continue,
            Frame::Close => return None,
        }
    }
}

async fn assert_silent(client: &mut MemoryTransport) {
    assert!(
        timeout(Duration::from_millis(100), client.recv())
            .await
            .is_err(),
        "expected no delivery"
    );
}

/// Registers an echo handler mirroring the canonical scenario: the body
/// comes straight back, to the sender only.
fn register_echo(hub: &Hub) {
    hub.register_handler("echo", |conn, body| async move {
        let id = conn.id();
        conn.send(id, &Command::new("echo", body)).await;
    });
}

/// Registers a handler that hands the live `Connection` out to the test.
fn register_grab(hub: &Hub, tx: mpsc::Sender<Arc<Connection>>) {
    hub.register_handler("grab", move |conn, _body| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(conn).await;
        }
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_echo_reaches_only_the_sender() {
    let (sink, _lines) = capture_sink();
    let hub = Arc::new(Hub::new(quiet_config(), sink));
    register_echo(&hub);

    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn({
        let hub = hub.clone();
        let rx = shutdown_tx.subscribe();
        async move { hub.run(rx).await }
    });

    let (a_server, mut a_client) = memory::pair(16);
    hub.accept(Ready(a_server)).await.unwrap();
    let (b_server, mut b_client) = memory::pair(16);
    hub.accept(Ready(b_server)).await.unwrap();
    let (c_server, mut c_client) = memory::pair(16);
    hub.accept(Ready(c_server)).await.unwrap();

    send_command(&mut a_client, &Command::new("echo", &b"hi"[..])).await;

    let reply = recv_command(&mut a_client).await.expect("no echo reply");
    assert_eq!(reply, Command::new("echo", &b"hi"[..]));

    assert_silent(&mut b_client).await;
    assert_silent(&mut c_client).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_self_send_bypasses_an_idle_hub() {
    let (sink, _lines) = capture_sink();
    // The hub loop is never started: a self-send must still deliver.
    let hub = Arc::new(Hub::new(quiet_config(), sink));
    let (grab_tx, mut grab_rx) = mpsc::channel(1);
    register_grab(&hub, grab_tx);

    let (server, mut client) = memory::pair(16);
    hub.accept(Ready(server)).await.unwrap();

    send_command(&mut client, &Command::new("grab", &b""[..])).await;
    let conn = timeout(Duration::from_secs(1), grab_rx.recv())
        .await
        .expect("handler never ran")
        .unwrap();

    assert!(!hub.is_running());
    let cmd = Command::new("note", &b"to self"[..]);
    conn.send(conn.id(), &cmd).await;

    assert_eq!(recv_command(&mut client).await.unwrap(), cmd);
    assert!(!hub.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_handlers_run_once_on_teardown() {
    let (sink, lines) = capture_sink();
    let hub = Arc::new(Hub::new(quiet_config(), sink));
    let (grab_tx, mut grab_rx) = mpsc::channel(1);
    register_grab(&hub, grab_tx);

    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn({
        let hub = hub.clone();
        let rx = shutdown_tx.subscribe();
        async move { hub.run(rx).await }
    });

    let (server, mut client) = memory::pair(16);
    hub.accept(Ready(server)).await.unwrap();
    send_command(&mut client, &Command::new("grab", &b""[..])).await;
    let conn = grab_rx.recv().await.unwrap();

    let (fired_tx, mut fired_rx) = mpsc::channel::<(String, Bytes)>(4);
    let keep_tx = fired_tx.clone();
    conn.register_close_handler("keep", move |_conn, body| {
        let tx = keep_tx.clone();
        async move {
            let _ = tx.send(("keep".to_string(), body)).await;
        }
    });
    let drop_tx = fired_tx.clone();
    conn.register_close_handler("drop", move |_conn, body| {
        let tx = drop_tx.clone();
        async move {
            let _ = tx.send(("drop".to_string(), body)).await;
        }
    });
    conn.unregister_close_handler("drop");

    client.close();
    wait_for_log(&lines, "leave read").await;

    let (name, body) = timeout(Duration::from_secs(1), fired_rx.recv())
        .await
        .expect("close handler never ran")
        .unwrap();
    assert_eq!(name, "keep");
    assert!(body.is_empty());

    // The unregistered handler stays silent.
    assert!(
        timeout(Duration::from_millis(100), fired_rx.recv())
            .await
            .is_err()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_malformed_frame_is_skipped_and_connection_survives() {
    let (sink, lines) = capture_sink();
    let hub = Arc::new(Hub::new(quiet_config(), sink));
    register_echo(&hub);

    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn({
        let hub = hub.clone();
        let rx = shutdown_tx.subscribe();
        async move { hub.run(rx).await }
    });

    let (server, mut client) = memory::pair(16);
    hub.accept(Ready(server)).await.unwrap();

    client
        .send(Frame::Message(Bytes::from_static(b"{not json")))
        .await
        .unwrap();
    wait_for_log(&lines, "failed to decode frame").await;

    send_command(&mut client, &Command::new("echo", &b"alive"[..])).await;
    let reply = recv_command(&mut client).await.expect("connection died");
    assert_eq!(reply.body, Bytes::from_static(b"alive"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_command_is_skipped_and_connection_survives() {
    let (sink, lines) = capture_sink();
    let hub = Arc::new(Hub::new(quiet_config(), sink));
    register_echo(&hub);

    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn({
        let hub = hub.clone();
        let rx = shutdown_tx.subscribe();
        async move { hub.run(rx).await }
    });

    let (server, mut client) = memory::pair(16);
    hub.accept(Ready(server)).await.unwrap();

    send_command(&mut client, &Command::new("no-such-command", &b""[..])).await;
    wait_for_log(&lines, "unknown command 'no-such-command'").await;

    send_command(&mut client, &Command::new("echo", &b"still here"[..])).await;
    let reply = recv_command(&mut client).await.expect("connection died");
    assert_eq!(reply.body, Bytes::from_static(b"still here"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_oversized_frame_is_skipped() {
    let (sink, lines) = capture_sink();
    let config = HubConfig {
        max_frame_bytes: 64,
        ..quiet_config()
    };
    let hub = Arc::new(Hub::new(config, sink));
    register_echo(&hub);

    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn({
        let hub = hub.clone();
        let rx = shutdown_tx.subscribe();
        async move { hub.run(rx).await }
    });

    let (server, mut client) = memory::pair(16);
    hub.accept(Ready(server)).await.unwrap();

    send_command(&mut client, &Command::new("echo", vec![b'x'; 100])).await;
    wait_for_log(&lines, "dropping frame").await;
    assert_silent(&mut client).await;

    send_command(&mut client, &Command::new("echo", &b"ok"[..])).await;
    let reply = recv_command(&mut client).await.expect("connection died");
    assert_eq!(reply.body, Bytes::from_static(b"ok"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disconnect_unregisters_and_broadcast_skips_the_gone_peer() {
    let (sink, lines) = capture_sink();
    let hub = Arc::new(Hub::new(quiet_config(), sink));
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn({
        let hub = hub.clone();
        let rx = shutdown_tx.subscribe();
        async move { hub.run(rx).await }
    });

    let (a_server, a_client) = memory::pair(16);
    let a_id = hub.accept(Ready(a_server)).await.unwrap();
    let (b_server, mut b_client) = memory::pair(16);
    hub.accept(Ready(b_server)).await.unwrap();

    a_client.close();
    wait_for_log(&lines, &format!("connection {a_id} unregistered")).await;

    let cmd = Command::new("ping-all", &b""[..]);
    hub.broadcast(&cmd).await;
    assert_eq!(recv_command(&mut b_client).await.unwrap(), cmd);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_send_to_another_connection_routes_through_the_hub() {
    let (sink, _lines) = capture_sink();
    let hub = Arc::new(Hub::new(quiet_config(), sink));
    let (grab_tx, mut grab_rx) = mpsc::channel(2);
    register_grab(&hub, grab_tx);

    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn({
        let hub = hub.clone();
        let rx = shutdown_tx.subscribe();
        async move { hub.run(rx).await }
    });

    let (a_server, mut a_client) = memory::pair(16);
    hub.accept(Ready(a_server)).await.unwrap();
    let (b_server, mut b_client) = memory::pair(16);
    let b_id = hub.accept(Ready(b_server)).await.unwrap();

    send_command(&mut a_client, &Command::new("grab", &b""[..])).await;
    let conn_a = grab_rx.recv().await.unwrap();

    let cmd = Command::new("dm", &b"psst"[..]);
    conn_a.send(b_id, &cmd).await;

    assert_eq!(recv_command(&mut b_client).await.unwrap(), cmd);
    assert_silent(&mut a_client).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connection_broadcast_reaches_everyone() {
    let (sink, _lines) = capture_sink();
    let hub = Arc::new(Hub::new(quiet_config(), sink));
    let (grab_tx, mut grab_rx) = mpsc::channel(2);
    register_grab(&hub, grab_tx);

    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn({
        let hub = hub.clone();
        let rx = shutdown_tx.subscribe();
        async move { hub.run(rx).await }
    });

    let (a_server, mut a_client) = memory::pair(16);
    hub.accept(Ready(a_server)).await.unwrap();
    let (b_server, mut b_client) = memory::pair(16);
    hub.accept(Ready(b_server)).await.unwrap();

    send_command(&mut a_client, &Command::new("grab", &b""[..])).await;
    let conn_a = grab_rx.recv().await.unwrap();

    let cmd = Command::new("announce", &b"all hands"[..]);
    conn_a.broadcast(&cmd).await;

    // A broadcast reaches every registered connection, the sender included.
    assert_eq!(recv_command(&mut a_client).await.unwrap(), cmd);
    assert_eq!(recv_command(&mut b_client).await.unwrap(), cmd);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_handler_does_not_block_the_read_pump() {
    let (sink, _lines) = capture_sink();
    let hub = Arc::new(Hub::new(quiet_config(), sink));
    register_echo(&hub);
    hub.register_handler("stall", |_conn, _body| async {
        std::future::pending::<()>().await;
    });

    let (server, mut client) = memory::pair(16);
    hub.accept(Ready(server)).await.unwrap();

    send_command(&mut client, &Command::new("stall", &b""[..])).await;
    send_command(&mut client, &Command::new("echo", &b"prompt"[..])).await;

    // The echo arrives even though the stalled handler never finishes.
    let reply = recv_command(&mut client).await.expect("read pump blocked");
    assert_eq!(reply.body, Bytes::from_static(b"prompt"));
}
