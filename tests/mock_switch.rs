//! Drives the public API against an in-process fake switch on loopback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use freeswitch_esl_mux::{
    call::Execute, command, encode_frame, CancellationToken, ConnectOptions, Connection,
    ConnectionState, DisconnectHook, DisconnectReason, EslError, EslEventType, EventFormat, Frame,
    Headers, InboundServer, ListenerScope, Topology,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const PASSWORD: &str = "ClueCon";
const WAIT: Duration = Duration::from_secs(5);

/// One command as the switch sees it.
#[derive(Debug)]
struct Received {
    line: String,
    headers: Headers,
    body: String,
}

/// The switch side of one socket.
struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    async fn recv(&mut self) -> Received {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .await
            .unwrap();
        let mut headers = Headers::new();
        loop {
            let mut header = String::new();
            self.reader
                .read_line(&mut header)
                .await
                .unwrap();
            let header = header.trim_end_matches(['\r', '\n']);
            if header.is_empty() {
                break;
            }
            let (name, value) = header
                .split_once(':')
                .unwrap();
            headers.add(name, value.trim_start());
        }
        let mut body = String::new();
        if let Some(len) = headers.get("Content-Length") {
            let mut buf = vec![0u8; len.parse().unwrap()];
            self.reader
                .read_exact(&mut buf)
                .await
                .unwrap();
            body = String::from_utf8(buf).unwrap();
        }
        Received {
            line: line
                .trim_end()
                .to_string(),
            headers,
            body,
        }
    }

    async fn send(&mut self, frame: Frame) {
        let wire = encode_frame(&frame).unwrap();
        self.writer
            .write_all(wire.as_bytes())
            .await
            .unwrap();
    }

    async fn reply(&mut self, text: &str) {
        let headers: Headers = [("Content-Type", "command/reply"), ("Reply-Text", text)]
            .into_iter()
            .collect();
        self.send(Frame::new(headers))
            .await;
    }

    async fn api_response(&mut self, body: &str) {
        let headers: Headers = [("Content-Type", "api/response")]
            .into_iter()
            .collect();
        self.send(Frame::with_body(headers, body))
            .await;
    }

    async fn event(&mut self, fields: &[(&str, &str)]) {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!("{}: {}\n", name, value));
        }
        body.push('\n');
        let headers: Headers = [("Content-Type", "text/event-plain")]
            .into_iter()
            .collect();
        self.send(Frame::with_body(headers, body))
            .await;
    }

    async fn disconnect_notice(&mut self, disposition: &str) {
        let headers: Headers = [
            ("Content-Type", "text/disconnect-notice"),
            ("Content-Disposition", disposition),
        ]
        .into_iter()
        .collect();
        self.send(Frame::with_body(headers, "Disconnected, goodbye.\n"))
            .await;
    }
}

/// Bind a fake event socket; the returned task performs the auth handshake.
async fn fake_switch() -> (String, tokio::task::JoinHandle<Peer>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener
        .local_addr()
        .unwrap()
        .to_string();
    let task = tokio::spawn(async move {
        let (stream, _) = listener
            .accept()
            .await
            .unwrap();
        let mut peer = Peer::new(stream);
        let headers: Headers = [("Content-Type", "auth/request")]
            .into_iter()
            .collect();
        peer.send(Frame::new(headers))
            .await;
        let auth = peer
            .recv()
            .await;
        if auth.line == format!("auth {}", PASSWORD) {
            peer.reply("+OK accepted")
                .await;
        } else {
            peer.reply("-ERR invalid")
                .await;
        }
        peer
    });
    (addr, task)
}

async fn dialed() -> (Connection, Peer) {
    let (addr, switch) = fake_switch().await;
    let conn = Connection::dial(&addr, PASSWORD, None)
        .await
        .unwrap();
    (conn, switch.await.unwrap())
}

#[tokio::test]
async fn dial_authenticates() {
    let (conn, _peer) = dialed().await;
    assert_eq!(conn.state(), ConnectionState::Ready);
    assert_eq!(conn.topology(), Topology::Outbound);
    assert!(conn
        .peer_addr()
        .is_some());
}

#[tokio::test]
async fn dial_with_wrong_password() {
    let (addr, switch) = fake_switch().await;
    let err = Connection::dial(&addr, "wrong", None)
        .await
        .unwrap_err();
    match err {
        EslError::AuthFailed { reason } => assert_eq!(reason, "-ERR invalid"),
        other => panic!("unexpected {:?}", other),
    }
    switch
        .await
        .unwrap();
}

#[tokio::test]
async fn auth_request_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener
        .local_addr()
        .unwrap()
        .to_string();
    let silent = tokio::spawn(async move { listener.accept().await });

    let options = ConnectOptions {
        auth_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let err = Connection::dial_with_options(&addr, PASSWORD, None, options)
        .await
        .unwrap_err();
    assert!(matches!(err, EslError::Timeout { timeout_ms: 100 }));
    drop(silent);
}

#[tokio::test]
async fn concurrent_commands_get_their_own_replies() {
    let (conn, mut peer) = dialed().await;

    let mut calls = Vec::new();
    for i in 0..10 {
        let conn = conn.clone();
        calls.push(tokio::spawn(async move {
            let reply = conn
                .api(&format!("echo {}", i))
                .await
                .unwrap();
            assert_eq!(reply.body(), Some(i.to_string().as_str()));
        }));
    }

    // answer in arrival order; each caller must see the echo of its own command
    for _ in 0..10 {
        let received = peer
            .recv()
            .await;
        let arg = received
            .line
            .strip_prefix("api echo ")
            .unwrap()
            .to_string();
        peer.api_response(&arg)
            .await;
    }
    for call in calls {
        timeout(WAIT, call)
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn cancelled_command_leaves_next_reply_alone() {
    let (conn, mut peer) = dialed().await;
    let token = CancellationToken::new();

    let slow = {
        let (conn, token) = (conn.clone(), token.clone());
        tokio::spawn(async move {
            let api = command::Api {
                command: "sleep 1000".into(),
            };
            conn.send_command_cancellable(&api, &token)
                .await
        })
    };
    assert_eq!(peer.recv().await.line, "api sleep 1000");
    token.cancel();
    assert!(matches!(slow.await.unwrap(), Err(EslError::Cancelled)));

    let next = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.api("version").await })
    };
    assert_eq!(peer.recv().await.line, "api version");
    peer.api_response("+OK slept")
        .await;
    peer.api_response("FreeSWITCH Version 1.10")
        .await;

    let reply = timeout(WAIT, next)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply.body(), Some("FreeSWITCH Version 1.10"));
    assert!(conn.is_ready());
}

#[tokio::test]
async fn dropped_future_is_tombstoned() {
    let (conn, mut peer) = dialed().await;
    let api = command::Api {
        command: "status".into(),
    };
    let abandoned = timeout(Duration::from_millis(50), conn.send_command(&api)).await;
    assert!(abandoned.is_err());
    peer.recv()
        .await;

    let next = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.api("uptime").await })
    };
    peer.recv()
        .await;
    peer.api_response("UP 1 hour")
        .await;
    peer.api_response("3600")
        .await;
    let reply = next
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.body(), Some("3600"));
}

#[tokio::test]
async fn close_resolves_every_pending_call() {
    let (conn, mut peer) = dialed().await;
    let mut calls = Vec::new();
    for i in 0..4 {
        let conn = conn.clone();
        calls.push(tokio::spawn(async move {
            conn.api(&format!("echo {}", i))
                .await
        }));
        peer.recv()
            .await;
    }

    conn.close();
    for call in calls {
        assert!(matches!(
            call.await
                .unwrap(),
            Err(EslError::ConnectionClosed)
        ));
    }
    assert_eq!(conn.closed().await, DisconnectReason::ClientRequested);
}

#[tokio::test]
async fn rejected_command_only_fails_its_caller() {
    let (conn, mut peer) = dialed().await;
    let bad = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.api("bogus").await })
    };
    peer.recv()
        .await;
    peer.api_response("-ERR bogus Command not found!\n")
        .await;
    match bad
        .await
        .unwrap()
    {
        Err(EslError::CommandRejected { reply_text }) => {
            assert_eq!(reply_text, "bogus Command not found!")
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(conn.is_ready());
}

#[tokio::test]
async fn scoped_and_global_listeners() {
    let (conn, mut peer) = dialed().await;

    let enable = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.enable_events(EventFormat::Plain).await })
    };
    assert_eq!(peer.recv().await.line, "event plain all");
    peer.reply("+OK event listener enabled plain")
        .await;
    enable
        .await
        .unwrap()
        .unwrap();

    let (all_tx, mut all_rx) = mpsc::unbounded_channel();
    let (x_tx, mut x_rx) = mpsc::unbounded_channel();
    conn.register_event_listener(ListenerScope::All, move |event| {
        let _ = all_tx.send(
            event
                .unique_id()
                .map(str::to_string),
        );
    });
    let x_id = conn.register_event_listener(ListenerScope::uuid("X"), move |event| {
        let _ = x_tx.send(
            event
                .unique_id()
                .map(str::to_string),
        );
    });

    peer.event(&[("Event-Name", "CHANNEL_ANSWER"), ("Unique-ID", "X")])
        .await;
    peer.event(&[("Event-Name", "CHANNEL_ANSWER"), ("Unique-ID", "Y")])
        .await;

    assert_eq!(all_rx.recv().await.unwrap().as_deref(), Some("X"));
    assert_eq!(all_rx.recv().await.unwrap().as_deref(), Some("Y"));
    assert_eq!(x_rx.recv().await.unwrap().as_deref(), Some("X"));

    assert!(conn.remove_event_listener(&ListenerScope::uuid("X"), x_id));
    peer.event(&[("Event-Name", "CHANNEL_HANGUP"), ("Unique-ID", "X")])
        .await;
    assert_eq!(all_rx.recv().await.unwrap().as_deref(), Some("X"));
    assert!(x_rx
        .recv()
        .await
        .is_none());
    assert_eq!(conn.dropped_event_count(), 0);
}

#[tokio::test]
async fn bgapi_job_event_reaches_job_listener() {
    let (conn, mut peer) = dialed().await;
    let call = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.bgapi("status").await })
    };
    let received = peer
        .recv()
        .await;
    assert_eq!(received.line, "bgapi status");
    let job = received
        .headers
        .get("Job-UUID")
        .unwrap()
        .to_string();
    let reply_text = format!("+OK Job-UUID: {}", job);
    let headers: Headers = [
        ("Content-Type", "command/reply"),
        ("Reply-Text", reply_text.as_str()),
        ("Job-UUID", job.as_str()),
    ]
    .into_iter()
    .collect();
    peer.send(Frame::new(headers))
        .await;

    let reply = call
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.job_uuid(), Some(job.as_str()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.register_event_listener(ListenerScope::uuid(job.clone()), move |event| {
        let _ = tx.send(event.is_event_type(EslEventType::BackgroundJob));
    });
    peer.event(&[("Event-Name", "BACKGROUND_JOB"), ("Job-UUID", job.as_str())])
        .await;
    assert!(rx
        .recv()
        .await
        .unwrap());
}

#[tokio::test]
async fn long_execute_argument_travels_in_body() {
    let (conn, mut peer) = dialed().await;
    let args = "x".repeat(3000);
    let execute = Execute {
        uuid: "abc".into(),
        app_name: "log".into(),
        app_args: args.clone(),
        sync: true,
        ..Default::default()
    };
    let call = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.send_command(&execute).await })
    };

    let received = peer
        .recv()
        .await;
    assert_eq!(received.line, "sendmsg abc");
    assert_eq!(received.headers.get("event-lock"), Some("true"));
    assert_eq!(received.headers.get("Content-Type"), Some("text/plain"));
    assert!(!received
        .headers
        .contains("execute-app-arg"));
    assert_eq!(received.body, args);

    peer.reply("+OK")
        .await;
    assert!(call
        .await
        .unwrap()
        .unwrap()
        .is_ok());
}

#[tokio::test]
async fn wait_for_dtmf_returns_first_digit() {
    let (conn, mut peer) = dialed().await;
    let waiter = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.wait_for_dtmf("call-1").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    peer.event(&[("Event-Name", "DTMF"), ("Unique-ID", "call-2"), ("DTMF-Digit", "9")])
        .await;
    peer.event(&[("Event-Name", "DTMF"), ("Unique-ID", "call-1"), ("DTMF-Digit", "5")])
        .await;
    peer.event(&[("Event-Name", "DTMF"), ("Unique-ID", "call-1"), ("DTMF-Digit", "6")])
        .await;

    let digit = timeout(WAIT, waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(digit, '5');
}

#[tokio::test]
async fn wait_for_dtmf_cancel_and_close() {
    let (conn, _peer) = dialed().await;
    let token = CancellationToken::new();
    token.cancel();
    assert!(matches!(
        conn.wait_for_dtmf_cancellable("call-1", &token)
            .await,
        Err(EslError::Cancelled)
    ));

    let waiter = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.wait_for_dtmf("call-1").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    conn.close();
    assert!(matches!(
        waiter
            .await
            .unwrap(),
        Err(EslError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn disconnect_notice_runs_hook() {
    let (addr, switch) = fake_switch().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let hook: DisconnectHook = Box::new(move |reason| {
        let _ = tx.send(reason);
    });
    let conn = Connection::dial(&addr, PASSWORD, Some(hook))
        .await
        .unwrap();
    let mut peer = switch
        .await
        .unwrap();

    peer.disconnect_notice("linger")
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(conn.is_ready());

    peer.disconnect_notice("disconnect")
        .await;
    assert_eq!(conn.closed().await, DisconnectReason::ServerNotice);
    assert_eq!(rx.recv().await, Some(DisconnectReason::ServerNotice));
    assert!(matches!(
        conn.api("status")
            .await,
        Err(EslError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn exit_and_close_is_client_requested() {
    let (conn, mut peer) = dialed().await;
    let switch = tokio::spawn(async move {
        let received = peer
            .recv()
            .await;
        assert_eq!(received.line, "exit");
        peer.reply("+OK bye")
            .await;
        peer.disconnect_notice("disconnect")
            .await;
        peer
    });
    conn.exit_and_close()
        .await;
    assert_eq!(conn.closed().await, DisconnectReason::ClientRequested);
    switch
        .await
        .unwrap();
}

#[tokio::test]
async fn inbound_server_runs_handler_per_call() {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let done_tx = Arc::new(done_tx);
    let server = InboundServer::listen("127.0.0.1:0", move |conn, channel| {
        let done_tx = Arc::clone(&done_tx);
        async move {
            assert_eq!(conn.topology(), Topology::Inbound);
            let uuid = channel
                .channel_uuid()
                .unwrap()
                .to_string();
            let caller = channel
                .channel_data()
                .get("Caller-Caller-ID-Name")
                .map(str::to_string);
            conn.enable_events(EventFormat::Plain)
                .await
                .unwrap();
            conn.answer(&uuid)
                .await
                .unwrap();
            let _ = done_tx.send((uuid, caller));
        }
    })
    .await
    .unwrap();

    let stream = TcpStream::connect(server.local_addr())
        .await
        .unwrap();
    let mut peer = Peer::new(stream);

    assert_eq!(peer.recv().await.line, "connect");
    let headers: Headers = [
        ("Content-Type", "command/reply"),
        ("Reply-Text", "+OK"),
        ("Unique-ID", "call-uuid-1"),
        ("Caller-Caller-ID-Name", "Front%20Desk"),
    ]
    .into_iter()
    .collect();
    peer.send(Frame::new(headers))
        .await;

    assert_eq!(peer.recv().await.line, "myevents plain");
    peer.reply("+OK Events Enabled")
        .await;

    let answer = peer
        .recv()
        .await;
    assert_eq!(answer.line, "sendmsg call-uuid-1");
    assert_eq!(answer.headers.get("execute-app-name"), Some("answer"));
    peer.reply("+OK")
        .await;

    let (uuid, caller) = timeout(WAIT, done_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(uuid, "call-uuid-1");
    assert_eq!(caller.as_deref(), Some("Front Desk"));

    assert_eq!(peer.recv().await.line, "exit");
    peer.reply("+OK bye")
        .await;

    server
        .shutdown()
        .await;
}

#[tokio::test]
async fn inbound_connect_rejected_closes_socket() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let server = InboundServer::listen("127.0.0.1:0", move |_conn, _channel| {
        flag.store(true, Ordering::SeqCst);
        async {}
    })
    .await
    .unwrap();

    let stream = TcpStream::connect(server.local_addr())
        .await
        .unwrap();
    let mut peer = Peer::new(stream);
    assert_eq!(peer.recv().await.line, "connect");
    peer.reply("-ERR no session")
        .await;

    let mut rest = Vec::new();
    let read = timeout(WAIT, peer.reader.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read, 0);
    assert!(!ran.load(Ordering::SeqCst));
}
