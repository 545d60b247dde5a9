//! Fake switch peer shared by the integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use freeswitch_esl_outbound::{
    ListenerOptions, OutboundListener, OutboundSocket, Subscription,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Plays the FreeSWITCH side of an outbound connection.
pub struct FakeSwitch {
    stream: TcpStream,
}

impl FakeSwitch {
    pub async fn dial(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .unwrap();
        Self { stream }
    }

    /// Read one command, including its blank-line terminator.
    pub async fn read_command(&mut self) -> String {
        let mut received = Vec::new();
        let mut byte = [0u8; 1];
        while !received.ends_with(b"\n\n") {
            timeout(WAIT, self.stream.read_exact(&mut byte))
                .await
                .expect("timed out waiting for a command")
                .unwrap();
            received.push(byte[0]);
        }
        String::from_utf8(received).unwrap()
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream
            .write_all(bytes)
            .await
            .unwrap();
        self.stream
            .flush()
            .await
            .unwrap();
    }

    /// Reply to `connect` with the channel data as the body.
    pub async fn send_connect_reply(&mut self, body: &str) {
        self.send(command_reply_with_body(body).as_bytes())
            .await;
    }

    pub async fn send_event(&mut self, body: &str) {
        self.send(plain_event(body).as_bytes())
            .await;
    }

    /// Wait for the system under test to close its side.
    pub async fn expect_eof(&mut self) {
        let mut buf = [0u8; 256];
        loop {
            let n = timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for EOF")
                .unwrap_or(0);
            if n == 0 {
                return;
            }
        }
    }
}

pub fn plain_event(body: &str) -> String {
    format!(
        "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
        body.len(),
        body
    )
}

pub fn command_reply_with_body(body: &str) -> String {
    format!(
        "Content-Type: command/reply\nReply-Text: +OK\nContent-Length: {}\n\n{}",
        body.len(),
        body
    )
}

pub fn command_reply(reply_text: &str) -> String {
    format!(
        "Content-Type: command/reply\nReply-Text: {}\n\n",
        reply_text
    )
}

pub fn api_response(body: &str) -> String {
    format!(
        "Content-Type: api/response\nContent-Length: {}\n\n{}",
        body.len(),
        body
    )
}

pub fn disconnect_notice(disposition: &str) -> String {
    let body = "Disconnected, goodbye.\nSee you at ClueCon! http://www.cluecon.com/\n";
    format!(
        "Content-Type: text/disconnect-notice\nController-Type: call\nContent-Disposition: {}\nContent-Length: {}\n\n{}",
        disposition,
        body.len(),
        body
    )
}

/// Channel data as a ringing inbound call parked in the socket application.
pub fn channel_data_body() -> String {
    [
        "Event-Name: CHANNEL_DATA",
        "Core-UUID: 2f5a8c6e-0d7b-4f3e-9a61-3c2b1d0e9f87",
        "Unique-ID: 7f4de4bc-17d7-11dd-b7a0-db4edd065621",
        "Channel-Name: sofia/internal/1000%40192.168.1.10",
        "Channel-State: CS_EXECUTE",
        "Channel-State-Number: 4",
        "Channel-Call-State: RINGING",
        "Answer-State: ringing",
        "Call-Direction: inbound",
        "Caller-Caller-ID-Number: 1000",
        "Caller-Destination-Number: 5000",
        "Socket-Mode: async",
        "Control: full",
        "variable_socket_host: 127.0.0.1",
    ]
    .join("\n")
        + "\n"
}

pub fn loopback_options() -> ListenerOptions {
    ListenerOptions {
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        ..Default::default()
    }
}

/// Listener on an ephemeral loopback port, already started.
pub async fn started_listener() -> (OutboundListener, SocketAddr) {
    let listener = OutboundListener::with_options(loopback_options());
    let addr = listener
        .start()
        .await
        .unwrap();
    (listener, addr)
}

pub async fn next_socket(connections: &mut Subscription<OutboundSocket>) -> OutboundSocket {
    timeout(WAIT, connections.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connections completed")
        .unwrap()
}

/// One accepted socket and the fake switch on the other end.
///
/// The listener is returned so it outlives the test body.
pub async fn accepted_pair() -> (OutboundListener, OutboundSocket, FakeSwitch) {
    init_tracing();
    let (listener, addr) = started_listener().await;
    let mut connections = listener.connections();
    let switch = FakeSwitch::dial(addr).await;
    let socket = next_socket(&mut connections).await;
    (listener, socket, switch)
}

/// Next item of a subscription, failing the test if none arrives in time.
pub async fn next<T>(subscription: &mut Subscription<T>) -> Option<Result<T, freeswitch_esl_outbound::FramingError>> {
    timeout(WAIT, subscription.recv())
        .await
        .expect("timed out waiting on subscription")
}
