//! Listener lifecycle and disposal cascade.

mod common;

use std::time::Duration;

use common::*;
use freeswitch_esl_outbound::{
    DisconnectReason, EslError, OutboundListener, OutboundSocket,
};
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn dispose_completes_every_connection() {
    init_tracing();
    let (listener, addr) = started_listener().await;
    let mut connections = listener.connections();

    let mut switches = Vec::new();
    let mut sockets: Vec<OutboundSocket> = Vec::new();
    for _ in 0..3 {
        switches.push(FakeSwitch::dial(addr).await);
        sockets.push(next_socket(&mut connections).await);
    }
    assert_eq!(listener.active_connections(), 3);

    let mut streams: Vec<_> = sockets
        .iter()
        .map(|socket| (socket.messages(), socket.events()))
        .collect();

    listener
        .dispose()
        .await;

    for (messages, events) in streams.iter_mut() {
        assert!(next(messages)
            .await
            .is_none());
        assert!(next(events)
            .await
            .is_none());
        assert!(messages
            .try_recv()
            .is_none());
    }
    for socket in &sockets {
        assert!(!socket.is_open());
        assert_eq!(
            timeout(WAIT, socket.wait_closed())
                .await
                .unwrap(),
            DisconnectReason::ClientRequested
        );
    }
    for switch in switches.iter_mut() {
        switch
            .expect_eof()
            .await;
    }

    assert!(next(&mut connections)
        .await
        .is_none());
    assert_eq!(listener.active_connections(), 0);
}

#[tokio::test]
async fn dispose_is_idempotent_and_concurrent_safe() {
    init_tracing();
    let (listener, addr) = started_listener().await;
    let mut connections = listener.connections();
    let _switch = FakeSwitch::dial(addr).await;
    let socket = next_socket(&mut connections).await;
    let mut messages = socket.messages();

    tokio::join!(listener.dispose(), listener.dispose(), listener.dispose());
    listener
        .dispose()
        .await;

    assert!(next(&mut messages)
        .await
        .is_none());
    assert!(next(&mut connections)
        .await
        .is_none());
}

#[tokio::test]
async fn dispose_stops_accepting() {
    init_tracing();
    let (listener, addr) = started_listener().await;
    listener
        .dispose()
        .await;

    // The listening socket is gone, so the connection is refused.
    let refused = timeout(WAIT, tokio::net::TcpStream::connect(addr))
        .await
        .unwrap();
    assert!(refused.is_err());
    assert!(matches!(
        listener
            .start()
            .await,
        Err(EslError::Disposed)
    ));
}

#[tokio::test]
async fn late_connections_subscriber_sees_completion() {
    init_tracing();
    let (listener, _addr) = started_listener().await;
    listener
        .dispose()
        .await;

    let mut connections = listener.connections();
    assert!(next(&mut connections)
        .await
        .is_none());
}

#[tokio::test]
async fn each_subscriber_sees_each_connection() {
    init_tracing();
    let (listener, addr) = started_listener().await;
    let mut first = listener.connections();
    let mut second = listener.connections();

    let _a = FakeSwitch::dial(addr).await;
    let _b = FakeSwitch::dial(addr).await;

    let first_ids = vec![
        next_socket(&mut first)
            .await
            .id(),
        next_socket(&mut first)
            .await
            .id(),
    ];
    let second_ids = vec![
        next_socket(&mut second)
            .await
            .id(),
        next_socket(&mut second)
            .await
            .id(),
    ];
    assert_eq!(first_ids, second_ids);
    assert_ne!(first_ids[0], first_ids[1]);
}

#[tokio::test]
async fn closed_sockets_leave_the_registry() {
    init_tracing();
    let (listener, addr) = started_listener().await;
    let mut connections = listener.connections();

    let _switch = FakeSwitch::dial(addr).await;
    let socket = next_socket(&mut connections).await;
    assert_eq!(listener.active_connections(), 1);

    socket
        .close()
        .await;
    timeout(WAIT, async {
        while listener.active_connections() > 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn fixed_port_is_reported() {
    init_tracing();
    // Find a free port, release it, then bind to it explicitly.
    let scratch = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let port = scratch
        .local_addr()
        .unwrap()
        .port();
    drop(scratch);

    let mut options = loopback_options();
    options.port = port;
    let listener = OutboundListener::with_options(options);
    let addr = listener
        .start()
        .await
        .unwrap();
    assert_eq!(addr.port(), port);
    assert_eq!(listener.port(), Some(port));
}
