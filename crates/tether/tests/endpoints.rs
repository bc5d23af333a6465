//! End-to-end tests for the client and server endpoints over real sockets.

mod common;

use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

use common::{Chat, join, join_tcp, join_tcp_with, pump_until, registry, settle, tcp_server};
use tether::prelude::*;

#[tokio::test]
async fn test_tcp_identity_and_custom_packet() {
    let mut server = tcp_server();
    let addr = server.local_addr().expect("should be listening");

    let mut client = NetworkClient::new(TcpLink::new(), registry());
    client.connect_addr(addr).expect("should start connecting");

    // --- Handshake: both sides agree on the identity ---
    let events = pump_until(&mut server, &mut [&mut client], |events| {
        events.clients[0]
            .iter()
            .any(|e| matches!(e, ClientEvent::Connected(_)))
    })
    .await;

    let assigned = events
        .server
        .iter()
        .find_map(|e| match e {
            ServerEvent::PeerConnected { peer, .. } => Some(*peer),
            _ => None,
        })
        .expect("server should report the peer");
    assert!(events.clients[0]
        .iter()
        .any(|e| matches!(e, ClientEvent::Linked)));
    assert_eq!(client.peer_id(), Some(assigned));
    assert!(server.has_peer(assigned));

    // --- Custom packet reaches the server's handler with the right source ---
    client.send(&Chat::new("ping-test")).expect("should send");
    let events = pump_until(&mut server, &mut [&mut client], |events| {
        !events.server_texts().is_empty()
    })
    .await;

    match &events.server[..] {
        [ServerEvent::Custom { source, value }] => {
            assert_eq!(*source, assigned);
            assert_eq!(value.downcast_ref::<String>().unwrap(), "ping-test");
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[tokio::test]
async fn test_tcp_custom_packet_forwarded_to_other_clients() {
    let mut server = tcp_server();
    let (mut alice, _) = join_tcp(&mut server).await;
    let (mut bob, _) = join_tcp(&mut server).await;

    alice.send(&Chat::new("hello")).unwrap();
    let events = pump_until(&mut server, &mut [&mut alice, &mut bob], |events| {
        !events.client_texts(1).is_empty()
    })
    .await;

    assert_eq!(events.client_texts(1), vec!["hello".to_string()]);
    assert!(events.client_texts(0).is_empty());
}

#[tokio::test]
async fn test_tcp_latency_measured_on_both_sides() {
    let mut server = tcp_server();
    let config = ClientConfig {
        ping_interval: Duration::from_millis(50),
        ..ClientConfig::default()
    };
    let (mut client, id) = join_tcp_with(&mut server, config).await;
    assert!(client.latency().is_none());

    common::wait_for(&mut server, &mut [&mut client], |server, clients| {
        clients[0].latency().is_some()
            && server.peer(id).and_then(PeerHandle::latency).is_some()
    })
    .await;
}

#[tokio::test]
async fn test_server_evicts_silent_peer() {
    let mut server = NetworkServer::builder()
        .timeout(Duration::from_millis(200))
        .build(TcpLink::new(), registry());
    server.start("127.0.0.1:0").unwrap();
    let (_client, id) = join_tcp(&mut server).await;

    // The client is never polled again, so it never pings.
    let events = pump_until(&mut server, &mut [], |events| {
        events
            .server
            .iter()
            .any(|e| matches!(e, ServerEvent::PeerDisconnected { .. }))
    })
    .await;

    assert!(events.server.iter().any(|e| matches!(
        e,
        ServerEvent::PeerDisconnected { peer, reason: DisconnectReason::TimedOut } if *peer == id
    )));
    assert!(!server.has_peer(id));
    assert!(matches!(
        server.send_to_one(&Chat::new("late"), id),
        Err(TetherError::UnknownPeer(peer)) if peer == id
    ));
}

#[tokio::test]
async fn test_server_drops_peer_sending_malformed_frames() {
    let mut server = tcp_server();
    let addr = server.local_addr().unwrap();
    let mut raw = TcpStream::connect(addr).unwrap();

    let events = pump_until(&mut server, &mut [], |events| {
        events
            .server
            .iter()
            .any(|e| matches!(e, ServerEvent::PeerConnected { .. }))
    })
    .await;
    let id = events
        .server
        .iter()
        .find_map(|e| match e {
            ServerEvent::PeerConnected { peer, .. } => Some(*peer),
            _ => None,
        })
        .unwrap();

    // A length prefix too short to hold a packet code.
    raw.write_all(&1u32.to_le_bytes()).unwrap();
    raw.write_all(b"rest of the stream").unwrap();

    let events = pump_until(&mut server, &mut [], |events| {
        events
            .server
            .iter()
            .any(|e| matches!(e, ServerEvent::PeerDisconnected { .. }))
    })
    .await;
    assert!(events.server.iter().any(|e| matches!(
        e,
        ServerEvent::PeerDisconnected { peer, reason: DisconnectReason::TransportClosed } if *peer == id
    )));
    assert!(!server.has_peer(id));
}

#[tokio::test]
async fn test_send_to_unknown_peer_fails() {
    let mut server = tcp_server();
    let stranger = PeerId::random();
    assert!(matches!(
        server.send_to_one(&Chat::new("hi"), stranger),
        Err(TetherError::UnknownPeer(_))
    ));
}

#[tokio::test]
async fn test_client_disconnect_reported_as_requested() {
    let mut server = tcp_server();
    let (mut client, id) = join_tcp(&mut server).await;

    client.disconnect().unwrap();
    assert_eq!(client.peer_id(), None);
    assert!(client.poll().is_err());

    let events = pump_until(&mut server, &mut [], |events| !events.server.is_empty()).await;
    assert!(matches!(
        &events.server[..],
        [ServerEvent::PeerDisconnected { peer, reason: DisconnectReason::Requested }] if *peer == id
    ));
    assert_eq!(server.peer_count(), 0);
}

#[tokio::test]
async fn test_kick_disconnects_client_once() {
    let mut server = tcp_server();
    let (mut client, id) = join_tcp(&mut server).await;

    server.kick(id).unwrap();
    let events = pump_until(&mut server, &mut [&mut client], |events| {
        events.clients[0]
            .iter()
            .any(|e| matches!(e, ClientEvent::Disconnected))
    })
    .await;

    assert!(events.server.iter().any(|e| matches!(
        e,
        ServerEvent::PeerDisconnected { reason: DisconnectReason::Kicked, .. }
    )));
    assert!(!server.has_peer(id));

    // Further polls don't report it again.
    let later = settle(&mut server, &mut [&mut client], 10).await;
    let disconnects = events.clients[0]
        .iter()
        .chain(&later.clients[0])
        .filter(|e| matches!(e, ClientEvent::Disconnected))
        .count();
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn test_stop_drops_all_peers() {
    let mut server = tcp_server();
    let (mut client, _) = join_tcp(&mut server).await;
    assert_eq!(server.peer_count(), 1);

    server.stop();
    assert_eq!(server.peer_count(), 0);
    assert!(server.poll().is_err());

    let mut disconnected = false;
    for _ in 0..common::MAX_ROUNDS {
        if client
            .poll()
            .unwrap()
            .iter()
            .any(|e| matches!(e, ClientEvent::Disconnected))
        {
            disconnected = true;
            break;
        }
        tokio::time::sleep(common::STEP).await;
    }
    assert!(disconnected);
}

#[tokio::test]
async fn test_udp_identity_and_custom_packet() {
    let mut server = NetworkServer::new(UdpLink::new(), registry());
    let addr = server.start("127.0.0.1:0").expect("should bind");

    let mut client = NetworkClient::new(UdpLink::new(), registry());
    client.connect_addr(addr).unwrap();
    let id = join(&mut server, &mut client).await;
    assert!(server.has_peer(id));

    client.send(&Chat::new("over udp")).unwrap();
    let events = pump_until(&mut server, &mut [&mut client], |events| {
        !events.server_texts().is_empty()
    })
    .await;
    assert_eq!(events.server_texts(), vec!["over udp".to_string()]);
}

#[tokio::test]
async fn test_connect_rejects_bad_endpoint() {
    let mut client = NetworkClient::new(TcpLink::new(), registry());
    assert!(client.connect("not an endpoint").is_err());
    assert!(client.poll().is_err());
}
