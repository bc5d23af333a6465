//! Shared object replication between live endpoints.

mod common;

use std::sync::{Arc, Mutex};

use common::{Note, join_tcp, pump_until, settle, tcp_server, wait_for};
use tether::prelude::*;

fn everywhere() -> Direction {
    Direction::CLIENT_TO_SERVER | Direction::SERVER_TO_CLIENT
}

/// Shares a new server note with `client` and waits until it arrives.
async fn share_everywhere(
    server: &mut NetworkServer,
    client: &mut NetworkClient,
    content: &str,
) -> ObjectId {
    let note = server.objects_mut().insert(Note::new(everywhere(), content));
    server.share(note, Target::All).unwrap();
    wait_for(server, &mut [client], |_, clients| {
        clients[0].objects().contains(note)
    })
    .await;
    note
}

#[tokio::test]
async fn test_client_object_registered_on_server() {
    let mut server = tcp_server();
    let created = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&created);
    server.on_object_created::<Note, _>(move |note| {
        seen.lock().unwrap().push(note.content.clone());
    });
    let (mut client, id) = join_tcp(&mut server).await;

    let note = client.objects_mut().insert(Note::new(everywhere(), "draft"));
    client.share(note).unwrap();

    let events = pump_until(&mut server, &mut [&mut client], |events| {
        !events.server_created().is_empty()
    })
    .await;

    assert!(events.server.iter().any(|e| matches!(
        e,
        ServerEvent::ObjectCreated { id: object, type_name: "note", source } if *object == note && *source == id
    )));
    assert_eq!(server.objects().get::<Note>(note).unwrap().content, "draft");
    assert_eq!(*created.lock().unwrap(), vec!["draft".to_string()]);
}

#[tokio::test]
async fn test_server_delta_updates_client_copy() {
    let mut server = tcp_server();
    let (mut client, _) = join_tcp(&mut server).await;

    let note = server.objects_mut().insert(Note::new(everywhere(), "v1"));
    server.share(note, Target::All).unwrap();
    let events = pump_until(&mut server, &mut [&mut client], |events| {
        !events.client_created(0).is_empty()
    })
    .await;
    assert_eq!(events.client_created(0), vec![note]);
    assert_eq!(client.objects().get::<Note>(note).unwrap().content, "v1");

    // --- Only the changed field travels ---
    server
        .objects_mut()
        .get_mut::<Note>(note)
        .unwrap()
        .set_content("v2")
        .unwrap();
    server.send_updates(note, Target::All).unwrap();

    wait_for(&mut server, &mut [&mut client], |_, clients| {
        clients[0].objects().get::<Note>(note).unwrap().content == "v2"
    })
    .await;
}

#[tokio::test]
async fn test_server_only_object_rejected_from_client() {
    let mut server = tcp_server();
    let (mut alice, _) = join_tcp(&mut server).await;
    let (mut bob, _) = join_tcp(&mut server).await;

    let note = alice
        .objects_mut()
        .insert(Note::new(Direction::SERVER_TO_CLIENT, "forged"));
    alice.share(note).unwrap();

    let events = settle(&mut server, &mut [&mut alice, &mut bob], 20).await;
    assert!(events.server_created().is_empty());
    assert!(events.client_created(1).is_empty());
    assert!(!server.objects().contains(note));
    assert!(!bob.objects().contains(note));
}

#[tokio::test]
async fn test_server_only_object_ignores_client_delta() {
    let mut server = tcp_server();
    let (mut client, _) = join_tcp(&mut server).await;

    let note = server
        .objects_mut()
        .insert(Note::new(Direction::SERVER_TO_CLIENT, "official"));
    server.share(note, Target::All).unwrap();
    wait_for(&mut server, &mut [&mut client], |_, clients| {
        clients[0].objects().contains(note)
    })
    .await;

    client
        .objects_mut()
        .get_mut::<Note>(note)
        .unwrap()
        .set_content("tampered")
        .unwrap();
    client.send_updates(note).unwrap();

    settle(&mut server, &mut [&mut client], 20).await;
    assert_eq!(server.objects().get::<Note>(note).unwrap().content, "official");
}

#[tokio::test]
async fn test_client_to_client_relay_skips_sender() {
    let mut server = tcp_server();
    let (mut alice, _) = join_tcp(&mut server).await;
    let (mut bob, _) = join_tcp(&mut server).await;

    let note = alice
        .objects_mut()
        .insert(Note::new(Direction::CLIENT_TO_CLIENT, "for bob"));
    alice.share(note).unwrap();

    let events = pump_until(&mut server, &mut [&mut alice, &mut bob], |events| {
        !events.client_created(1).is_empty()
    })
    .await;
    let events_after = settle(&mut server, &mut [&mut alice, &mut bob], 10).await;

    assert_eq!(bob.objects().get::<Note>(note).unwrap().content, "for bob");
    assert!(events.client_created(0).is_empty());
    assert!(events_after.client_created(0).is_empty());
    // Relayed only: the server never keeps its own copy.
    assert!(events.server_created().is_empty());
    assert!(!server.objects().contains(note));
}

#[tokio::test]
async fn test_client_to_client_relay_with_sender() {
    let mut server = tcp_server();
    let (mut alice, _) = join_tcp(&mut server).await;
    let (mut bob, _) = join_tcp(&mut server).await;

    let direction = Direction::CLIENT_TO_CLIENT | Direction::INCLUDE_SELF;
    let note = alice.objects_mut().insert(Note::new(direction, "echo"));
    alice.share(note).unwrap();

    let events = pump_until(&mut server, &mut [&mut alice, &mut bob], |events| {
        !events.client_created(1).is_empty()
    })
    .await;
    let events_after = settle(&mut server, &mut [&mut alice, &mut bob], 10).await;

    // Alice's echo arrives for an id she already holds, so it's dropped.
    assert_eq!(events.client_created(1), vec![note]);
    assert!(events.client_created(0).is_empty());
    assert!(events_after.client_created(0).is_empty());
    assert_eq!(alice.objects().len(), 1);
}

#[tokio::test]
async fn test_client_cannot_replace_server_object() {
    let mut server = tcp_server();
    let (mut client, _) = join_tcp(&mut server).await;

    let note = server.objects_mut().insert(Note::new(everywhere(), "official"));
    server.share(note, Target::All).unwrap();
    wait_for(&mut server, &mut [&mut client], |_, clients| {
        clients[0].objects().contains(note)
    })
    .await;

    // Re-share the server's object under the same id with new content.
    client
        .objects_mut()
        .get_mut::<Note>(note)
        .unwrap()
        .set_content("hijacked")
        .unwrap();
    client.share(note).unwrap();

    let events = settle(&mut server, &mut [&mut client], 20).await;
    assert!(events.server_created().is_empty());
    assert_eq!(server.objects().get::<Note>(note).unwrap().content, "official");

    // The object stays the server's, so the client leaving doesn't take it.
    client.disconnect().unwrap();
    pump_until(&mut server, &mut [], |events| {
        events
            .server
            .iter()
            .any(|e| matches!(e, ServerEvent::PeerDisconnected { .. }))
    })
    .await;
    assert!(server.objects().contains(note));
}

#[tokio::test]
async fn test_client_delta_relayed_to_other_clients() {
    let mut server = tcp_server();
    let (mut alice, _) = join_tcp(&mut server).await;
    let (mut bob, _) = join_tcp(&mut server).await;

    // The server holds the object so it can route updates for it.
    let direction = Direction::SERVER_TO_CLIENT | Direction::CLIENT_TO_CLIENT;
    let note = server.objects_mut().insert(Note::new(direction, "shared"));
    server.share(note, Target::All).unwrap();
    wait_for(&mut server, &mut [&mut alice, &mut bob], |_, clients| {
        clients.iter().all(|c| c.objects().contains(note))
    })
    .await;

    alice
        .objects_mut()
        .get_mut::<Note>(note)
        .unwrap()
        .set_content("edited by alice")
        .unwrap();
    alice.send_updates(note).unwrap();

    wait_for(&mut server, &mut [&mut alice, &mut bob], |_, clients| {
        clients[1].objects().get::<Note>(note).unwrap().content == "edited by alice"
    })
    .await;
    // No CLIENT_TO_SERVER, so the server's copy stays put.
    assert_eq!(server.objects().get::<Note>(note).unwrap().content, "shared");
}

#[tokio::test]
async fn test_orphaned_objects_dropped_with_their_owner() {
    let mut server = tcp_server();
    let (mut client, _) = join_tcp(&mut server).await;

    let note = client.objects_mut().insert(Note::new(everywhere(), "mine"));
    client.share(note).unwrap();
    wait_for(&mut server, &mut [&mut client], |server, _| {
        server.objects().contains(note)
    })
    .await;

    client.disconnect().unwrap();
    pump_until(&mut server, &mut [], |events| {
        events
            .server
            .iter()
            .any(|e| matches!(e, ServerEvent::PeerDisconnected { .. }))
    })
    .await;
    assert!(!server.objects().contains(note));
}

#[tokio::test]
async fn test_orphaned_objects_kept_when_configured() {
    let mut server = NetworkServer::builder()
        .drop_orphaned_objects(false)
        .build(TcpLink::new(), common::registry());
    server.start("127.0.0.1:0").unwrap();
    let (mut client, _) = join_tcp(&mut server).await;

    let note = client.objects_mut().insert(Note::new(everywhere(), "mine"));
    client.share(note).unwrap();
    wait_for(&mut server, &mut [&mut client], |server, _| {
        server.objects().contains(note)
    })
    .await;

    client.disconnect().unwrap();
    pump_until(&mut server, &mut [], |events| !events.server.is_empty()).await;
    assert!(server.objects().contains(note));
}

#[tokio::test]
async fn test_failed_send_keeps_client_updates() {
    let mut client = NetworkClient::new(TcpLink::new(), common::registry());
    let note = client.objects_mut().insert(Note::new(everywhere(), "offline"));
    client
        .objects_mut()
        .get_mut::<Note>(note)
        .unwrap()
        .set_content("edited offline")
        .unwrap();

    assert!(client.send_updates(note).is_err());
    assert_eq!(client.objects().get::<Note>(note).unwrap().pending_updates(), 1);
}

#[tokio::test]
async fn test_failed_send_keeps_server_updates() {
    let mut server = tcp_server();
    let (mut client, _) = join_tcp(&mut server).await;
    let note = share_everywhere(&mut server, &mut client, "v1").await;

    server
        .objects_mut()
        .get_mut::<Note>(note)
        .unwrap()
        .set_content("v2")
        .unwrap();
    let stranger = PeerId::random();
    assert!(matches!(
        server.send_updates(note, Target::Peer(stranger)),
        Err(TetherError::UnknownPeer(peer)) if peer == stranger
    ));
    assert_eq!(server.objects().get::<Note>(note).unwrap().pending_updates(), 1);

    // The next flush still carries the change.
    server.send_updates(note, Target::All).unwrap();
    wait_for(&mut server, &mut [&mut client], |_, clients| {
        clients[0].objects().get::<Note>(note).unwrap().content == "v2"
    })
    .await;
}

#[tokio::test]
async fn test_send_updates_without_changes_is_noop() {
    let mut server = tcp_server();
    let (mut client, _) = join_tcp(&mut server).await;

    let note = client.objects_mut().insert(Note::new(everywhere(), "same"));
    client.send_updates(note).unwrap();
    assert!(matches!(
        client.send_updates(ObjectId::random()),
        Err(TetherError::UnknownObject(_))
    ));
}
