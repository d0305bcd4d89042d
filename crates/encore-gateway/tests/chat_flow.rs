//! End-to-end chat flows over the service layer, without a transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use encore_db::{Database, StoreConfig};
use encore_gateway::Chat;
use encore_gateway::auth::Authenticator;
use encore_gateway::connection::handle_command;
use encore_gateway::session::Session;
use encore_types::api::CreateConversationRequest;
use encore_types::error::{ChatError, ChatResult};
use encore_types::events::{ClientCommand, ServerEvent};
use encore_types::models::{Page, Principal};
use uuid::Uuid;

/// Token "<name>" maps to a fixed principal.
struct StaticAuth(HashMap<String, Principal>);

impl Authenticator for StaticAuth {
    fn verify(&self, token: &str) -> ChatResult<Principal> {
        self.0.get(token).cloned().ok_or(ChatError::Unauthorized)
    }
}

struct Harness {
    chat: Chat,
    db: Arc<Database>,
    users: HashMap<&'static str, Principal>,
}

impl Harness {
    fn new() -> Self {
        let db = Arc::new(Database::open_in_memory(StoreConfig::default()).unwrap());
        let users: HashMap<&'static str, Principal> = ["alice", "bob", "carol"]
            .into_iter()
            .map(|name| {
                (
                    name,
                    Principal {
                        user_id: Uuid::new_v4(),
                        role: "performer".into(),
                    },
                )
            })
            .collect();
        let tokens = users
            .iter()
            .map(|(name, p)| (name.to_string(), p.clone()))
            .collect();
        let chat = Chat::new(db.clone(), Arc::new(StaticAuth(tokens)));
        Self { chat, db, users }
    }

    fn id(&self, name: &str) -> Uuid {
        self.users[name].user_id
    }

    async fn connect(&self, name: &str) -> Session {
        let principal = self.chat.sessions.authenticate(Some(name)).unwrap();
        self.chat.sessions.open(principal).await.unwrap()
    }

    async fn dm(&self, creator: &str, other: &str) -> Uuid {
        self.chat
            .create_conversation(
                self.id(creator),
                CreateConversationRequest {
                    participant_ids: vec![self.id(other)],
                    is_group: false,
                    name: None,
                    group_image: None,
                },
            )
            .await
            .unwrap()
            .conversation
            .id
    }

    fn message_count(&self) -> i64 {
        self.db
            .with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?))
            .unwrap()
    }
}

async fn next_event(session: &mut Session) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(1), session.events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn assert_quiet(session: &mut Session) {
    if let Ok(event) = session.events.try_recv() {
        panic!("unexpected event: {:?}", event);
    }
}

fn send(conversation_id: Uuid, content: &str) -> ClientCommand {
    ClientCommand::SendMessage {
        content: content.to_string(),
        conversation_id,
    }
}

#[tokio::test]
async fn test_direct_message_scenario() {
    let h = Harness::new();
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;
    let mut carol = h.connect("carol").await;

    // 1. A creates a 1:1 with B; both live connections are told and joined.
    let conv = h.dm("alice", "bob").await;
    let created = h.chat.directory.get(conv, h.id("alice")).await.unwrap();
    assert!(!created.is_group);
    assert_eq!(created.participant_ids, vec![h.id("alice"), h.id("bob")]);
    assert!(matches!(next_event(&mut alice).await, ServerEvent::ConversationCreated(c) if c.id == conv));
    assert!(matches!(next_event(&mut bob).await, ServerEvent::ConversationCreated(c) if c.id == conv));

    // 2. A says hello; B receives it.
    handle_command(&h.chat, &alice.handle, send(conv, "hello")).await;
    let first = match next_event(&mut bob).await {
        ServerEvent::NewMessage(m) => m,
        other => panic!("expected newMessage, got {:?}", other),
    };
    assert_eq!(first.content, "hello");
    assert_eq!(first.sender_id, h.id("alice"));
    assert!(matches!(next_event(&mut alice).await, ServerEvent::NewMessage(_)));

    // 3. A resends within the window: same id, no second broadcast.
    let again = h
        .chat
        .messages
        .send(h.id("alice"), conv, "hello".into())
        .await
        .unwrap();
    assert_eq!(again.id, first.id);
    assert_quiet(&mut bob);
    assert_quiet(&mut alice);
    assert_eq!(h.message_count(), 1);

    // 4. B reads it; A sees the receipt, and a repeat keeps read_at.
    handle_command(
        &h.chat,
        &bob.handle,
        ClientCommand::MarkMessageRead {
            message_id: first.id,
        },
    )
    .await;
    let read_at = match next_event(&mut alice).await {
        ServerEvent::MessageRead {
            message_id,
            user_id,
            read_at,
        } => {
            assert_eq!(message_id, first.id);
            assert_eq!(user_id, h.id("bob"));
            read_at
        }
        other => panic!("expected messageRead, got {:?}", other),
    };
    let repeat = h.chat.receipts.mark_as_read(first.id, h.id("bob")).await.unwrap();
    assert_eq!(repeat.read_at, read_at);

    // 5. C is not a participant: error to C only, nothing delivered or stored.
    while bob.events.try_recv().is_ok() {}
    while alice.events.try_recv().is_ok() {}
    handle_command(&h.chat, &carol.handle, send(conv, "let me in")).await;
    match next_event(&mut carol).await {
        ServerEvent::Error { message } => assert!(message.starts_with("Forbidden")),
        other => panic!("expected error, got {:?}", other),
    }
    assert_quiet(&mut alice);
    assert_quiet(&mut bob);
    assert_eq!(h.message_count(), 1);
}

#[tokio::test]
async fn test_empty_content_is_rejected_before_store() {
    let h = Harness::new();
    let conv = h.dm("alice", "bob").await;

    let err = h
        .chat
        .messages
        .send(h.id("alice"), conv, "   ".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert_eq!(h.message_count(), 0);
}

#[tokio::test]
async fn test_send_to_unknown_conversation_is_forbidden() {
    let h = Harness::new();
    let err = h
        .chat
        .messages
        .send(h.id("alice"), Uuid::new_v4(), "hi".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));
}

#[tokio::test]
async fn test_read_receipt_authorization() {
    let h = Harness::new();
    let conv = h.dm("alice", "bob").await;
    let msg = h
        .chat
        .messages
        .send(h.id("alice"), conv, "set list attached".into())
        .await
        .unwrap();

    let missing = h.chat.receipts.mark_as_read(Uuid::new_v4(), h.id("bob")).await;
    assert!(matches!(missing, Err(ChatError::NotFound(_))));

    let outsider = h.chat.receipts.mark_as_read(msg.id, h.id("carol")).await;
    assert!(matches!(outsider, Err(ChatError::Forbidden(_))));

    assert!(h.chat.receipts.get_read_status(msg.id, h.id("bob")).await.unwrap().is_none());
    let status = h.chat.receipts.mark_as_read(msg.id, h.id("bob")).await.unwrap();
    let fetched = h.chat.receipts.get_read_status(msg.id, h.id("bob")).await.unwrap();
    assert_eq!(fetched, Some(status));
}

#[tokio::test]
async fn test_typing_skips_origin_connection() {
    let h = Harness::new();
    let conv = h.dm("alice", "bob").await;
    let mut alice_phone = h.connect("alice").await;
    let mut alice_laptop = h.connect("alice").await;
    let mut bob = h.connect("bob").await;
    let mut carol = h.connect("carol").await;

    let typing = |is_typing| ClientCommand::Typing {
        conversation_id: conv,
        is_typing,
    };
    handle_command(&h.chat, &alice_phone.handle, typing(true)).await;
    handle_command(&h.chat, &alice_phone.handle, typing(false)).await;

    for session in [&mut bob, &mut alice_laptop] {
        for expected in [true, false] {
            match next_event(session).await {
                ServerEvent::UserTyping {
                    user_id,
                    conversation_id,
                    is_typing,
                } => {
                    assert_eq!(user_id, h.id("alice"));
                    assert_eq!(conversation_id, conv);
                    assert_eq!(is_typing, expected);
                }
                other => panic!("expected userTyping, got {:?}", other),
            }
        }
    }
    assert_quiet(&mut alice_phone);

    handle_command(&h.chat, &carol.handle, typing(true)).await;
    assert!(matches!(next_event(&mut carol).await, ServerEvent::Error { .. }));
    assert_quiet(&mut bob);
}

#[tokio::test]
async fn test_session_bootstrap_joins_existing_rooms() {
    let h = Harness::new();
    let ab = h.dm("alice", "bob").await;
    let ac = h.dm("alice", "carol").await;

    assert!(matches!(h.chat.sessions.authenticate(None), Err(ChatError::Unauthorized)));
    assert!(matches!(
        h.chat.sessions.authenticate(Some("mallory")),
        Err(ChatError::Unauthorized)
    ));
    assert_eq!(h.chat.dispatcher.registry().connection_count().await, 0);

    let alice = h.connect("alice").await;
    let rooms = h.chat.dispatcher.rooms().rooms_of(alice.handle.id()).await;
    assert_eq!(rooms.len(), 2);
    for conv in [ab, ac] {
        assert!(rooms.contains(&encore_types::models::RoomId::for_conversation(conv)));
    }

    h.chat.sessions.close(alice.handle.id()).await;
    assert!(!h.chat.dispatcher.registry().is_online(h.id("alice")).await);
    assert!(h.chat.dispatcher.rooms().rooms_of(alice.handle.id()).await.is_empty());
}

#[tokio::test]
async fn test_delivery_order_matches_commit_order() {
    let h = Harness::new();
    let conv = h.dm("alice", "bob").await;
    let mut bob = h.connect("bob").await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let chat = h.chat.clone();
        let sender = h.id(if i % 2 == 0 { "alice" } else { "bob" });
        tasks.push(tokio::spawn(async move {
            chat.messages.send(sender, conv, format!("msg {}", i)).await.unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut delivered = Vec::new();
    for _ in 0..20 {
        match next_event(&mut bob).await {
            ServerEvent::NewMessage(m) => delivered.push(m.id),
            other => panic!("expected newMessage, got {:?}", other),
        }
    }

    let mut committed: Vec<Uuid> = h
        .chat
        .messages
        .history(conv, h.id("bob"), Page::new(None, Some(100)))
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    committed.reverse();
    assert_eq!(delivered, committed);
}

#[tokio::test]
async fn test_removing_group_closes_room() {
    let h = Harness::new();
    let mut bob = h.connect("bob").await;
    let group = h
        .chat
        .create_conversation(
            h.id("alice"),
            CreateConversationRequest {
                participant_ids: vec![h.id("bob"), h.id("carol")],
                is_group: true,
                name: Some("Jazz trio".into()),
                group_image: None,
            },
        )
        .await
        .unwrap()
        .conversation;
    assert!(matches!(next_event(&mut bob).await, ServerEvent::ConversationCreated(_)));
    assert_eq!(h.chat.dispatcher.rooms().rooms_of(bob.handle.id()).await.len(), 1);

    h.chat.remove_conversation(group.id, h.id("carol")).await.unwrap();
    assert!(h.chat.dispatcher.rooms().rooms_of(bob.handle.id()).await.is_empty());
    assert!(matches!(
        h.chat.messages.history(group.id, h.id("bob"), Page::default()).await,
        Err(ChatError::NotFound(_))
    ));
}
