//! Chat client flows against a fake transport and an in-memory directory
//!
//! The client is driven one step at a time: transport events and user
//! actions are applied directly, and spawned directory calls are settled
//! with `common::settle`. The description auto-save test runs the real
//! event loop on paused time.

mod common;

use std::time::Duration;

use serde_json::json;

use dbachat::attachments::Attachment;
use dbachat::client::{Completion, Startup, UserAction};
use dbachat::directory::memory::DirectoryCall;
use dbachat::directory::MemoryDirectory;
use dbachat::protocol::{ClientEvent, Role, ServerEvent};
use dbachat::reconciler::{Entry, ToolStatus, TurnState};
use dbachat::store::ClientStore;
use dbachat::transport::TransportEvent;

use common::{chat, client_with, last_error, settle, RecordingPresenter};

fn sales() -> MemoryDirectory {
    MemoryDirectory::new()
        .with_database("Sales", "orders and invoices")
        .with_chat("Sales", chat(3, "Index review"))
        .with_chat("Sales", chat(5, "Locks"))
}

fn message(content: &str, attachments: &[&str]) -> ClientEvent {
    ClientEvent::Message {
        content: content.to_string(),
        attachments: attachments.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_first_message_creates_chat_then_sends_once() {
    let (mut client, mut handle, _directory) = client_with(sales(), None);
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    client.select_database("Sales").await;
    handle.sent();

    client
        .handle_action(UserAction::Send("show me slow queries".to_string()))
        .await;

    assert_eq!(
        handle.sent(),
        vec![ClientEvent::CreateChat {
            title: "show me slow queries".to_string()
        }]
    );
    assert!(matches!(
        client.reconciler().state(),
        TurnState::AwaitingChatCreation(_)
    ));
    assert!(!client.reconciler().view().input_enabled);

    client
        .handle_transport_event(TransportEvent::Event(ServerEvent::ChatCreated {
            chat: chat(42, "show me slow queries"),
        }))
        .await;

    assert_eq!(handle.sent(), vec![message("show me slow queries", &[])]);
    assert_eq!(client.session().chat(), Some(42));
    assert_eq!(client.chats().chats()[0].id, 42);
    assert_eq!(client.reconciler().state(), &TurnState::Streaming);
    assert!(!client.reconciler().view().input_enabled);

    client
        .handle_transport_event(TransportEvent::Event(ServerEvent::Stream {
            content: "Check `pg_stat_statements`".to_string(),
            chat_id: Some(42),
        }))
        .await;
    client
        .handle_transport_event(TransportEvent::Event(ServerEvent::StreamEnd {
            chat_id: Some(42),
        }))
        .await;

    assert_eq!(client.reconciler().state(), &TurnState::Idle);
    assert!(client.reconciler().view().input_enabled);
    assert!(handle.sent().is_empty());
}

#[tokio::test]
async fn test_attachments_upload_once_before_message() {
    let (mut client, mut handle, directory) = client_with(sales(), None);
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    client.select_database("Sales").await;
    handle.sent();

    let plan = Attachment::from_bytes("plan.sql", b"EXPLAIN SELECT 1".to_vec());
    client
        .handle_action(UserAction::AttachBytes(plan.clone()))
        .await;
    // same name and size: staged once
    client.handle_action(UserAction::AttachBytes(plan)).await;
    client
        .handle_action(UserAction::Send("why is this slow".to_string()))
        .await;
    assert!(client.staged().is_empty());

    client
        .handle_transport_event(TransportEvent::Event(ServerEvent::ChatCreated {
            chat: chat(7, "why is this slow"),
        }))
        .await;
    assert_eq!(
        client.reconciler().state(),
        &TurnState::Uploading {
            text: "why is this slow".to_string()
        }
    );
    assert!(handle.sent().is_empty());

    settle(&mut client).await;

    assert_eq!(directory.count("upload_files"), 1);
    assert!(directory.calls().contains(&DirectoryCall::UploadFiles {
        database: "Sales".to_string(),
        chat: 7,
        names: vec!["plan.sql".to_string()],
    }));
    assert_eq!(handle.sent(), vec![message("why is this slow", &["plan.sql"])]);
    assert_eq!(client.reconciler().state(), &TurnState::Streaming);
}

#[tokio::test]
async fn test_upload_failure_sends_nothing_and_keeps_chat() {
    let (mut client, mut handle, directory) = client_with(sales(), None);
    directory.fail("upload_files", "disk full");
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    client.select_database("Sales").await;
    handle.sent();

    client
        .handle_action(UserAction::AttachBytes(Attachment::from_bytes(
            "schema.sql",
            b"CREATE TABLE t (id int)".to_vec(),
        )))
        .await;
    client.handle_action(UserAction::Send(String::new())).await;
    client
        .handle_transport_event(TransportEvent::Event(ServerEvent::ChatCreated {
            chat: chat(8, "schema.sql"),
        }))
        .await;
    settle(&mut client).await;

    assert!(handle
        .sent()
        .iter()
        .all(|e| !matches!(e, ClientEvent::Message { .. })));
    assert_eq!(client.reconciler().state(), &TurnState::Idle);
    assert!(client.reconciler().view().input_enabled);
    assert!(last_error(&client).unwrap().contains("disk full"));
    assert_eq!(client.session().chat(), Some(8));
}

#[tokio::test]
async fn test_upload_of_failed_turn_does_not_release_next_message() {
    let (mut client, mut handle, directory) = client_with(sales(), None);
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    client.select_database("Sales").await;
    client.select_chat(3).await;

    client
        .handle_action(UserAction::AttachBytes(Attachment::from_bytes(
            "a.sql",
            b"SELECT 1".to_vec(),
        )))
        .await;
    client
        .handle_action(UserAction::Send("first".to_string()))
        .await;
    handle.disconnect();
    client
        .handle_transport_event(TransportEvent::Disconnected)
        .await;
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    handle.sent();

    client
        .handle_action(UserAction::AttachBytes(Attachment::from_bytes(
            "b.sql",
            b"SELECT 2".to_vec(),
        )))
        .await;
    client
        .handle_action(UserAction::Send("second".to_string()))
        .await;
    settle(&mut client).await;

    assert_eq!(directory.count("upload_files"), 2);
    assert_eq!(handle.sent(), vec![message("second", &["b.sql"])]);
    assert_eq!(client.reconciler().state(), &TurnState::Streaming);
}

#[tokio::test]
async fn test_send_while_disconnected_shows_error_and_reconnects() {
    let (mut client, mut handle, _directory) = client_with(sales(), None);
    client.select_database("Sales").await;
    let before = handle.reconnect_requests();

    client
        .handle_action(UserAction::Send("hello".to_string()))
        .await;

    assert!(handle.sent().is_empty());
    assert_eq!(handle.reconnect_requests(), before + 1);
    assert!(last_error(&client).unwrap().contains("Not connected"));
    assert_eq!(client.reconciler().state(), &TurnState::Idle);
}

#[tokio::test]
async fn test_send_without_database_is_rejected_locally() {
    let (mut client, mut handle, _directory) = client_with(sales(), None);
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    handle.sent();

    client
        .handle_action(UserAction::Send("hello".to_string()))
        .await;

    assert!(handle.sent().is_empty());
    assert_eq!(last_error(&client).as_deref(), Some("Select a database first"));
}

#[tokio::test]
async fn test_reconnect_reannounces_role_database_and_chat() {
    let (mut client, mut handle, _directory) = client_with(sales(), None);
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    client.handle_action(UserAction::SetRole(Role::Dba)).await;
    client.select_database("Sales").await;
    client.select_chat(3).await;
    handle.sent();

    handle.disconnect();
    client
        .handle_transport_event(TransportEvent::Disconnected)
        .await;
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;

    assert_eq!(
        handle.sent(),
        vec![
            ClientEvent::SetRole { role: Role::Dba },
            ClientEvent::SetDatabase {
                database: "Sales".to_string()
            },
            ClientEvent::SetChat { chat_id: 3 },
        ]
    );
}

#[tokio::test]
async fn test_disconnect_mid_turn_ends_the_turn() {
    let (mut client, handle, _directory) = client_with(sales(), None);
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    client.select_database("Sales").await;
    client.select_chat(3).await;
    client
        .handle_action(UserAction::Send("vacuum status?".to_string()))
        .await;

    handle.disconnect();
    client
        .handle_transport_event(TransportEvent::Disconnected)
        .await;

    assert_eq!(client.reconciler().state(), &TurnState::Idle);
    assert!(client.reconciler().view().input_enabled);
    assert!(last_error(&client).is_some());
}

#[tokio::test]
async fn test_switching_chat_mid_stream_drops_late_events() {
    let (mut client, handle, _directory) = client_with(sales(), None);
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    client.select_database("Sales").await;
    client.select_chat(3).await;
    client
        .handle_action(UserAction::Send("list locks".to_string()))
        .await;
    client
        .handle_transport_event(TransportEvent::Event(ServerEvent::ToolCall {
            tool: "run_query".to_string(),
            args: json!({"sql": "SELECT * FROM pg_locks"}),
            chat_id: Some(3),
        }))
        .await;
    assert_eq!(client.reconciler().view().running_tool_calls(), 1);

    client.select_chat(5).await;

    let view = client.reconciler().view();
    assert!(view.tool_calls.is_empty());
    assert!(!view.thinking);
    assert!(view.entries.is_empty());
    assert_eq!(client.reconciler().state(), &TurnState::Idle);

    for event in [
        ServerEvent::Stream {
            content: "stale".to_string(),
            chat_id: Some(3),
        },
        ServerEvent::Stream {
            content: "untagged".to_string(),
            chat_id: None,
        },
        ServerEvent::StreamEnd { chat_id: Some(3) },
    ] {
        client
            .handle_transport_event(TransportEvent::Event(event))
            .await;
    }
    assert!(client.reconciler().view().entries.is_empty());
    assert!(client.reconciler().stream().accumulated.is_empty());
}

#[tokio::test]
async fn test_stream_end_marks_every_tool_done() {
    let (mut client, handle, _directory) = client_with(sales(), None);
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    client.select_database("Sales").await;
    client.select_chat(3).await;
    client
        .handle_action(UserAction::Send("size of each table".to_string()))
        .await;

    for tool in ["list_tables", "table_size"] {
        client
            .handle_transport_event(TransportEvent::Event(ServerEvent::ToolCall {
                tool: tool.to_string(),
                args: json!({}),
                chat_id: Some(3),
            }))
            .await;
    }
    client
        .handle_transport_event(TransportEvent::Event(ServerEvent::StreamEnd {
            chat_id: Some(3),
        }))
        .await;

    let view = client.reconciler().view();
    let names: Vec<&str> = view.tool_calls.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["list_tables", "table_size"]);
    assert!(view.tool_calls.iter().all(|t| t.status == ToolStatus::Done));
    assert!(!view.thinking);
}

#[tokio::test]
async fn test_clear_chat_sends_command_and_clears_on_confirmation() {
    let (mut client, mut handle, _directory) = client_with(sales(), None);
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    client.select_database("Sales").await;
    client.select_chat(3).await;
    client
        .handle_transport_event(TransportEvent::Event(ServerEvent::System {
            content: "Loaded 2 tables".to_string(),
            chat_id: Some(3),
        }))
        .await;
    handle.sent();

    client.handle_action(UserAction::ClearChat).await;
    assert_eq!(handle.sent(), vec![ClientEvent::ClearChat]);

    client
        .handle_transport_event(TransportEvent::Event(ServerEvent::ChatCleared {
            chat_id: Some(3),
        }))
        .await;
    assert!(client.reconciler().view().entries.is_empty());
}

#[tokio::test]
async fn test_deleting_active_chat_starts_new_chat() {
    let (mut client, handle, directory) = client_with(sales(), None);
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    client.select_database("Sales").await;
    settle(&mut client).await;
    client.select_chat(5).await;

    client.handle_action(UserAction::DeleteChat(None)).await;

    assert_eq!(client.session().chat(), None);
    assert!(client.chats().get(5).is_none());
    settle(&mut client).await;
    assert!(directory.calls().contains(&DirectoryCall::DeleteChat {
        database: "Sales".to_string(),
        chat: 5,
    }));
    assert_eq!(directory.chats("Sales").len(), 1);
}

#[tokio::test]
async fn test_failed_star_shows_error_and_reloads_list() {
    let (mut client, _handle, directory) = client_with(sales(), None);
    client.select_database("Sales").await;
    settle(&mut client).await;
    assert_eq!(directory.count("list_chats"), 1);
    directory.fail("star_chat", "read-only replica");

    client
        .handle_action(UserAction::StarChat {
            chat_id: Some(3),
            starred: true,
        })
        .await;
    // optimistic: starred chat moves to the top at once
    assert_eq!(client.chats().chats()[0].id, 3);
    assert!(client.chats().chats()[0].starred);

    settle(&mut client).await;
    assert_eq!(last_error(&client).as_deref(), Some("Server error (500): read-only replica"));
    assert_eq!(directory.count("list_chats"), 2);
    assert!(!client.chats().get(3).unwrap().starred);
}

#[tokio::test]
async fn test_stale_chat_list_is_ignored_after_database_switch() {
    let directory = sales().with_database("Inventory", "");
    let (mut client, _handle, _directory) = client_with(directory, None);

    client.select_database("Sales").await;
    client.select_database("Inventory").await;
    settle(&mut client).await;

    assert_eq!(client.chats().database(), Some("Inventory"));
    assert!(client.chats().is_empty());
}

#[tokio::test]
async fn test_chat_created_after_database_switch_is_dropped() {
    let directory = sales()
        .with_database("Inventory", "")
        .with_chat("Inventory", chat(8, "Deadlocks"));
    let (mut client, mut handle, _directory) = client_with(directory, None);
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    client.select_database("Sales").await;
    client
        .handle_action(UserAction::Send("hello".to_string()))
        .await;

    client.select_database("Inventory").await;
    settle(&mut client).await;
    handle.sent();

    client
        .handle_transport_event(TransportEvent::Event(ServerEvent::ChatCreated {
            chat: chat(42, "hello"),
        }))
        .await;

    let ids: Vec<i64> = client.chats().chats().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![8]);
    assert_eq!(client.session().database(), Some("Inventory"));
    assert_eq!(client.session().chat(), None);
    assert!(handle.sent().is_empty());
    assert_eq!(client.reconciler().state(), &TurnState::Idle);
}

#[tokio::test]
async fn test_failed_rest_call_ends_turn_in_flight() {
    let (mut client, handle, directory) = client_with(sales(), None);
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    client.select_database("Sales").await;
    settle(&mut client).await;
    client.select_chat(3).await;
    client
        .handle_action(UserAction::Send("table sizes".to_string()))
        .await;
    client
        .handle_transport_event(TransportEvent::Event(ServerEvent::ToolCall {
            tool: "list_tables".to_string(),
            args: json!({}),
            chat_id: Some(3),
        }))
        .await;
    assert_eq!(client.reconciler().state(), &TurnState::ToolRunning);

    directory.fail("list_chats", "metadata store unavailable");
    client.handle_action(UserAction::RefreshChats).await;
    settle(&mut client).await;

    let view = client.reconciler().view();
    assert_eq!(client.reconciler().state(), &TurnState::Idle);
    assert!(view.input_enabled);
    assert!(view.tool_calls.is_empty());
    assert!(!view.thinking);
    assert!(last_error(&client)
        .unwrap()
        .contains("metadata store unavailable"));
}

#[tokio::test]
async fn test_description_saved_for_left_database_keeps_current_description() {
    let directory = sales().with_database("Inventory", "");
    let (mut client, _handle, _directory) = client_with(directory, None);
    client.handle_action(UserAction::RefreshDatabases).await;
    client.select_database("Sales").await;
    client.select_database("Inventory").await;
    settle(&mut client).await;
    client.render(&mut RecordingPresenter::default());

    client
        .handle_completion(Completion::DescriptionSaved {
            database: "Sales".to_string(),
            description: "Orders and invoices".to_string(),
            result: Ok(()),
        })
        .await;
    client.handle_action(UserAction::ShowDescription).await;

    let mut presenter = RecordingPresenter::default();
    client.render(&mut presenter);
    assert!(presenter.descriptions.is_empty());
    assert!(presenter
        .infos
        .contains(&"Inventory has no description".to_string()));
    let sales = client
        .databases()
        .iter()
        .find(|d| d.name == "Sales")
        .unwrap();
    assert_eq!(sales.description, "Orders and invoices");
}

#[tokio::test]
async fn test_context_is_restored_from_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = ClientStore::open(dir.path().join("state.db")).unwrap();
    {
        let (mut client, _handle, _directory) = client_with(sales(), Some(store.clone()));
        client.select_database("Sales").await;
        client.select_chat(5).await;
        client.handle_action(UserAction::SetRole(Role::Dba)).await;
    }

    let (mut client, _handle, _directory) = client_with(sales(), Some(store));
    client.start(Startup::default());

    assert_eq!(client.session().database(), Some("Sales"));
    assert_eq!(client.session().chat(), Some(5));
    assert_eq!(client.session().role(), Role::Dba);
}

#[tokio::test(start_paused = true)]
async fn test_description_autosave_fires_once_after_pause() {
    let (mut client, handle, directory) = client_with(sales(), None);
    client.start(Startup {
        database: Some("Sales".to_string()),
        ..Default::default()
    });

    let (actions, actions_rx) = tokio::sync::mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let mut presenter = RecordingPresenter::default();
        client.run(actions_rx, &mut presenter).await
    });

    actions
        .send(UserAction::EditDescription("Orders".to_string()))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    actions
        .send(UserAction::EditDescription("  Orders and invoices ".to_string()))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let puts: Vec<DirectoryCall> = directory
        .calls()
        .into_iter()
        .filter(|c| matches!(c, DirectoryCall::PutDescription { .. }))
        .collect();
    assert_eq!(
        puts,
        vec![DirectoryCall::PutDescription {
            database: "Sales".to_string(),
            description: "Orders and invoices".to_string(),
        }]
    );

    actions.send(UserAction::Quit).unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(directory.count("put_description"), 1);
    drop(handle);
}

#[tokio::test]
async fn test_history_replaces_transcript() {
    let (mut client, handle, _directory) = client_with(sales(), None);
    handle.connect();
    client.handle_transport_event(TransportEvent::Connected).await;
    client.select_database("Sales").await;
    client.select_chat(3).await;

    client
        .handle_transport_event(TransportEvent::Event(ServerEvent::HistoryLoaded {
            messages: serde_json::from_value(json!([
                {"role": "user", "content": "any bloat?"},
                {"role": "assistant", "content": "Table `orders` is 40% bloated."}
            ]))
            .unwrap(),
            chat_id: Some(3),
        }))
        .await;

    let entries = &client.reconciler().view().entries;
    assert_eq!(entries.len(), 2);
    assert!(matches!(&entries[0], Entry::User { text, .. } if text == "any bloat?"));
    assert!(matches!(&entries[1], Entry::Assistant { source, .. } if source.contains("bloated")));
}
