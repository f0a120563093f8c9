use super::*;
use crate::channel::{ChannelError, MockChannel};
use crate::link::{LinkError, MockEditorLink};
use crate::protocol::{Followup, Suggestion};
use tempfile::TempDir;

fn make_bridge(channel: MockChannel, link: MockEditorLink) -> (TempDir, Bridge) {
    let dir = TempDir::new().unwrap();
    let store = RegistrationStore::load(dir.path().join("registrations.json"));
    (dir, Bridge::new(store, Arc::new(channel), Arc::new(link)))
}

fn followup(task_id: &str, question: &str, suggestions: &[&str]) -> Followup {
    Followup {
        task_id: task_id.into(),
        question: question.into(),
        suggestions: suggestions
            .iter()
            .map(|s| Suggestion::PlainText((*s).into()))
            .collect(),
    }
}

// --- Notification routing ---

#[tokio::test]
async fn question_for_registered_task_goes_to_its_chat() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .withf(|msg: &OutboundMessage| {
            msg.chat_id == 555
                && msg.text.contains("abc123")
                && msg.text.contains("1. yes")
                && msg.text.contains("2. no")
        })
        .times(1)
        .returning(|_| Ok(()));

    let (_dir, mut bridge) = make_bridge(channel, MockEditorLink::new());
    bridge.register("abc123", 555);
    bridge
        .route_question(followup("abc123", "Proceed?", &["yes", "no"]))
        .await;

    assert_eq!(bridge.pending().get(555).unwrap().task_id, "abc123");
    assert_eq!(bridge.pending().len(), 1);
}

#[tokio::test]
async fn question_for_unregistered_task_is_dropped() {
    // No expectations: any send would panic.
    let (_dir, mut bridge) = make_bridge(MockChannel::new(), MockEditorLink::new());
    bridge
        .route_question(followup("ghost", "Anyone?", &[]))
        .await;
    assert!(bridge.pending().is_empty());
}

#[tokio::test]
async fn second_question_for_same_chat_overwrites_pending() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .withf(|msg: &OutboundMessage| msg.chat_id == 7)
        .times(2)
        .returning(|_| Ok(()));

    let (_dir, mut bridge) = make_bridge(channel, MockEditorLink::new());
    bridge.register("task-one", 7);
    bridge.register("task-two", 7);
    bridge.route_question(followup("task-one", "First?", &[])).await;
    bridge.route_question(followup("task-two", "Second?", &[])).await;

    assert_eq!(bridge.pending().len(), 1);
    assert_eq!(bridge.pending().get(7).unwrap().task_id, "task-two");
}

#[tokio::test]
async fn unreachable_chat_unregisters_its_task() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .times(1)
        .returning(|_| Err(ChannelError::Unreachable("Forbidden: bot was blocked".into())));

    let (_dir, mut bridge) = make_bridge(channel, MockEditorLink::new());
    bridge.register("abc123", 555);
    bridge
        .route_question(followup("abc123", "Proceed?", &[]))
        .await;

    assert_eq!(bridge.registrations().lookup("abc123"), None);
    assert!(
        bridge.pending().get(555).is_none(),
        "pending entry of the unregistered task is cleared"
    );
}

#[tokio::test]
async fn transient_send_failure_keeps_pending_and_registration() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .times(1)
        .returning(|_| Err(ChannelError::Api("502: Bad Gateway".into())));

    let (_dir, mut bridge) = make_bridge(channel, MockEditorLink::new());
    bridge.register("abc123", 555);
    bridge
        .route_question(followup("abc123", "Proceed?", &[]))
        .await;

    assert_eq!(bridge.registrations().lookup("abc123"), Some(555));
    assert_eq!(bridge.pending().get(555).unwrap().task_id, "abc123");
}

// --- Reply routing ---

#[tokio::test]
async fn reply_is_forwarded_as_envelope_and_clears_pending() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .withf(|msg: &OutboundMessage| msg.chat_id == 555 && msg.text.starts_with("Task ("))
        .times(1)
        .returning(|_| Ok(()));
    channel
        .expect_send_message()
        .withf(|msg: &OutboundMessage| msg.chat_id == 555 && msg.text == reply::REPLY_SENT)
        .times(1)
        .returning(|_| Ok(()));

    let mut link = MockEditorLink::new();
    link.expect_send_frame()
        .withf(|frame: &String| frame == r#"{"type":"reply","taskId":"abc123","reply":"Hello"}"#)
        .times(1)
        .returning(|_| Ok(()));

    let (_dir, mut bridge) = make_bridge(channel, link);
    bridge.register("abc123", 555);
    bridge
        .route_question(followup("abc123", "Proceed?", &["yes", "no"]))
        .await;

    let outcome = bridge.route_reply(555, "Hello").await;
    match outcome {
        ReplyOutcome::Delivered { task_id } => assert_eq!(task_id, "abc123"),
        other => panic!("expected Delivered, got {other:?}"),
    }
    assert!(bridge.pending().get(555).is_none());
}

#[tokio::test]
async fn reply_without_pending_question_sends_nothing_to_editor() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .withf(|msg: &OutboundMessage| msg.chat_id == 42 && msg.text == reply::NOTHING_PENDING)
        .times(1)
        .returning(|_| Ok(()));

    // No link expectations: a frame would panic.
    let (_dir, mut bridge) = make_bridge(channel, MockEditorLink::new());
    bridge.register("abc123", 555);

    let outcome = bridge.route_reply(42, "hello?").await;
    assert!(matches!(outcome, ReplyOutcome::NothingPending));
    assert!(bridge.pending().is_empty());
    assert_eq!(bridge.registrations().lookup("abc123"), Some(555));
}

#[tokio::test]
async fn failed_reply_restores_pending_and_tells_the_human() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .withf(|msg: &OutboundMessage| msg.text.starts_with("Task ("))
        .times(1)
        .returning(|_| Ok(()));
    channel
        .expect_send_message()
        .withf(|msg: &OutboundMessage| {
            msg.chat_id == 555 && msg.text.starts_with("Error: Could not deliver")
        })
        .times(1)
        .returning(|_| Ok(()));

    let mut link = MockEditorLink::new();
    link.expect_send_frame()
        .times(1)
        .returning(|_| Err(LinkError::NotConnected));

    let (_dir, mut bridge) = make_bridge(channel, link);
    bridge.register("abc123", 555);
    bridge
        .route_question(followup("abc123", "Proceed?", &[]))
        .await;

    let outcome = bridge.route_reply(555, "Hello").await;
    assert!(matches!(
        outcome,
        ReplyOutcome::Failed {
            error: LinkError::NotConnected,
            ..
        }
    ));
    assert_eq!(bridge.pending().get(555).unwrap().task_id, "abc123");
}

// --- Registration and commands ---

#[tokio::test]
async fn unregister_clears_matching_pending_question() {
    let mut channel = MockChannel::new();
    channel.expect_send_message().returning(|_| Ok(()));

    let (_dir, mut bridge) = make_bridge(channel, MockEditorLink::new());
    bridge.register("abc123", 555);
    bridge.route_question(followup("abc123", "Proceed?", &[])).await;

    assert!(bridge.unregister("abc123"));
    assert!(bridge.pending().get(555).is_none());
    assert!(!bridge.unregister("abc123"), "second unregister is a no-op");
}

#[tokio::test]
async fn unregister_keeps_pending_question_of_another_task() {
    let mut channel = MockChannel::new();
    channel.expect_send_message().returning(|_| Ok(()));

    let (_dir, mut bridge) = make_bridge(channel, MockEditorLink::new());
    bridge.register("task-a", 555);
    bridge.register("task-b", 555);
    bridge.route_question(followup("task-b", "B?", &[])).await;

    assert!(bridge.unregister("task-a"));
    assert_eq!(bridge.pending().get(555).unwrap().task_id, "task-b");
}

#[tokio::test]
async fn register_command_binds_chat() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .withf(|msg: &OutboundMessage| {
            msg.chat_id == 555 && msg.text.starts_with("Task ID 'abc123' is now linked")
        })
        .times(1)
        .returning(|_| Ok(()));

    let (_dir, mut bridge) = make_bridge(channel, MockEditorLink::new());
    bridge.handle_command(555, "register", "abc123").await;
    assert_eq!(bridge.registrations().lookup("abc123"), Some(555));
}

#[tokio::test]
async fn register_command_without_argument_shows_usage() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .withf(|msg: &OutboundMessage| msg.text.contains("Usage: /register <task_id>"))
        .times(1)
        .returning(|_| Ok(()));

    let (_dir, mut bridge) = make_bridge(channel, MockEditorLink::new());
    bridge.handle_command(555, "register", "").await;
    assert!(bridge.registrations().is_empty());
}

#[tokio::test]
async fn unregister_command_from_other_chat_is_refused() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .withf(|msg: &OutboundMessage| {
            msg.chat_id == 999 && msg.text.contains("is not currently linked to *this* chat")
        })
        .times(1)
        .returning(|_| Ok(()));

    let (_dir, mut bridge) = make_bridge(channel, MockEditorLink::new());
    bridge.register("abc123", 555);
    bridge.handle_command(999, "unregister", "abc123").await;
    assert_eq!(bridge.registrations().lookup("abc123"), Some(555));
}

#[tokio::test]
async fn unregister_command_from_owning_chat_unlinks() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .withf(|msg: &OutboundMessage| msg.text.contains("has been unlinked"))
        .times(1)
        .returning(|_| Ok(()));

    let (_dir, mut bridge) = make_bridge(channel, MockEditorLink::new());
    bridge.register("abc123", 555);
    bridge.handle_command(555, "unregister", "abc123").await;
    assert_eq!(bridge.registrations().lookup("abc123"), None);
}

#[tokio::test]
async fn start_command_shows_usage() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .withf(|msg: &OutboundMessage| msg.text == commands::USAGE)
        .times(1)
        .returning(|_| Ok(()));

    let (_dir, mut bridge) = make_bridge(channel, MockEditorLink::new());
    bridge.handle_command(1, "start", "").await;
}

// --- Link frames ---

#[tokio::test]
async fn bad_frames_change_nothing() {
    let (_dir, mut bridge) = make_bridge(MockChannel::new(), MockEditorLink::new());
    bridge.register("abc123", 555);

    bridge.handle_frame("{not json").await;
    bridge.handle_frame(r#"{"type":"status","taskId":"abc123"}"#).await;
    bridge
        .handle_frame(r#"{"type":"followup","taskId":"abc123"}"#)
        .await;

    assert!(bridge.pending().is_empty());
    assert_eq!(bridge.registrations().lookup("abc123"), Some(555));
}

#[tokio::test]
async fn followup_frame_is_routed() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .withf(|msg: &OutboundMessage| msg.chat_id == 555 && msg.text.contains("1. go"))
        .times(1)
        .returning(|_| Ok(()));

    let (_dir, mut bridge) = make_bridge(channel, MockEditorLink::new());
    bridge.register("abc123", 555);
    bridge
        .handle_link_event(LinkEvent::Frame(
            r#"{"type":"followup","taskId":"abc123","question":"Go?","suggestions":[{"suggest":"go"}]}"#
                .into(),
        ))
        .await;

    assert_eq!(bridge.pending().get(555).unwrap().task_id, "abc123");
}

#[tokio::test]
async fn plain_chat_message_routes_as_reply() {
    let mut channel = MockChannel::new();
    channel.expect_send_message().returning(|_| Ok(()));

    let mut link = MockEditorLink::new();
    link.expect_send_frame()
        .withf(|frame: &String| frame.contains(r#""reply":"ship it""#))
        .times(1)
        .returning(|_| Ok(()));

    let (_dir, mut bridge) = make_bridge(channel, link);
    bridge.register("abc123", 555);
    bridge.route_question(followup("abc123", "Ready?", &[])).await;
    bridge
        .handle_channel_event(ChannelEvent::Message {
            chat_id: 555,
            message_id: 1,
            user_id: 1,
            user_name: "ada".into(),
            text: "ship it".into(),
        })
        .await;

    assert!(bridge.pending().is_empty());
}

#[test]
fn truncate_is_char_safe() {
    assert_eq!(truncate("hello", 10), "hello");
    assert_eq!(truncate("hello world", 5), "hello...");
    assert_eq!(truncate("éééé", 2), "éé...");
}
