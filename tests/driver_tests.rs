mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use assistant_driver::config::{DriverConfig, LifecycleMode};
use assistant_driver::driver::{Driver, DriverStatus};
use assistant_driver::message::{Message, MessageRef, MessageStatus};
use assistant_driver::remote::{
    AssistantsApi, RunObject, RunStatus, RunStreamEvent, ThreadMessage,
};

use common::*;

fn message(content: &str) -> MessageRef {
    Message::from_user("writer", content).into()
}

async fn ready_driver(
    api: &Arc<ScriptedApi>,
    sink: Arc<RecordingSink>,
    config: DriverConfig,
) -> Driver {
    let remote: Arc<dyn AssistantsApi> = api.clone();
    let driver = Driver::spawn(host(sink, TestSkills::new()), "writer", config, remote);
    driver.wait_ready().await.unwrap();
    driver
}

fn send_all(stream: &LiveStream, events: Vec<RunStreamEvent>) {
    for event in events {
        stream.send(Ok(event)).unwrap();
    }
}

#[tokio::test]
async fn instructions_during_a_run_are_batched_into_the_next_one() {
    let api = ScriptedApi::new();
    let first = api.push_live_stream();
    api.push_stream(reply("run_2", "second reply"));
    let sink = RecordingSink::new();
    let driver = ready_driver(&api, sink.clone(), DriverConfig::default()).await;

    let m1 = message("one");
    let m2 = message("two");
    let m3 = message("three");
    driver.instruct(m1.clone());
    eventually(|| api.count("create_run_stream") == 1).await;

    driver.instruct(m2.clone());
    driver.instruct(m3.clone());
    assert_eq!(driver.queued_len(), 2);
    assert_eq!(driver.status(), DriverStatus::Busy);
    assert_eq!(m1.status(), MessageStatus::Processing);
    assert_eq!(m2.status(), MessageStatus::Queued);
    assert_eq!(api.count("create_run_stream"), 1);

    send_all(&first, reply("run_1", "first reply"));
    driver.wait_for_idle().await;

    let sequence: Vec<String> = api
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("create_message") || c.starts_with("create_run_stream"))
        .map(|c| c.split(':').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        sequence,
        vec![
            "create_message",
            "create_run_stream",
            "create_message",
            "create_message",
            "create_run_stream",
        ]
    );
    assert_eq!(api.posted_contents(), vec!["one", "two", "three"]);
    assert_eq!(sink.contents(), vec!["first reply", "second reply"]);
    for m in [&m1, &m2, &m3] {
        assert_eq!(m.status(), MessageStatus::Complete);
    }
    assert_eq!(driver.status(), DriverStatus::Idle);
}

#[tokio::test]
async fn emitted_replies_are_complete_and_addressed() {
    let api = ScriptedApi::new();
    api.push_stream(reply("run_1", "hello back"));
    let sink = RecordingSink::new();
    let driver = ready_driver(&api, sink.clone(), DriverConfig::default()).await;

    driver.instruct(message("hello"));
    driver.wait_for_idle().await;

    let emitted = sink.emitted();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].status, MessageStatus::Complete);
    assert_eq!(emitted[0].source, "writer");
    assert_eq!(emitted[0].target, "user");
}

#[tokio::test]
async fn instructions_before_session_ready_are_queued() {
    let api = ScriptedApi::new();
    api.push_stream(reply("run_1", "ok"));
    let sink = RecordingSink::new();
    let remote: Arc<dyn AssistantsApi> = api.clone();
    let driver = Driver::spawn(
        host(sink.clone(), TestSkills::new()),
        "writer",
        DriverConfig::default(),
        remote,
    );

    let m1 = message("early");
    driver.instruct(m1.clone());
    assert_eq!(driver.queued_len(), 1);

    driver.wait_ready().await.unwrap();
    driver.wait_for_idle().await;

    assert_eq!(m1.status(), MessageStatus::Complete);
    assert_eq!(sink.contents(), vec!["ok"]);
}

#[tokio::test]
async fn paused_driver_queues_until_resumed() {
    let api = ScriptedApi::new();
    api.push_stream(reply("run_1", "resumed"));
    let sink = RecordingSink::new();
    let driver = ready_driver(&api, sink.clone(), DriverConfig::default()).await;

    driver.pause();
    let m1 = message("wait");
    driver.instruct(m1.clone());
    assert_eq!(driver.status(), DriverStatus::Queued);
    assert_eq!(api.count("create_message"), 0);

    driver.resume();
    driver.wait_for_idle().await;

    assert_eq!(m1.status(), MessageStatus::Complete);
    assert_eq!(sink.contents(), vec!["resumed"]);
}

#[tokio::test]
async fn pause_lets_the_active_run_finish_without_draining() {
    let api = ScriptedApi::new();
    let first = api.push_live_stream();
    api.push_stream(reply("run_2", "later"));
    let driver = ready_driver(&api, RecordingSink::new(), DriverConfig::default()).await;

    let m1 = message("now");
    let m2 = message("later");
    driver.instruct(m1.clone());
    driver.instruct(m2.clone());
    driver.pause();
    assert_eq!(driver.status(), DriverStatus::Paused);

    send_all(&first, reply("run_1", "done"));
    driver.wait_for_idle().await;

    assert_eq!(m1.status(), MessageStatus::Complete);
    assert_eq!(m2.status(), MessageStatus::Queued);
    assert_eq!(driver.status(), DriverStatus::Queued);

    driver.resume();
    driver.wait_for_idle().await;
    assert_eq!(m2.status(), MessageStatus::Complete);
}

#[tokio::test]
async fn failed_run_marks_inputs_errored_and_keeps_draining() {
    let api = ScriptedApi::new();
    let first = api.push_live_stream();
    api.push_stream(reply("run_2", "recovered"));
    let sink = RecordingSink::new();
    let driver = ready_driver(&api, sink.clone(), DriverConfig::default()).await;

    let m1 = message("doomed");
    let m2 = message("next");
    driver.instruct(m1.clone());
    driver.instruct(m2.clone());

    send_all(
        &first,
        vec![RunStreamEvent::RunUpdated(
            RunObject::new("run_1", RunStatus::Failed).with_last_error("server_error", "boom"),
        )],
    );
    driver.wait_for_idle().await;

    assert_eq!(m1.status(), MessageStatus::Error);
    assert_eq!(m2.status(), MessageStatus::Complete);
    assert_eq!(sink.contents(), vec!["recovered"]);
}

#[tokio::test]
async fn errored_message_can_be_instructed_again() {
    let api = ScriptedApi::new();
    api.push_stream(vec![RunStreamEvent::RunUpdated(RunObject::new(
        "run_1",
        RunStatus::Expired,
    ))]);
    api.push_stream(reply("run_2", "second try"));
    let driver = ready_driver(&api, RecordingSink::new(), DriverConfig::default()).await;

    let m1 = message("retry me");
    driver.instruct(m1.clone());
    driver.wait_for_idle().await;
    assert_eq!(m1.status(), MessageStatus::Error);

    driver.instruct(m1.clone());
    driver.wait_for_idle().await;
    assert_eq!(m1.status(), MessageStatus::Complete);
}

#[tokio::test]
async fn cancelled_run_does_not_drain_the_queue() {
    let api = ScriptedApi::new();
    let first = api.push_live_stream();
    let driver = ready_driver(&api, RecordingSink::new(), DriverConfig::default()).await;

    let m1 = message("long task");
    let m2 = message("queued");
    driver.instruct(m1.clone());
    driver.instruct(m2.clone());
    first
        .send(Ok(run_event("run_1", RunStatus::InProgress)))
        .unwrap();

    assert!(driver.stop());
    eventually(|| api.count("cancel_run:run_1") == 1).await;
    assert_eq!(m1.status(), MessageStatus::Processing);

    first
        .send(Ok(run_event("run_1", RunStatus::Cancelled)))
        .unwrap();
    driver.wait_for_idle().await;

    assert_eq!(m1.status(), MessageStatus::Cancelled);
    assert_eq!(m2.status(), MessageStatus::Queued);
    assert_eq!(driver.queued_len(), 1);
    assert_eq!(api.count("create_run_stream"), 1);
}

#[tokio::test]
async fn stop_without_active_run_is_a_no_op() {
    let api = ScriptedApi::new();
    let driver = ready_driver(&api, RecordingSink::new(), DriverConfig::default()).await;
    assert!(!driver.stop());
    assert_eq!(api.count("cancel_run"), 0);
}

#[tokio::test]
async fn teardown_respects_keep_thread_and_survives_cancel_failure() {
    let api = ScriptedApi::new();
    let first = api.push_live_stream();
    let config = DriverConfig {
        keep_thread: true,
        ..DriverConfig::default()
    };
    let driver = ready_driver(&api, RecordingSink::new(), config).await;

    let m1 = message("active");
    let m2 = message("waiting");
    driver.instruct(m1.clone());
    driver.instruct(m2.clone());
    first
        .send(Ok(run_event("run_1", RunStatus::InProgress)))
        .unwrap();
    eventually(|| driver.active_run_id().as_deref() == Some("run_1")).await;
    api.fail_cancel.store(true, Ordering::SeqCst);

    let report = driver.remove().await;

    assert_eq!(report.errors.len(), 1);
    assert!(api.calls().contains(&"cancel_run:run_1".to_string()));
    assert!(api.calls().contains(&format!("delete_assistant:{ASSISTANT_ID}")));
    assert_eq!(api.count("delete_thread"), 0);
    assert_eq!(m1.status(), MessageStatus::Cancelled);
    assert_eq!(m2.status(), MessageStatus::Cancelled);

    let again = driver.remove().await;
    assert!(again.is_clean());
    assert_eq!(api.count("delete_assistant"), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(api.count("cancel_run"), 1);
}

fn keep_thread() -> DriverConfig {
    DriverConfig {
        keep_thread: true,
        ..DriverConfig::default()
    }
}

#[tokio::test]
async fn removal_before_the_run_starts_keeps_it_off_the_thread() {
    let api = ScriptedApi::new();
    let driver = ready_driver(&api, RecordingSink::new(), keep_thread()).await;

    let m1 = message("too late");
    driver.instruct(m1.clone());
    let report = driver.remove().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(report.is_clean());
    assert_eq!(api.count("create_message"), 0);
    assert_eq!(api.count("create_run"), 0);
    assert_eq!(api.count("cancel_run"), 0);
    assert_eq!(m1.status(), MessageStatus::Cancelled);
}

#[tokio::test]
async fn run_created_during_removal_is_cancelled_once_it_appears() {
    let api = ScriptedApi::new();
    let stream = api.push_live_stream();
    let driver = ready_driver(&api, RecordingSink::new(), keep_thread()).await;

    driver.instruct(message("racing"));
    eventually(|| api.count("create_run_stream") == 1).await;
    assert_eq!(driver.active_run_id(), None);

    let report = driver.remove().await;
    assert!(report.is_clean());
    assert_eq!(api.count("cancel_run"), 0);

    stream
        .send(Ok(run_event("run_1", RunStatus::Queued)))
        .unwrap();
    eventually(|| api.count("cancel_run:run_1") == 1).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(api.count("cancel_run"), 1);
    assert_eq!(api.count("delete_thread"), 0);
}

#[tokio::test]
async fn replies_from_a_superseded_run_are_not_delivered() {
    let api = ScriptedApi::new();
    api.push_run(RunObject::new("run_1", RunStatus::Completed));
    api.set_run_messages(vec![ThreadMessage::assistant("m1", "too late")]);
    let listing = api.hold("list_messages");
    let sink = RecordingSink::new();
    let config = DriverConfig {
        lifecycle: LifecycleMode::Polling { interval_ms: 10 },
        ..DriverConfig::default()
    };
    let driver = ready_driver(&api, sink.clone(), config).await;

    let m1 = message("question");
    driver.instruct(m1.clone());
    eventually(|| api.count("list_messages") == 1).await;

    let report = driver.remove().await;
    listing.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(report.is_clean());
    assert!(sink.contents().is_empty());
    assert_eq!(m1.status(), MessageStatus::Cancelled);
}

#[tokio::test]
async fn removal_during_setup_fails_readiness_and_releases_the_session() {
    let api = ScriptedApi::new();
    let thread_created = api.hold("create_thread");
    let remote: Arc<dyn AssistantsApi> = api.clone();
    let driver = Driver::spawn(
        host(RecordingSink::new(), TestSkills::new()),
        "writer",
        DriverConfig::default(),
        remote,
    );
    eventually(|| api.count("create_thread") == 1).await;

    let report = driver.remove().await;
    assert!(report.is_clean());
    thread_created.notify_one();

    assert!(driver.wait_ready().await.is_err());
    assert_eq!(api.count(&format!("delete_thread:{THREAD_ID}")), 1);
    assert_eq!(api.count(&format!("delete_assistant:{ASSISTANT_ID}")), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_instructions_share_one_follow_up_run() {
    const SENDERS: usize = 8;
    const PER_SENDER: usize = 5;

    let api = ScriptedApi::new();
    let first = api.push_live_stream();
    api.push_stream(reply("run_2", "batched"));
    let sink = RecordingSink::new();
    let driver = ready_driver(&api, sink.clone(), DriverConfig::default()).await;

    let senders: Vec<_> = (0..SENDERS)
        .map(|s| {
            let driver = driver.clone();
            tokio::spawn(async move {
                let mut sent = Vec::new();
                for i in 0..PER_SENDER {
                    let m = message(&format!("s{s}-{i}"));
                    driver.instruct(m.clone());
                    sent.push(m);
                    tokio::task::yield_now().await;
                }
                sent
            })
        })
        .collect();
    let sent: Vec<MessageRef> = futures::future::join_all(senders)
        .await
        .into_iter()
        .flat_map(|sent| sent.unwrap())
        .collect();

    assert!(driver.has_active_run());
    assert_eq!(driver.queued_len(), SENDERS * PER_SENDER - 1);

    send_all(&first, reply("run_1", "first"));
    driver.wait_for_idle().await;

    assert_eq!(api.count("create_run_stream"), 2);
    let posted = api.posted_contents();
    let mut unique = posted.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(posted.len(), SENDERS * PER_SENDER);
    assert_eq!(unique.len(), SENDERS * PER_SENDER);
    for s in 0..SENDERS {
        let prefix = format!("s{s}-");
        let from_sender: Vec<String> = posted
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .cloned()
            .collect();
        let expected: Vec<String> = (0..PER_SENDER).map(|i| format!("s{s}-{i}")).collect();
        assert_eq!(from_sender, expected);
    }
    for m in &sent {
        assert_eq!(m.status(), MessageStatus::Complete);
    }
    assert_eq!(sink.contents(), vec!["first", "batched"]);
}

#[tokio::test]
async fn teardown_deletes_thread_and_assistant_by_default() {
    let api = ScriptedApi::new();
    let driver = ready_driver(&api, RecordingSink::new(), DriverConfig::default()).await;

    let report = driver.remove().await;

    assert!(report.is_clean());
    assert_eq!(api.count("cancel_run"), 0);
    assert_eq!(api.count(&format!("delete_thread:{THREAD_ID}")), 1);
    assert_eq!(api.count(&format!("delete_assistant:{ASSISTANT_ID}")), 1);
}

#[tokio::test]
async fn failed_session_setup_leaves_driver_unavailable() {
    let api = ScriptedApi::new();
    api.fail_create_thread.store(true, Ordering::SeqCst);
    let remote: Arc<dyn AssistantsApi> = api.clone();
    let driver = Driver::spawn(
        host(RecordingSink::new(), TestSkills::new()),
        "writer",
        DriverConfig::default(),
        remote,
    );

    assert!(driver.wait_ready().await.is_err());
    assert_eq!(api.count(&format!("delete_assistant:{ASSISTANT_ID}")), 1);

    let m1 = message("nobody home");
    driver.instruct(m1.clone());
    assert_eq!(m1.status(), MessageStatus::Queued);
    assert_eq!(driver.status(), DriverStatus::Queued);
    assert_eq!(api.count("create_message"), 0);
}

#[tokio::test]
async fn configured_skills_become_assistant_tools() {
    let api = ScriptedApi::new();
    let config = DriverConfig {
        skills: vec!["add".into(), "missing".into()],
        instructions: "Be terse.".into(),
        model: "gpt-4o".into(),
        ..DriverConfig::default()
    };
    let _driver = ready_driver(&api, RecordingSink::new(), config).await;

    let created = api.assistants();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, "writer");
    assert_eq!(created[0].model, "gpt-4o");
    assert_eq!(created[0].instructions, "Be terse.");
    assert_eq!(created[0].tools.len(), 1);
    assert_eq!(created[0].tools[0]["type"], "function");
    assert_eq!(created[0].tools[0]["function"]["name"], "add");
    assert_eq!(
        created[0].tools[0]["function"]["parameters"]["required"],
        serde_json::json!(["a", "b"])
    );
}
