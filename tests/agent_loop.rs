mod common;

use serde_json::json;
use tokio::sync::broadcast;

use browser_pilot::error::InferenceError;
use browser_pilot::types::{Role, Segment};
use browser_pilot::{AgentEvent, AgentLoop, SafetyPolicy, TaskStatus};

use common::{
    RecordingSession, ScriptedClient, loop_options, malformed_reply, no_candidates, reply,
    request, text_reply,
};

#[tokio::test]
async fn search_task_completes_after_two_actions() {
    let client = ScriptedClient::new(vec![
        reply(vec![request("navigate", json!({"url": "wikipedia.org"}))]),
        reply(vec![
            Segment::Text("Typing the query".into()),
            request("type_text_at", json!({"x": 500, "y": 50, "text": "X"})),
        ]),
        text_reply("Done"),
    ]);
    let session = RecordingSession::new();

    let result = AgentLoop::new(&client, &session, loop_options(10))
        .run("search for X")
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.final_response, "Done");
    assert_eq!(result.actions_taken.len(), 2);
    assert_eq!(result.actions_taken[0].name, "navigate");
    assert_eq!(result.actions_taken[1].name, "type_text_at");
    assert_eq!(result.final_url, "https://wikipedia.org");
    assert!(!result.final_screenshot.is_empty());

    assert_eq!(
        session.inputs(),
        vec![
            "navigate https://wikipedia.org",
            "click 720,45",
            "key_down Control",
            "key_press A",
            "key_up Control",
            "key_press Delete",
            "type X",
        ]
    );
    assert_eq!(client.calls(), 3);
}

#[tokio::test]
async fn zero_candidates_is_an_error() {
    let client = ScriptedClient::new(vec![no_candidates()]);
    let session = RecordingSession::new();

    let result = AgentLoop::new(&client, &session, loop_options(10))
        .run("anything")
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Error);
    assert_eq!(result.final_response, "Empty response from model");
    assert!(result.actions_taken.is_empty());
    // last known state is still reported
    assert_eq!(result.final_url, "about:blank");
}

#[tokio::test]
async fn inference_failure_ends_the_task() {
    let client = ScriptedClient::failing(InferenceError::Api {
        status: 400,
        message: "bad key".into(),
    });
    let session = RecordingSession::new();

    let result = AgentLoop::new(&client, &session, loop_options(10))
        .run("anything")
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Error);
    assert!(result.final_response.starts_with("API error"));
    assert!(result.final_response.contains("bad key"));
}

#[tokio::test]
async fn turn_cap_leaves_task_in_progress() {
    let client = ScriptedClient::repeating(reply(vec![request(
        "click_at",
        json!({"x": 100, "y": 100}),
    )]));
    let session = RecordingSession::new();

    let result = AgentLoop::new(&client, &session, loop_options(4))
        .run("never finishes")
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::InProgress);
    assert_eq!(result.actions_taken.len(), 4);
    assert_eq!(client.calls(), 4);
}

#[tokio::test]
async fn turn_cap_keeps_the_last_response_text() {
    let client = ScriptedClient::repeating(reply(vec![
        Segment::Text("Still looking for the ROI tab".into()),
        request("click_at", json!({"x": 100, "y": 100})),
    ]));
    let session = RecordingSession::new();

    let result = AgentLoop::new(&client, &session, loop_options(2))
        .run("fill the sheet")
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::InProgress);
    assert_eq!(result.final_response, "Still looking for the ROI tab");
}

#[tokio::test]
async fn results_keep_request_order_when_one_fails() {
    let client = ScriptedClient::new(vec![
        reply(vec![
            request("click_at", json!({"x": 0, "y": 0})),
            request("navigate", json!({"url": "https://example.com"})),
            request("hover_at", json!({"x": 999, "y": 999})),
        ]),
        text_reply("recovered"),
    ]);
    let session = RecordingSession::failing_on(&["navigate"]);

    let result = AgentLoop::new(&client, &session, loop_options(5))
        .run("three things")
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    let names: Vec<_> = result.actions_taken.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["click_at", "navigate", "hover_at"]);
    assert!(result.actions_taken[0].error.is_none());
    assert!(result.actions_taken[1].error.is_some());
    assert!(result.actions_taken[2].error.is_none());

    // the model saw all three results, in order, each with a fresh screenshot
    let second_call = &client.seen()[1];
    let last = second_call.turns().last().unwrap();
    assert_eq!(last.role, Role::Initiator);
    let outcomes: Vec<_> = last
        .segments
        .iter()
        .map(|segment| match segment {
            Segment::ActionResult(outcome) => outcome,
            other => panic!("unexpected segment {other:?}"),
        })
        .collect();
    let names: Vec<_> = outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, ["click_at", "navigate", "hover_at"]);
    assert!(outcomes[1].error.as_deref().unwrap().contains("navigate failed"));
    assert!(outcomes.iter().all(|o| o.screenshot.is_some()));
    assert!(session.log().contains(&"move 1438,899".to_string()));
}

#[tokio::test]
async fn failed_chord_does_not_stop_the_next_action() {
    let client = ScriptedClient::new(vec![
        reply(vec![
            request("key_combination", json!({"keys": "Control+Shift+A"})),
            request("click_at", json!({"x": 100, "y": 100})),
        ]),
        text_reply("done anyway"),
    ]);
    let session = RecordingSession::failing_on(&["key_press"]);

    let result = AgentLoop::new(&client, &session, loop_options(5))
        .run("select everything then click")
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.actions_taken.len(), 2);
    assert!(result.actions_taken[0].error.is_some());
    assert!(result.actions_taken[1].error.is_none());
    let inputs = session.inputs();
    assert_eq!(&inputs[inputs.len() - 3..], ["key_up Shift", "key_up Control", "click 144,90"]);
}

#[tokio::test]
async fn malformed_output_is_retried_without_new_input() {
    let client = ScriptedClient::new(vec![
        malformed_reply(),
        malformed_reply(),
        text_reply("fine now"),
    ]);
    let session = RecordingSession::new();

    let result = AgentLoop::new(&client, &session, loop_options(10))
        .run("task")
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.final_response, "fine now");
    let seen = client.seen();
    assert_eq!(seen.len(), 3);
    // retries resend the same history
    assert_eq!(seen[0], seen[2]);
}

#[tokio::test]
async fn persistent_malformed_output_is_an_error() {
    let client = ScriptedClient::repeating(malformed_reply());
    let session = RecordingSession::new();
    let mut options = loop_options(10);
    options.max_malformed_retries = 2;

    let result = AgentLoop::new(&client, &session, options)
        .run("task")
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Error);
    assert_eq!(client.calls(), 3);
    assert!(result.actions_taken.is_empty());
}

#[tokio::test]
async fn old_screenshots_are_pruned_during_the_run() {
    let mut script: Vec<_> = (0..5)
        .map(|_| reply(vec![request("scroll_document", json!({"direction": "down"}))]))
        .collect();
    script.push(text_reply("scrolled"));
    let client = ScriptedClient::new(script);
    let session = RecordingSession::new();
    let mut options = loop_options(10);
    options.screenshot_budget = 2;

    AgentLoop::new(&client, &session, options)
        .run("scroll a lot")
        .await
        .unwrap();

    let last = client.seen().pop().unwrap();
    let with_images = last
        .turns()
        .iter()
        .filter(|turn| {
            turn.segments.iter().any(|segment| {
                matches!(segment, Segment::ActionResult(outcome) if outcome.screenshot.is_some())
            })
        })
        .count();
    let results = last
        .turns()
        .iter()
        .filter(|turn| {
            turn.segments
                .iter()
                .any(|segment| matches!(segment, Segment::ActionResult(_)))
        })
        .count();
    assert_eq!(results, 5);
    assert_eq!(with_images, 2);
    assert!(matches!(last.turns()[0].segments[1], Segment::Image(_)));
}

#[tokio::test]
async fn safety_decisions_follow_policy() {
    let risky = || {
        reply(vec![request(
            "click_at",
            json!({"x": 10, "y": 10, "safety_decision": {"decision": "require_confirmation", "explanation": "buy"}}),
        )])
    };

    let client = ScriptedClient::new(vec![risky(), text_reply("bought")]);
    let session = RecordingSession::new();
    let result = AgentLoop::new(&client, &session, loop_options(5))
        .run("buy it")
        .await
        .unwrap();
    assert!(result.actions_taken[0].safety_acknowledged);
    assert!(session.inputs().contains(&"click 14,9".to_string()));

    let client = ScriptedClient::new(vec![risky(), text_reply("gave up")]);
    let session = RecordingSession::new();
    let mut options = loop_options(5);
    options.executor.safety = SafetyPolicy::Refuse;
    let result = AgentLoop::new(&client, &session, options)
        .run("buy it")
        .await
        .unwrap();
    assert!(!result.actions_taken[0].safety_acknowledged);
    assert!(result.actions_taken[0].error.is_some());
    assert!(session.inputs().is_empty());
}

#[tokio::test]
async fn progress_events_are_broadcast() {
    let client = ScriptedClient::new(vec![
        reply(vec![request("go_back", json!({}))]),
        text_reply("done"),
    ]);
    let session = RecordingSession::new();
    let (tx, mut rx) = broadcast::channel(16);

    AgentLoop::new(&client, &session, loop_options(5))
        .with_events(tx)
        .run("go back")
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(match event {
            AgentEvent::TaskStarted { .. } => "started",
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::ActionExecuted { screenshot, .. } => {
                assert!(screenshot.is_some());
                "action"
            }
            AgentEvent::TaskComplete { .. } => "complete",
            AgentEvent::TaskError { .. } => "error",
            AgentEvent::TaskIncomplete { .. } => "incomplete",
        });
    }
    assert_eq!(kinds, ["started", "thinking", "action", "thinking", "complete"]);
}

#[tokio::test]
async fn labelled_tasks_do_not_broadcast_their_instructions() {
    let client = ScriptedClient::new(vec![text_reply("done")]);
    let session = RecordingSession::new();
    let (tx, mut rx) = broadcast::channel(16);

    AgentLoop::new(&client, &session, loop_options(5))
        .with_events(tx)
        .with_label("diagram for Acme")
        .run("Log in with password hunter2 and draw the diagram")
        .await
        .unwrap();

    match rx.try_recv().unwrap() {
        AgentEvent::TaskStarted { task } => assert_eq!(task, "diagram for Acme"),
        other => panic!("unexpected event {other:?}"),
    }
}
