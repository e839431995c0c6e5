//! Unit tests for inbound line classification and wire shapes.

use serde_json::json;

use agent_bridge::agent::protocol::{
    classify_line, methods, Inbound, InitializeParams, ClientInfo, RequestEnvelope,
    ThreadItem, TurnStartParams, TurnStartResult, UserInput,
};

// ── Classification ───────────────────────────────────────────────────────────

#[test]
fn result_with_id_is_response() {
    let inbound = classify_line(r#"{"id":7,"result":{"thread":{"id":"t1"}}}"#)
        .expect("classify")
        .expect("some");

    match inbound {
        Inbound::Response { id, outcome } => {
            assert_eq!(id, 7);
            assert_eq!(outcome.expect("ok outcome"), json!({"thread":{"id":"t1"}}));
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[test]
fn error_with_id_is_failed_response() {
    let inbound = classify_line(r#"{"id":3,"error":{"code":-32001,"message":"thread not found"}}"#)
        .expect("classify")
        .expect("some");

    let Inbound::Response { id, outcome } = inbound else {
        panic!("expected response");
    };
    assert_eq!(id, 3);
    let err = outcome.expect_err("error outcome");
    assert_eq!(err.code, -32001);
    assert_eq!(err.message, "thread not found");
}

#[test]
fn method_without_id_is_notification() {
    let inbound = classify_line(
        r#"{"method":"item/agentMessage/delta","params":{"threadId":"t1","delta":"Hi"}}"#,
    )
    .expect("classify")
    .expect("some");

    let Inbound::Notification(n) = inbound else {
        panic!("expected notification");
    };
    assert_eq!(n.method, methods::AGENT_MESSAGE_DELTA);
    assert_eq!(n.params["delta"], "Hi");
}

/// A line carrying both `method` and `id` is a server request, never a
/// response to one of ours.
#[test]
fn method_with_id_is_server_request() {
    let inbound = classify_line(
        r#"{"id":"srv-1","method":"item/commandExecution/requestApproval","params":{"command":"ls"}}"#,
    )
    .expect("classify")
    .expect("some");

    match inbound {
        Inbound::ServerRequest { id, method, params } => {
            assert_eq!(id, json!("srv-1"));
            assert_eq!(method, methods::COMMAND_APPROVAL);
            assert_eq!(params["command"], "ls");
        }
        other => panic!("expected server request, got {other:?}"),
    }
}

#[test]
fn null_id_with_method_is_notification() {
    let inbound = classify_line(r#"{"id":null,"method":"turn/started","params":{}}"#)
        .expect("classify")
        .expect("some");
    assert!(matches!(inbound, Inbound::Notification(_)));
}

#[test]
fn blank_and_unmatched_lines_are_ignored() {
    assert!(classify_line("   ").expect("blank").is_none());
    assert!(classify_line(r#"{"id":0,"result":{}}"#).expect("id zero").is_none());
    assert!(classify_line(r#"{"id":5}"#).expect("no result").is_none());
    assert!(classify_line(r#"{"foo":"bar"}"#).expect("no id").is_none());
}

#[test]
fn malformed_lines_are_errors() {
    assert!(classify_line("{not json").is_err());
    assert!(classify_line("[1,2,3]").is_err());
}

// ── Outbound shapes ──────────────────────────────────────────────────────────

#[test]
fn request_envelope_carries_id_method_params() {
    let envelope = RequestEnvelope {
        id: 1,
        method: methods::INITIALIZE,
        params: InitializeParams {
            client_info: ClientInfo {
                name: "agent-bridge".into(),
                version: Some("0.1.0".into()),
            },
        },
    };

    let value = serde_json::to_value(&envelope).expect("serialize");
    assert_eq!(
        value,
        json!({
            "id": 1,
            "method": "initialize",
            "params": {"clientInfo": {"name": "agent-bridge", "version": "0.1.0"}}
        })
    );
}

#[test]
fn turn_input_lists_prompt_then_images() {
    let params = TurnStartParams {
        thread_id: "t1".into(),
        input: UserInput::prompt_with_images("look", &["/tmp/a.png".to_owned()]),
    };

    let value = serde_json::to_value(&params).expect("serialize");
    assert_eq!(
        value,
        json!({
            "threadId": "t1",
            "input": [
                {"type": "text", "text": "look"},
                {"type": "localImage", "path": "/tmp/a.png"}
            ]
        })
    );
}

#[test]
fn turn_start_result_accepts_both_shapes() {
    let flat: TurnStartResult = serde_json::from_value(json!({"turnId": "u1"})).expect("flat");
    let nested: TurnStartResult =
        serde_json::from_value(json!({"turn": {"id": "u2"}})).expect("nested");
    let empty: TurnStartResult = serde_json::from_value(json!({})).expect("empty");

    assert_eq!(flat.into_turn_id(), "u1");
    assert_eq!(nested.into_turn_id(), "u2");
    assert_eq!(empty.into_turn_id(), "");
}

#[test]
fn step_labels_describe_item_kinds() {
    let item = |kind: &str, command: Option<&str>| ThreadItem {
        kind: kind.into(),
        command: command.map(str::to_owned),
        ..ThreadItem::default()
    };

    assert_eq!(item("reasoning", None).step_label(), "thinking");
    assert_eq!(item("fileChange", None).step_label(), "editing files");
    assert_eq!(
        item("commandExecution", Some("cargo fmt")).step_label(),
        "running command `cargo fmt`"
    );
    assert_eq!(item("somethingNew", None).step_label(), "somethingNew");
}
