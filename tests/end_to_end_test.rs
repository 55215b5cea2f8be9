//! End-to-end tests: policy documents in, matches and transformed events out.

use secl_engine::config::EngineConfig;
use secl_engine::{Engine, EngineOrder, Event, FieldType, JsonEvent, Model, PolicyDocument};
use serde_json::{json, Value};

const MACROS: &str = r#"
macros:
  - id: sensitive_files
    expression: '["/etc/shadow", "/etc/sudoers", ~"/root/.ssh/*"]'
  - id: package_managers
    values: ["apt", "dpkg", "yum"]
"#;

const RULES: &str = r#"
rules:
  - id: credential_access
    description: sensitive file opened outside package managers
    expression: open.file.path in sensitive_files && process.name not in package_managers
    tags: ["severity:high"]
    action:
      type: Redact
      placeholder: "<path>"
  - id: curl_to_ip
    expression: exec.file.name == "curl" && exec.args =~ r"https?://\d+\.\d+\.\d+\.\d+"
    action:
      type: Hash
  - id: dns_tunnel
    expression: dns.question.name =~ "*.tunnel.example"
"#;

fn engine() -> Engine {
    let engine = Engine::new(Model::runtime_security(), EngineConfig::single_threaded());
    engine
        .reconfigure(EngineOrder::Macros(PolicyDocument::from_yaml(MACROS).unwrap()))
        .unwrap();
    let outcome = engine
        .reconfigure(EngineOrder::Rules(PolicyDocument::from_yaml(RULES).unwrap()))
        .unwrap();
    assert!(outcome.active);
    assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
    engine
}

#[test]
fn test_redacted_output() {
    let engine = engine();
    let event = JsonEvent::new(
        "open",
        json!({
            "open.file.path": "/root/.ssh/id_rsa",
            "process.name": "cat",
            "process.pid": 4242,
        }),
    );

    let matches = engine.evaluate(&event);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].rule_id, "credential_access");

    let output = matches[0].output.as_ref().unwrap();
    assert_eq!(output["open.file.path"], "<path>");
    assert_eq!(output["process.name"], "<path>");
    assert_eq!(output["process.pid"], 4242);
    // the original event is untouched
    assert_eq!(event.field("open.file.path"), Some(&json!("/root/.ssh/id_rsa")));

    let apt = JsonEvent::new(
        "open",
        json!({"open.file.path": "/etc/shadow", "process.name": "apt"}),
    );
    assert!(engine.evaluate(&apt).is_empty());
}

#[test]
fn test_hashed_nested_output() {
    let engine = engine();
    let event = JsonEvent::new(
        "exec",
        json!({
            "exec": {"file": {"name": "curl"}, "args": "-s http://10.0.0.1/payload"},
            "process": {"name": "bash"}
        }),
    );

    let matches = engine.evaluate(&event);
    assert_eq!(matches[0].rule_id, "curl_to_ip");
    let output = matches[0].output.as_ref().unwrap();
    let hashed = output["exec"]["args"].as_str().unwrap();
    assert_eq!(hashed.len(), 64);
    assert!(hashed.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(output["exec"]["file"]["name"], "curl");
    assert_eq!(output["process"]["name"], "bash");
}

#[test]
fn test_rule_without_action_has_no_output() {
    let engine = engine();
    let event = JsonEvent::new("dns", json!({"dns.question.name": "abc.tunnel.example"}));
    let matches = engine.evaluate(&event);
    assert_eq!(matches[0].rule_id, "dns_tunnel");
    assert!(matches[0].output.is_none());

    let serialized = serde_json::to_value(&matches[0]).unwrap();
    assert_eq!(serialized, json!({"rule_id": "dns_tunnel"}));
}

#[test]
fn test_event_stream() {
    let engine = engine();
    let events: Vec<JsonEvent> = serde_json::from_value(json!([
        {"type": "open", "data": {"open.file.path": "/etc/sudoers", "process.name": "vim"}},
        {"type": "exec", "data": {"exec.file.name": "curl", "exec.args": "https://example.com"}},
        {"type": "dns", "data": {"dns.question.name": "x.tunnel.example"}},
        {"type": "open", "data": {"open.file.path": "/tmp/a", "process.name": "vim"}}
    ]))
    .unwrap();

    let results = engine.evaluate_batch(&events);
    let ids: Vec<Vec<&str>> = results
        .iter()
        .map(|matches| matches.iter().map(|m| m.rule_id.as_str()).collect())
        .collect();
    assert_eq!(
        ids,
        vec![vec!["credential_access"], vec![], vec!["dns_tunnel"], vec![]]
    );

    let redacted: &Value = results[0][0].output.as_ref().unwrap();
    assert_eq!(redacted["open.file.path"], "<path>");
}

#[test]
fn test_single_rule_redaction() {
    // process.name is bound to exec events in this model
    let model = Model::new()
        .with_field("process.name", FieldType::String, "exec")
        .with_field("exec.file.name", FieldType::String, "exec");
    let engine = Engine::new(model, EngineConfig::default());
    engine.reconfigure(EngineOrder::Macros(PolicyDocument::default())).unwrap();
    engine
        .reconfigure(EngineOrder::Rules(
            PolicyDocument::from_json(
                r#"{"rules": [{"id": "one", "expression": "process.name == \"one\"",
                    "action": {"type": "Redact", "placeholder": "[REDACTED]"}}]}"#,
            )
            .unwrap(),
        ))
        .unwrap();

    let event = JsonEvent::new("exec", json!({"process.name": "one", "exec.file.name": "two"}));
    let matches = engine.evaluate(&event);
    assert_eq!(matches[0].rule_id, "one");
    assert_eq!(
        matches[0].output,
        Some(json!({"process.name": "[REDACTED]", "exec.file.name": "two"}))
    );

    let other = JsonEvent::new("exec", json!({"process.name": "three"}));
    assert!(engine.evaluate(&other).is_empty());
}

#[test]
fn test_cross_type_only_rule_is_rejected() {
    let engine = Engine::default();
    engine.reconfigure(EngineOrder::Macros(PolicyDocument::default())).unwrap();
    let err = engine
        .reconfigure(EngineOrder::Rules(
            PolicyDocument::from_json(
                r#"{"rules": [{"id": "one", "expression": "process.name == \"one\""}]}"#,
            )
            .unwrap(),
        ))
        .unwrap_err();
    assert!(err.to_string().contains("one"));
    assert!(engine.rule_set().is_none());

    let outcome = engine
        .reconfigure(EngineOrder::Rules(
            PolicyDocument::from_json(
                r#"{"rules": [{"id": "one", "expression": "exec.file.name == \"one\""}]}"#,
            )
            .unwrap(),
        ))
        .unwrap();
    assert!(outcome.active);
    let event = JsonEvent::new("exec", json!({"exec.file.name": "one"}));
    assert_eq!(engine.evaluate(&event)[0].rule_id, "one");
}
