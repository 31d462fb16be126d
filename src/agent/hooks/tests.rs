use super::*;

#[test]
fn hook_command_validity() {
    let valid = HookCommand {
        kind: "command".to_string(),
        command: "echo hi".to_string(),
        timeout_ms: None,
    };
    assert!(valid.is_valid());

    let wrong_type = HookCommand {
        kind: "script".to_string(),
        command: "echo hi".to_string(),
        timeout_ms: None,
    };
    assert!(!wrong_type.is_valid());

    let empty_command = HookCommand {
        kind: "command".to_string(),
        command: String::new(),
        timeout_ms: None,
    };
    assert!(!empty_command.is_valid());
}

#[test]
fn hook_command_default_timeout() {
    let cmd = HookCommand {
        kind: "command".to_string(),
        command: "echo hi".to_string(),
        timeout_ms: None,
    };
    assert_eq!(cmd.timeout().as_millis() as u64, DEFAULT_HOOK_TIMEOUT_MS);
}

#[test]
fn hook_entry_rejects_all_invalid_commands() {
    let entry = HookEntry {
        event: HookEvent::BeforeTool,
        matcher: None,
        sequential: false,
        hooks: vec![HookCommand {
            kind: "script".to_string(),
            command: "echo hi".to_string(),
            timeout_ms: None,
        }],
        source: HookSource::Project,
        enabled: true,
    };
    assert!(!entry.is_valid());
}

#[test]
fn hook_decision_blocking_classification() {
    assert!(HookDecisionKind::Deny.is_blocking());
    assert!(HookDecisionKind::Block.is_blocking());
    assert!(!HookDecisionKind::Allow.is_blocking());
    assert!(!HookDecisionKind::Ask.is_blocking());
    assert!(HookDecisionKind::Ask.is_ask());
}

#[test]
fn outcome_non_blocking_advisory_requires_all_failed() {
    let mut outcome = HookOutcome {
        failures: 2,
        ..Default::default()
    };
    assert!(outcome.is_non_blocking_advisory(2));
    outcome.blocked = Some("nope".to_string());
    assert!(!outcome.is_non_blocking_advisory(2));
}
