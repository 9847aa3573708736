//! CLI command tests

use super::*;

fn run_command(command: Commands) -> (ExitCode, String, String) {
    let cli = Cli {
        verbose: 0,
        command,
    };
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = run(cli, &mut stdout, &mut stderr);
    (
        code,
        String::from_utf8(stdout).unwrap(),
        String::from_utf8(stderr).unwrap(),
    )
}

fn sample_policy_file(dir: &tempfile::TempDir) -> String {
    let path = dir.path().join("policy.yaml");
    std::fs::write(&path, agentguard::generate_sample_policy()).unwrap();
    path.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// parse_param
// ---------------------------------------------------------------------------

#[test]
fn test_parse_param_json_values() {
    assert_eq!(parse_param("amount=50").unwrap().1, serde_json::json!(50));
    assert_eq!(parse_param("safe=true").unwrap().1, serde_json::json!(true));
    assert_eq!(
        parse_param("items=[1,2]").unwrap().1,
        serde_json::json!([1, 2])
    );
    assert_eq!(
        parse_param("user={\"role\":\"admin\"}").unwrap().1,
        serde_json::json!({"role": "admin"})
    );
}

#[test]
fn test_parse_param_falls_back_to_string() {
    assert_eq!(
        parse_param("name=alice").unwrap().1,
        serde_json::json!("alice")
    );
    // Values containing '=' keep everything after the first separator.
    let (key, value) = parse_param("query=a=b").unwrap();
    assert_eq!(key, "query");
    assert_eq!(value, serde_json::json!("a=b"));
}

#[test]
fn test_parse_param_rejects_malformed() {
    assert!(parse_param("no-separator").is_err());
    assert!(parse_param("=value").is_err());
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

#[test]
fn test_init_writes_valid_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.yaml").to_string_lossy().into_owned();

    let (code, stdout, _) = run_command(Commands::Init { path: path.clone() });
    assert_eq!(code, ExitCode::Ok);
    assert!(stdout.contains("Wrote starter policy"));

    // The generated file loads and validates.
    assert!(agentguard::Policy::from_yaml_file(&path).is_ok());
}

#[test]
fn test_init_refuses_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = sample_policy_file(&dir);

    let (code, _, stderr) = run_command(Commands::Init { path });
    assert_eq!(code, ExitCode::ConfigError);
    assert!(stderr.contains("refusing to overwrite"));
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

#[test]
fn test_validate_prints_summary() {
    let dir = tempfile::tempdir().unwrap();
    let path = sample_policy_file(&dir);

    let (code, stdout, _) = run_command(Commands::Validate { path });
    assert_eq!(code, ExitCode::Ok);
    assert!(stdout.contains("Policy 'sample-policy'"));
    assert!(stdout.contains("Default action: allow"));
    assert!(stdout.contains("Rules: 3"));
    assert!(stdout.contains("block-large-transfers"));
    assert!(stdout.contains("Webhook: none"));
}

#[test]
fn test_validate_missing_file() {
    let (code, _, stderr) = run_command(Commands::Validate {
        path: "/nonexistent/policy.yaml".to_string(),
    });
    assert_eq!(code, ExitCode::ConfigError);
    assert!(stderr.contains("Error:"));
}

#[test]
fn test_validate_reports_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.yaml");
    std::fs::write(
        &path,
        r#"
version: "1.0"
name: bad
defaultAction: allow
rules:
  - name: r
    action: block
    conditions:
      - field: toolCall.toolName
        operator: in
        value: not-an-array
"#,
    )
    .unwrap();

    let (code, _, stderr) = run_command(Commands::Validate {
        path: path.to_string_lossy().into_owned(),
    });
    assert_eq!(code, ExitCode::ConfigError);
    assert!(stderr.contains("conditions[0].value"));
}

// ---------------------------------------------------------------------------
// test
// ---------------------------------------------------------------------------

#[test]
fn test_test_command_decisions() {
    let dir = tempfile::tempdir().unwrap();
    let path = sample_policy_file(&dir);

    let (code, stdout, _) = run_command(Commands::Test {
        tool_name: "transfer".to_string(),
        params: vec!["amount=50000".to_string()],
        policy: path.clone(),
        json: false,
    });
    assert_eq!(code, ExitCode::Fail);
    assert!(stdout.contains("Decision: block"));
    assert!(stdout.contains("block-large-transfers"));

    let (code, stdout, _) = run_command(Commands::Test {
        tool_name: "transfer".to_string(),
        params: vec!["amount=500".to_string()],
        policy: path.clone(),
        json: false,
    });
    assert_eq!(code, ExitCode::Warn);
    assert!(stdout.contains("Decision: require_approval"));

    let (code, stdout, _) = run_command(Commands::Test {
        tool_name: "list_files".to_string(),
        params: vec![],
        policy: path,
        json: false,
    });
    assert_eq!(code, ExitCode::Ok);
    assert!(stdout.contains("Decision: allow"));
}

#[test]
fn test_test_command_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = sample_policy_file(&dir);

    let (code, stdout, _) = run_command(Commands::Test {
        tool_name: "transfer".to_string(),
        params: vec!["amount=50000".to_string()],
        policy: path,
        json: true,
    });
    assert_eq!(code, ExitCode::Fail);

    let decision: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(decision["action"], serde_json::json!("block"));
    assert_eq!(
        decision["matchedRule"]["name"],
        serde_json::json!("block-large-transfers")
    );
}

#[test]
fn test_test_command_rejects_bad_param() {
    let dir = tempfile::tempdir().unwrap();
    let path = sample_policy_file(&dir);

    let (code, _, stderr) = run_command(Commands::Test {
        tool_name: "transfer".to_string(),
        params: vec!["no-separator".to_string()],
        policy: path,
        json: false,
    });
    assert_eq!(code, ExitCode::InvalidArgs);
    assert!(stderr.contains("key=value"));
}
