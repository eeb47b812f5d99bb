#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use assert_cmd::Command;

#[allow(dead_code)]
pub const CMD_TIMEOUT: Duration = Duration::from_secs(30);

#[allow(dead_code)]
pub const API_KEY_ENV: &str = "RULEGEN_API_KEY";

#[allow(dead_code)]
pub const RESEARCH_KEY_ENV: &str = "EXA_API_KEY";

#[allow(dead_code)]
pub const CATALOG: &str = r#"{
    "frontend_frameworks": {"react": ["react", "next.js"]},
    "backend": {"python": ["django"]}
}"#;

/// A `rulegen` command running in `dir` with a clean environment.
#[allow(dead_code)]
pub fn rulegen_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("rulegen"));
    cmd.timeout(CMD_TIMEOUT);
    cmd.current_dir(dir);
    cmd.env("NO_COLOR", "1");
    cmd.env_remove(API_KEY_ENV);
    cmd.env_remove(RESEARCH_KEY_ENV);
    cmd.env_remove("RULEGEN_CONFIG");
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Write `rulegen.toml` pointing the client at `endpoint` with no retries.
#[allow(dead_code)]
pub fn write_config(dir: &Path, endpoint: &str) {
    let config = format!(
        r#"[api]
endpoint = "{endpoint}"
max_attempts = 1
retry_min_wait_secs = 0
retry_max_wait_secs = 0
request_timeout_secs = 5

[processing]
max_workers = 2
"#
    );
    std::fs::write(dir.join("rulegen.toml"), config).unwrap();
}

#[allow(dead_code)]
pub fn write_catalog(dir: &Path) {
    std::fs::write(dir.join("libraries.json"), CATALOG).unwrap();
}

/// Chat-completions body whose message is a valid rule document.
#[allow(dead_code)]
pub fn completion_body(library: &str) -> serde_json::Value {
    let rule = serde_json::json!({
        "name": format!("{library} Best Practices"),
        "glob_pattern": "*.jsx,*.tsx",
        "description": format!("Guidance for {library}."),
        "content": format!("# {library}\n\nKeep components small."),
    });
    serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": rule.to_string() } }]
    })
}
