//! Integration tests for the `tollgate` binary.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

const CONFIG: &str = r#"
[cache]
backend = "memory"

[limits.default]
max_requests = 100
window_ms = 60000

[limits.endpoints."/api/login"]
max_requests = 5
window_ms = 60000

[limits.endpoints."/internal/sync"]
bypass_eligible = true

[trust]
trusted = ["10.0.0.0/8"]
"#;

fn tollgate_cmd() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tollgate"));
    cmd.env("RUST_LOG", "error");
    for var in [
        "TOLLGATE_REDIS_URL",
        "TOLLGATE_ADAPTIVE_ENABLED",
        "TOLLGATE_MIN_LIMIT",
        "TOLLGATE_MAX_LIMIT",
        "TOLLGATE_TRUSTED_IPS",
        "TOLLGATE_LOG_LEVEL",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn write_config(dir: &TempDir, contents: &str) -> String {
    let path = dir.path().join("tollgate.toml");
    fs::write(&path, contents).unwrap();
    path.display().to_string()
}

mod validate {
    use super::*;

    #[test]
    fn valid_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG);

        tollgate_cmd()
            .args(["validate", &path])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration OK"))
            .stdout(predicate::str::contains("/api/login 5 req / 60000 ms"))
            .stdout(predicate::str::contains("/internal/sync 100 req / 60000 ms (bypass)"));
    }

    #[test]
    fn json_output() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG);

        let output = tollgate_cmd()
            .args(["validate", &path, "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let report: Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["valid"], true);
        assert_eq!(report["config"]["adaptive"]["min_limit"], 10);
        assert_eq!(report["config"]["trust"]["trusted"][0], "10.0.0.0/8");
    }

    #[test]
    fn out_of_range_bound() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, &format!("{CONFIG}\n[adaptive]\nmin_limit = 0\n"));

        tollgate_cmd()
            .args(["validate", &path])
            .assert()
            .failure()
            .stderr(predicate::str::contains("adaptive.min_limit"));
    }

    #[test]
    fn env_override_applied() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG);

        tollgate_cmd()
            .env("TOLLGATE_MAX_LIMIT", "5")
            .args(["validate", &path])
            .assert()
            .failure()
            .stderr(predicate::str::contains("adaptive.max_limit"));
    }

    #[test]
    fn missing_file() {
        tollgate_cmd()
            .args(["validate", "/nonexistent/tollgate.toml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid configuration"));
    }
}

mod trust {
    use super::*;

    #[test]
    fn trusted_range_from_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG);

        tollgate_cmd()
            .args(["trust", "10.1.2.3", "--config", &path])
            .assert()
            .success()
            .stdout(predicate::str::contains("10.1.2.3: full (trusted range 10.0.0.0/8)"));
    }

    #[test]
    fn untrusted_public_address() {
        tollgate_cmd()
            .args(["trust", "8.8.8.8"])
            .assert()
            .success()
            .stdout(predicate::str::contains("8.8.8.8: none (untrusted)"));
    }

    #[test]
    fn bypass_endpoint_json() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG);

        let output = tollgate_cmd()
            .args(["trust", "8.8.8.8", "--endpoint", "/internal/sync", "--config", &path, "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let report: Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["level"], "partial");
        assert_eq!(report["trusted"], true);
        assert_eq!(report["reason"]["kind"], "bypass_endpoint");
    }

    #[test]
    fn invalid_trusted_flag() {
        tollgate_cmd()
            .args(["trust", "8.8.8.8", "--trusted", "300.0.0.0/8"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid trusted entry"));
    }

    #[test]
    fn malformed_address_is_untrusted() {
        tollgate_cmd()
            .args(["trust", "not-an-ip"])
            .assert()
            .success()
            .stdout(predicate::str::contains("none (invalid address)"));
    }
}

mod simulate {
    use super::*;

    #[test]
    fn burst_is_throttled() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG);

        let output = tollgate_cmd()
            .args([
                "simulate",
                "--requests",
                "30",
                "--endpoint",
                "/api/login",
                "--config",
                &path,
                "--json",
            ])
            .output()
            .unwrap();
        assert!(output.status.success());

        let report: Value = serde_json::from_slice(&output.stdout).unwrap();
        let requests = report["requests"].as_array().unwrap();
        assert_eq!(requests.len(), 30);
        assert_eq!(requests[0]["decision"]["allowed"], true);
        assert_eq!(requests[0]["decision"]["reason"], "adaptive");
        assert_eq!(report["allowed"].as_u64().unwrap() + report["denied"].as_u64().unwrap(), 30);
        assert!(report["denied"].as_u64().unwrap() > 0);
        assert_eq!(requests[29]["decision"]["allowed"], false);
    }

    #[test]
    fn trusted_caller_never_throttled() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, CONFIG);

        tollgate_cmd()
            .args([
                "simulate",
                "-n",
                "25",
                "--endpoint",
                "/api/login",
                "--ip",
                "10.9.9.9",
                "--config",
                &path,
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("25 allowed, 0 denied"))
            .stdout(predicate::str::contains("reason=full_bypass"));
    }

    const JSON_TELEMETRY: &str = "\n[telemetry]\njson_logs = true\nlog_level = \"info\"\n";
    const STARTED: &str = r#""message":"admission control started""#;

    #[test]
    fn telemetry_section_drives_logging() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, &format!("{CONFIG}{JSON_TELEMETRY}"));

        tollgate_cmd()
            .env_remove("RUST_LOG")
            .args(["simulate", "-n", "1", "--config", &path])
            .assert()
            .success()
            .stderr(predicate::str::contains(STARTED))
            .stdout(predicate::str::contains("1 allowed, 0 denied"));
    }

    #[test]
    fn log_level_env_override_applies() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, &format!("{CONFIG}{JSON_TELEMETRY}"));

        tollgate_cmd()
            .env_remove("RUST_LOG")
            .env("TOLLGATE_LOG_LEVEL", "error")
            .args(["simulate", "-n", "1", "--config", &path])
            .assert()
            .success()
            .stderr(predicate::str::contains(STARTED).not());
    }

    #[test]
    fn log_level_flag_wins_over_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, &format!("{CONFIG}{JSON_TELEMETRY}"));

        tollgate_cmd()
            .env_remove("RUST_LOG")
            .args(["--log-level", "error", "simulate", "-n", "1", "--config", &path])
            .assert()
            .success()
            .stderr(predicate::str::contains(STARTED).not());
    }
}
