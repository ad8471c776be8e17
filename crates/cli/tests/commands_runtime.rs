use std::env;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use sarpras_cli::commands::{config, doctor, migrate, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("SARPRAS_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("schema version 1"));
    });
}

#[test]
fn migrate_rejects_non_sqlite_database_url() {
    with_env(&[("SARPRAS_DATABASE_URL", "postgres://localhost/sarpras")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_against_a_file_database() {
    let url = scratch_database_url("seed");
    with_env(&[("SARPRAS_DATABASE_URL", url.as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "first seed failed: {}", first.output);
        let second = seed::run();
        assert_eq!(second.exit_code, 0, "second seed failed: {}", second.output);

        let first = parse_payload(&first.output);
        let second = parse_payload(&second.output);
        assert_eq!(first["command"], "seed");
        assert_eq!(first["message"], second["message"]);
        let message = first["message"].as_str().unwrap_or_default();
        assert!(message.contains("6 users"), "unexpected summary: {message}");
        assert!(message.contains("5 resources"), "unexpected summary: {message}");
        assert!(message.contains("veh-001"));
    });
}

#[test]
fn doctor_passes_after_migrations() {
    let url = scratch_database_url("doctor");
    with_env(&[("SARPRAS_DATABASE_URL", url.as_str())], || {
        assert_eq!(migrate::run().exit_code, 0);

        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "doctor failed: {}", result.output);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "pass");
        let names: Vec<&str> = report["checks"]
            .as_array()
            .map(|checks| checks.iter().filter_map(|check| check["name"].as_str()).collect())
            .unwrap_or_default();
        let expected = [
            "config_validation",
            "whatsapp_readiness",
            "database_connectivity",
            "schema_migrations",
        ];
        assert_eq!(names, expected);
    });
}

#[test]
fn doctor_flags_missing_migrations() {
    with_env(&[("SARPRAS_DATABASE_URL", "sqlite::memory:")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "fail");
        let schema = report["checks"]
            .as_array()
            .and_then(|checks| checks.iter().find(|check| check["name"] == "schema_migrations"))
            .cloned()
            .unwrap_or(Value::Null);
        assert_eq!(schema["status"], "fail");
        assert!(schema["details"].as_str().unwrap_or_default().contains("sarpras migrate"));
    });
}

#[test]
fn doctor_reports_config_failure_in_human_output() {
    with_env(
        &[("SARPRAS_WHATSAPP_ENABLED", "true"), ("SARPRAS_DATABASE_URL", "sqlite::memory:")],
        || {
            let result = doctor::run(false);
            assert_eq!(result.exit_code, 1);
            assert!(result.output.contains("[fail] config_validation"), "{}", result.output);
            assert!(result.output.contains("[skip] database_connectivity"));
        },
    );
}

#[test]
fn config_output_attributes_env_and_redacts_token() {
    with_env(
        &[
            ("SARPRAS_DATABASE_URL", "sqlite::memory:"),
            ("SARPRAS_WHATSAPP_ENABLED", "true"),
            ("SARPRAS_WHATSAPP_GATEWAY_URL", "https://wa.example.test/send"),
            ("SARPRAS_WHATSAPP_API_TOKEN", "wa-secret-token"),
        ],
        || {
            let output = config::run();
            assert!(!output.contains("wa-secret-token"), "token leaked: {output}");
            assert!(output.contains(
                "- whatsapp.api_token = <redacted> (source: env (SARPRAS_WHATSAPP_API_TOKEN))"
            ));
            assert!(output.contains(
                "- database.url = sqlite::memory: (source: env (SARPRAS_DATABASE_URL))"
            ));
            assert!(output.contains("- server.port = 8080 (source: default)"));
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn scratch_database_url(label: &str) -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    let path: PathBuf =
        env::temp_dir().join(format!("sarpras-cli-{label}-{}-{nanos}.db", std::process::id()));
    format!("sqlite://{}", path.display())
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SARPRAS_DATABASE_URL",
        "SARPRAS_DATABASE_MAX_CONNECTIONS",
        "SARPRAS_DATABASE_TIMEOUT_SECS",
        "SARPRAS_SERVER_BIND_ADDRESS",
        "SARPRAS_SERVER_PORT",
        "SARPRAS_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "SARPRAS_APPROVAL_TOKEN_TTL_HOURS",
        "SARPRAS_APPROVAL_PUBLIC_BASE_URL",
        "SARPRAS_APPROVAL_DISPLAY_TIMEZONE",
        "SARPRAS_WHATSAPP_ENABLED",
        "SARPRAS_WHATSAPP_GATEWAY_URL",
        "SARPRAS_WHATSAPP_API_TOKEN",
        "SARPRAS_WHATSAPP_TIMEOUT_SECS",
        "SARPRAS_WHATSAPP_MAX_RETRIES",
        "SARPRAS_LOGGING_LEVEL",
        "SARPRAS_LOGGING_FORMAT",
        "SARPRAS_LOG_LEVEL",
        "SARPRAS_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    env::set_var("SARPRAS_DATABASE_MAX_CONNECTIONS", "1");
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
