//! Tests for main.rs startup validation (JWT secret, database, Redis, argument ranges)

use std::fs;
use std::process::{Child, Command, Output, Stdio};
use std::time::Duration;

const SECRET: &str = "test-secret-that-is-long-enough-32chars";

fn command() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_esg-accounts"));
    command
        .env_remove("JWT_SECRET")
        .env_remove("REDIS_URL")
        .env_remove("PORT")
        .env("DATABASE_PATH", ":memory:")
        .stderr(Stdio::piped())
        .stdout(Stdio::piped());
    command
}

// tracing logs to stdout by default
fn combined(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

/// Give the server a moment, then require that it is still running.
fn assert_keeps_running(mut child: Child) {
    std::thread::sleep(Duration::from_millis(500));

    match child.try_wait() {
        Ok(Some(status)) => {
            let output = child.wait_with_output().unwrap();
            panic!(
                "Server exited unexpectedly with status {:?}, output: {}",
                status,
                combined(&output)
            );
        }
        Ok(None) => {
            child.kill().ok();
        }
        Err(e) => {
            panic!("Error checking process status: {}", e);
        }
    }
}

#[test]
fn test_missing_jwt_secret_exits_with_error() {
    let output = command().output().expect("Failed to run binary");

    assert!(
        !output.status.success(),
        "Should exit with error when JWT_SECRET is missing"
    );
    let combined = combined(&output);
    assert!(
        combined.contains("JWT_SECRET") && combined.contains("required"),
        "Should mention JWT_SECRET is required, got: {}",
        combined
    );
}

#[test]
fn test_short_jwt_secret_exits_with_error() {
    let output = command()
        .env("JWT_SECRET", "short")
        .args(["--port", "0"])
        .output()
        .expect("Failed to run binary");

    assert!(!output.status.success());
    let combined = combined(&output);
    assert!(
        combined.contains("shorter than"),
        "Should mention minimum length requirement, got: {}",
        combined
    );
}

#[test]
fn test_starts_with_env_secret() {
    let child = command()
        .env("JWT_SECRET", SECRET)
        .args(["--port", "0"])
        .spawn()
        .expect("Failed to run binary");

    assert_keeps_running(child);
}

#[test]
fn test_jwt_secret_file() {
    let secret_file =
        std::env::temp_dir().join(format!("esg_accounts_secret_{}", std::process::id()));
    fs::write(&secret_file, "this-is-a-long-secret-from-file-for-testing\n").unwrap();

    let child = command()
        .args([
            "--jwt-secret-file",
            secret_file.to_str().unwrap(),
            "--port",
            "0",
        ])
        .spawn()
        .expect("Failed to run binary");

    assert_keeps_running(child);
    let _ = fs::remove_file(&secret_file);
}

#[test]
fn test_jwt_secret_file_not_found() {
    let output = command()
        .args(["--jwt-secret-file", "/nonexistent/path/to/secret"])
        .output()
        .expect("Failed to run binary");

    assert!(!output.status.success());
    let combined = combined(&output);
    assert!(
        combined.contains("Failed to read JWT secret file"),
        "Should mention failed to read file, got: {}",
        combined
    );
}

#[test]
fn test_unopenable_database_exits_with_error() {
    let output = command()
        .env("JWT_SECRET", SECRET)
        .args(["--database", "/nonexistent/dir/accounts.db", "--port", "0"])
        .output()
        .expect("Failed to run binary");

    assert!(!output.status.success());
    assert!(combined(&output).contains("Failed to open database"));
}

#[test]
fn test_bad_redis_url_exits_with_error() {
    let output = command()
        .env("JWT_SECRET", SECRET)
        .args(["--redis-url", "not-a-redis-url", "--port", "0"])
        .output()
        .expect("Failed to run binary");

    assert!(!output.status.success());
    assert!(combined(&output).contains("Failed to connect to Redis"));
}

#[test]
fn test_out_of_range_otp_length_is_rejected() {
    let output = command()
        .env("JWT_SECRET", SECRET)
        .args(["--otp-length", "12"])
        .output()
        .expect("Failed to run binary");

    assert!(!output.status.success());
    assert!(combined(&output).contains("otp-length"));
}
