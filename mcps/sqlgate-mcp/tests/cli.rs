//! Process-level tests for the sqlgate-mcp binary
//!
//! These spawn the built binary, so they only check behaviour that is not
//! visible through the library: exit on termination signals.

#![cfg(unix)]

use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn stdio_mode_exits_on_sigterm_while_stdin_stays_open() {
    let dir = tempfile::tempdir().unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_sqlgate-mcp"))
        .env_clear()
        .env("SQLGATE_CONFIG_PATH", dir.path().join("config.toml"))
        .env("MCP_TRANSPORT", "stdio")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // Held until the end of the test so stdin never reaches EOF
    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    writeln!(stdin, r#"{{"jsonrpc":"2.0","id":1,"method":"prompts/list"}}"#).unwrap();
    stdin.flush().unwrap();

    let mut reply = String::new();
    stdout.read_line(&mut reply).unwrap();
    let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["id"], 1);

    // Give the signal handlers time to install after startup
    thread::sleep(Duration::from_millis(200));
    let killed = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            child.kill().unwrap();
            panic!("sqlgate-mcp still running 10s after SIGTERM");
        }
        thread::sleep(Duration::from_millis(50));
    };

    assert!(status.success(), "{:?}", status);
    drop(stdin);
}
