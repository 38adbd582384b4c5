// Integration tests for the multichat binary
//
// These tests verify that:
// 1. Bad invocations exit with a usage error
// 2. A poll server announces its loop and relays chat between clients
// 3. SIGTERM shuts the server down cleanly
//
// Run with: cargo test --test cli_test

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn multichat() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_multichat"));
    cmd.env("RUST_LOG", "warn").env_remove("MULTICHAT_LOG_FILE");
    cmd
}

/// Wait for process to exit with timeout
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {
                if start.elapsed() > timeout {
                    return None;
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return None,
        }
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn read_message(client: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        client.read_exact(&mut byte).expect("timed out waiting for a message");
        out.push(byte[0]);
        if byte[0] == 0 {
            return out;
        }
    }
}

fn connect(port: u16) -> TcpStream {
    let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client
}

#[test]
fn test_help_lists_strategies() {
    let output = multichat().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("poll"), "help output: {stdout}");
}

#[test]
fn test_poll_without_room_size_is_usage_error() {
    let output = multichat()
        .args(["poll", "9034"])
        .stdout(Stdio::null())
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_no_arguments_is_usage_error() {
    let status = multichat()
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert!(!status.success());
}

#[test]
fn test_unknown_service_fails() {
    let output = multichat()
        .args(["poll", "definitely-not-a-service", "4"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_poll_server_relays_and_stops_on_sigterm() {
    let port = free_port();
    let mut child = multichat()
        .args(["poll", &port.to_string(), "4"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    assert_eq!(line, "started the main poll loop\n");

    let mut first = connect(port);
    let mut second = connect(port);
    // The join notice proves the second client has been accepted.
    let joined = read_message(&mut first);
    assert!(joined.ends_with(b" joined the chat room\n\0"));

    first.write_all(b"hi").unwrap();
    let relayed = read_message(&mut second);
    assert!(relayed.starts_with(b"user "));
    assert!(relayed.ends_with(b": hi\0"));

    // SAFETY: signalling our own child process.
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
    let status = wait_with_timeout(&mut child, Duration::from_secs(5));
    if status.is_none() {
        let _ = child.kill();
    }
    let status = status.expect("server did not exit after SIGTERM");
    assert!(status.success(), "exit status: {status:?}");

    // The server closed every client on the way out.
    let mut rest = Vec::new();
    assert_eq!(second.read_to_end(&mut rest).unwrap_or(0), 0);
}
