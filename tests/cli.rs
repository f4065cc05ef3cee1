//! Integration tests: run the quarry binary and check exit codes and
//! output against a loopback server.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::process::Command;
use std::thread;

fn quarry() -> Command {
    Command::new(env!("CARGO_BIN_EXE_quarry"))
}

#[test]
fn test_help() {
    let out = quarry().arg("--help").output().unwrap();
    assert!(out.status.success(), "quarry --help should succeed");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("fetch"));
}

#[test]
fn test_version() {
    let out = quarry().arg("--version").output().unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("quarry"));
}

#[test]
fn test_no_args_fails() {
    let out = quarry().output().unwrap();
    assert!(!out.status.success(), "quarry with no args should fail");
}

#[test]
fn test_fetch_local_server_json_report() {
    // Tiny one-shot server.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf);
            let body = b"quarry test body";
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(body);
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let out = quarry()
        .args([
            "fetch",
            &format!("http://{}/item", addr),
            "--json",
            "--quiet",
            "--retries",
            "0",
            "--out",
        ])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "fetch should succeed: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let stdout = String::from_utf8_lossy(&out.stdout);
    let report: serde_json::Value = serde_json::from_str(stdout.trim()).expect("JSON report");
    assert_eq!(report["requests"], 1);
    assert_eq!(report["ok"], 1);
    assert_eq!(report["results"][0]["status"], "Http_200");

    // The body landed in the output directory.
    let written = std::fs::read(dir.path().join("fetch-00000")).unwrap();
    assert_eq!(written, b"quarry test body");
}

#[test]
fn test_fetch_dead_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let out = quarry()
        .args([
            "fetch",
            &format!("http://{}/gone", addr),
            "--quiet",
            "--retries",
            "0",
        ])
        .output()
        .unwrap();
    assert!(!out.status.success(), "fetch of dead port should fail");
}
