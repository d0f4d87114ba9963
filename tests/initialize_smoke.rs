use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::{Value, json};

const SERVER_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(200);

/// A spawned `liquid-ls` with its protocol streams
struct Session {
    child: Child,
    reader: BufReader<ChildStdout>,
}

impl Session {
    fn start() -> Self {
        let bin_path = std::env::var("CARGO_BIN_EXE_liquid-ls")
            .unwrap_or_else(|_| "target/debug/liquid-ls".to_string());

        let mut child = Command::new(bin_path)
            .arg("--no-fhir")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .env("LIQUID_LS_TEST_EXIT", "1")
            .spawn()
            .expect("Failed to spawn language server");

        let stdout = child.stdout.take().expect("Child stdout should be available");
        Self {
            child,
            reader: BufReader::new(stdout),
        }
    }

    fn send(&mut self, message: &Value) {
        let body = message.to_string();
        let stdin = self.child.stdin.as_mut().expect("Child stdin should be available");
        write!(stdin, "Content-Length: {}\r\n\r\n{}", body.len(), body)
            .expect("Failed to write message");
        stdin.flush().expect("Failed to flush stdin");
    }

    fn receive(&mut self) -> Value {
        let started = Instant::now();
        let mut content_length = None;

        loop {
            assert!(started.elapsed() < SERVER_TIMEOUT, "Timeout waiting for headers");

            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => panic!("Unexpected EOF while reading headers"),
                Ok(_) if line.trim().is_empty() => break,
                Ok(_) => {
                    if let Some(length) = line.strip_prefix("Content-Length:") {
                        content_length =
                            Some(length.trim().parse::<usize>().expect("Invalid Content-Length"));
                    }
                }
                Err(e) => panic!("Error reading headers: {}", e),
            }
        }

        let mut body = vec![0u8; content_length.expect("Missing Content-Length header")];
        self.reader.read_exact(&mut body).expect("Failed to read body");
        serde_json::from_slice(&body).expect("Response body should be JSON")
    }

    /// Skip messages until one with the given method arrives
    fn receive_notification(&mut self, method: &str) -> Value {
        loop {
            let message = self.receive();
            if message.get("method").and_then(Value::as_str) == Some(method) {
                return message;
            }
        }
    }

    fn shutdown(mut self) {
        drop(self.child.stdin.take());
        std::thread::sleep(SHUTDOWN_GRACE_PERIOD);

        match self.child.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) => {
                let _ = self.child.kill();
                let _ = self.child.wait();
            }
            Err(e) => panic!("Error checking server status: {}", e),
        }
    }
}

fn initialize(session: &mut Session) -> Value {
    session.send(&json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "processId": null,
            "rootUri": null,
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0" }
        }
    }));
    session.receive()
}

#[test]
fn initialize_smoke() {
    let mut session = Session::start();
    let response = initialize(&mut session);

    assert_eq!(response.get("jsonrpc").and_then(Value::as_str), Some("2.0"));
    assert_eq!(response.get("id").and_then(Value::as_i64), Some(1));

    let result = response.get("result").expect("Response should contain 'result'");
    assert_eq!(
        result["capabilities"]["textDocumentSync"].as_i64(),
        Some(1),
        "Server should request full text sync"
    );
    assert_eq!(result["serverInfo"]["name"].as_str(), Some("liquid-ls"));

    session.shutdown();
}

#[test]
fn open_document_publishes_diagnostics() {
    let mut session = Session::start();
    initialize(&mut session);
    session.send(&json!({ "jsonrpc": "2.0", "method": "initialized", "params": {} }));
    session.send(&json!({
        "jsonrpc": "2.0",
        "method": "textDocument/didOpen",
        "params": {
            "textDocument": {
                "uri": "file:///templates/_Broken.liquid",
                "languageId": "liquid",
                "version": 1,
                "text": "{% if x %}hello"
            }
        }
    }));

    let notification = session.receive_notification("textDocument/publishDiagnostics");
    let params = &notification["params"];
    assert_eq!(params["uri"].as_str(), Some("file:///templates/_Broken.liquid"));

    let diagnostics = params["diagnostics"].as_array().expect("diagnostics array");
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0]["severity"].as_i64(), Some(1));
    assert_eq!(diagnostics[0]["source"].as_str(), Some("liquid-ls"));
    assert_eq!(diagnostics[0]["range"]["start"]["line"].as_i64(), Some(0));
    assert!(diagnostics[0]["message"]
        .as_str()
        .is_some_and(|m| m.contains("endif")));

    session.shutdown();
}
