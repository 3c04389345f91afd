//! Shared test support: a scripted fake MQI engine.
//!
//! The fake engine is an in-process loopback listener that speaks the real
//! wire protocol (password handshake, framed commands, JSON replies) but
//! answers from a prepared script instead of running Prolog. Tests attach
//! to it with `EngineConfig { launch: false, .. }`, which exercises the
//! full public surface short of process spawning; process lifecycle is
//! covered separately with mock engine executables.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

use prolog_mqi::framing::{read_frame, write_frame};
use prolog_mqi::EngineConfig;

/// The secret the fake engine accepts.
pub const TEST_PASSWORD: &str = "test-secret";

/// Opt-in wire tracing for debugging: `RUST_LOG=prolog_mqi=trace`.
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_test_writer(),
        )
        .try_init();
}

/// One scripted exchange: the command the engine expects next (matched as
/// a substring) and the raw reply payload it sends back, preceded by
/// `heartbeats` bare `.` bytes.
pub struct Step {
    pub expect: &'static str,
    pub heartbeats: usize,
    pub reply: String,
}

/// A scripted step with no heartbeats.
pub fn step(expect: &'static str, reply: impl Into<String>) -> Step {
    Step {
        expect,
        heartbeats: 0,
        reply: reply.into(),
    }
}

/// A scripted step that emits heartbeat bytes before its reply.
pub fn step_with_heartbeats(
    expect: &'static str,
    heartbeats: usize,
    reply: impl Into<String>,
) -> Step {
    Step {
        expect,
        heartbeats,
        reply: reply.into(),
    }
}

// ---- reply builders ----

pub fn true_reply(answers: serde_json::Value) -> String {
    json!({"functor": "true", "args": [answers]}).to_string()
}

/// The `true([[]])` acknowledgment.
pub fn ack() -> String {
    true_reply(json!([[]]))
}

pub fn false_reply() -> String {
    json!({"functor": "false", "args": []}).to_string()
}

pub fn exception(kind: &str) -> String {
    json!({"functor": "exception", "args": [kind]}).to_string()
}

pub fn exception_term(term: serde_json::Value) -> String {
    json!({"functor": "exception", "args": [term]}).to_string()
}

/// A `<name> = <value>` binding in the engine's JSON shape.
pub fn binding(name: &str, value: serde_json::Value) -> serde_json::Value {
    json!({"functor": "=", "args": [{"functor": "variable", "args": [name]}, value]})
}

fn handshake_reply() -> String {
    true_reply(json!([[
        {"functor": "threads", "args": ["fake-comm-1", "fake-goal-1"]},
        {"functor": "version", "args": [1, 0]}
    ]]))
}

/// Whether a served connection ended the engine or just the session.
#[derive(PartialEq)]
enum Served {
    SessionEnded,
    Quit,
}

/// The scripted fake engine.
pub struct FakeEngine {
    pub port: u16,
    pub quit_received: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl FakeEngine {
    /// Bind a loopback TCP listener and serve connections against the
    /// script. Connections are served one at a time; `quit` stops the
    /// engine.
    pub async fn spawn(script: Vec<Step>) -> FakeEngine {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake engine");
        let port = listener.local_addr().expect("local addr").port();
        let script = Arc::new(Mutex::new(VecDeque::from(script)));
        let quit_received = Arc::new(AtomicBool::new(false));

        let quit_flag = Arc::clone(&quit_received);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                if serve_connection(stream, Arc::clone(&script)).await == Served::Quit {
                    quit_flag.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        FakeEngine {
            port,
            quit_received,
            handle,
        }
    }

    /// Same fake engine over a Unix domain socket.
    #[cfg(unix)]
    pub async fn spawn_unix(path: &std::path::Path, script: Vec<Step>) -> FakeEngine {
        let listener = UnixListener::bind(path).expect("bind fake engine socket");
        let script = Arc::new(Mutex::new(VecDeque::from(script)));
        let quit_received = Arc::new(AtomicBool::new(false));

        let quit_flag = Arc::clone(&quit_received);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                if serve_connection(stream, Arc::clone(&script)).await == Served::Quit {
                    quit_flag.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        FakeEngine {
            port: 0,
            quit_received,
            handle,
        }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

async fn serve_connection<S>(stream: S, script: Arc<Mutex<VecDeque<Step>>>) -> Served
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    // Password handshake.
    let Ok(password) = read_frame(&mut reader).await else {
        return Served::SessionEnded;
    };
    if password != TEST_PASSWORD {
        let _ = write_frame(&mut writer, &exception("password_mismatch")).await;
        return Served::SessionEnded;
    }
    if write_frame(&mut writer, &handshake_reply()).await.is_err() {
        return Served::SessionEnded;
    }

    loop {
        let Ok(command) = read_frame(&mut reader).await else {
            return Served::SessionEnded;
        };
        match command.as_str() {
            "close" => {
                let _ = write_frame(&mut writer, &ack()).await;
                return Served::SessionEnded;
            }
            "quit" => {
                let _ = write_frame(&mut writer, &ack()).await;
                return Served::Quit;
            }
            _ => {
                let next = script.lock().expect("script lock").pop_front();
                let Some(step) = next else {
                    panic!("fake engine received unscripted command: {:?}", command);
                };
                assert!(
                    command.contains(step.expect),
                    "fake engine expected a command containing {:?}, got {:?}",
                    step.expect,
                    command
                );
                for _ in 0..step.heartbeats {
                    writer.write_all(b".").await.expect("heartbeat write");
                    writer.flush().await.expect("heartbeat flush");
                }
                if write_frame(&mut writer, &step.reply).await.is_err() {
                    return Served::SessionEnded;
                }
            }
        }
    }
}

/// An `EngineConfig` that attaches to the fake engine over TCP.
pub fn attach_config(port: u16) -> EngineConfig {
    EngineConfig {
        launch: false,
        port: Some(port),
        password: Some(TEST_PASSWORD.to_string()),
        ..EngineConfig::default()
    }
}

/// A unique throwaway path for Unix-socket tests.
#[cfg(unix)]
pub fn test_socket_path(test_name: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "prolog-mqi-test-{}-{}-{}.sock",
        test_name,
        std::process::id(),
        nanos
    ))
}
