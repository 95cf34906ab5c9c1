//! TCP server and per-connection handling

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use doorlink_proto::{CommandResponse, PUSH_BUTTON};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Largest request line the mock reads
const MAX_REQUEST_LEN: u64 = 1024;

/// How the mock answers commands
#[derive(Debug, Clone, Default)]
pub enum Behavior {
    /// Behave like the controller firmware
    #[default]
    Normal,
    /// Send these bytes verbatim to every command
    Reply(String),
    /// Read the command and never answer
    Silent,
    /// Close right after reading the command
    Hangup,
}

#[derive(Debug, Default)]
pub struct Stats {
    connections: AtomicUsize,
    heartbeats: AtomicUsize,
    commands: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections: usize,
    pub heartbeats: usize,
    pub commands: usize,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
        }
    }
}

pub struct MockController {
    listener: TcpListener,
    behavior: Arc<Behavior>,
    stats: Arc<Stats>,
}

impl MockController {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "mock controller listening");

        Ok(Self { listener, behavior: Arc::new(Behavior::Normal), stats: Arc::default() })
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = Arc::new(behavior);
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared counters, still readable once the server is running
    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let behavior = self.behavior.clone();
            let stats = self.stats.clone();
            stats.connections.fetch_add(1, Ordering::Relaxed);

            tokio::spawn(async move {
                tracing::debug!(%addr, "connection");
                if let Err(e) = handle(stream, &behavior, &stats).await {
                    tracing::warn!(%addr, error = %e, "connection error");
                }
                tracing::debug!(%addr, "connection closed");
            });
        }
    }

    /// Run on a background task
    pub fn spawn(self) -> JoinHandle<std::io::Result<()>> {
        tokio::spawn(self.run())
    }
}

async fn handle(mut stream: TcpStream, behavior: &Behavior, stats: &Stats) -> std::io::Result<()> {
    let mut raw = Vec::new();
    BufReader::new(&mut stream).take(MAX_REQUEST_LEN).read_until(b'\n', &mut raw).await?;
    let line = String::from_utf8_lossy(&raw);
    let line = line.trim();
    tracing::info!(request = %line, "received");

    if line.starts_with("ARE_YOU_ALIVE") {
        stats.heartbeats.fetch_add(1, Ordering::Relaxed);
        stream.write_all(b"ACK\n").await?;
        return Ok(());
    }

    stats.commands.fetch_add(1, Ordering::Relaxed);
    let reply = match behavior {
        Behavior::Normal => match respond(line) {
            Some(reply) => reply,
            None => {
                tracing::warn!(request = %line, "invalid request");
                return Ok(());
            }
        },
        Behavior::Reply(reply) => reply.clone(),
        Behavior::Silent => {
            // Hold the connection until the client gives up.
            let mut sink = Vec::new();
            stream.read_to_end(&mut sink).await?;
            return Ok(());
        }
        Behavior::Hangup => return Ok(()),
    };

    tracing::info!(response = %reply.trim_end(), "sending");
    stream.write_all(reply.as_bytes()).await?;
    Ok(())
}

/// Firmware response to one request line; `None` when it would just hang up
pub fn respond(line: &str) -> Option<String> {
    if line.starts_with("COMMAND:") {
        // Legacy clients: bare object, no terminator.
        return Some(r#"{"success":true,"message":"OK"}"#.to_string());
    }

    let request: serde_json::Value = serde_json::from_str(line).ok()?;
    let cmd = request.get("cmd").and_then(|v| v.as_str()).unwrap_or_default();
    let target = request.get("target").and_then(|v| v.as_str()).unwrap_or_default();
    let duration = request.get("duration").and_then(|v| v.as_u64()).unwrap_or(5000);

    let response = if cmd == PUSH_BUTTON {
        tracing::info!(target, duration, "pressing door button");
        CommandResponse::ok(format!("{} door opened successfully", capitalize(target)), Some(target.to_string()))
    } else {
        CommandResponse::err("Unknown command", format!("Command '{cmd}' not recognized"))
    };

    let mut reply = serde_json::to_string(&response).ok()?;
    reply.push('\n');
    Some(reply)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
