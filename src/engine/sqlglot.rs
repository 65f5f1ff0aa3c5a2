use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::translate::{Backend, DialectId, TranslateRequest};

const WORKER_SCRIPT: &str = include_str!("worker.py");

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Op {
    Transpile {
        sql: String,
        read: Option<String>,
        write: Option<String>,
        error_level: &'static str,
    },
    Dialects,
}

#[derive(Serialize, Debug)]
struct Envelope {
    id: u64,
    #[serde(flatten)]
    op: Op,
}

#[derive(Deserialize, Debug, PartialEq)]
struct Reply {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    ok: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl Reply {
    fn into_result(self) -> Result<Value, EngineError> {
        match (self.ok, self.error) {
            (_, Some(message)) => Err(EngineError::Sql(message)),
            (Some(value), None) => Ok(value),
            (None, None) => Err(EngineError::Protocol(
                "reply carries neither a result nor an error".to_string(),
            )),
        }
    }
}

/// First line printed by the worker once its entry points are defined.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(untagged)]
enum Handshake {
    Ready { ready: String },
    Failed { error: String },
}

struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    timeout: Duration,
}

impl Worker {
    /// Takes over the pipes of a freshly spawned worker. Its stderr is
    /// forwarded to the log.
    fn attach(mut child: Child, timeout: Duration) -> Result<Self, EngineError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("worker stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "sqlglot_worker", "{line}");
                }
            });
        }
        Ok(Worker {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
            timeout,
        })
    }

    async fn handshake(&mut self) -> Result<String, EngineError> {
        let line = self.stdout.next_line().await?.ok_or_else(|| {
            EngineError::Protocol("worker exited before it was ready".to_string())
        })?;
        match serde_json::from_str::<Handshake>(&line)? {
            Handshake::Ready { ready } => Ok(ready),
            Handshake::Failed { error } => Err(EngineError::Protocol(error)),
        }
    }

    async fn exchange(&mut self, op: Op) -> Result<Value, EngineError> {
        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.round_trip(op))
            .await
            .map_err(|_| EngineError::Timeout(timeout))?
    }

    async fn round_trip(&mut self, op: Op) -> Result<Value, EngineError> {
        self.next_id += 1;
        let id = self.next_id;
        let mut line = serde_json::to_string(&Envelope { id, op })?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let reply = self
            .stdout
            .next_line()
            .await?
            .ok_or_else(|| EngineError::Protocol("worker closed its output".to_string()))?;
        let reply: Reply = serde_json::from_str(&reply)?;
        if reply.id != Some(id) {
            return Err(EngineError::Protocol(format!(
                "expected reply {id}, got {:?}",
                reply.id
            )));
        }
        reply.into_result()
    }

    fn shutdown(&mut self) {
        if let Err(err) = self.child.start_kill() {
            debug!(error = %err, "worker already gone");
        }
    }
}

/// Runs sqlglot in a long-lived Python worker and talks to it over stdio.
pub struct SqlglotEngine {
    config: EngineConfig,
    worker: Arc<Mutex<Option<Worker>>>,
}

impl SqlglotEngine {
    pub fn new(config: EngineConfig) -> Self {
        SqlglotEngine {
            config,
            worker: Arc::new(Mutex::new(None)),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, EngineError> {
        let command = format!("{} {}", self.config.python, args.join(" "));
        debug!(%command, "running");
        let output = Command::new(&self.config.python)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: self.config.python.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(EngineError::Command {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn spawn_worker(&self) -> Result<(Worker, String), EngineError> {
        let child = Command::new(&self.config.python)
            .arg("-u")
            .arg("-c")
            .arg(WORKER_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.config.python.clone(),
                source,
            })?;
        let mut worker = Worker::attach(child, self.config.request_timeout())?;
        let version = worker.handshake().await?;
        Ok((worker, version))
    }

    async fn call(&self, op: Op) -> Result<Value, EngineError> {
        // Detached so a dropped caller cannot leave a reply unread on the pipe.
        tokio::spawn(exchange(Arc::clone(&self.worker), op))
            .await
            .map_err(|err| EngineError::Protocol(format!("worker task failed: {err}")))?
    }
}

async fn exchange(worker: Arc<Mutex<Option<Worker>>>, op: Op) -> Result<Value, EngineError> {
    let mut guard = worker.lock().await;
    let running = guard.as_mut().ok_or(EngineError::NotRunning)?;
    match running.exchange(op).await {
        Err(
            err @ (EngineError::Io(_) | EngineError::Protocol(_) | EngineError::Timeout(_)),
        ) => {
            error!(error = %err, "translation worker failed, shutting it down");
            running.shutdown();
            *guard = None;
            Err(err)
        }
        other => other,
    }
}

impl Backend for SqlglotEngine {
    async fn start(&self) -> Result<(), EngineError> {
        let version = self.run(&["--version"]).await?;
        info!(python = %self.config.python, %version, "python runtime loaded");

        if self.config.install {
            let pip = self.run(&["-m", "pip", "--version"]).await?;
            info!(%pip, "package manager loaded");
            info!(package = %self.config.package, "installing translation library");
            self.run(&[
                "-m",
                "pip",
                "install",
                "--quiet",
                "--disable-pip-version-check",
                self.config.package.as_str(),
            ])
            .await?;
        } else {
            debug!("package installation disabled, expecting sqlglot to be importable");
        }

        let (worker, version) = self.spawn_worker().await?;
        info!(sqlglot = %version, "translation worker started");
        *self.worker.lock().await = Some(worker);
        Ok(())
    }

    async fn transpile(&self, request: TranslateRequest) -> Result<String, EngineError> {
        let op = Op::Transpile {
            sql: request.sql,
            read: request.read.map(|dialect| dialect.0),
            write: request.write.map(|dialect| dialect.0),
            error_level: request.error_level.as_sqlglot(),
        };
        match self.call(op).await? {
            Value::String(sql) => Ok(sql),
            other => Err(EngineError::Protocol(format!(
                "expected translated text, got {other}"
            ))),
        }
    }

    async fn dialects(&self) -> Result<Vec<DialectId>, EngineError> {
        let value = self.call(Op::Dialects).await?;
        Ok(serde_json::from_value(value)?)
    }
}
