//! LLM clients.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use super::error::{LlmError, LlmResult};
use super::protocol::{
    methods, ChatParams, ChatResponse, ErrorInfo, RequestEnvelope, ResponseEnvelope,
};
use crate::config::LlmSettings;

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>>;

/// Plain-text prompts in, model text out.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> LlmResult<String>;
}

/// Talks to an LLM bridge executable over NDJSON on stdin/stdout.
///
/// The bridge owns the provider integration; this side only frames
/// requests and matches responses by id.
pub struct ProcessLlmClient {
    stdin: Arc<Mutex<BufWriter<ChildStdin>>>,
    pending: Pending,
    _child: Child,
    reader_task: tokio::task::JoinHandle<()>,
    timeout: Duration,
    model: Option<String>,
    api_key: Option<String>,
}

impl ProcessLlmClient {
    pub fn spawn<P: AsRef<Path>>(command: P, args: &[String], timeout: Duration) -> LlmResult<Self> {
        let mut child = Command::new(command.as_ref())
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(LlmError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or(LlmError::ChannelClosed)?;
        let stdout = child.stdout.take().ok_or(LlmError::ChannelClosed)?;
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_task = Self::spawn_reader_task(stdout, pending.clone());

        debug!(command = %command.as_ref().display(), "spawned LLM bridge");
        Ok(Self {
            stdin: Arc::new(Mutex::new(BufWriter::new(stdin))),
            pending,
            _child: child,
            reader_task,
            timeout,
            model: None,
            api_key: None,
        })
    }

    pub fn from_settings(settings: &LlmSettings, command: &Path, api_key: Option<String>) -> LlmResult<Self> {
        let mut client = Self::spawn(command, &settings.args, settings.timeout())?;
        client.model = settings.model.clone();
        client.api_key = api_key;
        Ok(client)
    }

    fn spawn_reader_task(stdout: ChildStdout, pending: Pending) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => match serde_json::from_str::<ResponseEnvelope>(&line) {
                        Ok(response) => {
                            if let Some(tx) = pending.lock().await.remove(&response.id) {
                                let _ = tx.send(response);
                            }
                        }
                        Err(error) => warn!(%error, "failed to parse LLM bridge response"),
                    },
                    Err(error) => {
                        warn!(%error, "LLM bridge read error");
                        break;
                    }
                }
            }

            for (id, tx) in pending.lock().await.drain() {
                let _ = tx.send(ResponseEnvelope {
                    id,
                    success: false,
                    result: None,
                    error: Some(ErrorInfo {
                        code: "BRIDGE_EXITED".to_string(),
                        message: "LLM bridge exited unexpectedly".to_string(),
                    }),
                });
            }
        })
    }

    async fn request(&self, method: &str, params: serde_json::Value) -> LlmResult<serde_json::Value> {
        let id = uuid::Uuid::new_v4().to_string();
        let envelope = RequestEnvelope {
            id: id.clone(),
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        {
            let line = serde_json::to_string(&envelope).map_err(LlmError::SerializeFailed)? + "\n";
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(LlmError::WriteFailed)?;
            stdin.flush().await.map_err(LlmError::WriteFailed)?;
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(received) => received?,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(LlmError::Timeout(self.timeout.as_secs()));
            }
        };

        if response.success {
            Ok(response.result.unwrap_or(serde_json::Value::Null))
        } else {
            let error = response.error.unwrap_or_else(|| ErrorInfo {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
            });
            Err(LlmError::remote(error.code, error.message))
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.reader_task.is_finished()
    }
}

#[async_trait]
impl LlmClient for ProcessLlmClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> LlmResult<String> {
        let params = ChatParams {
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
        };
        let params = serde_json::to_value(params).map_err(LlmError::SerializeFailed)?;
        let result = self.request(methods::CHAT, params).await?;
        let response: ChatResponse =
            serde_json::from_value(result).map_err(LlmError::DeserializeFailed)?;
        Ok(response.content)
    }
}
