// src/runtime/process_runtime.rs
//! Interpreter-backed runtime adapter
//!
//! Each pooled worker runs programs in a fresh interpreter process:
//! - Program piped on stdin, arguments as JSON in `POLYHOST_ARGS`
//! - stdout parsed as JSON when possible, otherwise returned as a string
//! - Non-zero exit reported as an execution error with stderr
//! - On cancellation or timeout the child is terminated (SIGTERM, then SIGKILL)
//!
//! Recognised `RuntimeConfig::options`:
//!
//! | key                 | meaning                                        |
//! |---------------------|------------------------------------------------|
//! | `script`            | path of a source file loaded before each call  |
//! | `work_dir`          | working directory for interpreter processes    |
//! | `env`               | object of extra environment variables          |
//! | `exec_timeout_secs` | per-execution timeout                          |
//! | `kill_grace_ms`     | SIGTERM to SIGKILL delay                       |
//! | `cancel_grace_ms`   | pool grace for cancelled operations            |

use crate::runtime::contract::{Runtime, Value};
use crate::runtime::lifecycle::Lifecycle;
use crate::runtime::process_manager::{Language, ProcessManager, ProcessOutput, SpawnConfig};
use crate::runtime::worker_pool::{Worker, WorkerPool, WorkerPoolConfig};
use crate::utils::config::RuntimeConfig;
use crate::utils::errors::{HostError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

/// Settings shared by every worker of one runtime
#[derive(Debug, Clone)]
struct ProcessSettings {
    executable: PathBuf,
    spawn: SpawnConfig,
    exec_timeout: Option<Duration>,
    kill_grace: Duration,
}

/// One pooled interpreter slot
pub struct ProcessWorker {
    id: usize,
    settings: Arc<ProcessSettings>,
    manager: ProcessManager,
    /// Number of programs executed by this worker
    pub execution_count: u64,
}

impl ProcessWorker {
    fn new(id: usize, settings: Arc<ProcessSettings>) -> Self {
        Self {
            id,
            settings,
            manager: ProcessManager::new(),
            execution_count: 0,
        }
    }

    /// Run one program to completion, honoring `token`
    async fn run_program(&mut self, program: &str, args_json: &str, token: CancellationToken) -> Result<Value> {
        self.execution_count += 1;
        let language = self.settings.spawn.language;

        let mut child = self
            .manager
            .spawn(&self.settings.executable, &self.settings.spawn, args_json)?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostError::ProcessSpawnFailed("Failed to capture stdin".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::ProcessSpawnFailed("Failed to capture stdout".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| HostError::ProcessSpawnFailed("Failed to capture stderr".into()))?;

        let outcome = {
            let io = async {
                stdin.write_all(program.as_bytes()).await?;
                stdin.flush().await?;
                drop(stdin);

                let mut out = Vec::new();
                let mut err = Vec::new();
                let (status, read_out, read_err) = tokio::join!(
                    child.wait(),
                    stdout.read_to_end(&mut out),
                    stderr.read_to_end(&mut err)
                );
                read_out?;
                read_err?;
                Ok::<_, HostError>(ProcessOutput {
                    status: status?,
                    stdout: out,
                    stderr: err,
                })
            };

            let bounded = async {
                match self.settings.exec_timeout {
                    Some(limit) => tokio::time::timeout(limit, io).await.map_err(|_| limit),
                    None => Ok(io.await),
                }
            };

            tokio::select! {
                result = bounded => Some(result),
                _ = token.cancelled() => None,
            }
        };

        match outcome {
            Some(Ok(output)) => interpret_output(language, output?),
            Some(Err(limit)) => {
                debug!("{} worker #{} timed out after {:?}", language.name(), self.id, limit);
                self.manager.terminate(&mut child, self.settings.kill_grace).await;
                Err(HostError::ExecutionTimeout(limit))
            }
            None => {
                debug!("{} worker #{} cancelled, terminating child", language.name(), self.id);
                self.manager.terminate(&mut child, self.settings.kill_grace).await;
                Err(HostError::OperationCancelled)
            }
        }
    }
}

fn interpret_output(language: Language, output: ProcessOutput) -> Result<Value> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("process exited with {}", output.status)
        } else {
            stderr
        };
        return Err(HostError::execution(language.name(), message));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = stdout.trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }

    Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

#[async_trait]
impl Worker for ProcessWorker {
    fn id(&self) -> usize {
        self.id
    }

    async fn shutdown(&mut self) -> Result<()> {
        debug!(
            "Shutting down {} worker #{} after {} executions",
            self.settings.spawn.language.name(),
            self.id,
            self.execution_count
        );
        Ok(())
    }
}

struct Started {
    pool: WorkerPool<ProcessWorker>,
    version: String,
    script: Arc<str>,
}

/// Runtime adapter driving an external interpreter
pub struct ProcessRuntime {
    language: Language,
    lifecycle: Lifecycle<Started>,
}

impl ProcessRuntime {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            lifecycle: Lifecycle::new(language.name()),
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    async fn start(&self, config: &RuntimeConfig) -> Result<Started> {
        let mut manager = ProcessManager::new();
        let executable = manager.find_executable(self.language)?;
        let version = manager.version(&executable).await?;

        let script: Arc<str> = match config.option_str("script") {
            Some(path) => tokio::fs::read_to_string(path).await?.into(),
            None => Arc::from(""),
        };

        let mut spawn = SpawnConfig::new(self.language);
        spawn.work_dir = config.option_str("work_dir").map(PathBuf::from);
        if let Some(env) = config.options.get("env").and_then(|v| v.as_object()) {
            spawn.env_vars = env
                .iter()
                .map(|(k, v)| {
                    let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), value)
                })
                .collect();
        }

        let settings = Arc::new(ProcessSettings {
            executable,
            spawn,
            exec_timeout: config.option_u64("exec_timeout_secs").map(Duration::from_secs),
            kill_grace: config
                .option_u64("kill_grace_ms")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_KILL_GRACE),
        });

        let mut pool_config = WorkerPoolConfig::new(self.language.name(), config.pool_size());
        if let Some(grace) = config.option_u64("cancel_grace_ms") {
            pool_config = pool_config.with_cancel_grace(Duration::from_millis(grace));
        }

        let pool = WorkerPool::initialize(pool_config, move |id| {
            let settings = Arc::clone(&settings);
            async move { Ok(ProcessWorker::new(id, settings)) }
        })
        .await?;

        info!("{} runtime ready ({})", self.language.name(), version);

        Ok(Started {
            pool,
            version,
            script,
        })
    }

    async fn run(&self, cancel: &CancellationToken, program: String, args: &[Value]) -> Result<Value> {
        let started = self.lifecycle.running()?;
        let args_json = serde_json::to_string(args)
            .map_err(|e| HostError::execution(self.language.name(), format!("unencodable arguments: {}", e)))?;

        started
            .pool
            .run(cancel, move |worker: &mut ProcessWorker, token| {
                Box::pin(async move { worker.run_program(&program, &args_json, token).await })
            })
            .await
    }
}

#[async_trait]
impl Runtime for ProcessRuntime {
    async fn initialize(&self, cancel: &CancellationToken, config: &RuntimeConfig) -> Result<()> {
        self.lifecycle.begin()?;

        let result = tokio::select! {
            result = self.start(config) => result,
            _ = cancel.cancelled() => Err(HostError::OperationCancelled),
        };

        match result {
            Ok(started) => {
                self.lifecycle.finish(started);
                Ok(())
            }
            Err(e) => {
                self.lifecycle.abort();
                Err(e)
            }
        }
    }

    async fn execute(&self, cancel: &CancellationToken, code: &str, args: &[Value]) -> Result<Value> {
        self.run(cancel, code.to_string(), args).await
    }

    async fn call(&self, cancel: &CancellationToken, function: &str, args: &[Value]) -> Result<Value> {
        let started = self.lifecycle.running()?;
        let program = self.language.call_program(&started.script, function)?;
        self.run(cancel, program, args).await
    }

    async fn shutdown(&self, _cancel: &CancellationToken) -> Result<()> {
        if let Some(started) = self.lifecycle.stop() {
            info!("Shutting down {} runtime", self.language.name());
            started.pool.close().await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        self.language.name()
    }

    fn version(&self) -> String {
        self.lifecycle
            .started()
            .map(|s| s.version.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn python_available() -> bool {
        which::which(Language::Python.command()).is_ok()
    }

    async fn python(options: &[(&str, Value)]) -> ProcessRuntime {
        let mut config = RuntimeConfig::new("python", "3").with_max_concurrency(2);
        for (key, value) in options {
            config = config.with_option(*key, value.clone());
        }
        let runtime = ProcessRuntime::new(Language::Python);
        runtime
            .initialize(&CancellationToken::new(), &config)
            .await
            .unwrap();
        runtime
    }

    #[test]
    fn test_interpret_output() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        let ok = |stdout: &str| ProcessOutput {
            status: ExitStatus::from_raw(0),
            stdout: stdout.as_bytes().to_vec(),
            stderr: vec![],
        };

        assert_eq!(interpret_output(Language::Python, ok("42\n")).unwrap(), json!(42));
        assert_eq!(interpret_output(Language::Python, ok("hello")).unwrap(), json!("hello"));
        assert_eq!(interpret_output(Language::Python, ok("")).unwrap(), Value::Null);

        let failed = ProcessOutput {
            status: ExitStatus::from_raw(1 << 8),
            stdout: vec![],
            stderr: b"Traceback: boom".to_vec(),
        };
        match interpret_output(Language::Python, failed) {
            Err(HostError::Execution { runtime, message }) => {
                assert_eq!(runtime, "python");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_before_initialize_fails() {
        let runtime = ProcessRuntime::new(Language::Python);
        let result = runtime.execute(&CancellationToken::new(), "print(1)", &[]).await;
        assert!(matches!(result, Err(HostError::InvalidState(_))));
        assert_eq!(runtime.version(), "unknown");
    }

    #[tokio::test]
    async fn test_execute_python() {
        if !python_available() {
            return;
        }
        let runtime = python(&[]).await;
        let cancel = CancellationToken::new();

        let value = runtime
            .execute(
                &cancel,
                "import json, os\nargs = json.loads(os.environ['POLYHOST_ARGS'])\nprint(json.dumps(sum(args)))",
                &[json!(1), json!(2), json!(3)],
            )
            .await
            .unwrap();
        assert_eq!(value, json!(6));
        assert!(runtime.version().starts_with("Python"));

        let err = runtime.execute(&cancel, "raise SystemExit('bad')", &[]).await;
        assert!(matches!(err, Err(HostError::Execution { .. })));

        runtime.shutdown(&cancel).await.unwrap();
        let after = runtime.execute(&cancel, "print(1)", &[]).await;
        assert!(matches!(after, Err(HostError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_call_python_script_function() {
        if !python_available() {
            return;
        }
        let mut script = tempfile::Builder::new().suffix(".py").tempfile().unwrap();
        writeln!(script, "def add(a, b):\n    return a + b").unwrap();

        let runtime = python(&[("script", json!(script.path().to_string_lossy()))]).await;
        let value = runtime
            .call(&CancellationToken::new(), "add", &[json!(2), json!(40)])
            .await
            .unwrap();
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        if !python_available() {
            return;
        }
        let runtime = python(&[("kill_grace_ms", json!(100))]).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = runtime.execute(&cancel, "import time\ntime.sleep(30)", &[]).await;
        assert!(matches!(result, Err(HostError::OperationCancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));

        // Both workers are usable again once the child is gone
        let fresh = CancellationToken::new();
        let value = tokio::time::timeout(
            Duration::from_secs(10),
            runtime.execute(&fresh, "print('ok')", &[]),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(value, json!("ok"));
    }

    #[tokio::test]
    async fn test_execution_timeout() {
        if !python_available() {
            return;
        }
        let runtime = python(&[("exec_timeout_secs", json!(1)), ("kill_grace_ms", json!(100))]).await;
        let result = runtime
            .execute(&CancellationToken::new(), "import time\ntime.sleep(30)", &[])
            .await;
        assert!(matches!(result, Err(HostError::ExecutionTimeout(_))));
    }

    #[tokio::test]
    async fn test_initialize_twice_fails() {
        if !python_available() {
            return;
        }
        let runtime = python(&[]).await;
        let again = runtime
            .initialize(&CancellationToken::new(), &RuntimeConfig::new("python", "3"))
            .await;
        assert!(matches!(again, Err(HostError::InvalidState(_))));
    }
}
