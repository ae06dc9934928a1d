// src/runtime/process_manager.rs
//! Process manager for interpreter-backed runtimes
//!
//! Supports multiple interpreters:
//! - Python (python3)
//! - JavaScript (node)
//! - Ruby (ruby)
//! - PHP (php)
//!
//! Programs are piped on stdin; call arguments travel as a JSON array in the
//! `POLYHOST_ARGS` environment variable.

use crate::utils::errors::{HostError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Environment variable carrying JSON-encoded call arguments
pub const ARGS_ENV: &str = "POLYHOST_ARGS";

/// Supported interpreter languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    Ruby,
    Php,
}

impl Language {
    /// Runtime name used as the registry key
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Ruby => "ruby",
            Language::Php => "php",
        }
    }

    /// Look a language up by runtime name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "python" => Some(Language::Python),
            "javascript" | "js" | "node" => Some(Language::JavaScript),
            "ruby" => Some(Language::Ruby),
            "php" => Some(Language::Php),
            _ => None,
        }
    }

    /// Get the command name for this language
    pub fn command(&self) -> &'static str {
        match self {
            Language::Python => "python3",
            Language::JavaScript => "node",
            Language::Ruby => "ruby",
            Language::Php => "php",
        }
    }

    /// Arguments that make the interpreter read its program from stdin
    pub fn default_args(&self) -> Vec<&'static str> {
        match self {
            Language::Python => vec!["-u", "-"], // Unbuffered, program on stdin
            Language::JavaScript => vec!["-"],
            Language::Ruby => vec!["-"],
            Language::Php => vec![], // php reads stdin when no file is given
        }
    }

    /// Get the file extension for this language
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::JavaScript => "js",
            Language::Ruby => "rb",
            Language::Php => "php",
        }
    }

    /// Build a program that loads `script` and prints `function(*args)` as JSON
    ///
    /// `function` must be a plain (optionally dotted) identifier.
    pub fn call_program(&self, script: &str, function: &str) -> Result<String> {
        if !is_identifier(function) {
            return Err(HostError::execution(
                self.name(),
                format!("invalid function name: {:?}", function),
            ));
        }

        let program = match self {
            Language::Python => format!(
                "{script}\nimport json as _ph_json, os as _ph_os\n\
                 _ph_result = {function}(*_ph_json.loads(_ph_os.environ[\"{ARGS_ENV}\"]))\n\
                 print(_ph_json.dumps(_ph_result))\n"
            ),
            Language::JavaScript => format!(
                "{script}\nconst __phResult = {function}(...JSON.parse(process.env.{ARGS_ENV}));\n\
                 console.log(JSON.stringify(__phResult === undefined ? null : __phResult));\n"
            ),
            Language::Ruby => format!(
                "require 'json'\n{script}\n\
                 puts(({function}(*JSON.parse(ENV['{ARGS_ENV}']))).to_json)\n"
            ),
            Language::Php => {
                let body = script.trim_start();
                let body = body.strip_prefix("<?php").unwrap_or(body);
                format!(
                    "<?php\n{body}\n\
                     echo json_encode({function}(...json_decode(getenv('{ARGS_ENV}'), true))), \"\\n\";\n"
                )
            }
        };

        Ok(program)
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Configuration for spawning a process
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Language of the interpreter
    pub language: Language,

    /// Working directory
    pub work_dir: Option<PathBuf>,

    /// Environment variables
    pub env_vars: Vec<(String, String)>,
}

impl SpawnConfig {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            work_dir: None,
            env_vars: vec![],
        }
    }
}

/// Captured result of one interpreter run
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Process manager for spawning interpreter processes
#[derive(Debug, Default)]
pub struct ProcessManager {
    /// Paths to executables (cached)
    executable_paths: HashMap<Language, PathBuf>,
}

impl ProcessManager {
    /// Create a new process manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the interpreter executable for a language
    pub fn find_executable(&mut self, language: Language) -> Result<PathBuf> {
        if let Some(path) = self.executable_paths.get(&language) {
            return Ok(path.clone());
        }

        let command = language.command();

        match which::which(command) {
            Ok(path) => {
                info!("Found {} at {:?}", command, path);
                self.executable_paths.insert(language, path.clone());
                Ok(path)
            }
            Err(e) => Err(HostError::ProcessSpawnFailed(format!(
                "Executable '{}' not found in PATH: {}",
                command, e
            ))),
        }
    }

    /// Ask the interpreter for its version (first line of `--version`)
    pub async fn version(&self, executable: &Path) -> Result<String> {
        let output = Command::new(executable)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| HostError::ProcessSpawnFailed(format!("Failed to query version: {}", e)))?;

        let text = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };

        Ok(String::from_utf8_lossy(&text)
            .lines()
            .next()
            .unwrap_or("unknown")
            .trim()
            .to_string())
    }

    /// Spawn an interpreter with piped stdio, `args_json` in its environment
    ///
    /// The child is killed if its handle is dropped.
    pub fn spawn(&self, executable: &Path, config: &SpawnConfig, args_json: &str) -> Result<Child> {
        debug!("Spawning {:?} process: {:?}", config.language, executable);

        let mut command = Command::new(executable);

        for arg in config.language.default_args() {
            command.arg(arg);
        }

        if let Some(work_dir) = &config.work_dir {
            command.current_dir(work_dir);
        }

        for (key, value) in &config.env_vars {
            command.env(key, value);
        }
        command.env(ARGS_ENV, args_json);

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| HostError::ProcessSpawnFailed(format!("Failed to spawn process: {}", e)))?;

        debug!("Process spawned with PID: {:?}", child.id());

        Ok(child)
    }

    /// Stop a child: SIGTERM, wait up to `grace`, then SIGKILL
    pub async fn terminate(&self, child: &mut Child, grace: Duration) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(raw_pid) = child.id() else {
            // Already reaped
            return;
        };
        let pid = Pid::from_raw(raw_pid as i32);

        debug!("Sending SIGTERM to PID {}", pid);
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            warn!("Failed to send SIGTERM to PID {}: {}", pid, e);
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => debug!("PID {} exited with status: {}", pid, status),
            Ok(Err(e)) => warn!("Error waiting for PID {}: {}", pid, e),
            Err(_) => {
                debug!("PID {} still alive after {:?}, sending SIGKILL", pid, grace);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill PID {}: {}", pid, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_command() {
        assert_eq!(Language::Python.command(), "python3");
        assert_eq!(Language::JavaScript.command(), "node");
        assert_eq!(Language::Ruby.command(), "ruby");
        assert_eq!(Language::Php.command(), "php");
    }

    #[test]
    fn test_language_extension() {
        assert_eq!(Language::Python.extension(), "py");
        assert_eq!(Language::JavaScript.extension(), "js");
        assert_eq!(Language::Ruby.extension(), "rb");
    }

    #[test]
    fn test_language_from_name() {
        assert_eq!(Language::from_name("python"), Some(Language::Python));
        assert_eq!(Language::from_name("node"), Some(Language::JavaScript));
        assert_eq!(Language::from_name("cobol"), None);
        for language in [Language::Python, Language::JavaScript, Language::Ruby, Language::Php] {
            assert_eq!(Language::from_name(language.name()), Some(language));
        }
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_identifier("add"));
        assert!(is_identifier("math.sqrt"));
        assert!(is_identifier("_private2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("x); import os; os.system('id'"));
        assert!(!is_identifier("a..b"));
    }

    #[test]
    fn test_call_program_rejects_injection() {
        let result = Language::Python.call_program("", "print('x') or len");
        assert!(matches!(result, Err(HostError::Execution { .. })));
    }

    #[test]
    fn test_php_call_program_has_single_open_tag() {
        let program = Language::Php
            .call_program("<?php function add($a, $b) { return $a + $b; }", "add")
            .unwrap();
        assert_eq!(program.matches("<?php").count(), 1);
        assert!(program.contains("json_encode(add("));
    }

    #[test]
    fn test_find_executable_caches() {
        let mut manager = ProcessManager::new();
        if let Ok(path) = manager.find_executable(Language::Python) {
            assert_eq!(manager.find_executable(Language::Python).unwrap(), path);
        }
    }

    #[tokio::test]
    async fn test_terminate_stops_child() {
        let mut manager = ProcessManager::new();
        let Ok(executable) = manager.find_executable(Language::Python) else {
            return;
        };

        let config = SpawnConfig::new(Language::Python);
        let mut child = manager.spawn(&executable, &config, "[]").unwrap();

        // stdin stays open, so the interpreter blocks reading its program
        manager.terminate(&mut child, Duration::from_millis(200)).await;
        assert!(child.try_wait().unwrap().is_some());
    }
}
