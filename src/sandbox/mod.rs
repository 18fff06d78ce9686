//! Deadline-bounded execution of candidate programs
//!
//! Every run gets a fresh worker process in a fresh scratch directory with
//! null stdio. The worker reports how the program ended by writing a JSON
//! [`TrialOutcome`]; the driver enforces the deadline from outside, kills a
//! worker that overstays and reaps it before returning.

mod outcome;

pub use outcome::{
    FailureLocation, OutcomeKind, TrialOutcome, EXIT_STATUS_EXCEPTION, TIMEOUT_EXCEPTION,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Python harness passed to the interpreter with `-c`
pub const HARNESS: &str = include_str!("../../scripts/trial_harness.py");

const RESULT_FILE: &str = "result.json";
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("sandbox command is empty")]
    EmptyCommand,

    #[error("cannot run {path}: {source}")]
    Target {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start worker {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {pid} is still running after being killed")]
    Orphaned { pid: u32 },

    #[error("sandbox I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type SandboxResult<T> = Result<T, SandboxError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Python interpreter used for the harness
    pub interpreter: String,
    pub deadline_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            deadline_secs: 10,
        }
    }
}

impl SandboxConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// One finished run
#[derive(Debug, Clone)]
pub struct Trial {
    pub outcome: TrialOutcome,
    pub worker_pid: u32,
    pub elapsed: Duration,
}

/// Runs programs under a worker command and a deadline
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    /// Worker argv prefix; the target path and result path are appended
    command: Vec<String>,
    deadline: Duration,
}

impl SandboxRunner {
    /// Python harness runner
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            command: vec![
                config.interpreter.clone(),
                "-c".to_string(),
                HARNESS.to_string(),
            ],
            deadline: config.deadline(),
        }
    }

    /// Runner with a custom worker. The worker is invoked as
    /// `<command..> <target> <result.json>` and may leave the result file
    /// unwritten, in which case its exit status decides the outcome.
    pub fn with_command(command: Vec<String>, deadline: Duration) -> Self {
        Self { command, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Whether the worker program can be started at all
    pub fn is_available(&self) -> bool {
        let Some(program) = self.command.first() else {
            return false;
        };
        Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Write `text` to `<scratch>/<file_name>` and run it.
    pub fn run_source(&self, text: &str, file_name: &str) -> SandboxResult<Trial> {
        let dir = tempfile::Builder::new()
            .prefix("unnatural-source-")
            .tempdir()?;
        let path = dir.path().join(file_name);
        std::fs::write(&path, text)?;
        self.run(&path)
    }

    /// Run the program at `path` to completion or the deadline.
    pub fn run(&self, path: &Path) -> SandboxResult<Trial> {
        let (program, args) = self.command.split_first().ok_or(SandboxError::EmptyCommand)?;
        let target = path.canonicalize().map_err(|source| SandboxError::Target {
            path: path.to_path_buf(),
            source,
        })?;

        let scratch = tempfile::Builder::new()
            .prefix("unnatural-trial-")
            .tempdir()?;
        let result_path = scratch.path().join(RESULT_FILE);

        let started = Instant::now();
        let mut child = Command::new(program)
            .args(args)
            .arg(&target)
            .arg(&result_path)
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                program: program.clone(),
                source,
            })?;
        let pid = child.id();
        debug!("Worker {} running {}", pid, target.display());

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if started.elapsed() >= self.deadline {
                warn!(
                    "Worker {} exceeded {:.1}s on {}; killing",
                    pid,
                    self.deadline.as_secs_f64(),
                    target.display()
                );
                if let Err(e) = child.kill() {
                    // Already exited between the poll and the kill
                    if e.kind() != std::io::ErrorKind::InvalidInput {
                        return Err(e.into());
                    }
                }
                child.wait()?;
                if child.try_wait()?.is_none() {
                    return Err(SandboxError::Orphaned { pid });
                }
                break None;
            }
            std::thread::sleep(POLL_INTERVAL);
        };
        let elapsed = started.elapsed();

        let outcome = match status {
            None => TrialOutcome::timeout(self.deadline),
            Some(status) => read_outcome(&result_path, status),
        };
        debug!("Worker {} finished in {:?}: {}", pid, elapsed, outcome);

        Ok(Trial {
            outcome,
            worker_pid: pid,
            elapsed,
        })
    }
}

/// The worker's own report if it wrote a readable one, else its exit status
fn read_outcome(result_path: &Path, status: ExitStatus) -> TrialOutcome {
    let Ok(text) = std::fs::read_to_string(result_path) else {
        return TrialOutcome::from_exit_status(status);
    };
    match serde_json::from_str(&text) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Unreadable worker result ({}); using exit status", e);
            TrialOutcome::from_exit_status(status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python() -> Option<SandboxRunner> {
        let runner = SandboxRunner::new(&SandboxConfig {
            deadline_secs: 20,
            ..Default::default()
        });
        if runner.is_available() {
            Some(runner)
        } else {
            eprintln!("python3 not found, skipping");
            None
        }
    }

    #[cfg(unix)]
    fn shell(deadline: Duration) -> SandboxRunner {
        SandboxRunner::with_command(vec!["sh".to_string()], deadline)
    }

    #[test]
    fn test_python_clean_run() {
        let Some(runner) = python() else { return };
        let trial = runner.run_source("x = [i * i for i in range(10)]\nprint(x)\n", "ok.py").unwrap();
        assert!(trial.outcome.is_clean(), "{}", trial.outcome);
    }

    #[test]
    fn test_python_exception_location() {
        let Some(runner) = python() else { return };
        let source = "def f(x):\n    return x / 0\n\nf(1)\n";
        let trial = runner.run_source(source, "boom.py").unwrap();
        assert_eq!(trial.outcome.exception_name(), "ZeroDivisionError");
        let location = trial.outcome.location.unwrap();
        assert_eq!(location.filename, "boom.py");
        assert_eq!(location.line, 2);
        assert_eq!(location.function.as_deref(), Some("f"));
    }

    #[test]
    fn test_python_syntax_error_is_captured() {
        let Some(runner) = python() else { return };
        let trial = runner.run_source("x = 1\nif x\n    pass\n", "bad.py").unwrap();
        assert_eq!(trial.outcome.exception_name(), "SyntaxError");
        assert_eq!(trial.outcome.line(), Some(2));
    }

    #[test]
    fn test_python_infinite_loop_times_out() {
        if python().is_none() {
            return;
        }
        let runner = SandboxRunner::new(&SandboxConfig {
            deadline_secs: 1,
            ..Default::default()
        });
        let trial = runner.run_source("while True:\n    pass\n", "spin.py").unwrap();
        assert_eq!(trial.outcome.kind(), OutcomeKind::Timeout);
        assert_eq!(trial.outcome.exception_name(), TIMEOUT_EXCEPTION);
        #[cfg(target_os = "linux")]
        assert!(!Path::new(&format!("/proc/{}", trial.worker_pid)).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_without_result() {
        let trial = shell(Duration::from_secs(5)).run_source("exit 3\n", "t.sh").unwrap();
        assert_eq!(trial.outcome.exception_name(), EXIT_STATUS_EXCEPTION);

        let trial = shell(Duration::from_secs(5)).run_source("exit 0\n", "t.sh").unwrap();
        assert!(trial.outcome.is_clean());
    }

    #[cfg(unix)]
    #[test]
    fn test_worker_result_file_wins() {
        let script = r#"printf '{"exception":"ValueError","message":"bad","location":{"filename":"t.py","line":4,"function":"f"}}' > "$1"
exit 1
"#;
        let trial = shell(Duration::from_secs(5)).run_source(script, "t.sh").unwrap();
        assert_eq!(trial.outcome.exception_name(), "ValueError");
        assert_eq!(trial.outcome.line(), Some(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_deadline_kills_and_reaps() {
        let deadline = Duration::from_millis(300);
        let trial = shell(deadline)
            .run_source("while :; do :; done\n", "spin.sh")
            .unwrap();
        assert_eq!(trial.outcome.kind(), OutcomeKind::Timeout);
        assert!(trial.elapsed >= deadline);
        assert!(trial.elapsed < deadline + Duration::from_secs(5));
        #[cfg(target_os = "linux")]
        assert!(!Path::new(&format!("/proc/{}", trial.worker_pid)).exists());
    }

    #[test]
    fn test_missing_target() {
        let runner = SandboxRunner::with_command(vec!["sh".to_string()], Duration::from_secs(1));
        assert!(matches!(
            runner.run(Path::new("/definitely/not/here.py")),
            Err(SandboxError::Target { .. })
        ));
    }
}
