//! IPC transport to the engine process
//!
//! Strictly half-duplex: write one request line, then block for the answer.
//! The endpoint is the child's stdin/stdout pair; closing stdin asks the
//! engine to exit.

use super::manager::EngineSettings;
use super::{ModelError, ModelResult};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A synchronous line channel to a running engine
pub trait Channel: Send {
    fn send_line(&mut self, line: &str) -> ModelResult<()>;

    /// Block until one full line arrives (newline stripped)
    fn read_line(&mut self) -> ModelResult<String>;

    /// Close the endpoint, give the engine `grace` to exit, then force it.
    /// Must leave no running process behind.
    fn close(&mut self, grace: Duration) -> ModelResult<()>;
}

/// Starts engines against a corpus file
pub trait Launcher: Send {
    fn launch(&self, corpus: &Path, settings: &EngineSettings) -> ModelResult<Box<dyn Channel>>;
}

/// Launches `settings.binary` as a child process
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, corpus: &Path, settings: &EngineSettings) -> ModelResult<Box<dyn Channel>> {
        let mut command = Command::new(&settings.binary);
        command
            .arg("--corpus")
            .arg(corpus)
            .arg("--order")
            .arg(settings.order.to_string())
            .arg("--smoothing")
            .arg(settings.smoothing.name())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        debug!("Spawning engine: {:?}", command);
        let child = command.spawn().map_err(|source| ModelError::EngineSpawn {
            binary: settings.binary.clone(),
            source,
        })?;
        Ok(Box::new(PipeChannel::new(child)?))
    }
}

/// Channel over a child's piped stdio
pub struct PipeChannel {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl PipeChannel {
    pub fn new(mut child: Child) -> ModelResult<Self> {
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ModelError::EngineDied);
        };
        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Channel for PipeChannel {
    fn send_line(&mut self, line: &str) -> ModelResult<()> {
        let stdin = self.stdin.as_mut().ok_or(ModelError::EngineDied)?;
        let written = stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush());
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Err(ModelError::EngineDied),
            Err(e) => Err(e.into()),
        }
    }

    fn read_line(&mut self) -> ModelResult<String> {
        let mut line = String::new();
        let n = self.stdout.read_line(&mut line)?;
        if n == 0 {
            return Err(ModelError::EngineDied);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    fn close(&mut self, grace: Duration) -> ModelResult<()> {
        // EOF on stdin is the engine's shutdown signal
        drop(self.stdin.take());

        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait()? {
                Some(status) => {
                    debug!("Engine {} exited with {}", self.child.id(), status);
                    return Ok(());
                }
                None if Instant::now() >= deadline => break,
                None => std::thread::sleep(Duration::from_millis(10)),
            }
        }

        warn!(
            "Engine {} ignored shutdown for {:?}, killing",
            self.child.id(),
            grace
        );
        match self.child.kill() {
            Ok(()) => {}
            // Already exited between the last poll and the kill
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e.into()),
        }
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for PipeChannel {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spawn(script: &str) -> PipeChannel {
        let child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        PipeChannel::new(child).unwrap()
    }

    #[test]
    fn test_round_trip_over_pipes() {
        let mut channel = spawn("while read line; do echo \"got $line\"; done");
        channel.send_line("x a b").unwrap();
        assert_eq!(channel.read_line().unwrap(), "got x a b");
        channel.close(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_dead_engine_is_reported() {
        let mut channel = spawn("exit 0");
        // Reading from an exited process hits EOF
        assert!(matches!(channel.read_line(), Err(ModelError::EngineDied)));
        channel.close(Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn test_close_kills_stubborn_engine() {
        let mut channel = spawn("trap '' TERM; while true; do sleep 1; done");
        let pid = channel.pid();
        let started = Instant::now();
        channel.close(Duration::from_millis(200)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        #[cfg(target_os = "linux")]
        assert!(!Path::new(&format!("/proc/{}", pid)).exists());
        let _ = pid;
    }
}
