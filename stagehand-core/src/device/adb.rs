//! Production transport: the `adb` executable.

use super::{CommandOutput, DeviceTransport};
use crate::error::{Error, Result};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Runs `adb [-s serial] args...` as a child process with a deadline.
#[derive(Debug, Clone)]
pub struct AdbTransport {
    program: PathBuf,
    serial: Option<String>,
}

impl AdbTransport {
    pub fn new(program: impl Into<PathBuf>, serial: Option<String>) -> Self {
        Self {
            program: program.into(),
            serial,
        }
    }

    fn command_line(&self, args: &[String]) -> String {
        let mut parts = vec![self.program.display().to_string()];
        if let Some(serial) = &self.serial {
            parts.push("-s".to_string());
            parts.push(serial.clone());
        }
        parts.extend(args.iter().cloned());
        parts.join(" ")
    }
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl DeviceTransport for AdbTransport {
    fn execute(&self, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.program);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::trace!(command = %self.command_line(args), "spawning adb");
        let mut child = cmd.spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() > timeout {
                        reap(&mut child);
                        // Detach the readers: a grandchild (an adb server
                        // forked on first use) may hold the pipes open
                        drop(stdout);
                        drop(stderr);
                        return Err(Error::DeviceUnresponsive {
                            command: self.command_line(args),
                            timeout_secs: timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    reap(&mut child);
                    return Err(Error::Io(e));
                }
            }
        };

        Ok(CommandOutput {
            status: status.code(),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        })
    }

    fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }
}
