//! Subprocess Runner
//!
//! Blocking `sh -c` execution with captured output, shared by the `exec`
//! builtin, `proc.exec`, and `parallel_exec`. When a timeout is given the
//! child is spawned, polled, and killed on expiry; output pipes are
//! drained by reader threads so a chatty child cannot deadlock on a full
//! pipe.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ProcessOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Run a command line to completion via the shell.
pub fn exec_command(command: &str, timeout_secs: Option<f64>) -> std::io::Result<ProcessOutput> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr was piped");

    let stdout_reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf);
        buf
    });
    let stderr_reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf);
        buf
    });

    let mut timed_out = false;
    let status = match timeout_secs {
        None => child.wait()?,
        Some(secs) => {
            let deadline = Instant::now() + Duration::from_secs_f64(secs.max(0.0));
            loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if Instant::now() >= deadline {
                    timed_out = true;
                    let _ = child.kill();
                    break child.wait()?;
                }
                thread::sleep(Duration::from_millis(5));
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    Ok(ProcessOutput {
        code: status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_code() {
        let out = exec_command("echo hello", None).unwrap();
        assert_eq!(out.code, 0);
        assert_eq!(out.stdout, "hello\n");
        assert!(!out.timed_out);
    }

    #[test]
    fn captures_stderr_and_nonzero_exit() {
        let out = exec_command("echo oops >&2; exit 3", None).unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(out.stderr, "oops\n");
    }

    #[test]
    fn timeout_kills_the_child() {
        let start = Instant::now();
        let out = exec_command("sleep 5", Some(0.1)).unwrap();
        assert!(out.timed_out);
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
