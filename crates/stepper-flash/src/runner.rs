//! External process execution: run-to-completion and live line streaming.

use crate::error::FlashError;
use crate::progress::{LineEvent, LineOrigin, LineSink};
use crate::Result;
use std::ffi::OsStr;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, warn};

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Whether the process exited with status 0.
    pub succeeded: bool,

    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,
}

/// Runs a command to completion and captures its output.
pub struct ProcessRunner;

impl ProcessRunner {
    /// Execute `program` with `args`, stdin closed.
    ///
    /// A non-zero exit is reported in the outcome. Only a failure to start
    /// the executable is an error.
    pub async fn run<P, I, S>(program: P, args: I) -> Result<CommandOutcome>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref();
        debug!(program = %program.to_string_lossy(), "Running command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| FlashError::spawn(program.to_string_lossy(), e))?;

        Ok(CommandOutcome {
            succeeded: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Runs a command while forwarding each output line to a [`LineSink`].
pub struct StreamingRunner;

impl StreamingRunner {
    /// Execute `program` with `args`, streaming stdout and stderr lines.
    ///
    /// Returns whether the process exited successfully.
    pub async fn run<P, I, S>(program: P, args: I, sink: &LineSink) -> Result<bool>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args);
        Self::run_command(cmd, None, sink).await
    }

    /// Execute a prepared command, optionally writing `input` to its stdin.
    ///
    /// When `input` is given, stdin is closed as soon as the whole body is
    /// written so the child sees end of input. The writer runs concurrently
    /// with both readers, so a child that produces output before consuming
    /// all of its input cannot deadlock on a full pipe.
    pub async fn run_command(
        mut cmd: Command,
        input: Option<Vec<u8>>,
        sink: &LineSink,
    ) -> Result<bool> {
        let program = cmd.as_std().get_program().to_string_lossy().into_owned();
        debug!(program = %program, "Streaming command");

        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| FlashError::spawn(&program, e))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (out_res, err_res, in_res) = tokio::join!(
            pump_lines(stdout, LineOrigin::Out, sink),
            pump_lines(stderr, LineOrigin::Err, sink),
            feed_stdin(stdin, input),
        );

        if let Err(e) = out_res {
            warn!(program = %program, error = %e, "stdout read failed");
        }
        if let Err(e) = err_res {
            warn!(program = %program, error = %e, "stderr read failed");
        }
        if let Err(e) = in_res {
            // Child exited before consuming its input; the exit status tells the rest.
            debug!(program = %program, error = %e, "stdin write failed");
        }

        let status = child.wait().await?;
        debug!(program = %program, status = %status, "Command finished");
        Ok(status.success())
    }
}

/// Read `reader` line by line and emit each line as it completes.
///
/// A trailing partial line is emitted once the stream closes.
async fn pump_lines<R>(reader: Option<R>, origin: LineOrigin, sink: &LineSink) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(());
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        sink.emit(LineEvent::new(decode_line(&buf), origin));
    }
    Ok(())
}

/// Write the whole input and close the pipe.
async fn feed_stdin(stdin: Option<ChildStdin>, input: Option<Vec<u8>>) -> std::io::Result<()> {
    if let (Some(mut stdin), Some(input)) = (stdin, input) {
        stdin.write_all(&input).await?;
        stdin.shutdown().await?;
        drop(stdin);
    }
    Ok(())
}

/// Decode one raw line, dropping its `\n` or `\r\n` terminator.
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && raw[end - 1] == b'\r' {
            end -= 1;
        }
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(mut rx: tokio::sync::mpsc::UnboundedReceiver<LineEvent>) -> Vec<LineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"hello\n"), "hello");
        assert_eq!(decode_line(b"hello\r\n"), "hello");
        assert_eq!(decode_line(b"partial"), "partial");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let outcome = ProcessRunner::run("echo", ["hello"]).await.expect("run failed");
        assert!(outcome.succeeded);
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_reports_failure_in_outcome() {
        let outcome = ProcessRunner::run("sh", ["-c", "echo oops >&2; exit 3"])
            .await
            .expect("run failed");
        assert!(!outcome.succeeded);
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_run_missing_binary_is_spawn_failed() {
        let err = ProcessRunner::run("stepflash-definitely-missing-binary", ["x"])
            .await
            .unwrap_err();
        assert!(matches!(err, FlashError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_streaming_flushes_partial_trailing_line() {
        let (sink, rx) = LineSink::channel();
        let ok = StreamingRunner::run("printf", ["one\ntwo\nthree\npartial"], &sink)
            .await
            .expect("stream failed");
        drop(sink);
        assert!(ok);

        let lines: Vec<String> = drain(rx).into_iter().map(|e| e.line).collect();
        assert_eq!(lines, vec!["one", "two", "three", "partial"]);
    }

    #[tokio::test]
    async fn test_streaming_tags_origin_and_keeps_per_stream_order() {
        let (sink, rx) = LineSink::channel();
        let ok = StreamingRunner::run(
            "sh",
            ["-c", "echo a; echo e1 >&2; echo b; echo e2 >&2; exit 1"],
            &sink,
        )
        .await
        .expect("stream failed");
        drop(sink);
        assert!(!ok);

        let events = drain(rx);
        let out: Vec<&str> = events
            .iter()
            .filter(|e| e.origin == LineOrigin::Out)
            .map(|e| e.line.as_str())
            .collect();
        let err: Vec<&str> = events
            .iter()
            .filter(|e| e.origin == LineOrigin::Err)
            .map(|e| e.line.as_str())
            .collect();
        assert_eq!(out, vec!["a", "b"]);
        assert_eq!(err, vec!["e1", "e2"]);
    }

    #[tokio::test]
    async fn test_streaming_pipes_and_closes_stdin() {
        let (sink, rx) = LineSink::channel();
        // `cat` only exits once stdin is closed.
        let ok = StreamingRunner::run_command(
            Command::new("cat"),
            Some(b"piped body\n".to_vec()),
            &sink,
        )
        .await
        .expect("stream failed");
        drop(sink);
        assert!(ok);

        let lines: Vec<String> = drain(rx).into_iter().map(|e| e.line).collect();
        assert_eq!(lines, vec!["piped body"]);
    }
}
