//! One request against one worker process
//!
//! The adapter spawns the worker executable, reads stdout and stderr on two
//! background tasks, and polls the shared buffers until the response is
//! complete, the request times out, or the process goes away.

use super::markers::{clean_response, find_response_start};
use super::{SamplingParams, WorkerSpec};
use crate::error::{MnemoError, Result};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const READ_CHUNK_SIZE: usize = 4096;
const REAP_TIMEOUT: Duration = Duration::from_secs(5);
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Request lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Starting,
    AwaitingMarker,
    Streaming,
    Completed,
    TimedOut,
    Failed,
}

impl AdapterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterState::Starting => "starting",
            AdapterState::AwaitingMarker => "awaiting-marker",
            AdapterState::Streaming => "streaming",
            AdapterState::Completed => "completed",
            AdapterState::TimedOut => "timed-out",
            AdapterState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one request
#[derive(Debug, Clone)]
pub struct Generation {
    /// Cleaned response text; empty when no marker was found
    pub text: String,
    pub state: AdapterState,
    pub marker_found: bool,
    /// Everything the worker wrote to stdout
    pub raw_output: String,
    pub stderr: String,
    pub elapsed: Duration,
    /// `None` when the process had to be killed
    pub exit_code: Option<i32>,
    /// The process exited on its own with a failure status
    pub crashed: bool,
}

impl Generation {
    /// A response the caller can show as-is
    pub fn is_usable(&self) -> bool {
        self.marker_found && !self.text.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// Buffers shared between the reader tasks and the monitor loop
struct StreamBuffers {
    state: AdapterState,
    raw: String,
    response: String,
    stderr: String,
    last_output: Instant,
    stdout_closed: bool,
    stderr_closed: bool,
}

impl StreamBuffers {
    fn new(now: Instant) -> Self {
        Self {
            state: AdapterState::Starting,
            raw: String::new(),
            response: String::new(),
            stderr: String::new(),
            last_output: now,
            stdout_closed: false,
            stderr_closed: false,
        }
    }

    /// The process is running; output may now carry a marker
    fn spawned(&mut self) {
        if self.state == AdapterState::Starting {
            self.state = AdapterState::AwaitingMarker;
        }
    }

    fn push_stdout(&mut self, chunk: &str) {
        self.last_output = Instant::now();
        self.raw.push_str(chunk);

        match self.state {
            AdapterState::AwaitingMarker => {
                if let Some((start, marker)) = find_response_start(&self.raw) {
                    debug!("Matched response marker {:?}", marker.pattern);
                    self.response = self.raw[start..].to_string();
                    self.state = AdapterState::Streaming;
                }
            }
            AdapterState::Streaming => self.response.push_str(chunk),
            _ => {}
        }
    }

    fn closed(&self) -> bool {
        self.stdout_closed && self.stderr_closed
    }
}

fn lock(buffers: &Mutex<StreamBuffers>) -> MutexGuard<'_, StreamBuffers> {
    buffers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decode the longest complete UTF-8 prefix, keeping a split trailing sequence
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

async fn read_stream<R>(mut reader: R, buffers: Arc<Mutex<StreamBuffers>>, kind: StreamKind)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut pending = Vec::new();

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                let text = drain_utf8(&mut pending);
                if text.is_empty() {
                    continue;
                }
                let mut buffers = lock(&buffers);
                match kind {
                    StreamKind::Stdout => buffers.push_stdout(&text),
                    StreamKind::Stderr => buffers.stderr.push_str(&text),
                }
            }
            Err(e) => {
                debug!("Worker {:?} read failed: {}", kind, e);
                break;
            }
        }
    }

    let mut buffers = lock(&buffers);
    if !pending.is_empty() {
        let rest = String::from_utf8_lossy(&pending).into_owned();
        match kind {
            StreamKind::Stdout => buffers.push_stdout(&rest),
            StreamKind::Stderr => buffers.stderr.push_str(&rest),
        }
    }
    match kind {
        StreamKind::Stdout => buffers.stdout_closed = true,
        StreamKind::Stderr => buffers.stderr_closed = true,
    }
}

/// Decide whether the monitor loop should stop
///
/// Checked in order: silence past the pause threshold once streaming,
/// overall timeout, then both streams closed.
pub(crate) fn completion_state(
    state: AdapterState,
    silence: Duration,
    elapsed: Duration,
    streams_closed: bool,
    pause: Duration,
    timeout: Duration,
) -> Option<AdapterState> {
    let streaming = state == AdapterState::Streaming;

    if streaming && silence > pause {
        return Some(AdapterState::Completed);
    }
    if elapsed > timeout {
        return Some(AdapterState::TimedOut);
    }
    if streams_closed {
        return Some(if streaming {
            AdapterState::Completed
        } else {
            AdapterState::Failed
        });
    }
    None
}

/// Runs requests against the worker executable described by a [`WorkerSpec`]
#[derive(Debug, Clone)]
pub struct ProcessAdapter {
    spec: Arc<WorkerSpec>,
}

impl ProcessAdapter {
    pub fn new(spec: Arc<WorkerSpec>) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    /// Run one request with the spec's default sampling parameters
    pub async fn run(&self, prompt: &str) -> Result<Generation> {
        self.run_with(prompt, &self.spec.sampling).await
    }

    /// Run one request
    ///
    /// Timeouts and missing markers are reported through the returned
    /// [`Generation`]; only spawn and pipe failures are errors.
    pub async fn run_with(&self, prompt: &str, params: &SamplingParams) -> Result<Generation> {
        let started = Instant::now();
        let args = self.spec.command_args(prompt, params);
        debug!(
            "Starting worker {:?} ({} prompt chars, max {} tokens)",
            self.spec.executable,
            prompt.len(),
            params.max_tokens
        );

        let mut command = Command::new(&self.spec.executable);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let buffers = Arc::new(Mutex::new(StreamBuffers::new(started)));
        let mut child = command.spawn().map_err(|e| {
            MnemoError::Worker(format!(
                "failed to spawn {:?}: {}",
                self.spec.executable, e
            ))
        })?;
        let pid = child.id();
        let mut group = ProcessGroupGuard::new(pid);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MnemoError::Worker("worker stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MnemoError::Worker("worker stderr not captured".to_string()))?;

        lock(&buffers).spawned();
        let mut stdout_task = tokio::spawn(read_stream(stdout, buffers.clone(), StreamKind::Stdout));
        let mut stderr_task = tokio::spawn(read_stream(stderr, buffers.clone(), StreamKind::Stderr));

        let pause = self.spec.pause_threshold();
        let timeout = self.spec.request_timeout;
        let mut ticker = tokio::time::interval(self.spec.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (final_state, streams_closed) = loop {
            ticker.tick().await;
            let verdict = {
                let buffers = lock(&buffers);
                let now = Instant::now();
                completion_state(
                    buffers.state,
                    now.duration_since(buffers.last_output),
                    now.duration_since(started),
                    buffers.closed(),
                    pause,
                    timeout,
                )
                .map(|state| (state, buffers.closed()))
            };
            if let Some(verdict) = verdict {
                break verdict;
            }
        };

        let status = if streams_closed {
            tokio::time::timeout(READER_DRAIN_TIMEOUT, child.wait())
                .await
                .ok()
                .and_then(|status| status.ok())
        } else {
            child.try_wait().ok().flatten()
        };
        let status = match status {
            Some(status) => Some(status),
            None => {
                terminate(&mut child, pid).await;
                None
            }
        };
        // reaped, the group id may be reused from here on
        group.disarm();

        for task in [&mut stdout_task, &mut stderr_task] {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut *task).await.is_err() {
                task.abort();
            }
        }

        let (raw_output, response, stderr_text, stream_state) = {
            let mut buffers = lock(&buffers);
            (
                std::mem::take(&mut buffers.raw),
                std::mem::take(&mut buffers.response),
                std::mem::take(&mut buffers.stderr),
                buffers.state,
            )
        };

        Ok(finish(
            final_state,
            stream_state,
            response,
            raw_output,
            stderr_text,
            status,
            started.elapsed(),
        ))
    }
}

fn finish(
    final_state: AdapterState,
    stream_state: AdapterState,
    response: String,
    raw_output: String,
    stderr: String,
    status: Option<ExitStatus>,
    elapsed: Duration,
) -> Generation {
    let marker_found = stream_state == AdapterState::Streaming;
    let crashed = status.map(|s| !s.success()).unwrap_or(false);

    let (text, state) = if marker_found {
        (clean_response(&response), final_state)
    } else if final_state == AdapterState::TimedOut {
        (String::new(), AdapterState::TimedOut)
    } else {
        (String::new(), AdapterState::Failed)
    };

    if !marker_found {
        warn!(
            "No response marker in worker output after {:?} ({} bytes): {}",
            elapsed,
            raw_output.len(),
            raw_output
        );
    }
    if crashed {
        let tail: String = stderr
            .chars()
            .rev()
            .take(500)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        warn!("Worker exited with {:?}: {}", status, tail.trim());
    }
    info!(
        "Worker request finished: state={} elapsed={:?} chars={}",
        state,
        elapsed,
        text.len()
    );

    Generation {
        text,
        state,
        marker_found,
        raw_output,
        stderr,
        elapsed,
        exit_code: status.and_then(|s| s.code()),
        crashed,
    }
}

/// Kills the worker's process group if a request is dropped mid-flight
///
/// `kill_on_drop` only reaches the direct child; anything the worker started
/// shares its process group.
struct ProcessGroupGuard {
    pid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            debug!("Request dropped, killing worker process group {}", pid);
            kill_process_group(Some(pid));
        }
    }
}

fn kill_process_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kill the worker and everything it spawned, then reap it
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_process_group(pid);

    if let Err(e) = child.start_kill() {
        debug!("Worker kill failed (already exited?): {}", e);
    }
    if tokio::time::timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
        warn!("Worker process {:?} did not exit after SIGKILL", pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAUSE: Duration = Duration::from_secs(3);
    const TIMEOUT: Duration = Duration::from_secs(20);

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_pause_only_counts_while_streaming() {
        assert_eq!(
            completion_state(AdapterState::Streaming, secs(4), secs(5), false, PAUSE, TIMEOUT),
            Some(AdapterState::Completed)
        );
        assert_eq!(
            completion_state(AdapterState::AwaitingMarker, secs(4), secs(5), false, PAUSE, TIMEOUT),
            None
        );
        assert_eq!(
            completion_state(AdapterState::Streaming, secs(2), secs(5), false, PAUSE, TIMEOUT),
            None
        );
    }

    #[test]
    fn test_timeout_regardless_of_state() {
        assert_eq!(
            completion_state(AdapterState::AwaitingMarker, secs(0), secs(21), false, PAUSE, TIMEOUT),
            Some(AdapterState::TimedOut)
        );
        assert_eq!(
            completion_state(AdapterState::Streaming, secs(1), secs(21), false, PAUSE, TIMEOUT),
            Some(AdapterState::TimedOut)
        );
    }

    #[test]
    fn test_closed_streams() {
        assert_eq!(
            completion_state(AdapterState::Streaming, secs(0), secs(1), true, PAUSE, TIMEOUT),
            Some(AdapterState::Completed)
        );
        assert_eq!(
            completion_state(AdapterState::AwaitingMarker, secs(0), secs(1), true, PAUSE, TIMEOUT),
            Some(AdapterState::Failed)
        );
    }

    #[test]
    fn test_starting_until_spawned() {
        let mut buffers = StreamBuffers::new(Instant::now());
        assert_eq!(buffers.state, AdapterState::Starting);

        // nothing is read before the process exists
        buffers.push_stdout("<|im_start|>assistant\nearly");
        assert_eq!(buffers.state, AdapterState::Starting);
        assert!(buffers.response.is_empty());

        buffers.spawned();
        assert_eq!(buffers.state, AdapterState::AwaitingMarker);
        buffers.spawned();
        assert_eq!(buffers.state, AdapterState::AwaitingMarker);
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut buffers = StreamBuffers::new(Instant::now());
        buffers.spawned();
        buffers.push_stdout("prompt echo <|im_st");
        assert_eq!(buffers.state, AdapterState::AwaitingMarker);

        buffers.push_stdout("art|>assistant\nHel");
        assert_eq!(buffers.state, AdapterState::Streaming);
        buffers.push_stdout("lo");

        assert_eq!(buffers.response, "\nHello");
        assert_eq!(buffers.raw, "prompt echo <|im_start|>assistant\nHello");
    }

    #[test]
    fn test_drain_utf8_keeps_split_sequence() {
        // "é" is 0xC3 0xA9
        let mut pending = vec![b'a', 0xC3];
        assert_eq!(drain_utf8(&mut pending), "a");
        assert_eq!(pending, vec![0xC3]);

        pending.push(0xA9);
        assert_eq!(drain_utf8(&mut pending), "é");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_drain_utf8_replaces_invalid_bytes() {
        let mut pending = vec![b'a', 0xFF, b'b'];
        assert_eq!(drain_utf8(&mut pending), "a\u{FFFD}b");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_finish_without_marker() {
        let generation = finish(
            AdapterState::Failed,
            AdapterState::AwaitingMarker,
            String::new(),
            "loading...".to_string(),
            String::new(),
            None,
            secs(1),
        );

        assert!(!generation.marker_found);
        assert!(!generation.is_usable());
        assert_eq!(generation.text, "");
        assert_eq!(generation.raw_output, "loading...");
        assert_eq!(generation.state, AdapterState::Failed);
    }

    #[test]
    fn test_finish_timeout_keeps_captured_text() {
        let generation = finish(
            AdapterState::TimedOut,
            AdapterState::Streaming,
            " partial answer".to_string(),
            "Assistant: partial answer".to_string(),
            String::new(),
            None,
            secs(20),
        );

        assert_eq!(generation.state, AdapterState::TimedOut);
        assert_eq!(generation.text, "partial answer");
        assert!(generation.is_usable());
    }
}
