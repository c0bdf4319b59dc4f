//! Supervision of the external decoder that turns a media URL into raw
//! interleaved `f32` PCM at 48kHz stereo.
use async_trait::async_trait;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, ChildStderr, Command, Stdio};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::errors::DecodeStartError;
use crate::retry::RetryPolicy;
use crate::Track;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u32 = 2;
/// An exit inside this window counts as a failed start.
pub const STARTUP_GRACE: Duration = Duration::from_millis(500);
/// How long a terminated decoder may take before its group is killed.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const KILL_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The decoder's PCM output.
pub struct PcmStream(Box<dyn Read + Send + Sync>);

impl PcmStream {
    pub fn new(reader: impl Read + Send + Sync + 'static) -> Self {
        PcmStream(Box::new(reader))
    }

    #[must_use]
    pub fn into_reader(self) -> Box<dyn Read + Send + Sync> {
        self.0
    }
}

impl std::fmt::Debug for PcmStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PcmStream")
    }
}

/// A running decoder that can be shut down.
#[async_trait]
pub trait DecodeProcess: Send + Sync {
    /// Terminate the decoder. Calling this on a stopped process is a no-op.
    async fn stop(&mut self);
}

/// A live decode: its output stream (until handed to the sink) and the
/// process behind it.
pub struct DecodeHandle {
    frames: Option<PcmStream>,
    process: Box<dyn DecodeProcess>,
}

impl DecodeHandle {
    pub fn new(frames: PcmStream, process: impl DecodeProcess + 'static) -> Self {
        Self {
            frames: Some(frames),
            process: Box::new(process),
        }
    }

    /// Take the PCM output. Only the first call returns it.
    pub fn take_frames(&mut self) -> Option<PcmStream> {
        self.frames.take()
    }

    pub async fn stop(&mut self) {
        self.process.stop().await;
    }
}

impl std::fmt::Debug for DecodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeHandle")
            .field("frames_taken", &self.frames.is_none())
            .finish()
    }
}

/// Starts decoders for tracks.
#[async_trait]
pub trait Decoder: Send + Sync {
    async fn start(&self, track: &Track) -> Result<DecodeHandle, DecodeStartError>;
}

/// `ffmpeg`-backed [`Decoder`]. Each decoder runs in its own process group
/// so the whole pipeline can be signalled at once.
#[derive(Clone, Debug)]
pub struct FfmpegDecoder {
    program: PathBuf,
    policy: RetryPolicy,
    grace: Duration,
}

impl FfmpegDecoder {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            policy: RetryPolicy::DECODE_START,
            grace: STARTUP_GRACE,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-hide_banner", "-loglevel", "error"])
            .args(["-reconnect", "1", "-reconnect_streamed", "1"])
            .args(["-reconnect_on_network_error", "1", "-reconnect_delay_max", "5"])
            .arg("-i")
            .arg(url)
            .args(["-vn", "-f", "f32le", "-ar"])
            .arg(SAMPLE_RATE.to_string())
            .arg("-ac")
            .arg(CHANNELS.to_string())
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        cmd
    }

    async fn spawn_checked(&self, track: &Track) -> Result<DecodeHandle, DecodeStartError> {
        let mut child = self.command(&track.stream_url).spawn()?;
        tokio::time::sleep(self.grace).await;

        if let Some(status) = child.try_wait()? {
            let stderr = child.stderr.take();
            let stderr = tokio::task::spawn_blocking(move || read_all(stderr))
                .await
                .unwrap_or_default();
            return Err(DecodeStartError::Exited { status, stderr });
        }

        let Some(stdout) = child.stdout.take() else {
            let mut process = FfmpegProcess::new(child);
            process.stop().await;
            return Err(DecodeStartError::MissingOutput);
        };
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(child.id(), stderr);
        }
        info!("Decoder {} started for {}", child.id(), track.title);
        Ok(DecodeHandle::new(PcmStream::new(stdout), FfmpegProcess::new(child)))
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        FfmpegDecoder::new("ffmpeg")
    }
}

#[async_trait]
impl Decoder for FfmpegDecoder {
    async fn start(&self, track: &Track) -> Result<DecodeHandle, DecodeStartError> {
        self.policy
            .run(
                "decoder start",
                |_| self.spawn_checked(track),
                DecodeStartError::is_transient,
            )
            .await
    }
}

fn read_all(stderr: Option<ChildStderr>) -> String {
    let mut buf = String::new();
    if let Some(mut stderr) = stderr {
        let _ = stderr.read_to_string(&mut buf);
    }
    buf.trim().to_string()
}

fn drain_stderr(pid: u32, stderr: ChildStderr) {
    tokio::task::spawn_blocking(move || {
        for line in BufReader::new(stderr).lines() {
            match line {
                Ok(line) => debug!(target: "tunebot::decode", pid, "{line}"),
                Err(_) => break,
            }
        }
    });
}

/// A decoder child process, leader of its own process group.
#[derive(Debug)]
pub struct FfmpegProcess {
    child: Option<Child>,
    stop_timeout: Duration,
}

impl FfmpegProcess {
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self {
            child: Some(child),
            stop_timeout: STOP_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    fn signal_group(pid: u32, signal: libc::c_int) {
        // SAFETY: killpg only sends a signal; the group id is our own child's
        // pid because it was spawned with process_group(0).
        let rc = unsafe { libc::killpg(pid as libc::pid_t, signal) };
        if rc != 0 {
            debug!(
                "killpg({pid}, {signal}) failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    async fn wait_until(child: &mut Child, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) if Instant::now() < deadline => tokio::time::sleep(POLL_INTERVAL).await,
                Ok(None) => return false,
                Err(e) => {
                    error!("Error waiting on decoder {}: {e}", child.id());
                    return false;
                }
            }
        }
    }
}

#[async_trait]
impl DecodeProcess for FfmpegProcess {
    async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        Self::signal_group(pid, libc::SIGTERM);
        if Self::wait_until(&mut child, self.stop_timeout).await {
            debug!("Decoder {pid} stopped");
            return;
        }
        warn!(
            "Decoder {pid} ignored SIGTERM for {:?}, killing its group",
            self.stop_timeout
        );
        Self::signal_group(pid, libc::SIGKILL);
        let _ = child.kill();
        if !Self::wait_until(&mut child, KILL_TIMEOUT).await {
            error!("Decoder {pid} survived SIGKILL");
        }
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if matches!(child.try_wait(), Ok(None)) {
                Self::signal_group(child.id(), libc::SIGKILL);
                let _ = child.try_wait();
            }
        }
    }
}
