use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use api::stream::QualityProfile;

mod ffmpeg;

#[cfg(test)]
pub(crate) mod fake;

pub use ffmpeg::{FfmpegLauncher, job_args};

/// How an encoder process ended. `code` is `None` when it was killed by a
/// signal or its status could not be collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn killed() -> Self {
        Self { code: None }
    }

    pub fn code(code: i32) -> Self {
        Self { code: Some(code) }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "killed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the encoder to finish its output and exit
    Terminate,
    Kill,
}

/// What an encoder process is asked to produce
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderJob {
    /// One bounded recording segment
    Segment {
        camera_id: String,
        input_url: String,
        output: PathBuf,
        duration: Duration,
    },
    /// Rolling low-latency HLS rendition
    Live {
        camera_id: String,
        input_url: String,
        dir: PathBuf,
        profile: QualityProfile,
        hls_time: u32,
        hls_list_size: u32,
    },
}

impl EncoderJob {
    pub fn camera_id(&self) -> &str {
        match self {
            EncoderJob::Segment { camera_id, .. } | EncoderJob::Live { camera_id, .. } => {
                camera_id
            }
        }
    }
}

/// Control side of a running encoder. Dropping it kills the process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    control: mpsc::UnboundedSender<Signal>,
    exit: oneshot::Receiver<ExitStatus>,
    status: Option<ExitStatus>,
}

/// Process side, owned by whatever drives the real (or fake) process
#[derive(Debug)]
pub struct ProcessControl {
    pub signals: mpsc::UnboundedReceiver<Signal>,
    pub exit: oneshot::Sender<ExitStatus>,
}

impl ProcessHandle {
    pub fn pair(pid: Option<u32>) -> (ProcessHandle, ProcessControl) {
        let (control, signals) = mpsc::unbounded_channel();
        let (exit_tx, exit) = oneshot::channel();
        (
            ProcessHandle {
                pid,
                control,
                exit,
                status: None,
            },
            ProcessControl {
                signals,
                exit: exit_tx,
            },
        )
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn terminate(&self) {
        let _ = self.control.send(Signal::Terminate);
    }

    pub fn kill(&self) {
        let _ = self.control.send(Signal::Kill);
    }

    /// Resolves once the process has exited. Cancel safe, and returns the
    /// same status when awaited again.
    pub async fn wait(&mut self) -> ExitStatus {
        if let Some(status) = self.status {
            return status;
        }
        let status = (&mut self.exit).await.unwrap_or_else(|_| ExitStatus::killed());
        self.status = Some(status);
        status
    }
}

#[async_trait]
pub trait Launcher: Send + Sync {
    async fn spawn(&self, job: EncoderJob) -> Result<ProcessHandle>;
}
