//! Scripted launcher for supervisor tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{EncoderJob, ExitStatus, Launcher, ProcessControl, ProcessHandle, Signal};

#[derive(Debug, Clone)]
pub(crate) struct Script {
    /// Exit on its own after this long
    pub exit_after: Option<(Duration, ExitStatus)>,
    /// Status to exit with on a terminate request, ignored when `None`
    pub on_terminate: Option<ExitStatus>,
    /// Bytes written to the segment output on exit
    pub output_bytes: Option<usize>,
}

impl Script {
    /// Encoder that never stops by itself and ignores terminate
    pub fn stubborn() -> Self {
        Self {
            exit_after: None,
            on_terminate: None,
            output_bytes: None,
        }
    }

    /// Encoder that honours both its duration limit and terminate
    pub fn well_behaved(after: Duration, output_bytes: usize) -> Self {
        Self {
            exit_after: Some((after, ExitStatus::code(0))),
            on_terminate: Some(ExitStatus::code(0)),
            output_bytes: Some(output_bytes),
        }
    }

    pub fn writes(mut self, bytes: usize) -> Self {
        self.output_bytes = Some(bytes);
        self
    }
}

#[derive(Default)]
struct State {
    jobs: Vec<EncoderJob>,
    signals: Vec<(usize, Signal)>,
    exits: Vec<(usize, ExitStatus)>,
    fail_spawns: u32,
}

#[derive(Clone)]
pub(crate) struct FakeLauncher {
    default: Script,
    state: Arc<Mutex<State>>,
}

impl FakeLauncher {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            state: Default::default(),
        }
    }

    /// The next `n` spawns fail as if the binary were missing
    pub fn fail_spawns(&self, n: u32) {
        self.state.lock().unwrap().fail_spawns = n;
    }

    pub fn jobs(&self) -> Vec<EncoderJob> {
        self.state.lock().unwrap().jobs.clone()
    }

    pub fn spawned(&self) -> usize {
        self.state.lock().unwrap().jobs.len()
    }

    pub fn signals(&self, process: usize) -> Vec<Signal> {
        self.state
            .lock()
            .unwrap()
            .signals
            .iter()
            .filter(|(i, _)| *i == process)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn exit_of(&self, process: usize) -> Option<ExitStatus> {
        self.state
            .lock()
            .unwrap()
            .exits
            .iter()
            .find(|(i, _)| *i == process)
            .map(|(_, s)| *s)
    }

    pub fn running(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.jobs.len() - state.exits.len()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn spawn(&self, job: EncoderJob) -> Result<ProcessHandle> {
        let (index, script) = {
            let mut state = self.state.lock().unwrap();
            if state.fail_spawns > 0 {
                state.fail_spawns -= 1;
                anyhow::bail!("No such file or directory (os error 2)");
            }
            state.jobs.push(job.clone());
            (state.jobs.len() - 1, self.default.clone())
        };

        let (handle, control) = ProcessHandle::pair(Some(1000 + index as u32));
        tokio::spawn(run(index, job, script, control, self.state.clone()));
        Ok(handle)
    }
}

async fn run(
    index: usize,
    job: EncoderJob,
    script: Script,
    control: ProcessControl,
    state: Arc<Mutex<State>>,
) {
    let ProcessControl { mut signals, exit } = control;
    let exit_after = script.exit_after;
    let timer = async move {
        match exit_after {
            Some((after, status)) => {
                tokio::time::sleep(after).await;
                status
            }
            None => std::future::pending().await,
        }
    };
    tokio::pin!(timer);

    let status = loop {
        tokio::select! {
            status = &mut timer => break status,
            signal = signals.recv() => {
                let signal = signal.unwrap_or(Signal::Kill);
                state.lock().unwrap().signals.push((index, signal));
                match signal {
                    Signal::Kill => break ExitStatus::killed(),
                    Signal::Terminate => {
                        if let Some(status) = script.on_terminate {
                            break status;
                        }
                    }
                }
            }
        }
    };

    if let (Some(bytes), EncoderJob::Segment { output, .. }) = (script.output_bytes, &job) {
        let _ = std::fs::write(output, vec![0u8; bytes]);
    }
    state.lock().unwrap().exits.push((index, status));
    let _ = exit.send(status);
}
