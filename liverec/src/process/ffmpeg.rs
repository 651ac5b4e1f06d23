use std::process::Stdio;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};

use super::{EncoderJob, ExitStatus, Launcher, ProcessControl, ProcessHandle, Signal};
use crate::config::EncoderConfig;
use crate::naming;

/// Runs jobs through an external ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    cfg: EncoderConfig,
}

impl FfmpegLauncher {
    pub fn new(cfg: EncoderConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl Launcher for FfmpegLauncher {
    async fn spawn(&self, job: EncoderJob) -> Result<ProcessHandle> {
        let args = job_args(&self.cfg, &job);
        tracing::debug!("[encoder] {} {}", self.cfg.binary, args.join(" "));

        let mut child = Command::new(&self.cfg.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("failed to start {}: {}", self.cfg.binary, e))?;

        let pid = child.id();
        let camera_id = job.camera_id().to_string();
        tracing::info!("[encoder] {} started pid={:?}", camera_id, pid);

        if let Some(stderr) = child.stderr.take() {
            let camera_id = camera_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.is_empty() {
                        continue;
                    }
                    if line.to_ascii_lowercase().contains("error") {
                        tracing::error!("[encoder] {}: {}", camera_id, line);
                    } else {
                        tracing::warn!("[encoder] {}: {}", camera_id, line);
                    }
                }
            });
        }

        let (handle, control) = ProcessHandle::pair(pid);
        tokio::spawn(supervise(camera_id, child, control));
        Ok(handle)
    }
}

async fn supervise(camera_id: String, mut child: Child, control: ProcessControl) {
    let ProcessControl { mut signals, exit } = control;
    let mut stdin = child.stdin.take();
    let mut attached = true;

    let status = loop {
        tokio::select! {
            status = child.wait() => {
                break match status {
                    Ok(status) => ExitStatus { code: status.code() },
                    Err(e) => {
                        tracing::warn!("[encoder] {} wait failed: {}", camera_id, e);
                        ExitStatus::killed()
                    }
                };
            }
            signal = signals.recv(), if attached => match signal {
                Some(Signal::Terminate) => {
                    if !request_quit(&mut stdin).await {
                        let _ = child.start_kill();
                    }
                }
                Some(Signal::Kill) => {
                    let _ = child.start_kill();
                }
                None => {
                    // handle dropped, nobody will collect the output
                    attached = false;
                    let _ = child.start_kill();
                }
            },
        }
    };

    tracing::info!("[encoder] {} exited with {}", camera_id, status);
    let _ = exit.send(status);
}

/// ffmpeg finishes the container and exits on `q`
async fn request_quit(stdin: &mut Option<ChildStdin>) -> bool {
    let Some(pipe) = stdin.as_mut() else {
        return false;
    };
    let ok = pipe.write_all(b"q").await.is_ok() && pipe.flush().await.is_ok();
    stdin.take();
    ok
}

fn is_rtsp(url: &str) -> bool {
    let url = url.to_ascii_lowercase();
    url.starts_with("rtsp://") || url.starts_with("rtsps://")
}

/// Command line for a job, without the binary
pub fn job_args(cfg: &EncoderConfig, job: &EncoderJob) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostats".into(),
        "-loglevel".into(),
        cfg.log_level.clone(),
    ];

    match job {
        EncoderJob::Segment {
            input_url,
            output,
            duration,
            ..
        } => {
            if is_rtsp(input_url) {
                args.extend(["-rtsp_transport".into(), cfg.rtsp_transport.clone()]);
            }
            args.extend([
                "-i".into(),
                input_url.clone(),
                "-t".into(),
                duration.as_secs().max(1).to_string(),
                "-c".into(),
                "copy".into(),
                // fragmented output stays playable when the encoder is killed
                "-movflags".into(),
                "+frag_keyframe+empty_moov+default_base_moof".into(),
                // never overwrite an existing segment
                "-n".into(),
                output.to_string_lossy().into_owned(),
            ]);
        }
        EncoderJob::Live {
            input_url,
            dir,
            profile,
            hls_time,
            hls_list_size,
            ..
        } => {
            if is_rtsp(input_url) {
                args.extend(["-rtsp_transport".into(), cfg.rtsp_transport.clone()]);
            } else {
                args.extend(["-fflags".into(), "nobuffer".into()]);
            }
            let gop = profile.fps.saturating_mul(*hls_time).max(1);
            args.extend([
                "-i".into(),
                input_url.clone(),
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                profile.preset.clone(),
                "-tune".into(),
                "zerolatency".into(),
                "-vf".into(),
                format!("scale={}:{}", profile.width, profile.height),
                "-r".into(),
                profile.fps.to_string(),
                "-g".into(),
                gop.to_string(),
                "-keyint_min".into(),
                gop.to_string(),
                "-sc_threshold".into(),
                "0".into(),
                "-b:v".into(),
                format!("{}k", profile.bitrate_kbps),
                "-maxrate".into(),
                format!("{}k", profile.bitrate_kbps),
                "-bufsize".into(),
                format!("{}k", profile.bitrate_kbps.saturating_mul(2)),
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                "64k".into(),
                "-f".into(),
                "hls".into(),
                "-hls_time".into(),
                hls_time.to_string(),
                "-hls_list_size".into(),
                hls_list_size.to_string(),
                "-hls_flags".into(),
                "delete_segments+omit_endlist+independent_segments".into(),
                "-hls_segment_filename".into(),
                dir.join(naming::LIVE_SEGMENT_PATTERN)
                    .to_string_lossy()
                    .into_owned(),
                dir.join(naming::MANIFEST).to_string_lossy().into_owned(),
            ]);
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::quality;
    use std::path::PathBuf;
    use std::time::Duration;

    fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_segment_args_carry_duration_limit() {
        let cfg = EncoderConfig::default();
        let args = job_args(
            &cfg,
            &EncoderJob::Segment {
                camera_id: "cam01".into(),
                input_url: "rtsp://10.0.0.2/stream1".into(),
                output: PathBuf::from("/rec/cam01/cam01_20240115_120000.mp4"),
                duration: Duration::from_secs(300),
            },
        );
        assert_eq!(arg_after(&args, "-t"), Some("300"));
        assert!(args.iter().any(|a| a == "-n"));
        assert!(!args.iter().any(|a| a == "-y"));
        assert_eq!(arg_after(&args, "-rtsp_transport"), Some("tcp"));
        assert_eq!(arg_after(&args, "-i"), Some("rtsp://10.0.0.2/stream1"));
        assert_eq!(
            args.last().map(String::as_str),
            Some("/rec/cam01/cam01_20240115_120000.mp4")
        );
    }

    #[test]
    fn test_rtmp_input_has_no_rtsp_transport() {
        let cfg = EncoderConfig::default();
        let args = job_args(
            &cfg,
            &EncoderJob::Segment {
                camera_id: "cam01".into(),
                input_url: "rtmp://10.0.0.2/live/cam".into(),
                output: PathBuf::from("/rec/cam01/a.mp4"),
                duration: Duration::from_secs(60),
            },
        );
        assert!(!args.iter().any(|a| a == "-rtsp_transport"));
    }

    #[test]
    fn test_live_args_follow_profile() {
        let cfg = EncoderConfig::default();
        let profiles = quality::profiles(&[]);
        let profile = quality::find(&profiles, "low").unwrap().clone();
        let args = job_args(
            &cfg,
            &EncoderJob::Live {
                camera_id: "cam01".into(),
                input_url: "rtsp://10.0.0.2/stream1".into(),
                dir: PathBuf::from("/streams/cam01"),
                profile: profile.clone(),
                hls_time: 2,
                hls_list_size: 6,
            },
        );
        assert_eq!(
            arg_after(&args, "-vf"),
            Some(format!("scale={}:{}", profile.width, profile.height).as_str())
        );
        assert_eq!(arg_after(&args, "-preset"), Some(profile.preset.as_str()));
        assert_eq!(arg_after(&args, "-f"), Some("hls"));
        assert_eq!(
            arg_after(&args, "-g"),
            Some((profile.fps * 2).to_string().as_str())
        );
        assert_eq!(
            args.last().map(String::as_str),
            Some("/streams/cam01/index.m3u8")
        );
    }

    #[test]
    fn test_oversized_profile_saturates() {
        let cfg = EncoderConfig::default();
        let profiles = quality::profiles(&[]);
        let mut profile = quality::find(&profiles, "high").unwrap().clone();
        profile.fps = u32::MAX;
        profile.bitrate_kbps = u32::MAX;
        let args = job_args(
            &cfg,
            &EncoderJob::Live {
                camera_id: "cam01".into(),
                input_url: "rtsp://10.0.0.2/stream1".into(),
                dir: PathBuf::from("/streams/cam01"),
                profile,
                hls_time: 4,
                hls_list_size: 6,
            },
        );
        let max = u32::MAX.to_string();
        assert_eq!(arg_after(&args, "-g"), Some(max.as_str()));
        assert_eq!(arg_after(&args, "-bufsize"), Some(format!("{max}k").as_str()));
    }
}
