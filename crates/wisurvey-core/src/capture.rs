//! Capture orchestrator: runs the diagnostic commands for one point and
//! turns their output into artifacts and a results record.
//!
//! Plan, strictly sequential:
//! 1. `rounds` × (channel scan, survey dump), `round_delay` apart
//! 2. one bounded spectrum sample per band (2.4, 5, 6 GHz)
//! 3. score every artifact of the point and persist `results.json`
//!
//! Every child runs through `sh -c` in its own process group with
//! `kill_on_drop`, so nothing outlives the run that started it.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::artifact::ArtifactKind;
use crate::channels::Band;
use crate::config::CaptureConfig;
use crate::parse::spectrum::is_sample_line;
use crate::scoring::{self, ResultsRecord};
use crate::store::{StoreError, SurveyStore};

/// How long a sampler that closed its stdout gets to exit on its own.
const EOF_EXIT_GRACE: Duration = Duration::from_millis(500);

/// Bytes of stderr kept in an exit error.
const STDERR_TAIL: usize = 512;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}{}", stderr_suffix(.stderr))]
    Exit {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("`{command}` timed out after {}s", .timeout.as_secs_f64())]
    Timeout { command: String, timeout: Duration },
    #[error("failed to read output of `{command}`: {source}")]
    Read {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to stop `{command}`: {source}")]
    Kill {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

fn stderr_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let start = text
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| text.len() - i <= STDERR_TAIL)
        .unwrap_or(text.len());
    text[start..].to_string()
}

// ── Process helpers ─────────────────────────────────────────────────

fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// SIGKILL the whole process group led by `pid`, reaching grandchildren a
/// plain `kill` on the shell would miss.
fn kill_process_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            // SAFETY: `pid` is the id of a child we spawned as its own group
            // leader. Signalling a group that already exited is a no-op (ESRCH).
            unsafe {
                libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Run a fixed command to completion and return its stdout.
///
/// Spawn failure, non-zero exit, read failure and exceeding `timeout` are
/// all errors.
pub async fn run_command(command: &str, timeout: Duration) -> Result<Vec<u8>, CaptureError> {
    let child = shell(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CaptureError::Spawn {
            command: command.to_string(),
            source,
        })?;
    let pid = child.id();

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            kill_process_group(pid);
            return Err(CaptureError::Read {
                command: command.to_string(),
                source,
            });
        }
        Err(_) => {
            // The dropped future killed the shell; take its children too.
            kill_process_group(pid);
            return Err(CaptureError::Timeout {
                command: command.to_string(),
                timeout,
            });
        }
    };

    if !output.status.success() {
        return Err(CaptureError::Exit {
            command: command.to_string(),
            status: output.status,
            stderr: stderr_tail(&output.stderr),
        });
    }
    Ok(output.stdout)
}

// ── Spectrum sampler ────────────────────────────────────────────────

/// Why a spectrum sampler was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleStop {
    /// `max_samples` sample lines were read.
    SampleLimit,
    /// `sample_timeout` elapsed first.
    Deadline,
    /// The output cap was reached.
    OutputCap,
    /// The sampler closed its stdout on its own.
    EndOfOutput,
}

/// Limits of one sampler run.
#[derive(Debug, Clone)]
pub struct SampleLimits {
    pub max_samples: usize,
    pub timeout: Duration,
    pub max_output_bytes: usize,
    pub marker: String,
}

impl SampleLimits {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            max_samples: config.max_samples,
            timeout: config.sample_timeout,
            max_output_bytes: config.max_output_bytes,
            marker: config.sample_marker.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleCapture {
    /// Everything read before the sampler was stopped.
    pub output: Vec<u8>,
    pub samples: usize,
    pub stop: SampleStop,
}

/// Run an open-ended sampler until `max_samples` sample lines were read or
/// `timeout` elapsed, then kill and reap it.
///
/// Stopping at the deadline with fewer samples is not an error. The reader
/// and the deadline share one [`CancellationToken`]; a reader blocked on a
/// silent child still observes cancellation.
pub async fn sample_spectrum(
    command: &str,
    limits: &SampleLimits,
) -> Result<SampleCapture, CaptureError> {
    let mut child = shell(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| CaptureError::Spawn {
            command: command.to_string(),
            source,
        })?;
    let pid = child.id();
    let Some(stdout) = child.stdout.take() else {
        kill_process_group(pid);
        return Err(CaptureError::Read {
            command: command.to_string(),
            source: std::io::Error::other("stdout not captured"),
        });
    };

    let token = CancellationToken::new();
    let deadline = {
        let token = token.clone();
        let timeout = limits.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => token.cancel(),
                _ = token.cancelled() => {}
            }
        })
    };

    let read = read_samples(BufReader::new(stdout), limits, &token).await;
    token.cancel();
    let _ = deadline.await;

    let (output, samples, stop) = match read {
        Ok(read) => read,
        Err(source) => {
            let _ = reap(&mut child, pid, command, true).await;
            return Err(CaptureError::Read {
                command: command.to_string(),
                source,
            });
        }
    };

    let status = reap(&mut child, pid, command, stop != SampleStop::EndOfOutput).await?;
    if let Some(status) = status.filter(|s| !s.success()) {
        return Err(CaptureError::Exit {
            command: command.to_string(),
            status,
            stderr: String::new(),
        });
    }

    Ok(SampleCapture {
        output,
        samples,
        stop,
    })
}

async fn read_samples<R>(
    mut reader: BufReader<R>,
    limits: &SampleLimits,
    token: &CancellationToken,
) -> std::io::Result<(Vec<u8>, usize, SampleStop)>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut output = Vec::new();
    let mut samples = 0;
    let mut line = Vec::new();

    let stop = loop {
        line.clear();
        let remaining = limits.max_output_bytes.saturating_sub(output.len());
        // One byte past the cap tells an oversized line from a fitting one.
        let mut limited = (&mut reader).take(remaining as u64 + 1);
        let read = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            n = limited.read_until(b'\n', &mut line) => Some(n?),
        };
        let Some(n) = read else {
            // Keep whatever part of an unfinished line arrived in time.
            let kept = line.len().min(remaining);
            output.extend_from_slice(&line[..kept]);
            break SampleStop::Deadline;
        };
        if n == 0 {
            break SampleStop::EndOfOutput;
        }
        if line.len() > remaining {
            break SampleStop::OutputCap;
        }
        output.extend_from_slice(&line);
        if is_sample_line(&String::from_utf8_lossy(&line), &limits.marker) {
            samples += 1;
            if samples >= limits.max_samples {
                break SampleStop::SampleLimit;
            }
        }
    };
    Ok((output, samples, stop))
}

/// Wait for the child to go away, killing it first when `kill` is set.
///
/// Returns the exit status only for a child that exited on its own.
async fn reap(
    child: &mut Child,
    pid: Option<u32>,
    command: &str,
    kill: bool,
) -> Result<Option<ExitStatus>, CaptureError> {
    if !kill {
        if let Ok(Ok(status)) = tokio::time::timeout(EOF_EXIT_GRACE, child.wait()).await {
            kill_process_group(pid);
            return Ok(Some(status));
        }
    }
    kill_process_group(pid);
    child.kill().await.map_err(|source| CaptureError::Kill {
        command: command.to_string(),
        source,
    })?;
    Ok(None)
}

// ── Orchestrator ────────────────────────────────────────────────────

/// Runs captures against a store with an injected command configuration.
#[derive(Debug, Clone)]
pub struct CaptureOrchestrator {
    store: SurveyStore,
    config: Arc<CaptureConfig>,
}

impl CaptureOrchestrator {
    pub fn new(store: SurveyStore, config: Arc<CaptureConfig>) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Run the full capture plan for one point and persist its results.
    ///
    /// New artifacts continue after the highest ordinal already on disk.
    /// Artifacts written before a failure stay in place.
    pub async fn run(&self, session_id: &str, point_id: &str) -> Result<ResultsRecord, CaptureError> {
        let config = &*self.config;
        let store = &self.store;

        let mut scan_ordinal = store
            .next_ordinal(session_id, point_id, ArtifactKind::ChannelScan)
            .await?;
        let mut survey_ordinal = store
            .next_ordinal(session_id, point_id, ArtifactKind::SurveyDump)
            .await?;

        for round in 1..=config.rounds {
            let scan = run_command(&config.commands.channel_scan, config.command_timeout).await?;
            store
                .write_artifact(session_id, point_id, ArtifactKind::ChannelScan, scan_ordinal, &scan)
                .await?;
            scan_ordinal += 1;

            let survey =
                run_command(&config.commands.channel_survey, config.command_timeout).await?;
            store
                .write_artifact(session_id, point_id, ArtifactKind::SurveyDump, survey_ordinal, &survey)
                .await?;
            survey_ordinal += 1;

            tracing::debug!(session_id, point_id, round, rounds = config.rounds, "capture round done");
            if round < config.rounds {
                tokio::time::sleep(config.round_delay).await;
            }
        }

        let limits = SampleLimits::from_config(config);
        for band in Band::ALL {
            let kind = ArtifactKind::Spectrum(band);
            let ordinal = store.next_ordinal(session_id, point_id, kind).await?;
            let capture = sample_spectrum(config.commands.spectrum(band), &limits).await?;
            tracing::debug!(
                session_id,
                point_id,
                band = %band,
                samples = capture.samples,
                bytes = capture.output.len(),
                stop = ?capture.stop,
                "spectrum sample captured"
            );
            store
                .write_artifact(session_id, point_id, kind, ordinal, &capture.output)
                .await?;
        }

        let artifacts = store.load_artifacts(session_id, point_id).await?;
        let results = scoring::score_artifacts(&artifacts, &config.sample_marker);
        store.save_results(session_id, point_id, &results).await?;
        Ok(results)
    }
}
