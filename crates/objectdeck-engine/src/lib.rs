//! Transfer engine driver
//!
//! Sync jobs shell out to an external transfer binary. The driver spawns one
//! process per run, turns its output lines into progress snapshots, and keeps
//! a per-job log file that rotates by truncating from the front.

mod joblog;
mod progress;

pub use joblog::{JobLog, LogChunk};
pub use progress::parse_progress_line;

use objectdeck_common::{DataLayout, Error, JobId, Progress, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Driver configuration and entry points.
#[derive(Clone)]
pub struct EngineDriver {
    binary: Option<PathBuf>,
    layout: DataLayout,
    log_max_bytes: u64,
}

impl EngineDriver {
    #[must_use]
    pub fn new(binary: Option<PathBuf>, layout: DataLayout, log_max_bytes: u64) -> Self {
        Self {
            binary,
            layout,
            log_max_bytes,
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    /// `<binary> --version`, first output line. `None` when no binary is
    /// configured or it cannot be executed.
    pub async fn probe_version(&self) -> Option<String> {
        let binary = self.binary.as_ref()?;
        let output = Command::new(binary).arg("--version").output().await.ok()?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.lines().next().map(|l| l.trim().to_string())
    }

    /// Open the log accessor for a job.
    #[must_use]
    pub fn job_log(&self, job_id: JobId) -> JobLog {
        JobLog::new(self.layout.job_log(&job_id.to_string()), self.log_max_bytes)
    }

    /// Run the engine for one job. Output lines are appended to the job log;
    /// lines that parse as progress are forwarded on `progress_tx`
    /// (latest-wins, non-blocking). Cancellation kills the process.
    pub async fn run(
        &self,
        job_id: JobId,
        args: &[String],
        cancel: &CancellationToken,
        progress_tx: &mpsc::Sender<Progress>,
    ) -> Result<()> {
        let Some(binary) = &self.binary else {
            return Err(Error::not_supported(
                "no transfer engine binary is configured",
            ));
        };
        let log = self.job_log(job_id);

        let mut child = Command::new(binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::internal(format!("spawn transfer engine: {e}")))?;

        let stdout = child.stdout.take().expect("stdout is piped");
        let stderr = child.stderr.take().expect("stderr is piped");
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut stdout_done = false;
        let mut stderr_done = false;
        while !(stdout_done && stderr_done) {
            tokio::select! {
                line = stdout_lines.next_line(), if !stdout_done => {
                    match line.map_err(|e| Error::internal(format!("engine stdout: {e}")))? {
                        Some(line) => self.consume_line(&log, &line, progress_tx),
                        None => stdout_done = true,
                    }
                }
                line = stderr_lines.next_line(), if !stderr_done => {
                    match line.map_err(|e| Error::internal(format!("engine stderr: {e}")))? {
                        Some(line) => self.consume_line(&log, &line, progress_tx),
                        None => stderr_done = true,
                    }
                }
                () = cancel.cancelled() => {
                    tracing::info!(job = %job_id, "killing transfer engine on cancel");
                    let _ = child.kill().await;
                    let _ = log.append("engine canceled");
                    return Err(Error::conflict("job canceled"));
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::internal(format!("wait for transfer engine: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            let _ = log.append(&format!("engine exited with {status}"));
            Err(Error::internal(format!(
                "transfer engine exited with {status}"
            )))
        }
    }

    fn consume_line(&self, log: &JobLog, line: &str, progress_tx: &mpsc::Sender<Progress>) {
        if let Err(e) = log.append(line) {
            tracing::warn!("job log write failed: {e}");
        }
        if let Some(progress) = parse_progress_line(line) {
            // try_send: a full channel means a newer snapshot is already
            // pending, which supersedes this one.
            let _ = progress_tx.try_send(progress);
        }
    }

    /// Last `byte_count` bytes of a job's log. Returns `(bytes, next_offset)`.
    pub fn stream_tail(&self, job_id: JobId, byte_count: u64) -> Result<LogChunk> {
        self.job_log(job_id).tail(byte_count)
    }

    /// Log bytes from `offset`, capped at `max_bytes`. A `next_offset`
    /// smaller than `offset` signals the file shrank (rotation) and the
    /// client must reset.
    pub fn stream_from(&self, job_id: JobId, offset: u64, max_bytes: u64) -> Result<LogChunk> {
        self.job_log(job_id).read_from(offset, max_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_without_binary_is_typed() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(tmp.path());
        layout.ensure().unwrap();
        let driver = EngineDriver::new(None, layout, 1024);
        assert!(!driver.is_available());

        let (tx, _rx) = mpsc::channel(1);
        let err = driver
            .run(JobId::new(), &[], &CancellationToken::new(), &tx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), objectdeck_common::ErrorCode::NotSupported);
    }

    #[tokio::test]
    async fn test_run_collects_output_and_progress() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(tmp.path());
        layout.ensure().unwrap();
        // `echo` stands in for the engine: one progress line to stdout.
        let driver = EngineDriver::new(Some(PathBuf::from("/bin/echo")), layout, 4096);
        let job_id = JobId::new();

        let (tx, mut rx) = mpsc::channel(8);
        driver
            .run(
                job_id,
                &["PROGRESS objects_done=2 bytes_done=100 speed_bps=50".to_string()],
                &CancellationToken::new(),
                &tx,
            )
            .await
            .unwrap();

        let progress = rx.try_recv().unwrap();
        assert_eq!(progress.objects_done, 2);
        assert_eq!(progress.bytes_done, 100);

        let chunk = driver.stream_tail(job_id, 1024).unwrap();
        assert!(String::from_utf8_lossy(&chunk.bytes).contains("objects_done=2"));
    }

    #[tokio::test]
    async fn test_cancel_kills_engine() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(tmp.path());
        layout.ensure().unwrap();
        let driver = EngineDriver::new(Some(PathBuf::from("/bin/sleep")), layout, 4096);

        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(1);
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });
        let err = driver
            .run(JobId::new(), &["30".to_string()], &cancel, &tx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), objectdeck_common::ErrorCode::Conflict);
    }
}
