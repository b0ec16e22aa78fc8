//! 文件系统任务重试执行器
//!
//! 某些存储后端（网络盘、故障磁盘）上的 `exists` / `mkdirs` / `createEmptyFile`
//! 可能永久挂起。每次尝试都放到专用阻塞线程池中执行并设置超时，
//! 失败后按固定延迟表重试（默认 0/5/10/15 秒），尝试之间检查取消令牌。
//!
//! 超时的尝试无法被强行终止：它会占住一个阻塞线程直到系统调用返回，
//! 执行器关闭时这些线程被放弃（`shutdown_background`）。

use crate::config::TaskExecutorConfig;
use crate::error::{Result, UnpackError};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// 单次尝试的失败原因
#[derive(Debug)]
enum AttemptError {
    Io(io::Error),
    TimedOut,
    Panicked,
    Cancelled,
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Io(e) => write!(f, "{}", e),
            AttemptError::TimedOut => write!(f, "attempt timed out"),
            AttemptError::Panicked => write!(f, "worker panicked"),
            AttemptError::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 带重试和超时的文件系统任务执行器
pub struct RetryingTaskExecutor {
    runtime: Option<Runtime>,
    initial_delay: Duration,
    retry_delays: Vec<Duration>,
    attempt_timeout: Duration,
}

impl RetryingTaskExecutor {
    /// 创建执行器，并为阻塞调用启动一个专用运行时
    pub fn new(config: &TaskExecutorConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.pool_size.max(4))
            .thread_name("unpack-fs-task")
            .build()?;

        let mut delays = config
            .attempt_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms));
        let initial_delay = delays.next().unwrap_or_default();

        Ok(Self {
            runtime: Some(runtime),
            initial_delay,
            retry_delays: delays.collect(),
            attempt_timeout: config.attempt_timeout(),
        })
    }

    pub fn max_attempts(&self) -> usize {
        self.retry_delays.len() + 1
    }

    /// 路径是否存在
    pub async fn exists(&self, path: &Path, cancel: &CancellationToken) -> Result<bool> {
        let target = path.to_path_buf();
        self.run("exists", path, cancel, move || Ok(target.exists())).await
    }

    /// 递归创建目录；返回目录最终是否存在
    pub async fn mkdirs(&self, path: &Path, cancel: &CancellationToken) -> Result<bool> {
        let target = path.to_path_buf();
        self.run("mkdirs", path, cancel, move || {
            std::fs::create_dir_all(&target)?;
            Ok(target.is_dir())
        })
        .await
    }

    /// 创建空文件；文件已存在时返回 false
    pub async fn create_empty_file(&self, path: &Path, cancel: &CancellationToken) -> Result<bool> {
        let target = path.to_path_buf();
        self.run("create_empty_file", path, cancel, move || {
            match OpenOptions::new().write(true).create_new(true).open(&target) {
                Ok(_) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// 通用重试循环：每次尝试都在阻塞池中执行并受超时约束
    pub(crate) async fn run<F>(
        &self,
        operation: &'static str,
        path: &Path,
        cancel: &CancellationToken,
        task: F,
    ) -> Result<bool>
    where
        F: Fn() -> io::Result<bool> + Send + Sync + 'static,
    {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| UnpackError::internal_error("task executor already shut down"))?;
        if cancel.is_cancelled() {
            return Err(UnpackError::Interrupted);
        }
        if !self.initial_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(UnpackError::Interrupted),
                _ = tokio::time::sleep(self.initial_delay) => {}
            }
        }

        let task = Arc::new(task);
        let attempts = AtomicUsize::new(0);
        let timeout = self.attempt_timeout;
        let handle = runtime.handle().clone();

        let action = || {
            let task = Arc::clone(&task);
            let handle = handle.clone();
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let cancelled = cancel.is_cancelled();
            async move {
                if cancelled {
                    return Err(AttemptError::Cancelled);
                }
                let join = handle.spawn_blocking(move || (*task)());
                match tokio::time::timeout(timeout, join).await {
                    Ok(Ok(Ok(value))) => Ok(value),
                    Ok(Ok(Err(e))) => Err(AttemptError::Io(e)),
                    Ok(Err(_)) => Err(AttemptError::Panicked),
                    Err(_) => {
                        debug!(operation, attempt, "Attempt exceeded timeout");
                        Err(AttemptError::TimedOut)
                    }
                }
            }
        };
        let condition = |err: &AttemptError| {
            if cancel.is_cancelled() || matches!(err, AttemptError::Cancelled) {
                return false;
            }
            warn!(
                operation,
                path = %path.display(),
                attempt = attempts.load(Ordering::SeqCst),
                error = %err,
                "File task failed, retrying"
            );
            true
        };

        let retry = RetryIf::spawn(self.retry_delays.clone(), action, condition);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(AttemptError::Cancelled),
            outcome = retry => outcome,
        };

        match outcome {
            Ok(value) => Ok(value),
            Err(AttemptError::Cancelled) => Err(UnpackError::Interrupted),
            Err(_) if cancel.is_cancelled() => Err(UnpackError::Interrupted),
            Err(e) => {
                let attempts = attempts.load(Ordering::SeqCst);
                error!(
                    operation,
                    path = %path.display(),
                    attempts,
                    error = %e,
                    "File task failed after all attempts"
                );
                Err(UnpackError::task_failed(operation, PathBuf::from(path), attempts))
            }
        }
    }
}

impl Drop for RetryingTaskExecutor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // stalled attempts keep their threads; they are abandoned here
            runtime.shutdown_background();
        }
    }
}
