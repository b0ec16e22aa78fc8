//! 取消管理器 - 基于 tokio-util CancellationToken 的作业级取消
//!
//! 每个解包作业拥有一个全局令牌的子令牌：取消单个作业只影响该作业的
//! 所有 `unpack` 调用，关闭服务时取消全局令牌即可级联到全部作业。

use crate::models::JobId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 作业取消令牌注册表
pub struct CancellationManager {
    tokens: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
    /// 服务关闭时使用
    global_token: CancellationToken,
}

impl CancellationManager {
    pub fn new() -> Self {
        Self {
            tokens: Arc::new(Mutex::new(HashMap::new())),
            global_token: CancellationToken::new(),
        }
    }

    /// 为作业创建并注册令牌
    pub fn create_token(&self, job: JobId) -> CancellationToken {
        let token = self.global_token.child_token();
        self.tokens.lock().insert(job, token.clone());
        info!(%job, "Created cancellation token for job");
        token
    }

    pub fn get_token(&self, job: JobId) -> Option<CancellationToken> {
        self.tokens.lock().get(&job).cloned()
    }

    /// 取消作业；作业不存在或已结束时返回 false
    pub fn cancel_job(&self, job: JobId) -> bool {
        let token = self.tokens.lock().get(&job).cloned();
        match token {
            Some(token) => {
                token.cancel();
                info!(%job, "Cancelled job");
                true
            }
            None => {
                warn!(%job, "Job not found or already completed");
                false
            }
        }
    }

    pub fn remove_token(&self, job: JobId) {
        self.tokens.lock().remove(&job);
    }

    pub fn cancel_all(&self) {
        self.global_token.cancel();
        let count = {
            let mut tokens = self.tokens.lock();
            let count = tokens.len();
            tokens.clear();
            count
        };
        info!(count, "Cancelled all active jobs");
    }

    pub fn active_count(&self) -> usize {
        self.tokens.lock().len()
    }
}

impl Default for CancellationManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 作业存活期间持有令牌，离开作用域时自动注销
pub struct JobCancellation {
    job: JobId,
    token: CancellationToken,
    manager: Arc<CancellationManager>,
}

impl JobCancellation {
    pub fn new(job: JobId, manager: Arc<CancellationManager>) -> Self {
        let token = manager.create_token(job);
        Self {
            job,
            token,
            manager,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn job(&self) -> JobId {
        self.job
    }
}

impl Drop for JobCancellation {
    fn drop(&mut self) {
        self.manager.remove_token(self.job);
    }
}
