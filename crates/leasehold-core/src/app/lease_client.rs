//! LeaseClient - プールへの acquire / heartbeat / release
//!
//! PoolService の 1 回分の呼び出しに、タイムアウトとリトライの方針を被せる。
//!
//! # タイムアウト
//! - acquire: 呼び出し側が指定（秒単位、既定 300 秒）
//! - heartbeat: 固定 10 秒
//! - release: 固定 30 秒

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{Lease, LeaseError, PoolKind};
use crate::ports::{PoolError, PoolService};
use crate::retry::RetryPolicy;

pub const HEARTBEAT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
pub const RELEASE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// LeaseClient はプール呼び出しのクライアント
pub struct LeaseClient {
    pool: Arc<dyn PoolService>,
    owner: String,
    retry: RetryPolicy,
}

type AcquireCall = JoinHandle<Result<Option<Lease>, PoolError>>;

/// 実行中の acquire 呼び出し 1 回分
///
/// 結果を受け取る前に drop された場合（期限切れ、呼び出し側の中断）は、
/// 呼び出しの完了を別タスクで待ち、獲得できていたリソースを返却する。
struct InFlightAcquire {
    pool: Arc<dyn PoolService>,
    call: Option<AcquireCall>,
}

impl InFlightAcquire {
    fn spawn(pool: &Arc<dyn PoolService>, kind: &PoolKind, owner: &str) -> Self {
        let call = tokio::spawn({
            let pool = Arc::clone(pool);
            let kind = kind.clone();
            let owner = owner.to_string();
            async move { pool.try_acquire(&kind, &owner).await }
        });
        Self {
            pool: Arc::clone(pool),
            call: Some(call),
        }
    }

    /// `limit` まで結果を待つ。間に合わなければ None
    async fn wait(&mut self, limit: Duration) -> Option<Result<Option<Lease>, PoolError>> {
        let call = self.call.as_mut()?;
        let joined = tokio::time::timeout(limit, call).await.ok()?;
        self.call = None;
        Some(joined.unwrap_or_else(|e| Err(PoolError::Transient(format!("acquire task failed: {e}")))))
    }
}

impl Drop for InFlightAcquire {
    fn drop(&mut self) {
        if let Some(call) = self.call.take() {
            return_late_grant(Arc::clone(&self.pool), call);
        }
    }
}

/// 放棄した acquire が後から成功した場合にリソースを返す
fn return_late_grant(pool: Arc<dyn PoolService>, call: AcquireCall) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("no runtime to return a late acquire; the pool reclaims it on expiry");
        call.abort();
        return;
    };
    runtime.spawn(async move {
        let Ok(Ok(Some(lease))) = call.await else {
            return;
        };
        warn!(lease = %lease.name, "acquire completed after it was abandoned; returning the resource");
        match tokio::time::timeout(RELEASE_CALL_TIMEOUT, pool.release(&lease)).await {
            Ok(Ok(())) => info!(lease = %lease.name, "returned late-granted resource"),
            Ok(Err(err)) => warn!(lease = %lease.name, error = %err, "failed to return late-granted resource"),
            Err(_elapsed) => warn!(lease = %lease.name, "timed out returning late-granted resource"),
        }
    });
}

/// 直前の acquire 試行が失敗した理由
enum LastMiss {
    NothingFree,
    Transient(String),
}

impl LeaseClient {
    pub fn new(pool: Arc<dyn PoolService>, owner: impl Into<String>) -> Self {
        Self {
            pool,
            owner: owner.into(),
            retry: RetryPolicy::acquire_default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// リソースを獲得するまで待つ
    ///
    /// # 振る舞い
    /// - 空きなし / 一時的エラーは `timeout` の範囲でバックオフしながらリトライ
    /// - 恒久的エラーは即 `PoolUnavailable`
    /// - 期限切れ時、最後の失敗が一時的エラーなら `PoolUnavailable`、それ以外は `AcquisitionTimeout`
    /// - 実行中の呼び出しも期限で打ち切る。その呼び出しが後から獲得したリソースは返却する
    pub async fn acquire(&self, kind: &PoolKind, timeout: Duration) -> Result<Lease, LeaseError> {
        let deadline = Instant::now() + timeout;
        let mut attempts: u32 = 0;
        let mut last_miss = LastMiss::NothingFree;

        info!(kind = %kind, owner = %self.owner, timeout_secs = timeout.as_secs(), "acquiring resource from pool");

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.exhausted(kind, timeout, last_miss));
            }

            attempts += 1;
            let mut call = InFlightAcquire::spawn(&self.pool, kind, &self.owner);
            let Some(outcome) = call.wait(remaining).await else {
                // call の drop で、後から獲得されたリソースは返却される
                return Err(LeaseError::AcquisitionTimeout {
                    kind: kind.clone(),
                    timeout_secs: timeout.as_secs(),
                });
            };
            match outcome {
                Ok(Some(lease)) => {
                    info!(lease = %lease.name, attempts, "acquired resource");
                    return Ok(lease);
                }
                Ok(None) => {
                    debug!(kind = %kind, attempts, "no free resource yet");
                    last_miss = LastMiss::NothingFree;
                }
                Err(PoolError::Transient(msg)) => {
                    warn!(error = %msg, attempts, "transient pool error while acquiring");
                    last_miss = LastMiss::Transient(msg);
                }
                Err(PoolError::Fatal(msg) | PoolError::LeaseLost(msg)) => {
                    return Err(LeaseError::PoolUnavailable(msg));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let delay = self.retry.next_delay(attempts).min(remaining);
            tokio::time::sleep(delay).await;
        }
    }

    fn exhausted(&self, kind: &PoolKind, timeout: Duration, last_miss: LastMiss) -> LeaseError {
        match last_miss {
            LastMiss::NothingFree => LeaseError::AcquisitionTimeout {
                kind: kind.clone(),
                timeout_secs: timeout.as_secs(),
            },
            LastMiss::Transient(msg) => LeaseError::PoolUnavailable(msg),
        }
    }

    /// lease の生存を通知する
    ///
    /// - `LeaseLost`: プール側で回収済み。リトライしない
    /// - `PoolUnavailable`: 一時的な失敗（呼び出し側が次の tick で再送するか判断する）
    pub async fn heartbeat(&self, lease: &Lease) -> Result<(), LeaseError> {
        match tokio::time::timeout(HEARTBEAT_CALL_TIMEOUT, self.pool.heartbeat(lease)).await {
            Ok(Ok(())) => {
                debug!(lease = %lease.name, "heartbeat sent");
                Ok(())
            }
            Ok(Err(PoolError::LeaseLost(_))) => Err(LeaseError::LeaseLost(lease.name.clone())),
            Ok(Err(PoolError::Transient(msg) | PoolError::Fatal(msg))) => {
                Err(LeaseError::PoolUnavailable(msg))
            }
            Err(_elapsed) => Err(LeaseError::PoolUnavailable(format!(
                "heartbeat timed out after {}s",
                HEARTBEAT_CALL_TIMEOUT.as_secs()
            ))),
        }
    }

    /// lease を返却する（best-effort）
    ///
    /// 失敗はログに残して `ReleaseFailed` を返すが、呼び出し側はこれを致命的に扱わない。
    pub async fn release(&self, lease: &Lease) -> Result<(), LeaseError> {
        let result = match tokio::time::timeout(RELEASE_CALL_TIMEOUT, self.pool.release(lease)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_elapsed) => Err(format!(
                "release timed out after {}s",
                RELEASE_CALL_TIMEOUT.as_secs()
            )),
        };

        match result {
            Ok(()) => {
                info!(lease = %lease.name, "released resource");
                Ok(())
            }
            Err(reason) => {
                warn!(lease = %lease.name, error = %reason, "failed to release resource");
                Err(LeaseError::ReleaseFailed {
                    name: lease.name.clone(),
                    reason,
                })
            }
        }
    }
}
