//! Errors - エラー型と分類
//!
//! # 分類
//! - **LeaseError**: プールとのやり取りで起きるエラー
//! - **RunError**: ライフサイクル全体として報告するエラー
//!
//! release の失敗（`LeaseError::ReleaseFailed`）は警告扱いで、
//! 実行全体を失敗させることはない。

use thiserror::Error;

use super::lease::PoolKind;
use super::state::{LifecycleState, Phase};

/// LeaseError は lease の獲得・維持・返却のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseError {
    /// 制限時間内にリソースを獲得できなかった（致命的）
    #[error("timed out after {timeout_secs}s waiting for a {kind} resource")]
    AcquisitionTimeout { kind: PoolKind, timeout_secs: u64 },

    /// プールが使えない（致命的）
    #[error("resource pool unavailable: {0}")]
    PoolUnavailable(String),

    /// プール側がすでにリソースを回収した
    #[error("lease on {0} was lost")]
    LeaseLost(String),

    /// 返却に失敗した（警告のみ）
    #[error("failed to release {name}: {reason}")]
    ReleaseFailed { name: String, reason: String },

    /// teardown 済みの ResourceManager に再度 acquire を要求した
    #[error("resource manager has already been torn down")]
    Closed,
}

impl LeaseError {
    /// 実行全体を止めるべきエラーかどうか
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ReleaseFailed { .. })
    }
}

/// RunError はライフサイクルの実行エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error("{phase} phase failed: {reason}")]
    PhaseFailed { phase: Phase, reason: String },

    #[error("cannot move from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("run interrupted")]
    Interrupted,
}

impl RunError {
    pub fn phase_failed(phase: Phase, reason: impl Into<String>) -> Self {
        Self::PhaseFailed {
            phase,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_failure_is_not_fatal() {
        let err = LeaseError::ReleaseFailed {
            name: "p".into(),
            reason: "boom".into(),
        };
        assert!(!err.is_fatal());
        assert!(LeaseError::LeaseLost("p".into()).is_fatal());
    }

    #[test]
    fn messages_name_the_failure() {
        let err = RunError::from(LeaseError::AcquisitionTimeout {
            kind: PoolKind::default(),
            timeout_secs: 2,
        });
        assert_eq!(
            err.to_string(),
            "timed out after 2s waiting for a gce-project resource"
        );

        let err = RunError::phase_failed(Phase::Up, "exit status 1");
        assert_eq!(err.to_string(), "up phase failed: exit status 1");
    }
}
