//! ResourceManager - プロジェクトの解決と lease の所有者
//!
//! # 責務
//! 1. 明示的なプロジェクトがあればプールには触れない
//! 2. なければ LeaseClient で acquire し、heartbeat を開始する
//! 3. teardown で heartbeat を止めて（join まで待って）から release する
//!
//! Lease と HeartbeatHandle を変更するのはこの型だけ。
//! ライフサイクル側は resolved project と喪失の通知だけを観測する。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::heartbeat::{HeartbeatHandle, HeartbeatLoop, LeaseLostSignal};
use super::lease_client::LeaseClient;
use crate::domain::{Lease, LeaseError, PoolKind};

/// ResourceSettings は ResourceManager の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSettings {
    /// 明示的に指定されたプロジェクト（プールを使わない）
    pub project: Option<String>,
    pub pool_kind: PoolKind,
    pub acquire_timeout: Duration,
    /// 0 なら heartbeat しない
    pub heartbeat_interval: Duration,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            project: None,
            pool_kind: PoolKind::default(),
            acquire_timeout: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(300),
        }
    }
}

/// TeardownReport は teardown の結果
///
/// teardown は失敗しても実行全体を止めない。結果はこの型で報告する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownReport {
    /// lease を持っていなかった（明示的なプロジェクト、または acquire 前）
    NoLease,
    /// lease を返却した
    Released { name: String },
    /// 返却に失敗した（プール側の期限切れで回収される）
    ReleaseFailed { name: String, reason: String },
    /// 既に teardown 済み
    AlreadyTornDown,
}

impl TeardownReport {
    /// 借りたリソースがプールに戻った（または借りていない）か
    pub fn resource_returned(&self) -> bool {
        !matches!(self, Self::ReleaseFailed { .. })
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLease => f.write_str("no leased resource to return"),
            Self::Released { name } => write!(f, "released {name}"),
            Self::ReleaseFailed { name, reason } => {
                write!(f, "failed to release {name}: {reason}")
            }
            Self::AlreadyTornDown => f.write_str("already torn down"),
        }
    }
}

/// ResourceManager は 1 回の実行につき 1 つ
pub struct ResourceManager {
    settings: ResourceSettings,
    client: Option<Arc<LeaseClient>>,
    lease: Option<Lease>,
    heartbeat: Option<HeartbeatHandle>,
    resolved_project: Option<String>,
    lost: LeaseLostSignal,
    /// teardown が始まった。以降は acquire しない
    closed: bool,
    /// release まで終わった
    torn_down: bool,
}

impl ResourceManager {
    /// `client` はプールを使うときだけ必要
    pub fn new(settings: ResourceSettings, client: Option<Arc<LeaseClient>>) -> Self {
        Self {
            settings,
            client,
            lease: None,
            heartbeat: None,
            resolved_project: None,
            lost: LeaseLostSignal::new(),
            closed: false,
            torn_down: false,
        }
    }

    pub fn settings(&self) -> &ResourceSettings {
        &self.settings
    }

    /// 使用するプロジェクトを確定する
    ///
    /// 2 回目以降は確定済みの値を返す。acquire の失敗は致命的。
    /// 途中で中断されても、獲得済みの lease は teardown の対象に残る。
    pub async fn ensure_project(&mut self) -> Result<&str, LeaseError> {
        if self.resolved_project.is_none() {
            self.resolve().await?;
        }
        self.ensure_heartbeat().await;
        Ok(self.resolved_project.as_deref().unwrap_or_default())
    }

    async fn resolve(&mut self) -> Result<(), LeaseError> {
        if self.closed {
            return Err(LeaseError::Closed);
        }

        if let Some(project) = &self.settings.project {
            info!(project = %project, "using explicitly configured project");
            self.resolved_project = Some(project.clone());
            return Ok(());
        }

        let client = self.client.clone().ok_or_else(|| {
            LeaseError::PoolUnavailable("no project configured and no pool client available".into())
        })?;

        let lease = client
            .acquire(&self.settings.pool_kind, self.settings.acquire_timeout)
            .await?;
        let project = lease.project().to_string();
        info!(project = %project, "using project from pool");

        self.lease = Some(lease);
        self.resolved_project = Some(project);
        Ok(())
    }

    /// lease を持っていて heartbeat が未開始なら開始する
    async fn ensure_heartbeat(&mut self) {
        if self.closed
            || self.heartbeat.is_some()
            || self.settings.heartbeat_interval.is_zero()
            || self.lost.is_lost()
        {
            return;
        }
        let (Some(client), Some(lease)) = (self.client.clone(), self.lease.clone()) else {
            return;
        };

        let heartbeat = HeartbeatLoop::new(
            client,
            lease,
            self.settings.heartbeat_interval,
            self.lost.clone(),
        );
        self.heartbeat = Some(heartbeat.start().await);
    }

    pub fn resolved_project(&self) -> Option<&str> {
        self.resolved_project.as_deref()
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn holds_lease(&self) -> bool {
        self.lease.is_some()
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// lease を失ったときの callback を登録する
    pub fn on_lease_lost<F>(&self, callback: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        self.lost.on_lost(callback);
    }

    pub fn lease_lost(&self) -> bool {
        self.lost.is_lost()
    }

    /// 喪失の通知を待つためのシグナル
    pub fn lost_signal(&self) -> LeaseLostSignal {
        self.lost.clone()
    }

    /// heartbeat を止めてから lease を返却する
    ///
    /// 何度呼んでもよい（実際の処理は最初に完了した 1 回だけ）。acquire 前でもよい。
    /// 途中で中断された場合、lease は保持したままなので次の呼び出しで返却される。
    pub async fn teardown(&mut self) -> TeardownReport {
        if self.torn_down {
            return TeardownReport::AlreadyTornDown;
        }
        self.closed = true;

        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.stop_and_join().await;
        }
        self.heartbeat = None;

        let Some(lease) = self.lease.clone() else {
            self.torn_down = true;
            return TeardownReport::NoLease;
        };
        let report = match self.client.clone() {
            None => TeardownReport::ReleaseFailed {
                name: lease.name,
                reason: "no pool client available".into(),
            },
            Some(client) => match client.release(&lease).await {
                Ok(()) => TeardownReport::Released { name: lease.name },
                Err(err) => {
                    let reason = match err {
                        LeaseError::ReleaseFailed { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    TeardownReport::ReleaseFailed {
                        name: lease.name,
                        reason,
                    }
                }
            },
        };

        self.lease = None;
        self.torn_down = true;
        report
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        // release は async なのでここではできない。heartbeat は HeartbeatHandle の drop で止まる
        if let Some(lease) = &self.lease {
            warn!(lease = %lease.name, "resource manager dropped without teardown; lease will expire in the pool");
        }
    }
}
