//! InMemoryPool - 開発・テスト用のリソースプール
//!
//! # 学習ポイント
//! - tokio::sync::Mutex による状態の排他制御
//! - Atomic カウンタで呼び出し回数を記録（テストの検証用）
//! - 遅延・一時的エラー・期限切れを注入して失敗系を再現する

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Lease, PoolKind};
use crate::ports::{PoolError, PoolService};

/// InMemoryPool はプロセス内で完結するリソースプール
///
/// # 使用例
/// ```ignore
/// let pool = Arc::new(InMemoryPool::with_resources(["proj-a", "proj-b"]));
/// let client = LeaseClient::new(pool.clone(), "me");
/// ```
pub struct InMemoryPool {
    kind: PoolKind,
    acquire_delay: Duration,
    grant_delay: Duration,
    heartbeat_delay: Duration,
    release_delay: Duration,
    state: Mutex<PoolState>,
    acquire_calls: AtomicUsize,
    heartbeat_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

#[derive(Default)]
struct PoolState {
    /// 空いているリソース
    free: VecDeque<String>,
    /// 貸出中のリソース（name -> owner）
    held: HashMap<String, String>,
    /// 次の acquire をこの回数だけ一時的エラーにする
    failing_acquires: u32,
    /// 次の heartbeat をこの回数だけ一時的エラーにする
    failing_heartbeats: u32,
    /// release を常に失敗させる
    failing_releases: bool,
}

impl InMemoryPool {
    /// 空のプールを作成
    pub fn new() -> Self {
        Self {
            kind: PoolKind::default(),
            acquire_delay: Duration::ZERO,
            grant_delay: Duration::ZERO,
            heartbeat_delay: Duration::ZERO,
            release_delay: Duration::ZERO,
            state: Mutex::new(PoolState::default()),
            acquire_calls: AtomicUsize::new(0),
            heartbeat_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_resources<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pool = Self::new();
        pool.state.get_mut().free = names.into_iter().map(Into::into).collect();
        pool
    }

    /// 扱うリソース種別を変更する（既定は `gce-project`）
    pub fn with_kind(mut self, kind: PoolKind) -> Self {
        self.kind = kind;
        self
    }

    /// acquire の応答を遅らせる
    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = delay;
        self
    }

    /// acquire でリソースを確保したあと、応答だけを遅らせる
    pub fn with_grant_delay(mut self, delay: Duration) -> Self {
        self.grant_delay = delay;
        self
    }

    /// heartbeat の応答を遅らせる
    pub fn with_heartbeat_delay(mut self, delay: Duration) -> Self {
        self.heartbeat_delay = delay;
        self
    }

    /// release を遅らせる。遅延中に中断されるとリソースは返却されない
    pub fn with_release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = delay;
        self
    }

    pub async fn add_resource(&self, name: impl Into<String>) {
        self.state.lock().await.free.push_back(name.into());
    }

    /// プール側で lease を回収する（期限切れの再現）
    pub async fn expire(&self, name: &str) {
        let mut state = self.state.lock().await;
        if state.held.remove(name).is_some() {
            state.free.push_back(name.to_string());
        }
    }

    pub async fn fail_next_acquires(&self, n: u32) {
        self.state.lock().await.failing_acquires = n;
    }

    pub async fn fail_next_heartbeats(&self, n: u32) {
        self.state.lock().await.failing_heartbeats = n;
    }

    pub async fn fail_releases(&self) {
        self.state.lock().await.failing_releases = true;
    }

    pub async fn is_held(&self, name: &str) -> bool {
        self.state.lock().await.held.contains_key(name)
    }

    pub async fn free_count(&self) -> usize {
        self.state.lock().await.free.len()
    }

    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    pub fn heartbeat_calls(&self) -> usize {
        self.heartbeat_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    /// 呼び出しの総数
    pub fn total_calls(&self) -> usize {
        self.acquire_calls() + self.heartbeat_calls() + self.release_calls()
    }
}

impl Default for InMemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PoolService for InMemoryPool {
    async fn try_acquire(&self, kind: &PoolKind, owner: &str) -> Result<Option<Lease>, PoolError> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        if !self.acquire_delay.is_zero() {
            tokio::time::sleep(self.acquire_delay).await;
        }

        if *kind != self.kind {
            return Err(PoolError::Fatal(format!("unknown resource type {kind}")));
        }

        let mut state = self.state.lock().await;
        if state.failing_acquires > 0 {
            state.failing_acquires -= 1;
            return Err(PoolError::Transient("pool is busy".to_string()));
        }

        let Some(name) = state.free.pop_front() else {
            return Ok(None);
        };
        state.held.insert(name.clone(), owner.to_string());
        drop(state);

        if !self.grant_delay.is_zero() {
            tokio::time::sleep(self.grant_delay).await;
        }
        Ok(Some(Lease::new(kind.clone(), name, owner)))
    }

    async fn heartbeat(&self, lease: &Lease) -> Result<(), PoolError> {
        self.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
        if !self.heartbeat_delay.is_zero() {
            tokio::time::sleep(self.heartbeat_delay).await;
        }

        let mut state = self.state.lock().await;
        if state.failing_heartbeats > 0 {
            state.failing_heartbeats -= 1;
            return Err(PoolError::Transient("pool is busy".to_string()));
        }

        match state.held.get(&lease.name) {
            Some(owner) if *owner == lease.owner => Ok(()),
            _ => Err(PoolError::LeaseLost(lease.name.clone())),
        }
    }

    async fn release(&self, lease: &Lease) -> Result<(), PoolError> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        if !self.release_delay.is_zero() {
            tokio::time::sleep(self.release_delay).await;
        }

        let mut state = self.state.lock().await;
        if state.failing_releases {
            return Err(PoolError::Transient("release rejected".to_string()));
        }

        match state.held.get(&lease.name) {
            Some(owner) if *owner == lease.owner => {
                state.held.remove(&lease.name);
                state.free.push_back(lease.name.clone());
                Ok(())
            }
            _ => Err(PoolError::Fatal(format!("{} is not held by {}", lease.name, lease.owner))),
        }
    }
}
