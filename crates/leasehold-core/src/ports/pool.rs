//! PoolService port - リモートのリソースプール
//!
//! プールのワイヤプロトコルはこの trait の実装側の関心事。
//! 本番は `impls::HttpPoolService`、テストは `impls::InMemoryPool`。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Lease, PoolKind};

/// PoolError はプール呼び出しのエラー分類
///
/// # 分類
/// - Transient: 一時的なエラー（タイムアウト予算内でリトライ）
/// - Fatal: 恒久的なエラー（リトライ無意味）
/// - LeaseLost: プール側がすでにリソースを回収済み
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("transient pool error: {0}")]
    Transient(String),

    #[error("pool rejected the request: {0}")]
    Fatal(String),

    #[error("lease is no longer held: {0}")]
    LeaseLost(String),
}

/// PoolService はリソースプールへの 1 回分の呼び出しを表現
///
/// # 設計原則
/// - 各メソッドは 1 回だけ呼び出す（リトライは LeaseClient が行う）
/// - `try_acquire` は空きがなければ `Ok(None)` を返す
#[async_trait]
pub trait PoolService: Send + Sync {
    /// `kind` のリソースを 1 件 `owner` として獲得する
    async fn try_acquire(&self, kind: &PoolKind, owner: &str) -> Result<Option<Lease>, PoolError>;

    /// lease の生存を通知する
    async fn heartbeat(&self, lease: &Lease) -> Result<(), PoolError>;

    /// lease を返却する
    async fn release(&self, lease: &Lease) -> Result<(), PoolError>;
}
