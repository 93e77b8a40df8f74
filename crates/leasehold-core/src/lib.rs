//! leasehold-core
//!
//! テスト用クラスタのライフサイクルと、共有プールから借りる
//! クラウドプロジェクト（lease）を管理するためのコア。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（Lease, RunIdentity, LifecycleState, errors）
//! - **ports**: 抽象化レイヤー（PoolService, ImageBuilder, ClusterScripts, Clock, RunIdGenerator）
//! - **app**: アプリケーションロジック（LeaseClient, HeartbeatLoop, ResourceManager, LifecycleController, builder）
//! - **impls**: 実装（HttpPoolService, プロセス実行、開発・テスト用の InMemory 実装）
//! - **config**: 設定の読み込み（defaults → toml → 環境変数）
//! - **retry**: acquire 時のバックオフ計算

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod retry;

pub use app::{
    DeployerBuilder, DownReport, LeaseClient, LifecycleController, PhasePlan, ResourceManager,
    RunReport, TeardownReport,
};
pub use config::DeployerConfig;
pub use domain::{Lease, LeaseError, LifecycleState, PoolKind, RunError, RunId, RunIdentity};
