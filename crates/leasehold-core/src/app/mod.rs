//! App - アプリケーション層
//!
//! ports を組み合わせて lease とクラスタのライフサイクルを実装します。
//!
//! # 主要コンポーネント
//! - **LeaseClient**: acquire / heartbeat / release（リトライと呼び出しごとの期限）
//! - **HeartbeatLoop**: 獲得した lease を維持するバックグラウンドタスク
//! - **ResourceManager**: プロジェクトの解決と lease の所有
//! - **LifecycleController**: Build → Up → IsUp → Down
//! - **DeployerBuilder**: 設定からの構築とワイヤリング

pub mod builder;
pub mod env;
pub mod heartbeat;
pub mod lease_client;
pub mod lifecycle;
pub mod resource_manager;

// 主要な型を再エクスポート
pub use self::builder::{DeployerBuilder, SetupError};
pub use self::heartbeat::{HeartbeatHandle, HeartbeatLoop, LeaseLostSignal};
pub use self::lease_client::LeaseClient;
pub use self::lifecycle::{DownReport, LifecycleController, PhasePlan, RunReport};
pub use self::resource_manager::{ResourceManager, ResourceSettings, TeardownReport};
