//! Ports - 抽象化レイヤー
//!
//! 外部システム（リソースプール、ビルドツール、クラスタ用スクリプト）への
//! インターフェースを trait として定義し、実装の詳細を隠蔽します。
//! テストでは impls の InMemory 実装に差し替えます。

pub mod build;
pub mod clock;
pub mod cluster;
pub mod command;
pub mod id_generator;
pub mod pool;

// 主要な trait を再エクスポート
pub use self::build::{BuildRequest, BuiltImage, ImageBuilder};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::cluster::{ClusterEnv, ClusterScripts};
pub use self::command::CommandError;
pub use self::id_generator::{RunIdGenerator, UlidRunIdGenerator};
pub use self::pool::{PoolError, PoolService};
