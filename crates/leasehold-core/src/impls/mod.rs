//! Impls - ports の実装
//!
//! # 本番用
//! - **HttpPoolService**: HTTP のリソースプール
//! - **CommandImageBuilder**: ビルドツールを起動する ImageBuilder
//! - **ShellClusterScripts**: `cluster/*.sh` を実行する ClusterScripts
//!
//! # 開発・テスト用
//! - **InMemoryPool**: メモリ上のリソースプール
//! - **RecordingScripts** / **StaticImageBuilder**: 呼び出しを記録するだけの collaborator

pub mod http_pool;
pub mod memory_pool;
pub mod process;
pub mod recording;

// 主要な型を再エクスポート
pub use self::http_pool::HttpPoolService;
pub use self::memory_pool::InMemoryPool;
pub use self::process::{CommandImageBuilder, ShellClusterScripts};
pub use self::recording::{RecordedCall, RecordingScripts, StaticImageBuilder};
