//! ImageBuilder port - ノードイメージのビルド

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::command::CommandError;

/// BuildRequest はビルドへの入力（すべて任意）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// 明示的なイメージ名
    pub image: Option<String>,
    /// ソースツリーのルート
    pub source_root: Option<PathBuf>,
    /// ビルド種別（ツールにそのまま渡す）
    pub build_type: Option<String>,
}

/// BuiltImage はビルド結果。Up フェーズで使う
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltImage {
    pub image: String,
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage, CommandError>;
}
