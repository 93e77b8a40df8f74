//! State - ライフサイクルの状態とフェーズ

use serde::{Deserialize, Serialize};
use std::fmt;

/// LifecycleState はクラスタのライフサイクル状態
///
/// # 状態遷移
/// - NotStarted → Building → Up → Verified → TearingDown → Done
/// - NotStarted → Up（build を省略した場合）
/// - 終端以外の任意の状態 → Failed
/// - 任意の状態（Done を除く）→ TearingDown
///
/// TearingDown は NotStarted や Failed からも入れる。
/// build 失敗後でも lease を返す必要があるため。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    Building,
    Up,
    Verified,
    TearingDown,
    Done,
    Failed,
}

impl LifecycleState {
    /// Done / Failed は終端
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (NotStarted, Building) => true,
            (NotStarted | Building, Up) => true,
            (Up, Verified) => true,
            (TearingDown, Done) => true,
            (Done, _) => false,
            (_, TearingDown) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Building => "building",
            Self::Up => "up",
            Self::Verified => "verified",
            Self::TearingDown => "tearing_down",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Phase はライフサイクルの 1 ステップ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Build,
    Up,
    IsUp,
    Down,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Build => "build",
            Self::Up => "up",
            Self::IsUp => "is-up",
            Self::Down => "down",
        };
        f.write_str(s)
    }
}
