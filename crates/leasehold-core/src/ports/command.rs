//! 外部コマンド実行のエラー

use thiserror::Error;

/// CommandError は外部コマンド（ビルドツール、クラスタ用スクリプト）の失敗
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// プロセスを起動できなかった
    #[error("failed to start {command}: {reason}")]
    Spawn { command: String, reason: String },

    /// 非ゼロで終了した（シグナルで終了した場合 code は None）
    #[error("{command} exited with {}", display_code(*.code))]
    Exited { command: String, code: Option<i32> },

    /// 実行前の検証で失敗した
    #[error("{0}")]
    Invalid(String),
}

fn display_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}
