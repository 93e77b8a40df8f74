//! ClusterScripts port - クラスタの up/down/検証

use async_trait::async_trait;

use super::command::CommandError;

/// ClusterEnv はスクリプトに渡す環境変数（順序を保持）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterEnv {
    vars: Vec<(String, String)>,
}

impl ClusterEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// 変数を追加する。同じキーが既にあれば上書き
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.vars.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// ClusterScripts はクラスタ操作の外部コマンド
///
/// 終了ステータスの非ゼロは `CommandError::Exited` として返す。
#[async_trait]
pub trait ClusterScripts: Send + Sync {
    async fn up(&self, env: &ClusterEnv) -> Result<(), CommandError>;

    async fn down(&self, env: &ClusterEnv) -> Result<(), CommandError>;

    /// 起動済みクラスタの健全性チェック（状態は変えない）
    async fn is_up(&self, env: &ClusterEnv) -> Result<(), CommandError>;

    /// プロジェクトで Compute Engine API を有効にする（有効済みなら何もしない）
    async fn enable_compute_api(&self, project: &str) -> Result<(), CommandError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_and_keeps_order() {
        let mut env = ClusterEnv::new();
        env.set("A", "1");
        env.set("B", "2");
        env.set("A", "3");

        assert_eq!(env.get("A"), Some("3"));
        assert_eq!(env.len(), 2);
        let keys: Vec<_> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["A", "B"]);
    }
}
