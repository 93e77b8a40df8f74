//! Run identifiers.
//!
//! # RunId と RunIdentity
//! - **RunId**: 1 回の実行を表す ID。外部から渡されるか、ULID から生成する
//! - **RunIdentity**: RunId から一度だけ導出する短い名前（instance prefix, network）
//!
//! クラウドのリソース名には制約がある（英字で始まる、小文字英数字と `-`、長さ上限）。
//! RunIdentity はこの制約を満たすように導出する。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// RunIdentity のプレフィックス（英字で始めるため）
const NAME_PREFIX: &str = "lh-";

/// RunId から切り出す最大文字数
///
/// ULID の場合、先頭 10 文字が timestamp、続く 3 文字がランダム部分。
const MAX_FRAGMENT_LEN: usize = 13;

/// クラウドのリソース名の長さ上限
pub const MAX_RESOURCE_NAME_LEN: usize = 63;

/// Identifier of a single deployer run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// ULID から RunId を作成（小文字化する）
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid.to_string().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// RunIdentity はクラスタのリソース名に使う名前の組
///
/// 同じ RunId からは常に同じ RunIdentity が得られる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    instance_prefix: String,
    network: String,
}

impl RunIdentity {
    pub fn derive(run_id: &RunId) -> Self {
        let name = format!("{NAME_PREFIX}{}", name_fragment(run_id.as_str()));
        Self {
            instance_prefix: name.clone(),
            network: name,
        }
    }

    pub fn instance_prefix(&self) -> &str {
        &self.instance_prefix
    }

    pub fn network(&self) -> &str {
        &self.network
    }
}

/// RunId の先頭を、リソース名として使える形に切り出す
fn name_fragment(run_id: &str) -> String {
    let sanitized: String = run_id
        .chars()
        .take(MAX_FRAGMENT_LEN)
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();

    // 末尾の `-` はリソース名として不正
    let trimmed = sanitized.trim_end_matches('-');
    if trimmed.is_empty() {
        "run".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::uuid("09a2565a-7ac6-11eb-a603-2218f636630c", "lh-09a2565a-7ac6")]
    #[case::short("abc", "lh-abc")]
    #[case::uppercase("01HQZ5V3J0ABCDEFGHJKMNPQRS", "lh-01hqz5v3j0abc")]
    #[case::invalid_chars("run_1.x", "lh-run-1-x")]
    #[case::trailing_dash("abcdefghijkl-", "lh-abcdefghijkl")]
    #[case::empty("", "lh-run")]
    fn derives_resource_safe_names(#[case] run_id: &str, #[case] expected: &str) {
        let identity = RunIdentity::derive(&RunId::new(run_id));
        assert_eq!(identity.instance_prefix(), expected);
        assert_eq!(identity.network(), expected);
    }

    #[test]
    fn derived_names_satisfy_naming_rules() {
        let identity = RunIdentity::derive(&RunId::from_ulid(Ulid::new()));
        let name = identity.instance_prefix();

        assert!(name.starts_with(|c: char| c.is_ascii_lowercase()));
        assert!(name.len() <= MAX_RESOURCE_NAME_LEN);
        assert!(name.len() <= NAME_PREFIX.len() + MAX_FRAGMENT_LEN);
        assert!(
            name.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        );
    }

    #[test]
    fn derivation_is_deterministic() {
        let run_id = RunId::from_ulid(Ulid::new());
        assert_eq!(RunIdentity::derive(&run_id), RunIdentity::derive(&run_id));
    }
}
