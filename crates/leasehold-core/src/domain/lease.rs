//! Lease - プールから借りたリソースの表現

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// PoolKind はプールに要求するリソースの種類
///
/// プール側の `type` にそのまま渡される（例: `gce-project`）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolKind(String);

impl PoolKind {
    pub const GCE_PROJECT: &'static str = "gce-project";

    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PoolKind {
    fn default() -> Self {
        Self::new(Self::GCE_PROJECT)
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lease はプールから獲得したリソース 1 件
///
/// # 所有権
/// - acquire 成功で生成され、ResourceManager だけが保持する
/// - release 成功、またはプール側の期限切れ（次の heartbeat で LeaseLost）で消える
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// リソースの種類
    pub kind: PoolKind,
    /// リソース名。クラウドプロジェクト ID として使う
    pub name: String,
    /// acquire 時に名乗った owner トークン
    pub owner: String,
    /// プール側が通知してきた有効期限（あれば）
    pub expires_at: Option<DateTime<Utc>>,
}

impl Lease {
    pub fn new(kind: PoolKind, name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            owner: owner.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// この lease が指すクラウドプロジェクト
    pub fn project(&self) -> &str {
        &self.name
    }

    /// `now` の時点で期限切れかどうか。期限が不明なら false
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (owner={})", self.kind, self.name, self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_kind_is_gce_project() {
        assert_eq!(PoolKind::default().as_str(), "gce-project");
    }

    #[test]
    fn lease_project_is_resource_name() {
        let lease = Lease::new(PoolKind::default(), "proj-17", "leasehold-abc");
        assert_eq!(lease.project(), "proj-17");
        assert_eq!(lease.to_string(), "gce-project/proj-17 (owner=leasehold-abc)");
    }

    #[test]
    fn expiry_is_checked_against_now() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let lease = Lease::new(PoolKind::default(), "p", "o").with_expiry(at);

        assert!(!lease.is_expired_at(at - chrono::Duration::seconds(1)));
        assert!(lease.is_expired_at(at));

        let open_ended = Lease::new(PoolKind::default(), "p", "o");
        assert!(!open_ended.is_expired_at(at));
    }
}
