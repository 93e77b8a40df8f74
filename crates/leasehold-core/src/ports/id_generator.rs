//! RunIdGenerator port - RunId 生成の抽象化
//!
//! # 実装
//! - **UlidRunIdGenerator**: ULID ベース（本番用）

use ulid::Ulid;

use crate::domain::RunId;
use crate::ports::Clock;

/// RunIdGenerator は実行ごとに一意な RunId を生成
pub trait RunIdGenerator: Send + Sync {
    fn generate(&self) -> RunId;
}

/// UlidRunIdGenerator は ULID ベースの RunId 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
/// テスト時に FixedClock を使うと timestamp 部分が決定的になります。
pub struct UlidRunIdGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidRunIdGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> RunIdGenerator for UlidRunIdGenerator<C> {
    fn generate(&self) -> RunId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        RunId::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunIdentity;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidRunIdGenerator::new(SystemClock);

        let id1 = id_gen.generate();
        let id2 = id_gen.generate();

        assert_ne!(id1, id2);
    }

    #[test]
    fn fixed_clock_fixes_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidRunIdGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate();
        let id2 = id_gen.generate();

        // ランダム部分があるので ID は異なる
        assert_ne!(id1, id2);
        // timestamp 部分（先頭 10 文字）は同じ
        assert_eq!(id1.as_str()[..10], id2.as_str()[..10]);

        let parsed = Ulid::from_string(id1.as_str()).unwrap();
        assert_eq!(parsed.timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn generated_ids_are_lowercase_and_name_safe() {
        let run_id = UlidRunIdGenerator::new(SystemClock).generate();
        assert_eq!(run_id.as_str(), run_id.as_str().to_ascii_lowercase());

        let identity = RunIdentity::derive(&run_id);
        assert_eq!(identity.instance_prefix(), format!("lh-{}", &run_id.as_str()[..13]));
    }
}
