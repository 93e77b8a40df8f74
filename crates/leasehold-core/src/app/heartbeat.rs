//! HeartbeatLoop - lease を保持し続けるための定期タスク
//!
//! # 停止の仕組み
//! - `watch::Sender<bool>` に true を送ると止まる（2 回目以降は何もしない）
//! - `stop_and_join()` はタスクの終了まで待つ。release と heartbeat が競合しない
//! - HeartbeatHandle を drop した場合も停止を要求する
//!
//! # lease の喪失
//! - heartbeat が `LeaseLost` を返したら LeaseLostSignal に報告して終了
//! - 一時的な失敗は次の tick で再送。連続 `MAX_CONSECUTIVE_FAILURES` 回で喪失扱い

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::lease_client::LeaseClient;
use crate::domain::{Lease, LeaseError};

/// 一時的な heartbeat 失敗をこの回数連続で受けたら lease を失ったとみなす
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

type LostCallback = Box<dyn FnOnce(&str) + Send + 'static>;

/// LeaseLostSignal は lease の喪失を 1 回だけ通知する
///
/// HeartbeatLoop が報告し、ResourceManager とライフサイクルが観測する。
#[derive(Clone)]
pub struct LeaseLostSignal {
    inner: Arc<LostInner>,
}

struct LostInner {
    tx: watch::Sender<Option<String>>,
    callbacks: Mutex<Vec<LostCallback>>,
}

impl LeaseLostSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            inner: Arc::new(LostInner {
                tx,
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 喪失を報告する。最初の報告だけが callback を呼ぶ
    pub fn report(&self, lease_name: &str) {
        let callbacks = {
            let mut guard = self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let first = self.inner.tx.send_if_modified(|lost| {
                if lost.is_some() {
                    return false;
                }
                *lost = Some(lease_name.to_string());
                true
            });
            if !first {
                return;
            }
            std::mem::take(&mut *guard)
        };

        error!(lease = %lease_name, "lease lost; remaining phases will be aborted");
        for callback in callbacks {
            callback(lease_name);
        }
    }

    /// callback を登録する。既に失われていれば即座に呼ぶ
    pub fn on_lost<F>(&self, callback: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        let mut guard = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let lost = self.inner.tx.borrow().clone();
        match lost {
            Some(name) => {
                drop(guard);
                callback(&name);
            }
            None => guard.push(Box::new(callback)),
        }
    }

    pub fn is_lost(&self) -> bool {
        self.inner.tx.borrow().is_some()
    }

    /// 失われた lease の名前
    pub fn lost_lease(&self) -> Option<String> {
        self.inner.tx.borrow().clone()
    }

    /// 喪失まで待つ。報告されなければ完了しない
    pub async fn wait(&self) -> String {
        let mut rx = self.inner.tx.subscribe();
        if let Ok(lost) = rx.wait_for(Option::is_some).await {
            return lost.clone().unwrap_or_default();
        }
        // Sender は self が持っているので閉じない
        std::future::pending().await
    }
}

impl Default for LeaseLostSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// HeartbeatHandle は実行中の HeartbeatLoop の停止ハンドル
pub struct HeartbeatHandle {
    shutdown_tx: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    /// 停止を要求する（待たない）。何度呼んでもよい
    pub fn request_stop(&self) {
        // ignore send error: the loop may already have exited
        let _ = self.shutdown_tx.send(true);
    }

    /// 停止を要求し、ループの終了まで待つ
    pub async fn stop_and_join(&mut self) {
        self.request_stop();
        let Some(join) = self.join.as_mut() else {
            return;
        };
        // 待機中に中断されても、次の呼び出しで同じタスクを待ち直せる
        let joined = join.await;
        self.join = None;
        if let Err(e) = joined {
            warn!(error = %e, "heartbeat task ended abnormally");
        }
    }

    /// ループが既に終了しているか
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.request_stop();
    }
}

/// HeartbeatLoop は lease に対して定期的に heartbeat を送る
pub struct HeartbeatLoop {
    client: Arc<LeaseClient>,
    lease: Lease,
    interval: Duration,
    lost: LeaseLostSignal,
}

impl HeartbeatLoop {
    pub fn new(
        client: Arc<LeaseClient>,
        lease: Lease,
        interval: Duration,
        lost: LeaseLostSignal,
    ) -> Self {
        Self {
            client,
            lease,
            interval,
            lost,
        }
    }

    /// 最初の heartbeat を送ってから、定期タスクを起動する
    ///
    /// 最初の 1 回をここで済ませるので、teardown より前に必ず 1 回は heartbeat が届く。
    /// ここで lease を失っていた場合はタスクを起動しない。
    pub async fn start(self) -> HeartbeatHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(lease = %self.lease.name, interval_secs = self.interval.as_secs(), "starting heartbeat");

        let mut failures = 0;
        if !self.beat(&mut failures).await {
            return HeartbeatHandle {
                shutdown_tx,
                join: None,
            };
        }

        let join = tokio::spawn(self.run(shutdown_rx, failures));
        HeartbeatHandle {
            shutdown_tx,
            join: Some(join),
        }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>, mut failures: u32) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    // Sender が drop された場合も止める
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if !self.beat(&mut failures).await {
                break;
            }
        }

        debug!(lease = %self.lease.name, "heartbeat loop exited");
    }

    /// heartbeat を 1 回送る。ループを続けるなら true
    async fn beat(&self, failures: &mut u32) -> bool {
        match self.client.heartbeat(&self.lease).await {
            Ok(()) => {
                *failures = 0;
                true
            }
            Err(LeaseError::LeaseLost(name)) => {
                self.lost.report(&name);
                false
            }
            Err(err) => {
                *failures += 1;
                warn!(lease = %self.lease.name, error = %err, failures = *failures, "heartbeat failed");
                if *failures >= MAX_CONSECUTIVE_FAILURES {
                    self.lost.report(&self.lease.name);
                    return false;
                }
                true
            }
        }
    }
}
