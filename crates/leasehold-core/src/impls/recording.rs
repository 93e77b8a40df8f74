//! 開発・テスト用の collaborator
//!
//! 呼び出しを記録し、指定されたフェーズだけ失敗させる。

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::Phase;
use crate::ports::{
    BuildRequest, BuiltImage, ClusterEnv, ClusterScripts, CommandError, ImageBuilder,
};

/// 記録された 1 回の呼び出し
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub phase: Phase,
    /// 呼び出し時の `PROJECT`
    pub project: Option<String>,
}

/// RecordingScripts は ClusterScripts の記録用実装
#[derive(Default)]
pub struct RecordingScripts {
    calls: Mutex<Vec<RecordedCall>>,
    failing: Mutex<Vec<Phase>>,
    up_delay: Duration,
    compute_api: Mutex<Vec<String>>,
}

impl RecordingScripts {
    pub fn new() -> Self {
        Self::default()
    }

    /// `phase` を常に失敗させる
    pub fn failing(self, phase: Phase) -> Self {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(phase);
        self
    }

    /// up の完了を遅らせる（実行中の中断を再現する）
    pub fn with_up_delay(mut self, delay: Duration) -> Self {
        self.up_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.calls().iter().filter(|c| c.phase == phase).count()
    }

    /// `enable_compute_api` を呼ばれたプロジェクト
    pub fn compute_api_projects(&self) -> Vec<String> {
        self.compute_api
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, phase: Phase, env: &ClusterEnv) -> Result<(), CommandError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                phase,
                project: env.get("PROJECT").map(str::to_string),
            });

        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&phase);
        if failing {
            return Err(CommandError::Exited {
                command: phase.to_string(),
                code: Some(1),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterScripts for RecordingScripts {
    async fn up(&self, env: &ClusterEnv) -> Result<(), CommandError> {
        if !self.up_delay.is_zero() {
            tokio::time::sleep(self.up_delay).await;
        }
        self.record(Phase::Up, env)
    }

    async fn down(&self, env: &ClusterEnv) -> Result<(), CommandError> {
        self.record(Phase::Down, env)
    }

    async fn is_up(&self, env: &ClusterEnv) -> Result<(), CommandError> {
        self.record(Phase::IsUp, env)
    }

    async fn enable_compute_api(&self, project: &str) -> Result<(), CommandError> {
        self.compute_api
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(project.to_string());
        Ok(())
    }
}

/// StaticImageBuilder は固定のイメージ名を返す ImageBuilder
pub struct StaticImageBuilder {
    image: String,
    fail: bool,
    builds: Mutex<Vec<BuildRequest>>,
}

impl StaticImageBuilder {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            fail: false,
            builds: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    pub fn builds(&self) -> Vec<BuildRequest> {
        self.builds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ImageBuilder for StaticImageBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage, CommandError> {
        self.builds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if self.fail {
            return Err(CommandError::Exited {
                command: "build".into(),
                code: Some(1),
            });
        }
        Ok(BuiltImage {
            image: request.image.clone().unwrap_or_else(|| self.image.clone()),
        })
    }
}
