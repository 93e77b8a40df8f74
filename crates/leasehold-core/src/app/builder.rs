//! DeployerBuilder - 設定からの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に設定を検証し、プールに触れる前に失敗させる
//! - collaborator は差し替え可能（テストでは InMemory / Recording を渡す）

use std::sync::Arc;

use tracing::info;

use super::lease_client::LeaseClient;
use super::lifecycle::LifecycleController;
use super::resource_manager::ResourceManager;
use crate::config::{ConfigError, DeployerConfig};
use crate::domain::{RunId, RunIdentity};
use crate::impls::{CommandImageBuilder, HttpPoolService, ShellClusterScripts};
use crate::ports::{
    ClusterScripts, ImageBuilder, PoolService, RunIdGenerator, SystemClock, UlidRunIdGenerator,
};
use crate::retry::RetryPolicy;

/// SetupError は構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to create pool client for {url}: {reason}")]
    PoolClient { url: String, reason: String },
}

/// DeployerBuilder は LifecycleController を構築
///
/// # 使用例
/// ```ignore
/// let mut controller = DeployerBuilder::new(DeployerConfig::load(None)?).build()?;
/// let report = controller.run(PhasePlan::full()).await;
/// ```
pub struct DeployerBuilder {
    config: DeployerConfig,
    pool: Option<Arc<dyn PoolService>>,
    image_builder: Option<Arc<dyn ImageBuilder>>,
    scripts: Option<Arc<dyn ClusterScripts>>,
    run_id: Option<RunId>,
    retry: Option<RetryPolicy>,
}

impl DeployerBuilder {
    pub fn new(config: DeployerConfig) -> Self {
        Self {
            config,
            pool: None,
            image_builder: None,
            scripts: None,
            run_id: None,
            retry: None,
        }
    }

    /// HTTP の代わりに使うプール
    pub fn with_pool(mut self, pool: Arc<dyn PoolService>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_image_builder(mut self, builder: Arc<dyn ImageBuilder>) -> Self {
        self.image_builder = Some(builder);
        self
    }

    pub fn with_scripts(mut self, scripts: Arc<dyn ClusterScripts>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    /// 設定の run_id より優先される
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// 設定を検証して LifecycleController を生成
    ///
    /// # run_id の決定順
    /// 1. with_run_id()
    /// 2. 設定の run_id
    /// 3. ULID から生成
    pub fn build(self) -> Result<LifecycleController, SetupError> {
        self.config.validate()?;

        let run_id = self
            .run_id
            .or_else(|| {
                self.config
                    .run_id
                    .as_deref()
                    .filter(|id| !id.trim().is_empty())
                    .map(RunId::new)
            })
            .unwrap_or_else(|| UlidRunIdGenerator::new(SystemClock).generate());
        let identity = RunIdentity::derive(&run_id);
        let settings = self.config.resource_settings();

        // 明示的なプロジェクトがあればプールは使わない（上書きされたプールは残す）
        let pool = match (self.pool, &settings.project) {
            (Some(pool), _) => Some(pool),
            (None, Some(_)) => None,
            (None, None) => {
                let url = &self.config.pool.url;
                let pool = HttpPoolService::new(url.clone()).map_err(|e| SetupError::PoolClient {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
                Some(Arc::new(pool) as Arc<dyn PoolService>)
            }
        };
        let client = pool.map(|pool| {
            let client = LeaseClient::new(pool, format!("leasehold-{run_id}"));
            let client = match self.retry {
                Some(retry) => client.with_retry_policy(retry),
                None => client,
            };
            Arc::new(client)
        });

        let image_builder: Arc<dyn ImageBuilder> = match self.image_builder {
            Some(builder) => builder,
            None => Arc::new(CommandImageBuilder::new(
                self.config.build.tool.clone(),
                self.config.build.default_image.clone(),
            )),
        };
        let scripts: Arc<dyn ClusterScripts> = match self.scripts {
            Some(scripts) => scripts,
            None => Arc::new(ShellClusterScripts::new(self.config.cluster.repo_root.clone())),
        };

        info!(
            run_id = %run_id,
            instance_prefix = %identity.instance_prefix(),
            project = ?settings.project,
            pool_kind = %settings.pool_kind,
            "deployer configured"
        );

        Ok(LifecycleController::new(
            ResourceManager::new(settings, client),
            identity,
            self.config.cluster.clone(),
            self.config.build.request(),
            image_builder,
            scripts,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::lifecycle::PhasePlan;
    use crate::app::resource_manager::TeardownReport;
    use crate::domain::{LifecycleState, Phase};
    use crate::impls::{InMemoryPool, RecordingScripts, StaticImageBuilder};

    fn explicit_project_config() -> DeployerConfig {
        let mut config = DeployerConfig::default();
        config.pool.project = Some("my-proj".into());
        config
    }

    #[tokio::test]
    async fn builds_a_controller_for_an_explicit_project() {
        let scripts = Arc::new(RecordingScripts::new());
        let mut controller = DeployerBuilder::new(explicit_project_config())
            .with_run_id(RunId::new("abc"))
            .with_image_builder(Arc::new(StaticImageBuilder::new("img")))
            .with_scripts(scripts.clone())
            .build()
            .unwrap();

        assert_eq!(controller.identity().instance_prefix(), "lh-abc");
        assert_eq!(controller.state(), LifecycleState::NotStarted);

        let report = controller.run(PhasePlan::full()).await;
        assert!(report.is_success(), "{report}");
        assert_eq!(controller.resolved_project(), Some("my-proj"));
        assert_eq!(report.teardown, Some(TeardownReport::NoLease));
        assert_eq!(scripts.count(Phase::Up), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_override_is_used_with_a_run_scoped_owner() {
        let pool = Arc::new(InMemoryPool::with_resources(["proj-a"]));
        let mut config = DeployerConfig::default();
        config.run_id = Some("from-config".into());
        config.pool.heartbeat_interval_secs = 0;

        let mut controller = DeployerBuilder::new(config)
            .with_pool(pool.clone())
            .with_image_builder(Arc::new(StaticImageBuilder::new("img")))
            .with_scripts(Arc::new(RecordingScripts::new()))
            .with_retry_policy(RetryPolicy::acquire_default().without_jitter())
            .build()
            .unwrap();

        assert_eq!(controller.identity().instance_prefix(), "lh-from-config");

        controller.up().await.unwrap();
        let lease = controller.resources().lease().unwrap();
        assert_eq!(lease.name, "proj-a");
        assert_eq!(lease.owner, "leasehold-from-config");

        controller.down().await;
        assert_eq!(pool.release_calls(), 1);
    }

    #[test]
    fn generated_run_id_yields_a_prefixed_identity() {
        let controller = DeployerBuilder::new(explicit_project_config())
            .with_scripts(Arc::new(RecordingScripts::new()))
            .build()
            .unwrap();

        let prefix = controller.identity().instance_prefix();
        assert!(prefix.starts_with("lh-"));
        assert_eq!(prefix.len(), "lh-".len() + 13);
    }

    #[test]
    fn invalid_config_fails_before_wiring() {
        let mut config = DeployerConfig::default();
        config.pool.acquire_timeout_secs = 0;

        let result = DeployerBuilder::new(config).build();

        assert!(matches!(
            result,
            Err(SetupError::Config(ConfigError::Invalid(_)))
        ));
    }
}
