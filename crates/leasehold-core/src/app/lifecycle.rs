//! LifecycleController - クラスタのライフサイクル（Build → Up → IsUp → Down）
//!
//! # 保証
//! - Up の前に必ずプロジェクトを確定する（確定できなければ Up しない）
//! - Down は最後に必ず `ResourceManager::teardown()` を呼ぶ（スクリプトが失敗しても）
//! - lease を失ったら残りのフェーズは中断する。ただし teardown は行う
//!
//! Lease には直接触れない。ResourceManager 経由で resolved project と喪失の通知だけを見る。

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::env::cluster_env;
use super::resource_manager::{ResourceManager, TeardownReport};
use crate::config::ClusterConfig;
use crate::domain::{LeaseError, LifecycleState, Phase, RunError, RunIdentity};
use crate::ports::{BuildRequest, BuiltImage, ClusterEnv, ClusterScripts, ImageBuilder};

/// PhasePlan は `run()` で実行するフェーズの選択
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhasePlan {
    pub build: bool,
    pub up: bool,
    pub verify: bool,
    pub down: bool,
}

impl PhasePlan {
    /// すべてのフェーズを実行する
    pub fn full() -> Self {
        Self {
            build: true,
            up: true,
            verify: true,
            down: true,
        }
    }
}

/// DownReport は `down()` の結果
///
/// スクリプトの失敗と teardown の結果を別々に報告する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownReport {
    pub script: Result<(), RunError>,
    pub teardown: TeardownReport,
}

/// RunReport は `run()` の結果
///
/// 最初の致命的エラーと、teardown の結果（リソースを返せたか）を持つ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub error: Option<RunError>,
    pub teardown: Option<TeardownReport>,
    pub state: LifecycleState,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(err) => write!(f, "run failed: {err}")?,
            None => f.write_str("run succeeded")?,
        }
        if let Some(teardown) = &self.teardown {
            write!(f, "; teardown: {teardown}")?;
        }
        Ok(())
    }
}

/// LifecycleController は 1 回の実行につき 1 つ
pub struct LifecycleController {
    state: LifecycleState,
    resources: ResourceManager,
    identity: RunIdentity,
    cluster: ClusterConfig,
    build_request: BuildRequest,
    image_builder: Arc<dyn ImageBuilder>,
    scripts: Arc<dyn ClusterScripts>,
    built_image: Option<BuiltImage>,
    /// up を一度でも試みたか（down スクリプトを実行するかの判断に使う）
    cluster_started: bool,
    /// 完了した down スクリプトの結果。down スクリプトは 1 回しか実行しない
    down_outcome: Option<Result<(), RunError>>,
}

impl LifecycleController {
    pub fn new(
        resources: ResourceManager,
        identity: RunIdentity,
        cluster: ClusterConfig,
        build_request: BuildRequest,
        image_builder: Arc<dyn ImageBuilder>,
        scripts: Arc<dyn ClusterScripts>,
    ) -> Self {
        Self {
            state: LifecycleState::NotStarted,
            resources,
            identity,
            cluster,
            build_request,
            image_builder,
            scripts,
            built_image: None,
            cluster_started: false,
            down_outcome: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn resolved_project(&self) -> Option<&str> {
        self.resources.resolved_project()
    }

    pub fn built_image(&self) -> Option<&BuiltImage> {
        self.built_image.as_ref()
    }

    /// Up より前にプロジェクトを確定する
    ///
    /// 通常は `up()` が必要に応じて呼ぶ。失敗すると Failed に遷移する。
    pub async fn resolve_project(&mut self) -> Result<String, RunError> {
        match self.resources.ensure_project().await {
            Ok(project) => Ok(project.to_string()),
            Err(err) => Err(self.fail(err.into())),
        }
    }

    /// ノードイメージをビルドする
    ///
    /// 失敗すると Failed に遷移する。teardown は呼び出し側が `down()` で行う。
    pub async fn build(&mut self) -> Result<BuiltImage, RunError> {
        self.transition(LifecycleState::Building)?;
        info!("building node image");

        match self.image_builder.build(&self.build_request).await {
            Ok(image) => {
                info!(image = %image.image, "node image built");
                self.built_image = Some(image.clone());
                Ok(image)
            }
            Err(err) => Err(self.fail(RunError::phase_failed(Phase::Build, err.to_string()))),
        }
    }

    /// クラスタを起動する
    ///
    /// 実行中に lease を失ったら、スクリプトの完了を待たずに中断する。
    pub async fn up(&mut self) -> Result<(), RunError> {
        self.check_transition(LifecycleState::Up)?;

        let project = self.resolve_project().await?;
        self.abort_if_lost()?;

        if self.cluster.enable_compute_api
            && let Err(e) = self.scripts.enable_compute_api(&project).await
        {
            let err = RunError::phase_failed(Phase::Up, format!("enabling compute API: {e}"));
            return Err(self.fail(err));
        }

        let env = self.env(&project);
        self.cluster_started = true;
        info!(
            project = %project,
            instance_prefix = %self.identity.instance_prefix(),
            "bringing cluster up"
        );

        let lost = self.resources.lost_signal();
        let result = tokio::select! {
            result = self.scripts.up(&env) => {
                result.map_err(|e| RunError::phase_failed(Phase::Up, e.to_string()))
            }
            name = lost.wait() => Err(LeaseError::LeaseLost(name).into()),
        };

        match result {
            Ok(()) => {
                self.transition(LifecycleState::Up)?;
                info!(project = %project, "cluster is up");
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// 起動済みクラスタの健全性チェック。状態は変えない
    pub async fn is_up(&self) -> Result<(), RunError> {
        let Some(project) = self.resources.resolved_project() else {
            return Err(RunError::phase_failed(
                Phase::IsUp,
                "no project has been resolved",
            ));
        };
        if let Some(name) = self.resources.lost_signal().lost_lease() {
            return Err(LeaseError::LeaseLost(name).into());
        }

        let env = self.env(project);
        self.scripts
            .is_up(&env)
            .await
            .map_err(|e| RunError::phase_failed(Phase::IsUp, e.to_string()))
    }

    /// `is_up()` が成功したら Verified に遷移する
    pub async fn verify(&mut self) -> Result<(), RunError> {
        self.check_transition(LifecycleState::Verified)?;

        match self.is_up().await {
            Ok(()) => {
                self.transition(LifecycleState::Verified)?;
                info!("cluster verified");
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// クラスタを落とし、最後に必ず teardown する
    ///
    /// 何度呼んでもよい。up していなくても teardown は行う（acquire 済みで未使用の lease を返すため）。
    pub async fn down(&mut self) -> DownReport {
        if self.state == LifecycleState::Done {
            return DownReport {
                script: Ok(()),
                teardown: self.resources.teardown().await,
            };
        }

        self.set_state(LifecycleState::TearingDown);
        let script = self.run_down_script().await;
        if let Err(err) = &script {
            error!(error = %err, "down script failed; releasing resources anyway");
        }

        let teardown = self.resources.teardown().await;
        if teardown.resource_returned() {
            info!(result = %teardown, "teardown finished");
        } else {
            warn!(result = %teardown, "teardown finished without returning the resource");
        }

        self.set_state(if script.is_ok() {
            LifecycleState::Done
        } else {
            LifecycleState::Failed
        });
        DownReport { script, teardown }
    }

    async fn run_down_script(&mut self) -> Result<(), RunError> {
        if let Some(outcome) = &self.down_outcome {
            debug!("down script already ran");
            return outcome.clone();
        }
        if !self.cluster_started {
            debug!("no cluster was brought up; skipping down script");
            return Ok(());
        }
        if let Some(name) = self.resources.lost_signal().lost_lease() {
            warn!(lease = %name, "lease was lost; skipping down script, the pool reclaims the project");
            return Ok(());
        }
        let Some(project) = self.resources.resolved_project() else {
            return Ok(());
        };

        info!(project = %project, "bringing cluster down");
        let env = self.env(project);
        let outcome = self
            .scripts
            .down(&env)
            .await
            .map_err(|e| RunError::phase_failed(Phase::Down, e.to_string()));
        self.down_outcome = Some(outcome.clone());
        outcome
    }

    /// 選択されたフェーズを順に実行する
    ///
    /// 最初の致命的エラーで残りのフェーズを打ち切る。
    /// down が選ばれていれば必ず down し、そうでなくても lease を持っていれば返却する。
    pub async fn run(&mut self, plan: PhasePlan) -> RunReport {
        let mut first_error: Option<RunError> = None;

        if plan.build
            && let Err(err) = self.build().await
        {
            first_error = Some(err);
        }
        if plan.up
            && first_error.is_none()
            && let Err(err) = self.up().await
        {
            first_error = Some(err);
        }
        if plan.verify
            && first_error.is_none()
            && let Err(err) = self.verify().await
        {
            first_error = Some(err);
        }

        let teardown = if plan.down {
            let down = self.down().await;
            if let Err(err) = down.script {
                first_error.get_or_insert(err);
            }
            Some(down.teardown)
        } else if self.resources.holds_lease() {
            if self.cluster_started {
                warn!("down was not requested; releasing the lease while the cluster keeps running");
            }
            Some(self.resources.teardown().await)
        } else {
            None
        };

        let report = RunReport {
            error: first_error,
            teardown,
            state: self.state,
        };
        if report.is_success() {
            info!(report = %report, "run finished");
        } else {
            error!(report = %report, "run finished with errors");
        }
        report
    }

    /// 中断時の後始末。down を行い、`Interrupted` として報告する
    pub async fn abort(&mut self) -> RunReport {
        warn!(state = %self.state, "run interrupted; tearing down");
        let down = self.down().await;
        RunReport {
            error: Some(RunError::Interrupted),
            teardown: Some(down.teardown),
            state: self.state,
        }
    }

    fn env(&self, project: &str) -> ClusterEnv {
        cluster_env(project, &self.identity, &self.cluster, self.built_image.as_ref())
    }

    fn abort_if_lost(&mut self) -> Result<(), RunError> {
        match self.resources.lost_signal().lost_lease() {
            Some(name) => Err(self.fail(LeaseError::LeaseLost(name).into())),
            None => Ok(()),
        }
    }

    fn check_transition(&self, next: LifecycleState) -> Result<(), RunError> {
        if self.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(RunError::InvalidTransition {
                from: self.state,
                to: next,
            })
        }
    }

    fn transition(&mut self, next: LifecycleState) -> Result<(), RunError> {
        self.check_transition(next)?;
        self.set_state(next);
        Ok(())
    }

    fn set_state(&mut self, next: LifecycleState) {
        debug!(from = %self.state, to = %next, "lifecycle transition");
        self.state = next;
    }

    /// Failed に遷移してエラーをそのまま返す
    fn fail(&mut self, err: RunError) -> RunError {
        error!(state = %self.state, error = %err, "phase failed");
        if self.state.can_transition_to(LifecycleState::Failed) {
            self.set_state(LifecycleState::Failed);
        }
        err
    }
}
