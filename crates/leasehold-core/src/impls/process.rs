//! 外部コマンドによる collaborator
//!
//! - **CommandImageBuilder**: `<tool> build node-image ...` でノードイメージをビルド
//! - **ShellClusterScripts**: リポジトリの `cluster/*.sh` を実行し、API の有効化は `gcloud` で行う
//!
//! 子プロセスの stdout/stderr はそのまま親に流す。

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::ports::{BuildRequest, BuiltImage, ClusterEnv, ClusterScripts, CommandError, ImageBuilder};

pub const KUBE_UP_SCRIPT: &str = "cluster/kube-up.sh";
pub const KUBE_DOWN_SCRIPT: &str = "cluster/kube-down.sh";
pub const VALIDATE_SCRIPT: &str = "cluster/validate-cluster.sh";
pub const COMPUTE_API: &str = "compute.googleapis.com";

/// CommandImageBuilder はビルドツールを起動する ImageBuilder
pub struct CommandImageBuilder {
    tool: String,
    default_image: String,
}

impl CommandImageBuilder {
    /// `default_image` は明示的なイメージ名がないときにツールへ渡す名前
    pub fn new(tool: impl Into<String>, default_image: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            default_image: default_image.into(),
        }
    }

    fn image_for(&self, request: &BuildRequest) -> String {
        request
            .image
            .clone()
            .filter(|image| !image.is_empty())
            .unwrap_or_else(|| self.default_image.clone())
    }
}

/// `build node-image` の引数
///
/// イメージ名は常に渡す（明示的な名前がなければ既定の名前）。
pub fn node_image_args(request: &BuildRequest, image: &str) -> Vec<String> {
    let mut args = vec!["build".to_string(), "node-image".to_string()];
    if let Some(build_type) = request.build_type.as_deref().filter(|t| !t.is_empty()) {
        args.extend(["--type".to_string(), build_type.to_string()]);
    }
    if let Some(root) = &request.source_root {
        args.extend(["--kube-root".to_string(), root.display().to_string()]);
    }
    args.extend(["--image".to_string(), image.to_string()]);
    args
}

#[async_trait]
impl ImageBuilder for CommandImageBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage, CommandError> {
        if self.tool.trim().is_empty() {
            return Err(CommandError::Invalid("build tool is not configured".into()));
        }

        let image = self.image_for(request);
        let args = node_image_args(request, &image);
        info!(tool = %self.tool, args = ?args, "running image build");

        let mut command = Command::new(&self.tool);
        command.args(&args).kill_on_drop(true);
        let status = command.status().await.map_err(|e| CommandError::Spawn {
            command: self.tool.clone(),
            reason: e.to_string(),
        })?;
        check_status(&self.tool, status)?;

        Ok(BuiltImage { image })
    }
}

/// `gcloud services enable` の引数
pub fn compute_api_args(project: &str) -> Vec<String> {
    ["services", "enable", COMPUTE_API, "--project", project]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// ShellClusterScripts はリポジトリのシェルスクリプトでクラスタを操作する
pub struct ShellClusterScripts {
    repo_root: PathBuf,
    shell: String,
    gcloud: String,
}

impl ShellClusterScripts {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            shell: "bash".to_string(),
            gcloud: "gcloud".to_string(),
        }
    }

    /// PATH 上の `gcloud` 以外を使う
    pub fn with_gcloud(mut self, gcloud: impl Into<String>) -> Self {
        self.gcloud = gcloud.into();
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    async fn run(&self, script: &str, env: &ClusterEnv) -> Result<(), CommandError> {
        let path = self.repo_root.join(script);
        if !path.is_file() {
            return Err(CommandError::Invalid(format!(
                "script not found: {}",
                path.display()
            )));
        }

        debug!(script = %path.display(), vars = env.len(), "running cluster script");
        let status = Command::new(&self.shell)
            .arg(&path)
            .current_dir(&self.repo_root)
            .envs(env.iter())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| CommandError::Spawn {
                command: script.to_string(),
                reason: e.to_string(),
            })?;
        check_status(script, status)
    }
}

#[async_trait]
impl ClusterScripts for ShellClusterScripts {
    async fn up(&self, env: &ClusterEnv) -> Result<(), CommandError> {
        self.run(KUBE_UP_SCRIPT, env).await
    }

    async fn down(&self, env: &ClusterEnv) -> Result<(), CommandError> {
        self.run(KUBE_DOWN_SCRIPT, env).await
    }

    async fn is_up(&self, env: &ClusterEnv) -> Result<(), CommandError> {
        self.run(VALIDATE_SCRIPT, env).await
    }

    async fn enable_compute_api(&self, project: &str) -> Result<(), CommandError> {
        let args = compute_api_args(project);
        info!(project = %project, "enabling compute API");

        let status = Command::new(&self.gcloud)
            .args(&args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| CommandError::Spawn {
                command: self.gcloud.clone(),
                reason: e.to_string(),
            })?;
        check_status(&self.gcloud, status)
    }
}

fn check_status(command: &str, status: ExitStatus) -> Result<(), CommandError> {
    if status.success() {
        Ok(())
    } else {
        Err(CommandError::Exited {
            command: command.to_string(),
            code: status.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;

    #[rstest]
    #[case::defaults(BuildRequest::default(), "kindest/node:latest", &["build", "node-image", "--image", "kindest/node:latest"])]
    #[case::all_options(
        BuildRequest {
            image: Some("my/node:dev".into()),
            source_root: Some(PathBuf::from("/src/k8s")),
            build_type: Some("bazel".into()),
        },
        "my/node:dev",
        &["build", "node-image", "--type", "bazel", "--kube-root", "/src/k8s", "--image", "my/node:dev"]
    )]
    #[case::empty_type_is_skipped(
        BuildRequest { build_type: Some(String::new()), ..BuildRequest::default() },
        "img",
        &["build", "node-image", "--image", "img"]
    )]
    fn node_image_args_follow_request(
        #[case] request: BuildRequest,
        #[case] image: &str,
        #[case] expected: &[&str],
    ) {
        assert_eq!(node_image_args(&request, image), expected);
    }

    #[test]
    fn compute_api_is_enabled_for_the_given_project() {
        assert_eq!(
            compute_api_args("proj-a"),
            ["services", "enable", "compute.googleapis.com", "--project", "proj-a"]
        );
    }

    #[tokio::test]
    async fn missing_gcloud_is_a_spawn_error() {
        let scripts = ShellClusterScripts::new(".").with_gcloud("leasehold-no-such-gcloud");

        let err = scripts.enable_compute_api("proj-a").await.unwrap_err();

        assert!(matches!(err, CommandError::Spawn { command, .. } if command == "leasehold-no-such-gcloud"));
    }

    #[test]
    fn explicit_image_wins_over_default() {
        let builder = CommandImageBuilder::new("kind", "kindest/node:latest");

        let explicit = BuildRequest {
            image: Some("my/node:dev".into()),
            ..BuildRequest::default()
        };
        assert_eq!(builder.image_for(&explicit), "my/node:dev");
        assert_eq!(builder.image_for(&BuildRequest::default()), "kindest/node:latest");
    }

    #[tokio::test]
    async fn missing_tool_is_a_spawn_error() {
        let builder = CommandImageBuilder::new("leasehold-no-such-tool", "img");

        let err = builder.build(&BuildRequest::default()).await.unwrap_err();

        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    struct ScratchRepo {
        root: PathBuf,
    }

    impl ScratchRepo {
        fn new(name: &str) -> Self {
            let root = std::env::temp_dir().join(format!(
                "leasehold-{name}-{}",
                std::process::id()
            ));
            fs::create_dir_all(root.join("cluster")).unwrap();
            Self { root }
        }

        fn script(&self, path: &str, body: &str) {
            fs::write(self.root.join(path), body).unwrap();
        }
    }

    impl Drop for ScratchRepo {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[tokio::test]
    async fn scripts_see_the_cluster_env() {
        let repo = ScratchRepo::new("env");
        repo.script(
            KUBE_UP_SCRIPT,
            "test \"$PROJECT\" = \"proj-a\" && test \"$NUM_NODES\" = \"3\"\n",
        );
        let scripts = ShellClusterScripts::new(&repo.root);

        let mut env = ClusterEnv::new();
        env.set("PROJECT", "proj-a");
        env.set("NUM_NODES", "3");
        scripts.up(&env).await.unwrap();

        env.set("PROJECT", "proj-b");
        let err = scripts.up(&env).await.unwrap_err();
        assert_eq!(
            err,
            CommandError::Exited {
                command: KUBE_UP_SCRIPT.into(),
                code: Some(1),
            }
        );
    }

    #[tokio::test]
    async fn exit_status_is_reported() {
        let repo = ScratchRepo::new("status");
        repo.script(KUBE_DOWN_SCRIPT, "exit 3\n");
        repo.script(VALIDATE_SCRIPT, "exit 0\n");
        let scripts = ShellClusterScripts::new(&repo.root);

        let env = ClusterEnv::new();
        scripts.is_up(&env).await.unwrap();
        let err = scripts.down(&env).await.unwrap_err();

        assert!(matches!(err, CommandError::Exited { code: Some(3), .. }));
    }

    #[tokio::test]
    async fn missing_script_is_rejected_before_spawning() {
        let repo = ScratchRepo::new("missing");
        let scripts = ShellClusterScripts::new(&repo.root);

        let err = scripts.up(&ClusterEnv::new()).await.unwrap_err();

        assert!(matches!(err, CommandError::Invalid(msg) if msg.contains("kube-up.sh")));
    }
}
