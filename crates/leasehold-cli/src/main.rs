//! leasehold - test cluster deployer backed by a leased cloud project.
//!
//! Runs the selected phases (build, up, verify, down) and always returns the
//! leased project to the pool, including on ctrl-c.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use leasehold_core::{DeployerBuilder, DeployerConfig, PhasePlan};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "leasehold")]
#[command(about = "Bring up a test cluster in a project leased from a resource pool")]
#[command(version)]
struct Cli {
    /// Build the node image.
    #[arg(long)]
    build: bool,

    /// Bring the cluster up.
    #[arg(long)]
    up: bool,

    /// Check that the cluster is healthy after up.
    #[arg(long)]
    verify: bool,

    /// Tear the cluster down and return the project.
    #[arg(long)]
    down: bool,

    /// Path to configuration file (default: leasehold.toml).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use this project instead of leasing one.
    #[arg(long)]
    project: Option<String>,

    /// Run identifier used to name cluster resources.
    #[arg(long)]
    run_id: Option<String>,

    /// Repository holding the cluster scripts.
    #[arg(long, value_name = "DIR")]
    repo_root: Option<PathBuf>,

    #[arg(long)]
    num_nodes: Option<u32>,

    #[arg(long, value_name = "SECS")]
    acquire_timeout_secs: Option<u64>,

    /// 0 disables heartbeating.
    #[arg(long, value_name = "SECS")]
    heartbeat_interval_secs: Option<u64>,

    #[arg(long, value_name = "URL")]
    pool_url: Option<String>,

    /// Enable the compute API on the project before up.
    #[arg(long)]
    enable_compute_api: bool,

    /// ingress-gce image for the load balancer controller.
    #[arg(long, value_name = "IMAGE")]
    ingress_gce_image: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn plan(&self) -> PhasePlan {
        PhasePlan {
            build: self.build,
            up: self.up,
            verify: self.verify,
            down: self.down,
        }
    }

    /// Command-line flags override every other configuration source.
    fn apply(&self, config: &mut DeployerConfig) {
        if let Some(project) = &self.project {
            config.pool.project = Some(project.clone());
        }
        if let Some(run_id) = &self.run_id {
            config.run_id = Some(run_id.clone());
        }
        if let Some(repo_root) = &self.repo_root {
            config.cluster.repo_root = repo_root.clone();
        }
        if let Some(num_nodes) = self.num_nodes {
            config.cluster.num_nodes = num_nodes;
        }
        if let Some(secs) = self.acquire_timeout_secs {
            config.pool.acquire_timeout_secs = secs;
        }
        if let Some(secs) = self.heartbeat_interval_secs {
            config.pool.heartbeat_interval_secs = secs;
        }
        if let Some(url) = &self.pool_url {
            config.pool.url = url.clone();
        }
        if self.enable_compute_api {
            config.cluster.enable_compute_api = true;
        }
        if let Some(image) = &self.ingress_gce_image {
            config.cluster.ingress_gce_image = Some(image.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "leasehold=debug,leasehold_core=debug"
    } else {
        "leasehold=info,leasehold_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let plan = cli.plan();
    if plan == PhasePlan::default() {
        error!("no phase selected; pass at least one of --build, --up, --verify, --down");
        return Ok(ExitCode::from(2));
    }

    let mut config = DeployerConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    let mut controller = DeployerBuilder::new(config).build()?;
    controller.resources().on_lease_lost(|name| {
        error!(lease = %name, "leased project was reclaimed by the pool; aborting remaining phases");
    });

    info!(?plan, instance_prefix = %controller.identity().instance_prefix(), "starting run");

    let outcome = tokio::select! {
        report = controller.run(plan) => Some(report),
        _ = signal::ctrl_c() => None,
    };
    let report = match outcome {
        Some(report) => report,
        None => {
            warn!("received ctrl-c");
            controller.abort().await
        }
    };

    if report.is_success() {
        info!(state = %report.state, "{report}");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(state = %report.state, "{report}");
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_select_phases_and_override_config() {
        let cli = Cli::parse_from([
            "leasehold",
            "--up",
            "--down",
            "--project",
            "my-proj",
            "--num-nodes",
            "1",
            "--heartbeat-interval-secs",
            "0",
            "--enable-compute-api",
        ]);

        assert_eq!(
            cli.plan(),
            PhasePlan {
                build: false,
                up: true,
                verify: false,
                down: true,
            }
        );

        let mut config = DeployerConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.pool.project.as_deref(), Some("my-proj"));
        assert_eq!(config.cluster.num_nodes, 1);
        assert_eq!(config.pool.heartbeat_interval_secs, 0);
        assert_eq!(config.pool.acquire_timeout_secs, 300);
        assert!(config.cluster.enable_compute_api);
        assert_eq!(config.cluster.ingress_gce_image, None);
    }
}
