//! クラスタ用スクリプトに渡す環境変数の組み立て

use crate::config::{ClusterConfig, parse_env_entry};
use crate::domain::RunIdentity;
use crate::ports::{BuiltImage, ClusterEnv};

/// up/down/is_up スクリプト用の環境変数を組み立てる
///
/// プロジェクトと名前（instance prefix, network）は必須。
/// 機能フラグは設定されているものだけ追加し、`extra_env` は最後に上書きで適用する。
pub fn cluster_env(
    project: &str,
    identity: &RunIdentity,
    cluster: &ClusterConfig,
    image: Option<&BuiltImage>,
) -> ClusterEnv {
    let mut env = ClusterEnv::new();

    env.set("PROJECT", project);
    env.set("CLOUDSDK_CORE_PROJECT", project);
    env.set("KUBE_GCE_INSTANCE_PREFIX", identity.instance_prefix());
    env.set("KUBE_GCE_NETWORK", identity.network());
    env.set("NUM_NODES", cluster.num_nodes.to_string());
    env.set("KUBECONFIG", cluster.kubeconfig.display().to_string());

    if let Some(zone) = &cluster.zone {
        env.set("ZONE", zone);
    }
    if let Some(image) = image {
        env.set("KUBE_GCE_NODE_IMAGE", &image.image);
    }

    let flags = [
        ("ENABLE_CACHE_MUTATION_DETECTOR", cluster.enable_cache_mutation_detector),
        ("ENABLE_POD_SECURITY_POLICY", cluster.enable_pod_security_policy),
        ("CREATE_CUSTOM_NETWORK", cluster.create_custom_network),
    ];
    for (key, enabled) in flags {
        if enabled {
            env.set(key, "true");
        }
    }

    let optional = [
        ("KUBE_RUNTIME_CONFIG", &cluster.runtime_config),
        ("NODE_SCOPES", &cluster.node_scopes),
        ("KUBE_GCE_NODE_SERVICE_ACCOUNT", &cluster.node_service_account),
        ("CLOUD_PROVIDER", &cluster.cloud_provider),
        ("KUBE_FEATURE_GATES", &cluster.feature_gates),
        ("MASTER_SIZE", &cluster.master_size),
        ("NODE_SIZE", &cluster.node_size),
        ("GCE_GLBC_IMAGE", &cluster.ingress_gce_image),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            env.set(key, value);
        }
    }

    for (key, value) in cluster.extra_env.iter().filter_map(|e| parse_env_entry(e)) {
        env.set(key, value);
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunId;

    fn identity() -> RunIdentity {
        RunIdentity::derive(&RunId::new("09a2565a-7ac6-11eb-a603-2218f636630c"))
    }

    #[test]
    fn required_variables_are_always_set() {
        let env = cluster_env("proj-a", &identity(), &ClusterConfig::default(), None);

        assert_eq!(env.get("PROJECT"), Some("proj-a"));
        assert_eq!(env.get("CLOUDSDK_CORE_PROJECT"), Some("proj-a"));
        assert_eq!(env.get("KUBE_GCE_INSTANCE_PREFIX"), Some("lh-09a2565a-7ac6"));
        assert_eq!(env.get("KUBE_GCE_NETWORK"), Some("lh-09a2565a-7ac6"));
        assert_eq!(env.get("NUM_NODES"), Some("3"));
        assert_eq!(env.get("ZONE"), None);
        assert_eq!(env.get("ENABLE_POD_SECURITY_POLICY"), None);
        assert_eq!(env.get("KUBE_GCE_NODE_IMAGE"), None);
        assert_eq!(env.get("GCE_GLBC_IMAGE"), None);
    }

    #[test]
    fn ingress_image_is_passed_to_the_scripts() {
        let cluster = ClusterConfig {
            ingress_gce_image: Some("gcr.io/k8s-ingress-image-push/ingress-gce-glbc-amd64:v1.20".into()),
            ..ClusterConfig::default()
        };

        let env = cluster_env("proj-a", &identity(), &cluster, None);

        assert_eq!(
            env.get("GCE_GLBC_IMAGE"),
            Some("gcr.io/k8s-ingress-image-push/ingress-gce-glbc-amd64:v1.20")
        );
    }

    #[test]
    fn flags_image_and_extra_env_are_applied() {
        let cluster = ClusterConfig {
            zone: Some("us-central1-b".into()),
            num_nodes: 1,
            enable_cache_mutation_detector: true,
            feature_gates: Some("AllAlpha=true".into()),
            node_size: Some("e2-standard-4".into()),
            extra_env: vec!["NUM_NODES=5".into(), "FOO=bar=baz".into()],
            ..ClusterConfig::default()
        };
        let image = BuiltImage {
            image: "kindest/node:dev".into(),
        };

        let env = cluster_env("proj-a", &identity(), &cluster, Some(&image));

        assert_eq!(env.get("ZONE"), Some("us-central1-b"));
        assert_eq!(env.get("ENABLE_CACHE_MUTATION_DETECTOR"), Some("true"));
        assert_eq!(env.get("KUBE_FEATURE_GATES"), Some("AllAlpha=true"));
        assert_eq!(env.get("NODE_SIZE"), Some("e2-standard-4"));
        assert_eq!(env.get("KUBE_GCE_NODE_IMAGE"), Some("kindest/node:dev"));
        // extra_env は最後に適用されるので上書きする
        assert_eq!(env.get("NUM_NODES"), Some("5"));
        assert_eq!(env.get("FOO"), Some("bar=baz"));
    }
}
