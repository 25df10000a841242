//! Global flags and their environment fallbacks
//!
//! Precedence is flag, then `KUBEHCL_*` environment variable, then default.

use clap::Args;
use kubehcl_kube::ConnectionSettings;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Namespace scope for this request
    #[arg(
        short,
        long,
        global = true,
        env = "KUBEHCL_NAMESPACE",
        default_value = "default"
    )]
    pub namespace: String,

    /// Path to the kubeconfig file
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Name of the kubeconfig context to use
    #[arg(long, global = true, env = "KUBEHCL_KUBECONTEXT")]
    pub kube_context: Option<String>,

    /// Bearer token used for authentication
    #[arg(long, global = true, env = "KUBEHCL_KUBETOKEN", hide_env_values = true)]
    pub kube_token: Option<String>,

    /// Username to impersonate for the operation
    #[arg(long, global = true, env = "KUBEHCL_KUBEASUSER")]
    pub kube_as_user: Option<String>,

    /// Group to impersonate, repeatable or comma separated
    #[arg(
        long,
        global = true,
        env = "KUBEHCL_KUBEASGROUPS",
        value_delimiter = ','
    )]
    pub kube_as_group: Vec<String>,

    /// Address and port of the Kubernetes API server
    #[arg(long, global = true, env = "KUBEHCL_KUBEAPISERVER")]
    pub kube_apiserver: Option<String>,

    /// Certificate authority file for the API server connection
    #[arg(long, global = true, env = "KUBEHCL_KUBECAFILE")]
    pub kube_ca_file: Option<PathBuf>,

    /// Server name used to validate the API server certificate
    #[arg(long, global = true, env = "KUBEHCL_KUBETLS_SERVER_NAME")]
    pub kube_tls_server_name: Option<String>,

    /// Skip verification of the API server certificate
    #[arg(long, global = true, env = "KUBEHCL_KUBEINSECURE_SKIP_TLS_VERIFY")]
    pub kube_insecure_skip_tls_verify: bool,

    /// Enable debug logging
    #[arg(long, global = true, env = "KUBEHCL_DEBUG")]
    pub debug: bool,

    /// Client-side burst limit
    #[arg(long, global = true, env = "KUBEHCL_BURST_LIMIT", default_value_t = 100)]
    pub burst_limit: u32,

    /// Queries per second, 0 keeps the client default
    #[arg(long, global = true, env = "KUBEHCL_QPS", default_value_t = 0.0)]
    pub qps: f32,

    /// Seconds to wait for each cluster operation
    #[arg(long, global = true, env = "KUBEHCL_TIMEOUT", default_value_t = 100)]
    pub timeout: u64,

    /// Disable colored output
    #[arg(long, global = true, env = "KUBEHCL_NOCOLOR")]
    pub no_color: bool,

    /// Number of previous releases kept in the release state
    #[arg(long, global = true, env = "KUBEHCL_MAX_HISTORY", default_value_t = 10)]
    pub max_history: usize,
}

impl GlobalArgs {
    pub fn connection(&self) -> ConnectionSettings {
        ConnectionSettings {
            kubeconfig: self.kubeconfig.clone(),
            context: self.kube_context.clone(),
            token: self.kube_token.clone(),
            as_user: self.kube_as_user.clone(),
            as_groups: self.kube_as_group.clone(),
            apiserver: self.kube_apiserver.clone(),
            ca_file: self.kube_ca_file.clone(),
            tls_server_name: self.kube_tls_server_name.clone(),
            insecure_skip_tls_verify: self.kube_insecure_skip_tls_verify,
            timeout: Some(self.operation_timeout()),
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Variable inputs shared by the commands that evaluate a module
#[derive(Args, Debug, Clone, Default)]
pub struct VarArgs {
    /// Variables file, relative to the module folder
    #[arg(long = "var-file", env = "KUBEHCL_VARS")]
    pub var_file: Option<PathBuf>,

    /// Set a variable, repeatable
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        global: GlobalArgs,
        #[command(flatten)]
        vars: VarArgs,
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::try_parse_from(["kubehcl"]).unwrap();
        assert_eq!(cli.global.namespace, "default");
        assert_eq!(cli.global.max_history, 10);
        assert_eq!(cli.global.burst_limit, 100);
        assert_eq!(cli.global.timeout, 100);
        assert!(cli.vars.vars.is_empty());
    }

    #[test]
    fn test_connection_settings() {
        let cli = TestCli::try_parse_from([
            "kubehcl",
            "-n",
            "apps",
            "--kube-as-group",
            "dev,ops",
            "--kube-insecure-skip-tls-verify",
            "--timeout",
            "30",
            "--var",
            "replicas=3",
        ])
        .unwrap();
        let settings = cli.global.connection();
        assert_eq!(cli.global.namespace, "apps");
        assert_eq!(settings.as_groups, vec!["dev", "ops"]);
        assert!(settings.insecure_skip_tls_verify);
        assert_eq!(settings.timeout, Some(Duration::from_secs(30)));
        assert_eq!(cli.vars.vars, vec!["replicas=3"]);
    }
}
