//! CLI commands

pub mod create;
pub mod fmt;
pub mod license;
pub mod template;
pub mod version;

// Cluster commands
pub mod install;
pub mod list;
pub mod plan;
pub mod uninstall;

// Repositories
pub mod pull;
pub mod push;
pub mod repo;

use std::path::Path;
use std::sync::Arc;

use kubehcl_engine::{Engine, EngineError, Prepared};
use kubehcl_kube::{
    BuiltinSchemaValidator, KubeClusterClient, ProgressReporter, Reconciler, SecretsDriver,
};
use kubehcl_repo::{RepoFetcher, RepoPaths, RepositoryFile};

use crate::display::View;
use crate::error::{CliError, Result};
use crate::settings::{GlobalArgs, VarArgs};

pub(crate) fn repository_file() -> RepositoryFile {
    RepositoryFile::new(RepoPaths::from_env().config)
}

/// Load, decode and graph `folder`, printing any warnings
///
/// The folder must carry a valid `index.hclvars`.
pub(crate) async fn prepare(
    view: View,
    folder: &Path,
    vars: &VarArgs,
    release: Option<&str>,
) -> Result<Prepared> {
    let mut builder = Engine::builder()
        .fetcher(Arc::new(RepoFetcher::new(repository_file())))
        .vars_file(vars.var_file.clone())
        .vars(vars.vars.clone())
        .require_index(true);
    if let Some(release) = release {
        builder = builder.release(release);
    }
    match builder.build().prepare(folder).await {
        Ok(mut prepared) => {
            view.check(std::mem::take(&mut prepared.warnings))?;
            Ok(prepared)
        }
        Err(EngineError::Invalid(diags)) => {
            view.check(diags)?;
            Err(CliError::internal("configuration rejected without errors"))
        }
        Err(EngineError::Io(err)) => Err(err.into()),
    }
}

/// Connect to the cluster and assemble a reconciler for the namespace
pub(crate) async fn reconciler(global: &GlobalArgs) -> Result<Reconciler> {
    tracing::debug!(
        burst_limit = global.burst_limit,
        qps = global.qps,
        "client rate limits"
    );
    let client = KubeClusterClient::connect(&global.connection(), &global.namespace).await?;
    let driver = SecretsDriver::with_client(client.kube_client().clone());
    let validator = BuiltinSchemaValidator::new()?;

    let cancel = kubehcl_engine::CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, waiting for running operations");
            on_interrupt.cancel();
        }
    });

    Ok(Reconciler::new(
        Arc::new(client),
        Arc::new(validator),
        Arc::new(driver),
        &global.namespace,
    )
    .with_timeout(global.operation_timeout())
    .with_max_history(global.max_history)
    .with_progress(ProgressReporter::stdout())
    .with_cancel(cancel))
}
