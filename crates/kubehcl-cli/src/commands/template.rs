//! Template command - print rendered resources without touching a cluster

use kubehcl_kube::TemplateFormat;
use std::path::Path;

use crate::display::View;
use crate::error::{CliError, Result};
use crate::settings::VarArgs;

pub async fn run(view: View, folder: &Path, kind: &str, vars: &VarArgs) -> Result<()> {
    let format: TemplateFormat = kind.parse().map_err(|e: kubehcl_kube::KubeError| {
        CliError::usage_with_help(e.to_string(), "Valid arguments for kind are [yaml, json]")
    })?;
    let prepared = super::prepare(view, folder, vars, None).await?;
    print!("{}", kubehcl_kube::template(&prepared.tree, format)?);
    Ok(())
}
