//! Install command - apply a module folder as a release

use console::style;
use std::path::Path;

use crate::display::View;
use crate::error::Result;
use crate::settings::{GlobalArgs, VarArgs};

pub async fn run(
    global: &GlobalArgs,
    view: View,
    name: &str,
    folder: &Path,
    vars: &VarArgs,
    create_namespace: bool,
) -> Result<()> {
    let prepared = super::prepare(view, folder, vars, Some(name)).await?;
    println!(
        "{} Installing {} into namespace {}",
        style("→").blue().bold(),
        style(name).cyan(),
        style(&global.namespace).yellow()
    );

    let reconciler = super::reconciler(global).await?;
    let outcome = reconciler.install(name, &prepared, create_namespace).await;
    view.check(outcome.diags)?;

    let result = outcome.result;
    println!(
        "{} Release {} applied: {} created, {} updated, {} deleted",
        style("✓").green().bold(),
        style(name).cyan(),
        result.created.len(),
        result.updated.len(),
        result.deleted.len()
    );
    Ok(())
}
