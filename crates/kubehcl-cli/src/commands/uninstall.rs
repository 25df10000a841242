//! Uninstall command - delete a release

use console::style;

use crate::display::View;
use crate::error::Result;
use crate::settings::GlobalArgs;

pub async fn run(global: &GlobalArgs, view: View, name: &str) -> Result<()> {
    let reconciler = super::reconciler(global).await?;
    let outcome = reconciler.uninstall(name).await;
    view.check(outcome.diags)?;

    if !outcome.result.deleted.is_empty() {
        println!(
            "{} Release {} uninstalled ({} resource(s) deleted)",
            style("✓").green().bold(),
            style(name).cyan(),
            outcome.result.deleted.len()
        );
    }
    Ok(())
}
