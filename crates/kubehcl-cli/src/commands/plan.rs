//! Plan command - diff a module folder against the live release

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
) -> Result<()> {
    let prepared = super::prepare(view, folder, vars, Some(name)).await?;
    let reconciler = super::reconciler(global).await?;
    let outcome = reconciler.plan(name, &prepared).await;
    view.check(outcome.diags)?;

    if let Some(plan) = outcome.plan {
        print!("{}", plan.render(view.colors())?);
        println!("{}", plan.summary());
    }
    Ok(())
}
