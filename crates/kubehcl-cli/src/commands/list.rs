//! List command - releases stored in the namespace

use console::style;

use crate::error::Result;
use crate::settings::GlobalArgs;

pub async fn run(global: &GlobalArgs) -> Result<()> {
    let reconciler = super::reconciler(global).await?;
    let releases = reconciler.list().await?;

    if releases.is_empty() {
        println!("No releases found in namespace {}", global.namespace);
        return Ok(());
    }

    println!(
        "{:<30} {:<20} {:<12} {:<10}",
        style("NAME").bold(),
        style("NAMESPACE").bold(),
        style("RESOURCES").bold(),
        style("HISTORY").bold()
    );
    for release in releases {
        println!(
            "{:<30} {:<20} {:<12} {:<10}",
            release.name, release.namespace, release.resources, release.history
        );
    }
    Ok(())
}
