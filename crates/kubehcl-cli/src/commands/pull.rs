//! Pull command - download a module into a local folder

use console::style;
use std::path::Path;

use super::repo::repo_failure;
use super::repository_file;
use crate::display::View;
use crate::error::Result;

pub async fn run(
    view: View,
    repo: &str,
    tag: &str,
    version: Option<&str>,
    destination: Option<&Path>,
) -> Result<()> {
    let dest = destination.unwrap_or(Path::new(tag));
    let dest = kubehcl_repo::pull(&repository_file(), repo, tag, version, dest)
        .await
        .map_err(|e| repo_failure(view, e))?;
    println!(
        "{} Pulled {} from {} into {}",
        style("✓").green().bold(),
        style(tag).cyan(),
        repo,
        dest.display()
    );
    Ok(())
}
