//! Push command - publish a module folder to an OCI repository

use console::style;
use std::path::Path;

use super::repo::repo_failure;
use super::repository_file;
use crate::display::View;
use crate::error::Result;

pub async fn run(view: View, folder: &Path, repo: &str, tag: &str) -> Result<()> {
    println!(
        "{} Pushing {} to {}:{}",
        style("→").blue().bold(),
        folder.display(),
        repo,
        tag
    );
    let location = kubehcl_repo::push(&repository_file(), folder, repo, tag)
        .await
        .map_err(|e| repo_failure(view, e))?;
    println!("{} Pushed {}", style("✓").green().bold(), location);
    Ok(())
}
