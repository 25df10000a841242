//! Repository management commands

use console::style;
use kubehcl_repo::{RepoError, add_repository, parse_repo_url};

use super::repository_file;
use crate::display::View;
use crate::error::{CliError, Result};

/// Optional fields of the repository record
#[derive(Debug, Default)]
pub struct AddOptions {
    pub protocol: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub ca_file: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub timeout: u64,
    pub plain_http: bool,
}

pub(crate) fn repo_failure(view: View, err: RepoError) -> CliError {
    view.fail(err.into_diagnostics())
}

pub async fn add(view: View, name: &str, url: &str, options: AddOptions) -> Result<()> {
    let raw = match &options.protocol {
        Some(protocol) if !url.contains("://") => format!("{}://{}", protocol, url),
        _ => url.to_string(),
    };
    let mut record = parse_repo_url(name, &raw).map_err(|e| repo_failure(view, e))?;
    if let Some(protocol) = &options.protocol
        && protocol != record.protocol.as_str()
    {
        return Err(CliError::usage(format!(
            "--protocol {} does not match the URL scheme {}",
            protocol, record.protocol
        )));
    }
    record.username = options.username;
    record.password = options.password;
    record.cert_file = options.cert_file;
    record.key_file = options.key_file;
    record.ca_file = options.ca_file;
    record.insecure_skip_tls_verify = options.insecure_skip_tls_verify;
    record.timeout = options.timeout;
    record.plain_http = options.plain_http;

    let protocol = record.protocol;
    add_repository(&repository_file(), record)
        .await
        .map_err(|e| repo_failure(view, e))?;
    println!(
        "{} \"{}\" has been added to your repositories ({})",
        style("✓").green().bold(),
        name,
        protocol
    );
    Ok(())
}

pub fn remove(view: View, name: &str) -> Result<()> {
    repository_file()
        .remove(name)
        .map_err(|e| repo_failure(view, e))?;
    println!(
        "{} \"{}\" has been removed from your repositories",
        style("✓").green().bold(),
        name
    );
    Ok(())
}

pub fn list(view: View) -> Result<()> {
    let repos = repository_file()
        .load()
        .map_err(|e| repo_failure(view, e))?;

    if repos.is_empty() {
        println!("No repositories configured.");
        println!();
        println!("Add one with: kubehcl repo add <name> <url>");
        return Ok(());
    }

    println!(
        "{:<20} {:<10} {}",
        style("NAME").bold(),
        style("PROTOCOL").bold(),
        style("URL").bold()
    );
    for repo in repos.values() {
        println!("{:<20} {:<10} {}", repo.name, repo.protocol.as_str(), repo.url);
    }
    Ok(())
}
