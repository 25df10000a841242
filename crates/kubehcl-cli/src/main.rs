//! kubehcl CLI - declarative Kubernetes deployments written in HCL

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;
mod settings;

use display::View;
use error::CliError;
use settings::{GlobalArgs, VarArgs};

#[derive(Parser)]
#[command(name = "kubehcl")]
#[command(author = "kubehcl Contributors")]
#[command(version)]
#[command(about = "Declarative Kubernetes deployments written in HCL", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a module folder and apply it as a release
    Install {
        /// Release name
        name: String,

        /// Module folder
        folder: PathBuf,

        /// Create the release namespace if it does not exist
        #[arg(long)]
        create_namespace: bool,

        #[command(flatten)]
        vars: VarArgs,
    },

    /// Delete every resource of a release, then its state
    Uninstall {
        /// Release name
        name: String,
    },

    /// Show what install would change
    Plan {
        /// Release name
        name: String,

        /// Module folder
        folder: PathBuf,

        #[command(flatten)]
        vars: VarArgs,
    },

    /// List the releases of the namespace
    List,

    /// Print the resources of a module folder as they would be applied
    Template {
        /// Module folder
        folder: PathBuf,

        /// Output format
        #[arg(long, default_value = "yaml", value_parser = ["yaml", "json"])]
        kind: String,

        #[command(flatten)]
        vars: VarArgs,
    },

    /// Rewrite configuration files in canonical format
    Fmt {
        /// Folder to format
        #[arg(default_value = ".")]
        folder: PathBuf,

        /// Also format subfolders
        #[arg(long)]
        recursive: bool,
    },

    /// Scaffold a new module folder
    Create {
        /// Folder to create
        folder: PathBuf,
    },

    /// Print the kubehcl version
    Version,

    /// Manage module repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Download a module from a repository
    Pull {
        /// Repository name
        repo: String,

        /// Module name (index repositories) or artifact tag (registries)
        tag: String,

        /// Module version, required for index repositories
        #[arg(long)]
        version: Option<String>,

        /// Target folder (defaults to the tag)
        #[arg(long)]
        destination: Option<PathBuf>,
    },

    /// Upload a module folder to an OCI repository
    Push {
        /// Module folder
        folder: PathBuf,

        /// Repository name
        repo: String,

        /// Artifact tag
        tag: String,
    },

    /// Print license information
    License,
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Register a repository after checking that it answers
    Add {
        /// Repository name
        name: String,

        /// Repository URL, e.g. https://example.com/modules or oci://registry/modules
        url: String,

        /// Protocol, used when the URL has no scheme
        #[arg(long, value_parser = ["http", "https", "oci"])]
        protocol: Option<String>,

        /// Repository username
        #[arg(long)]
        username: Option<String>,

        /// Repository password
        #[arg(long)]
        password: Option<String>,

        /// Client certificate file
        #[arg(long)]
        cert_file: Option<String>,

        /// Client key file
        #[arg(long)]
        key_file: Option<String>,

        /// Certificate authority bundle
        #[arg(long)]
        ca_file: Option<String>,

        /// Skip certificate verification
        #[arg(long)]
        insecure_skip_tls_verify: bool,

        /// Request timeout in seconds
        #[arg(long, default_value_t = kubehcl_engine::config::DEFAULT_REPO_TIMEOUT)]
        timeout: u64,

        /// Talk to an OCI registry over plain HTTP
        #[arg(long)]
        plain_http: bool,
    },

    /// Unregister a repository
    Remove {
        /// Repository name
        name: String,
    },

    /// List registered repositories
    List,
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug { "kubehcl=debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    miette::set_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = err.print();
            return exit_code(code);
        }
    };

    init_tracing(cli.global.debug);
    let view = View::new(cli.global.no_color);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => return report(CliError::from(err)),
    };
    match runtime.block_on(run(cli, view)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(err),
    }
}

fn report(err: CliError) -> ExitCode {
    let code = err.exit_code();
    eprintln!("{:?}", miette::Report::new(err));
    exit_code(code)
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(cli: Cli, view: View) -> error::Result<()> {
    let global = cli.global;
    match cli.command {
        Commands::Install {
            name,
            folder,
            create_namespace,
            vars,
        } => commands::install::run(&global, view, &name, &folder, &vars, create_namespace).await,

        Commands::Uninstall { name } => commands::uninstall::run(&global, view, &name).await,

        Commands::Plan { name, folder, vars } => {
            commands::plan::run(&global, view, &name, &folder, &vars).await
        }

        Commands::List => commands::list::run(&global).await,

        Commands::Template { folder, kind, vars } => {
            commands::template::run(view, &folder, &kind, &vars).await
        }

        Commands::Fmt { folder, recursive } => commands::fmt::run(&folder, recursive),

        Commands::Create { folder } => commands::create::run(&folder),

        Commands::Version => {
            commands::version::run();
            Ok(())
        }

        Commands::Repo { command } => match command {
            RepoCommands::Add {
                name,
                url,
                protocol,
                username,
                password,
                cert_file,
                key_file,
                ca_file,
                insecure_skip_tls_verify,
                timeout,
                plain_http,
            } => {
                let options = commands::repo::AddOptions {
                    protocol,
                    username,
                    password,
                    cert_file,
                    key_file,
                    ca_file,
                    insecure_skip_tls_verify,
                    timeout,
                    plain_http,
                };
                commands::repo::add(view, &name, &url, options).await
            }
            RepoCommands::Remove { name } => commands::repo::remove(view, &name),
            RepoCommands::List => commands::repo::list(view),
        },

        Commands::Pull {
            repo,
            tag,
            version,
            destination,
        } => {
            commands::pull::run(view, &repo, &tag, version.as_deref(), destination.as_deref())
                .await
        }

        Commands::Push { folder, repo, tag } => {
            commands::push::run(view, &folder, &repo, &tag).await
        }

        Commands::License => {
            commands::license::run();
            Ok(())
        }
    }
}
