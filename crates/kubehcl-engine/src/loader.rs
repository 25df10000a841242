//! Module loading
//!
//! The loader reads every `.hcl` file of a folder into one [`Module`], then
//! follows each `module` call to its source: a folder relative to the caller
//! or a `repo://<repo>/<tag>` reference resolved through a [`ModuleFetcher`].
//! Problems are accumulated so that one run reports all of them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use kubehcl_core::vfs::normalize;
use kubehcl_core::{AddressMap, Diagnostic, Diagnostics, OsFs, SourceFs, Value};
use kubehcl_syntax::{Attribute, Expr, parse_expression, parse_file};

use crate::config::{Module, ModuleCall, SOURCE_EXTENSION, decode_body, just_attributes};

/// Vars file read from the root folder when no other is given
pub const VARS_FILE: &str = "kubehcl.tfvars";

/// Module metadata file
pub const INDEX_FILE: &str = "index.hclvars";

/// Prefix of module sources pulled from a registered repository
pub const REPO_SOURCE_PREFIX: &str = "repo://";

const COMMANDLINE: &str = "<commandline>";

/// Variable overrides for the root module
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Vars file, relative to the root folder unless absolute
    ///
    /// When unset, [`VARS_FILE`] is read if present.
    pub vars_file: Option<PathBuf>,
    /// `name=value` assignments from the command line
    pub vars: Vec<String>,
}

/// A module folder fetched from a repository
#[derive(Debug, Clone)]
pub struct FetchedModule {
    pub fs: Arc<dyn SourceFs>,
    /// Folder of the module inside `fs`
    pub dir: PathBuf,
}

/// Resolves `repo://` module sources
#[async_trait]
pub trait ModuleFetcher: Send + Sync {
    async fn fetch(
        &self,
        repo: &str,
        tag: &str,
        version: Option<&str>,
    ) -> Result<FetchedModule, Diagnostics>;
}

/// A loaded module with the modules it calls
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub module: Module,
    /// Filesystem the module was read from
    pub fs: Arc<dyn SourceFs>,
    /// One entry per call that could be resolved, in call order
    pub children: Vec<LoadedModule>,
}

impl LoadedModule {
    /// The module loaded for the call named `name`
    pub fn child(&self, name: &str) -> Option<&LoadedModule> {
        self.children.iter().find(|c| c.module.name == name)
    }
}

/// Folder or repository reference currently being loaded
#[derive(Debug, Clone, PartialEq)]
enum Origin {
    Folder(PathBuf),
    Repo { repo: String, tag: String },
}

pub struct Loader {
    fs: Arc<dyn SourceFs>,
    fetcher: Option<Arc<dyn ModuleFetcher>>,
}

impl Loader {
    pub fn new(fs: Arc<dyn SourceFs>) -> Self {
        Self { fs, fetcher: None }
    }

    /// Loader over the local filesystem
    pub fn local() -> Self {
        Self::new(Arc::new(OsFs))
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ModuleFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn fs(&self) -> &Arc<dyn SourceFs> {
        &self.fs
    }

    /// Load the root module at `dir` and every module it calls
    pub async fn load(&self, dir: &Path, options: &LoadOptions) -> (LoadedModule, Diagnostics) {
        let dir = normalize(dir);
        let mut diags = Diagnostics::new();
        tracing::debug!(dir = %dir.display(), "loading root module");

        let mut module = read_folder(self.fs.as_ref(), &dir, &mut diags);
        apply_root_vars(&mut module, self.fs.as_ref(), options, &mut diags);

        let (children, child_diags) = self
            .load_children(&module, self.fs.clone(), vec![Origin::Folder(dir)])
            .await;
        diags.append(child_diags);

        let loaded = LoadedModule {
            module,
            fs: self.fs.clone(),
            children,
        };
        (loaded, diags)
    }

    fn load_children<'a>(
        &'a self,
        module: &'a Module,
        fs: Arc<dyn SourceFs>,
        stack: Vec<Origin>,
    ) -> BoxFuture<'a, (Vec<LoadedModule>, Diagnostics)> {
        Box::pin(async move {
            let mut diags = Diagnostics::new();
            let mut children = Vec::new();

            for call in &module.module_calls {
                let Some((origin, child_fs, dir)) =
                    self.resolve(call, module, &fs, &stack, &mut diags).await
                else {
                    continue;
                };
                tracing::debug!(module = call.name(), source = %call.source, "loading module");

                let mut child = read_folder(child_fs.as_ref(), &dir, &mut diags);
                child.name = call.name().to_string();
                check_call_site(call, &child, &mut diags);

                let mut child_stack = stack.clone();
                child_stack.push(origin);
                let (grandchildren, child_diags) =
                    self.load_children(&child, child_fs.clone(), child_stack).await;
                diags.append(child_diags);

                children.push(LoadedModule {
                    module: child,
                    fs: child_fs,
                    children: grandchildren,
                });
            }
            (children, diags)
        })
    }

    async fn resolve(
        &self,
        call: &ModuleCall,
        parent: &Module,
        fs: &Arc<dyn SourceFs>,
        stack: &[Origin],
        diags: &mut Diagnostics,
    ) -> Option<(Origin, Arc<dyn SourceFs>, PathBuf)> {
        if call.source.starts_with(REPO_SOURCE_PREFIX) {
            return self.resolve_repo(call, stack, diags).await;
        }

        let dir = normalize(&parent.dir.join(&call.source));
        let origin = Origin::Folder(dir.clone());
        if stack.contains(&origin) {
            diags.error(
                "Circle folder",
                format!(
                    "Folder can't be used as a module causes a loop: {}",
                    dir.display()
                ),
                &call.source_range,
            );
            return None;
        }
        if !fs.is_dir(&dir) {
            diags.error(
                "Invalid Source",
                format!("Can not open the given folder {}", dir.display()),
                &call.source_range,
            );
            return None;
        }
        Some((origin, fs.clone(), dir))
    }

    async fn resolve_repo(
        &self,
        call: &ModuleCall,
        stack: &[Origin],
        diags: &mut Diagnostics,
    ) -> Option<(Origin, Arc<dyn SourceFs>, PathBuf)> {
        let Some((repo, tag)) = parse_repo_source(&call.source) else {
            diags.error(
                "Source is invalid",
                format!(
                    "Format of source is {}<repoName>/<tag or name> got {}",
                    REPO_SOURCE_PREFIX, call.source
                ),
                &call.source_range,
            );
            return None;
        };
        let origin = Origin::Repo {
            repo: repo.to_string(),
            tag: tag.to_string(),
        };
        if stack.contains(&origin) {
            diags.error(
                "Circle repo",
                format!("Repo can't be used as a module causes a loop: {}", call.source),
                &call.source_range,
            );
            return None;
        }
        let Some(fetcher) = &self.fetcher else {
            diags.error(
                "Repository modules are unavailable",
                format!(
                    "Module {} uses source {} but no repository client is configured",
                    call.name(),
                    call.source
                ),
                &call.source_range,
            );
            return None;
        };

        match fetcher.fetch(repo, tag, call.version.as_deref()).await {
            Ok(fetched) => Some((origin, fetched.fs, normalize(&fetched.dir))),
            Err(fetch_diags) => {
                diags.append(fetch_diags);
                None
            }
        }
    }
}

/// Split `repo://<repo>/<tag>` into its repository and tag
pub fn parse_repo_source(source: &str) -> Option<(&str, &str)> {
    let rest = source.strip_prefix(REPO_SOURCE_PREFIX)?;
    let (repo, tag) = rest.split_once('/')?;
    if repo.is_empty() || tag.is_empty() || tag.contains('/') {
        return None;
    }
    Some((repo, tag))
}

/// Decode every source file directly inside `dir`
fn read_folder(fs: &dyn SourceFs, dir: &Path, diags: &mut Diagnostics) -> Module {
    let mut module = Module {
        dir: dir.to_path_buf(),
        ..Default::default()
    };
    let files = match fs.list_files(dir) {
        Ok(files) => files,
        Err(_) => {
            diags.push(Diagnostic::error(
                "Invalid Source",
                format!("Can not open the given folder {}", dir.display()),
            ));
            return module;
        }
    };

    let mut addrs = AddressMap::new();
    let mut backend_blocks = 0;
    for path in files
        .iter()
        .filter(|p| p.extension().is_some_and(|e| e == SOURCE_EXTENSION))
    {
        let filename = path.display().to_string();
        let src = match fs.read_to_string(path) {
            Ok(src) => src,
            Err(e) => {
                diags.push(Diagnostic::from_error(
                    format!("Failed to read file {}", filename),
                    &e,
                ));
                continue;
            }
        };
        tracing::debug!(file = %filename, "parsing");
        let (body, parse_diags) = parse_file(&src, &filename);
        diags.append(parse_diags);
        let decoded = decode_body(&body, &mut addrs, &mut backend_blocks, diags);
        module.merge(decoded);
    }
    module
}

/// Check the call-site inputs against the variables the child declares
fn check_call_site(call: &ModuleCall, child: &Module, diags: &mut Diagnostics) {
    if let Some(backend) = &child.backend {
        diags.error(
            "backend_storage block is not allowed a module",
            format!(
                "Module {} declares backend_storage; storage can only be configured in the root module",
                call.name()
            ),
            &backend.decl_range,
        );
    }
    for input in call.inputs() {
        if !child.variables.contains_key(&input.name) {
            diags.error(
                "Variable not declared in module",
                format!(
                    "Assigned a value to variable which was not declared in the module: {}",
                    input.name
                ),
                &input.name_range,
            );
        }
    }
    for variable in child.variables.values() {
        let assigned = call.inputs().iter().any(|a| a.name == variable.name);
        if !assigned && !variable.has_default() {
            diags.error(
                "Variable requires value",
                format!(
                    "Need to assign a value to variable which was declared in the module: {}",
                    variable.name
                ),
                &variable.decl_range,
            );
        }
    }
}

/// Override root variable defaults from the vars file and `--var` entries
fn apply_root_vars(
    module: &mut Module,
    fs: &dyn SourceFs,
    options: &LoadOptions,
    diags: &mut Diagnostics,
) {
    let file_vars = read_vars_file(fs, &module.dir, options.vars_file.as_deref(), diags);
    let cli_vars = parse_cli_vars(&options.vars, diags);

    let mut overrides: BTreeMap<String, Attribute> = BTreeMap::new();
    for attr in file_vars {
        overrides.insert(attr.name.clone(), attr);
    }
    for attr in cli_vars {
        if overrides.contains_key(&attr.name) {
            diags.error(
                "Variable declared in vars file and commandline",
                format!(
                    "Declare the variable in the file or at commandline not both: {}",
                    attr.name
                ),
                &attr.name_range,
            );
            continue;
        }
        overrides.insert(attr.name.clone(), attr);
    }

    for (name, attr) in overrides {
        match module.variables.get_mut(&name) {
            Some(variable) => variable.default = Some(attr.expr),
            None => diags.error(
                "Variable declared in vars but not in file",
                format!(
                    "Declare the variable in the file or remove it from vars file variable: {}",
                    name
                ),
                &attr.name_range,
            ),
        }
    }

    for variable in module.variables.values() {
        if !variable.has_default() {
            diags.error(
                "Variable has no value",
                format!("Variable {} has no value", variable.name),
                &variable.decl_range,
            );
        }
    }
}

fn read_vars_file(
    fs: &dyn SourceFs,
    dir: &Path,
    explicit: Option<&Path>,
    diags: &mut Diagnostics,
) -> Vec<Attribute> {
    let path = normalize(&dir.join(explicit.unwrap_or(Path::new(VARS_FILE))));
    if !fs.is_file(&path) {
        if explicit.is_some() {
            diags.push(Diagnostic::error(
                "Vars file not found",
                format!("Could not read vars file {}", path.display()),
            ));
        }
        return Vec::new();
    }
    let filename = path.display().to_string();
    let src = match fs.read_to_string(&path) {
        Ok(src) => src,
        Err(e) => {
            diags.push(Diagnostic::from_error(
                format!("Failed to read file {}", filename),
                &e,
            ));
            return Vec::new();
        }
    };
    tracing::debug!(file = %filename, "reading vars file");
    let (body, parse_diags) = parse_file(&src, &filename);
    diags.append(parse_diags);
    just_attributes(&body, diags);
    body.attributes
}

/// Parse `name=value` entries; a value that is not an expression is a string
fn parse_cli_vars(entries: &[String], diags: &mut Diagnostics) -> Vec<Attribute> {
    let mut out = Vec::new();
    for entry in entries {
        let Some((name, raw)) = entry.split_once('=') else {
            diags.push(Diagnostic::error(
                "Invalid variable assignment",
                format!(
                    "The given --var option {:?} is not correctly specified. Must be a variable name and value separated by an equals sign, like --var=\"key=value\".",
                    entry
                ),
            ));
            continue;
        };
        let name = name.trim();
        let expr = match parse_expression(raw, COMMANDLINE) {
            Ok(expr) if expr.static_value().is_some() => expr,
            _ => Expr::literal(Value::string(raw), Default::default()),
        };
        out.push(Attribute {
            name: name.to_string(),
            name_range: expr.range.clone(),
            range: expr.range.clone(),
            expr,
        });
    }
    out
}

/// Read the string attributes of the module metadata file in `dir`
///
/// `name` and `version` are required.
pub fn read_index_vars(fs: &dyn SourceFs, dir: &Path) -> (BTreeMap<String, String>, Diagnostics) {
    let mut diags = Diagnostics::new();
    let mut vars = BTreeMap::new();
    let path = normalize(&dir.join(INDEX_FILE));
    let src = match fs.read_to_string(&path) {
        Ok(src) => src,
        Err(_) => {
            diags.push(Diagnostic::error(
                format!("File {} is missing", INDEX_FILE),
                format!(
                    "{} file must be created in {} and populated with the module name and version",
                    INDEX_FILE,
                    dir.display()
                ),
            ));
            return (vars, diags);
        }
    };

    let filename = path.display().to_string();
    let (body, parse_diags) = parse_file(&src, &filename);
    diags.append(parse_diags);
    just_attributes(&body, &mut diags);

    for attr in &body.attributes {
        match attr.expr.static_value() {
            Some(Value::String(s)) => {
                vars.insert(attr.name.clone(), s);
            }
            _ => diags.error(
                format!("Variables in {} must be strings", INDEX_FILE),
                format!("Variable {} is not string", attr.name),
                &attr.expr.range,
            ),
        }
    }
    for required in ["name", "version"] {
        if !body.attributes.iter().any(|a| a.name == required) {
            diags.push(Diagnostic::error(
                format!("{} must contain {}", INDEX_FILE, required),
                format!(
                    "{} describes the module; {} is a required key",
                    INDEX_FILE, required
                ),
            ));
        }
    }
    (vars, diags)
}
