//! Load, decode and graph a module folder in one call

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kubehcl_core::{Diagnostics, ModuleTree, OsFs, SourceFs};

use crate::decode::{DecodeOptions, decode};
use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::loader::{LoadOptions, Loader, ModuleFetcher, read_index_vars};

/// A module folder ready to be applied
#[derive(Debug)]
pub struct Prepared {
    pub tree: ModuleTree,
    pub graph: Graph,
    /// Content of `index.hclvars`, empty when not required
    pub index: BTreeMap<String, String>,
    /// Warnings collected on the way
    pub warnings: Diagnostics,
}

pub struct EngineBuilder {
    fs: Arc<dyn SourceFs>,
    fetcher: Option<Arc<dyn ModuleFetcher>>,
    release: Option<String>,
    load: LoadOptions,
    require_index: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            fs: Arc::new(OsFs),
            fetcher: None,
            release: None,
            load: LoadOptions::default(),
            require_index: false,
        }
    }

    pub fn fs(mut self, fs: Arc<dyn SourceFs>) -> Self {
        self.fs = fs;
        self
    }

    /// Resolver for `repo://` module sources
    pub fn fetcher(mut self, fetcher: Arc<dyn ModuleFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Release name stamped into the default annotations
    pub fn release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    pub fn vars_file(mut self, path: Option<PathBuf>) -> Self {
        self.load.vars_file = path;
        self
    }

    pub fn vars(mut self, vars: Vec<String>) -> Self {
        self.load.vars = vars;
        self
    }

    /// Fail when the root folder has no valid `index.hclvars`
    pub fn require_index(mut self, require: bool) -> Self {
        self.require_index = require;
        self
    }

    pub fn build(self) -> Engine {
        let mut loader = Loader::new(self.fs);
        if let Some(fetcher) = self.fetcher {
            loader = loader.with_fetcher(fetcher);
        }
        Engine {
            loader,
            load: self.load,
            decode: DecodeOptions {
                release: self.release,
            },
            require_index: self.require_index,
        }
    }
}

pub struct Engine {
    loader: Loader,
    load: LoadOptions,
    decode: DecodeOptions,
    require_index: bool,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Run the loader, the decoder and the graph builder over `dir`
    ///
    /// Stops after the first stage reporting an error.
    pub async fn prepare(&self, dir: &Path) -> Result<Prepared> {
        if !self.loader.fs().is_dir(dir) {
            return Err(EngineError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: no such directory", dir.display()),
            )));
        }

        let mut diags = Diagnostics::new();
        let mut index = BTreeMap::new();
        if self.require_index {
            let (vars, index_diags) = read_index_vars(self.loader.fs().as_ref(), dir);
            index = vars;
            diags.append(index_diags);
        }

        let (loaded, load_diags) = self.loader.load(dir, &self.load).await;
        diags.append(load_diags);
        if diags.has_errors() {
            return Err(EngineError::Invalid(diags));
        }

        let (tree, decode_diags) = decode(&loaded, &self.decode);
        diags.append(decode_diags);
        if diags.has_errors() {
            return Err(EngineError::Invalid(diags));
        }

        let (graph, graph_diags) = Graph::build(&tree);
        diags.append(graph_diags);
        if diags.has_errors() {
            return Err(EngineError::Invalid(diags));
        }

        tracing::debug!(
            modules = tree.len(),
            resources = graph.len(),
            "configuration prepared"
        );
        Ok(Prepared {
            tree,
            graph,
            index,
            warnings: diags,
        })
    }
}
