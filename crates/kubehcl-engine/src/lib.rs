//! kubehcl Engine - from module folders to an ordered resource graph
//!
//! - `config`: block decoders producing typed, still unevaluated records
//! - `loader`: recursive module loading from folders and repositories
//! - `eval` / `functions`: expression evaluation and the function library
//! - `decode`: evaluation of loaded modules into the decoded module arena
//! - `graph`: dependency graph, cycle detection and the parallel walker

pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod eval;
pub mod functions;
pub mod graph;
pub mod loader;
pub mod suggestions;

pub use decode::{DecodeOptions, decode};
pub use engine::{Engine, EngineBuilder, Prepared};
pub use error::{EngineError, Result};
pub use eval::{Scope, evaluate};
pub use functions::{FunctionError, Functions};
pub use graph::{CancelFlag, DEFAULT_PARALLELISM, Graph, Vertex, WalkReport};
pub use loader::{
    FetchedModule, INDEX_FILE, LoadOptions, LoadedModule, Loader, ModuleFetcher, VARS_FILE,
    read_index_vars,
};
