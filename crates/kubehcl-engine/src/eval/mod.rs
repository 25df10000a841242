//! Expression evaluation against layered scopes

mod expr;
mod scope;

pub use expr::{EvalResult, evaluate};
pub(crate) use expr::iterate;
pub use scope::Scope;
