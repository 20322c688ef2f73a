//! Pipeline fragment builder.
//!
//! This module provides:
//! - [`Fragment`], the unattached piece of graph produced by composing steps
//! - the `then` / `also` / `append` combinators
//! - [`Fragment::check`], which validates positions, arities and scopes
//!
//! ```rust,ignore
//! use featgraph::prelude::*;
//!
//! let sum = input("a")
//!     .also(input("b"))
//!     .then(FnProcessor::binary("add", add))?
//!     .then(feat("sum"))?;
//! ```

mod fragment;
mod validation;

pub use fragment::Fragment;
