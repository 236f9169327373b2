// src/pattern/mod.rs

//! Pattern Matcher: input globs with captures, output templates, command templates.

pub mod bindings;
pub mod matcher;
pub mod template;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

pub use bindings::{BindingValue, Bindings};
pub use matcher::{Captures, InputMatch, InputMatcher};
pub use template::{Lookup, Scope, Template, shell_escape};

/// Compile a list of plain globs into one set.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
