#![forbid(unsafe_code)]

//! Loading of serialized model source.
//!
//! A source unit starts with `op_version_set = N`, lists its imports, and
//! then holds either method definitions for a live module
//! ([`import_methods`]) or standalone classes ([`import_libs`]).

mod config;
mod header;
mod import;

pub use config::{ConfigError, ImportConfig};
pub use header::{parse_imports, parse_version_number};
pub use import::{import_libs, import_libs_with_config, import_methods, import_methods_with_config};
