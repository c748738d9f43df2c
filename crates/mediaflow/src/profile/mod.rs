//! Profiles: inheritance resolution, operations and their execution.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use regex::Regex;

pub mod exec;
pub mod operation;
pub mod resolver;
pub mod template;

pub use exec::{exec_profile, ExecMode, ExecOutcome, ExecRequest};
pub use operation::{ApplyResponse, Operation, OperationHandler, OperationRegistry, OperationRequest};
pub use resolver::ProfileResolver;
pub use template::{register_command_operations, ArgsTemplate};

/// A profile with its whole `from` chain and sub-profiles folded in.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub name: String,
    pub media: Option<String>,
    pub operation: Option<String>,
    pub enabled: bool,
    pub noop: bool,
    /// Output extension without the dot.
    pub ext: Option<String>,
    pub additional_assets: Vec<Regex>,
    pub priority: i32,
    pub params: BTreeMap<String, serde_json::Value>,
    pub sub_profiles: Vec<Arc<ResolvedProfile>>,
    /// Every profile name this resolution was built from, itself included.
    pub depends_on: BTreeSet<String>,
}

impl ResolvedProfile {
    /// Whether `file_name` is an output this profile delivers.
    pub fn is_output(&self, file_name: &str) -> bool {
        let primary = self
            .ext
            .as_deref()
            .map(|ext| file_name.ends_with(&format!(".{}", ext.trim_start_matches('.'))))
            .unwrap_or(false);
        primary || self.additional_assets.iter().any(|re| re.is_match(file_name))
    }
}
