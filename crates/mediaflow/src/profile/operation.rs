use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::ResolvedProfile;
use crate::error::OperationError;
use crate::model::ProfileJob;
use crate::storage::Storage;

/// Everything an operation sees for one profile run.
pub struct OperationRequest<'a> {
    /// The downloaded copy of the asset.
    pub input: &'a Path,
    pub media: &'a str,
    pub profile: &'a ResolvedProfile,
    /// Directory the operation writes its output files into.
    pub out_dir: &'a Path,
    /// Asset path relative to its source.
    pub asset_path: &'a str,
    /// Connection to the asset's source, reused from the download.
    pub source: Option<Arc<dyn Storage>>,
    /// Finished analysis jobs for the same asset, in the order they ran.
    pub analyses: &'a [ProfileJob],
}

/// What an operation hands back.
///
/// In-process operations fill `result` or `analysis`. Command operations fill
/// `args`, which are passed to the operation's command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyResponse {
    pub result: Option<Value>,
    pub analysis: Option<Value>,
    pub args: Option<Vec<String>>,
    /// Deliver the files in the output directory like a transform would.
    pub upload: bool,
}

#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn apply(&self, request: &OperationRequest<'_>) -> Result<ApplyResponse, OperationError>;
}

pub struct Operation {
    pub name: String,
    /// Analysis operations run inline during analyze; the rest become transform jobs.
    pub analysis: bool,
    /// External program that receives the handler's `args`.
    pub command: Option<String>,
    handler: Arc<dyn OperationHandler>,
}

impl Operation {
    pub fn function(name: &str, analysis: bool, handler: impl OperationHandler + 'static) -> Self {
        Self {
            name: name.to_string(),
            analysis,
            command: None,
            handler: Arc::new(handler),
        }
    }

    pub fn command(
        name: &str,
        analysis: bool,
        command: &str,
        handler: impl OperationHandler + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            analysis,
            command: Some(command.to_string()),
            handler: Arc::new(handler),
        }
    }

    pub fn is_function(&self) -> bool {
        self.command.is_none()
    }

    pub async fn apply(
        &self,
        request: &OperationRequest<'_>,
    ) -> Result<ApplyResponse, OperationError> {
        self.handler.apply(request).await
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("analysis", &self.analysis)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// Named operations available to profiles.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an operation, replacing any previous one with the same name.
    pub fn register(&mut self, operation: Operation) -> &mut Self {
        self.operations
            .insert(operation.name.clone(), Arc::new(operation));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<Operation>> {
        self.operations.get(name).cloned()
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<Operation>, OperationError> {
        self.get(name)
            .ok_or_else(|| OperationError::Unknown(name.to_string()))
    }

    /// Whether the profile's operation is registered as an analysis.
    pub fn is_analysis(&self, profile: &ResolvedProfile) -> bool {
        profile
            .operation
            .as_deref()
            .and_then(|op| self.get(op))
            .map(|op| op.analysis)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ApplyResponse);

    #[async_trait]
    impl OperationHandler for Fixed {
        async fn apply(&self, _req: &OperationRequest<'_>) -> Result<ApplyResponse, OperationError> {
            Ok(self.0.clone())
        }
    }

    fn profile(operation: &str) -> ResolvedProfile {
        ResolvedProfile {
            name: "p".into(),
            media: Some("text".into()),
            operation: Some(operation.into()),
            enabled: true,
            noop: false,
            ext: None,
            additional_assets: Vec::new(),
            priority: 0,
            params: Default::default(),
            sub_profiles: Vec::new(),
            depends_on: Default::default(),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = OperationRegistry::new();
        registry
            .register(Operation::function("count", true, Fixed(ApplyResponse::default())))
            .register(Operation::command(
                "ffmpeg",
                false,
                "/usr/bin/ffmpeg",
                Fixed(ApplyResponse::default()),
            ));

        assert_eq!(registry.len(), 2);
        assert!(registry.lookup("count").unwrap().is_function());
        assert!(!registry.lookup("ffmpeg").unwrap().is_function());
        assert!(matches!(
            registry.lookup("nope").unwrap_err(),
            OperationError::Unknown(_)
        ));
    }

    #[test]
    fn test_is_analysis() {
        let mut registry = OperationRegistry::new();
        registry.register(Operation::function("count", true, Fixed(ApplyResponse::default())));
        registry.register(Operation::function("upper", false, Fixed(ApplyResponse::default())));

        assert!(registry.is_analysis(&profile("count")));
        assert!(!registry.is_analysis(&profile("upper")));
        assert!(!registry.is_analysis(&profile("unknown")));
    }
}
