//! Command operations declared in configuration.

use async_trait::async_trait;
use serde_json::Value;

use super::{ApplyResponse, Operation, OperationHandler, OperationRegistry, OperationRequest};
use crate::config::CommandOperationConfig;
use crate::error::OperationError;

/// Builds the argument vector by substituting `$variables` into a template.
#[derive(Debug, Clone)]
pub struct ArgsTemplate {
    args: Vec<String>,
    upload: bool,
}

impl ArgsTemplate {
    pub fn new(args: Vec<String>, upload: bool) -> Self {
        Self { args, upload }
    }

    pub fn render(&self, request: &OperationRequest<'_>) -> Vec<String> {
        let mut variables: Vec<(String, String)> = vec![
            ("input".into(), request.input.to_string_lossy().into_owned()),
            ("out_dir".into(), request.out_dir.to_string_lossy().into_owned()),
            ("asset_path".into(), request.asset_path.to_string()),
            ("media".into(), request.media.to_string()),
            ("profile".into(), request.profile.name.clone()),
            ("ext".into(), request.profile.ext.clone().unwrap_or_default()),
        ];
        for (key, value) in &request.profile.params {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            variables.push((key.clone(), text));
        }
        // Longest first so `$out_dir` is not eaten by a `$out` parameter.
        variables.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        self.args
            .iter()
            .map(|arg| {
                let mut rendered = arg.clone();
                for (name, value) in &variables {
                    rendered = rendered.replace(&format!("${}", name), value);
                }
                rendered
            })
            .collect()
    }
}

#[async_trait]
impl OperationHandler for ArgsTemplate {
    async fn apply(&self, request: &OperationRequest<'_>) -> Result<ApplyResponse, OperationError> {
        Ok(ApplyResponse {
            args: Some(self.render(request)),
            upload: self.upload,
            ..Default::default()
        })
    }
}

/// Registers one command operation per config entry.
pub fn register_command_operations(
    registry: &mut OperationRegistry,
    operations: &[CommandOperationConfig],
) {
    for op in operations {
        registry.register(Operation::command(
            &op.name,
            op.analysis,
            &op.command,
            ArgsTemplate::new(op.args.clone(), op.upload),
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;

    use super::*;
    use crate::profile::ResolvedProfile;

    fn profile() -> ResolvedProfile {
        ResolvedProfile {
            name: "hd".into(),
            media: Some("video".into()),
            operation: Some("ffmpeg".into()),
            enabled: true,
            noop: false,
            ext: Some("mp4".into()),
            additional_assets: Vec::new(),
            priority: 0,
            params: [
                ("out".to_string(), json!("ignored-prefix")),
                ("height".to_string(), json!(720)),
                ("filters".to_string(), json!(["a", "b"])),
            ]
            .into_iter()
            .collect(),
            sub_profiles: Vec::new(),
            depends_on: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_renders_builtin_and_param_variables() {
        let profile = profile();
        let request = OperationRequest {
            input: Path::new("/dl/downloaded_abc.mkv"),
            media: "video",
            profile: &profile,
            out_dir: Path::new("/assets/hd/xyz"),
            asset_path: "movies/a.mkv",
            source: None,
            analyses: &[],
        };
        let template = ArgsTemplate::new(
            vec![
                "-i".into(),
                "$input".into(),
                "-vf".into(),
                "scale=-2:$height".into(),
                "$out_dir/$profile.$ext".into(),
                "$filters".into(),
            ],
            false,
        );

        let response = template.apply(&request).await.unwrap();
        assert_eq!(
            response.args.unwrap(),
            vec![
                "-i",
                "/dl/downloaded_abc.mkv",
                "-vf",
                "scale=-2:720",
                "/assets/hd/xyz/hd.mp4",
                "$filters",
            ]
        );
        assert!(!response.upload);
    }

    #[test]
    fn test_register_command_operations() {
        let mut registry = OperationRegistry::new();
        register_command_operations(
            &mut registry,
            &[CommandOperationConfig {
                name: "probe".into(),
                command: "ffprobe".into(),
                args: vec!["$input".into()],
                analysis: true,
                upload: false,
            }],
        );
        let op = registry.lookup("probe").unwrap();
        assert!(op.analysis);
        assert_eq!(op.command.as_deref(), Some("ffprobe"));
    }
}
