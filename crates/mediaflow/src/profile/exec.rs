//! Running one resolved profile against one downloaded asset.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::{OperationRegistry, OperationRequest, ResolvedProfile};
use crate::command::CommandRunner;
use crate::error::ExecError;
use crate::model::asset::asset_path;
use crate::model::ProfileJob;
use crate::naming;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Inline analysis: the payload is the analysis (or result) value.
    Analyze,
    /// Deferred transform: a structured result is required, analysis output is rejected.
    Transform,
}

pub struct ExecRequest<'a> {
    pub profile: &'a ResolvedProfile,
    pub asset: &'a str,
    pub downloaded: &'a Path,
    pub asset_dir: &'a Path,
    pub source: Option<Arc<dyn Storage>>,
    pub analyses: &'a [ProfileJob],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutcome {
    /// Stored on the profile job: JSON text for in-process operations, stdout for commands.
    pub payload: String,
    pub out_dir: PathBuf,
    /// Whether files in `out_dir` should be delivered to destinations.
    pub upload: bool,
}

pub async fn exec_profile(
    registry: &OperationRegistry,
    runner: &dyn CommandRunner,
    request: &ExecRequest<'_>,
    mode: ExecMode,
) -> Result<ExecOutcome, ExecError> {
    let profile = request.profile;
    let operation = profile
        .operation
        .as_deref()
        .and_then(|name| registry.get(name))
        .ok_or_else(|| ExecError::MissingOperation {
            profile: profile.name.clone(),
        })?;
    let media = profile
        .media
        .as_deref()
        .ok_or_else(|| ExecError::MissingMedia {
            profile: profile.name.clone(),
        })?;

    let out_dir = naming::output_dir(request.asset_dir, &profile.name, request.downloaded);
    tokio::fs::create_dir_all(&out_dir)
        .await
        .map_err(|source| ExecError::OutputDir {
            path: out_dir.clone(),
            source,
        })?;

    let response = operation
        .apply(&OperationRequest {
            input: request.downloaded,
            media,
            profile,
            out_dir: &out_dir,
            asset_path: asset_path(request.asset),
            source: request.source.clone(),
            analyses: request.analyses,
        })
        .await?;

    let missing_result = || ExecError::MissingResult {
        profile: profile.name.clone(),
        asset: request.asset.to_string(),
    };

    let payload = if operation.is_function() {
        match mode {
            ExecMode::Analyze => response
                .analysis
                .as_ref()
                .or(response.result.as_ref())
                .map(|v| v.to_string())
                .ok_or_else(missing_result)?,
            ExecMode::Transform => {
                if response.analysis.is_some() {
                    return Err(ExecError::UnexpectedAnalysis {
                        profile: profile.name.clone(),
                        asset: request.asset.to_string(),
                    });
                }
                response
                    .result
                    .as_ref()
                    .map(|v| v.to_string())
                    .ok_or_else(missing_result)?
            }
        }
    } else {
        let args = response
            .args
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ExecError::MissingArgs {
                profile: profile.name.clone(),
                asset: request.asset.to_string(),
            })?;
        let command = operation
            .command
            .as_deref()
            .ok_or_else(|| ExecError::MissingCommand {
                profile: profile.name.clone(),
            })?;

        debug!(profile = %profile.name, asset = %request.asset, command, "running command operation");
        let output = runner.run(command, &args).await?;
        if !output.success() {
            return Err(ExecError::CommandFailed {
                profile: profile.name.clone(),
                asset: request.asset.to_string(),
                exit_code: output.exit_code,
                args,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        output.stdout
    };

    Ok(ExecOutcome {
        payload,
        out_dir,
        upload: match mode {
            ExecMode::Analyze => response.upload,
            ExecMode::Transform => true,
        },
    })
}
