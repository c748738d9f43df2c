//! In-process operations for pipeline tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;

use mediaflow::{ApplyResponse, OperationError, OperationHandler, OperationRequest};

fn failed(operation: &str, err: std::io::Error) -> OperationError {
    OperationError::Failed {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}

/// Analysis: counts whitespace separated words of the input.
pub struct WordCount;

#[async_trait]
impl OperationHandler for WordCount {
    async fn apply(&self, request: &OperationRequest<'_>) -> Result<ApplyResponse, OperationError> {
        let text = tokio::fs::read_to_string(request.input)
            .await
            .map_err(|e| failed("wordCount", e))?;
        Ok(ApplyResponse {
            analysis: Some(json!(text.split_whitespace().count())),
            ..Default::default()
        })
    }
}

/// Transform: writes an uppercased copy of the input as `result.txt`.
pub struct Uppercase;

#[async_trait]
impl OperationHandler for Uppercase {
    async fn apply(&self, request: &OperationRequest<'_>) -> Result<ApplyResponse, OperationError> {
        let text = tokio::fs::read_to_string(request.input)
            .await
            .map_err(|e| failed("uppercase", e))?;
        tokio::fs::write(request.out_dir.join("result.txt"), text.to_uppercase())
            .await
            .map_err(|e| failed("uppercase", e))?;
        Ok(ApplyResponse {
            result: Some(json!({ "file": "result.txt", "analyses": request.analyses.len() })),
            ..Default::default()
        })
    }
}
