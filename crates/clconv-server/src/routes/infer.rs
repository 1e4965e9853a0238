// SPDX-License-Identifier: AGPL-3.0-only

//! Inference endpoint
//!
//! `POST /infer` takes exactly 1024 comma-separated floats and answers with
//! the 8 outputs, comma-separated, in scientific notation. Malformed
//! payloads are rejected with 400 before any device work.

use axum::{extract::State, http::StatusCode};
use clconv_pipeline::{to_scientific_csv, PipelineError, INPUT_LEN};
use tracing::{debug, error};

use crate::state::SharedState;

/// Parse the request body: every comma-separated segment must be a finite
/// decimal float (`NaN`, `inf` and out-of-range values are rejected)
pub fn parse_payload(body: &str) -> Result<Vec<f32>, PipelineError> {
    let values = body
        .trim()
        .split(',')
        .map(str::trim)
        .enumerate()
        .map(|(index, segment)| match segment.parse::<f32>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(PipelineError::Parse {
                index,
                value: segment.to_string(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if values.len() != INPUT_LEN {
        return Err(PipelineError::invalid_input(format!(
            "expected {INPUT_LEN} values, got {}",
            values.len()
        )));
    }
    Ok(values)
}

fn error_response(err: &PipelineError) -> (StatusCode, String) {
    if err.is_client_error() {
        debug!("Rejected request: {err}");
        (StatusCode::BAD_REQUEST, err.to_string())
    } else {
        error!("Inference failed ({} error): {err}", err.category());
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Inference failed: {err}"))
    }
}

/// POST /infer - Run one forward pass
pub async fn infer(State(state): State<SharedState>, body: String) -> Result<String, (StatusCode, String)> {
    let input = parse_payload(&body).map_err(|e| error_response(&e))?;

    let output = tokio::task::spawn_blocking(move || state.context()?.infer(&input))
        .await
        .map_err(|e| {
            error!("Inference task failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Inference task failed".to_string())
        })?
        .map_err(|e| error_response(&e))?;

    Ok(to_scientific_csv(&output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::fixture;

    fn payload(len: usize, value: &str) -> String {
        vec![value; len].join(",")
    }

    #[test]
    fn payload_tolerates_whitespace() {
        let body = format!(" {}\n", payload(INPUT_LEN, " 0.5 "));
        let values = parse_payload(&body).unwrap();
        assert_eq!(values.len(), INPUT_LEN);
        assert!(values.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn payload_rejects_empty_and_bad_segments() {
        let mut body = payload(INPUT_LEN, "1");
        body.push(',');
        assert!(parse_payload(&body).unwrap_err().is_client_error());
        assert!(parse_payload(&payload(INPUT_LEN, "one")).is_err());
        assert!(parse_payload("").is_err());
    }

    #[test]
    fn payload_rejects_non_finite_tokens() {
        for token in ["NaN", "inf", "-infinity", "1e39"] {
            let body = format!("{token},{}", payload(INPUT_LEN - 1, "0"));
            let err = parse_payload(&body).unwrap_err();
            assert!(err.is_client_error(), "{token}");
            assert!(matches!(err, PipelineError::Parse { index: 0, .. }), "{token}");
        }
    }

    #[tokio::test]
    async fn non_finite_payload_is_rejected_without_running() {
        let (_dir, state) = fixture(&[0.0; 8]);

        let body = format!("NaN,inf,{}", payload(INPUT_LEN - 2, "0"));
        let (status, message) = infer(State(state.clone()), body).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.contains("NaN"));
        assert!(state.ready_context().is_none());
    }

    #[tokio::test]
    async fn returns_bias_for_zero_input() {
        let (_dir, state) = fixture(&[1.0, -0.5, 0.25, 0.0, 2.0, -3.0, 1500.0, 0.125]);

        let body = infer(State(state), payload(INPUT_LEN, "0")).await.unwrap();
        assert_eq!(body, "1e0,-5e-1,2.5e-1,0e0,2e0,-3e0,1.5e3,1.25e-1");
    }

    #[tokio::test]
    async fn short_payload_is_rejected_without_running() {
        let (_dir, state) = fixture(&[0.0; 8]);

        let (status, _) = infer(State(state.clone()), payload(763, "0.1")).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.ready_context().is_none());
    }

    #[tokio::test]
    async fn missing_program_is_a_server_error() {
        let (dir, state) = fixture(&[0.0; 8]);
        std::fs::remove_file(dir.path().join("kernel_file.aocx")).unwrap();

        let (status, _) = infer(State(state), payload(INPUT_LEN, "0")).await.unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
