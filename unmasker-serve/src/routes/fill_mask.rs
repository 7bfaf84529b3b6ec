use anyhow::Result;
use axum::{routing::post, Router};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use unmasker_pipelines::{FillMaskInputs, FillMaskOptions, FillMaskOutput, FillMaskPipeline};

use crate::cli::Cli;
use crate::inference_endpoint::inference;
use crate::responses::ErrorResponse;
use crate::workers::{task_distributor, InferenceState, InferenceTask, ProcessFn};

type FillMaskResponse = Result<FillMaskOutput, ErrorResponse>;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FillMaskInferenceRequest {
    /// A sentence or a list of sentences. Kept as raw JSON so malformed inputs are reported as
    /// validation errors by the pipeline.
    inputs: serde_json::Value,
    #[serde(default)]
    parameters: Option<FillMaskOptions>,
}

pub fn router(args: &Cli) -> Result<Router> {
    let model = args.model();
    let device = args.device()?;
    let dtype = args.dtype();

    tracing::info!(
        "Loading fill mask pipeline for model '{}' on device {:?} with dtype {}",
        model,
        device,
        dtype.map_or("default".to_string(), |dtype| format!("{:?}", dtype))
    );

    let pipeline = Arc::new(
        FillMaskPipeline::new(model, &device, dtype, None)?.with_options(args.fill_mask_options())?,
    );

    tracing::info!("Warming up the model...");
    warm_up(&pipeline).unwrap_or_else(|e| {
        tracing::error!("Failed to warm up the model: {}", e);
    });

    let (tx, rx) = mpsc::channel::<InferenceTask<FillMaskInferenceRequest, FillMaskResponse>>(32);

    let process_fn: Arc<ProcessFn<FillMaskPipeline, FillMaskInferenceRequest, FillMaskResponse>> =
        Arc::new(process_fill_mask);
    tokio::spawn(task_distributor(
        rx,
        pipeline,
        args.num_workers(),
        process_fn,
    ));

    let state = InferenceState { tx };

    Ok(Router::new()
        .route(
            "/",
            post(inference::<FillMaskInferenceRequest, FillMaskOutput>),
        )
        .with_state(state))
}

fn warm_up(pipeline: &FillMaskPipeline) -> unmasker::Result<()> {
    let mask_token = pipeline
        .get_tokenizer()
        .get_mask_token()
        .unwrap_or_default()
        .to_string();
    pipeline.run(format!("Paris is the {} of France.", mask_token), None)?;
    Ok(())
}

fn process_fill_mask(
    pipeline: &FillMaskPipeline,
    request: FillMaskInferenceRequest,
) -> FillMaskResponse {
    let inputs = FillMaskInputs::try_from(request.inputs)?;
    Ok(pipeline.run_inputs(inputs, request.parameters)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_deserialize() {
        let request: FillMaskInferenceRequest = serde_json::from_value(json!({
            "inputs": "Paris is the [MASK] of France.",
            "parameters": {"top_k": 2, "targets": "capital"}
        }))
        .unwrap();
        let parameters = request.parameters.unwrap();
        assert_eq!(parameters.top_k, Some(2));
        assert_eq!(parameters.targets, Some(vec!["capital".to_string()]));

        let request: FillMaskInferenceRequest =
            serde_json::from_value(json!({"inputs": ["a [MASK]", 1]})).unwrap();
        assert!(request.parameters.is_none());
        assert!(FillMaskInputs::try_from(request.inputs)
            .unwrap_err()
            .is_invalid_input());
    }
}
