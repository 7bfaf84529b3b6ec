use std::collections::BTreeSet;

use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::ops::softmax;
use serde::{Deserialize, Serialize};
use unmasker::{utils::serde::deserialize_single_or_vec, Error, FromPretrainedParameters, Result};
use unmasker_models::{AutoModelForMaskedLM, ForwardParams, PreTrainedModel};
use unmasker_tokenizers::{AutoTokenizer, BatchEncoding, Padding, PaddingOptions, Tokenizer};

/// The number of predictions returned per mask token when `top_k` is not set.
pub const DEFAULT_TOP_K: usize = 5;

/// A candidate token for a mask position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// The input sentence with the mask token replaced by the predicted token.
    pub sequence: String,
    /// The probability assigned to the token.
    pub score: f32,
    /// The id of the predicted token.
    pub token: u32,
    /// The predicted token as a string.
    pub token_str: String,
}

/// Options of the fill-mask pipeline. Fields left as `None` fall back to the options the pipeline
/// was created with, and then to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FillMaskOptions {
    /// The number of predictions to return per mask token.
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Restricts the predictions to these tokens. A single string is accepted as a list with one
    /// target.
    #[serde(default, deserialize_with = "deserialize_single_or_vec")]
    pub targets: Option<Vec<String>>,
}

impl FillMaskOptions {
    pub fn new(top_k: Option<usize>, targets: Option<Vec<String>>) -> Self {
        Self { top_k, targets }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_targets<S: Into<String>>(mut self, targets: Vec<S>) -> Self {
        self.targets = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    pub fn get_top_k(&self) -> usize {
        self.top_k.unwrap_or(DEFAULT_TOP_K)
    }

    pub fn get_targets(&self) -> Option<&[String]> {
        self.targets.as_deref()
    }

    /// Returns the options obtained by applying the fields set in `overrides` on top of `self`.
    pub fn merge(&self, overrides: &FillMaskOptions) -> FillMaskOptions {
        FillMaskOptions {
            top_k: overrides.top_k.or(self.top_k),
            targets: overrides.targets.clone().or_else(|| self.targets.clone()),
        }
    }

    /// Checks the options are well formed. `top_k` must be positive and `targets`, when given,
    /// must be a non-empty list of non-empty strings.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == Some(0) {
            return Err(Error::invalid_input("`top_k` must be greater than 0"));
        }

        if let Some(targets) = &self.targets {
            if targets.is_empty() {
                return Err(Error::invalid_input(
                    "At least one target must be provided when `targets` is passed",
                ));
            }
            if targets.iter().any(|target| target.is_empty()) {
                return Err(Error::invalid_input("Targets cannot be empty strings"));
            }
        }

        Ok(())
    }
}

/// The inputs of the fill-mask pipeline: a single sentence or a batch of sentences.
#[derive(Debug, Clone, PartialEq)]
pub enum FillMaskInputs {
    Single(String),
    Batch(Vec<String>),
}

impl From<&str> for FillMaskInputs {
    fn from(input: &str) -> Self {
        FillMaskInputs::Single(input.to_string())
    }
}

impl From<String> for FillMaskInputs {
    fn from(input: String) -> Self {
        FillMaskInputs::Single(input)
    }
}

impl<S: Into<String>> From<Vec<S>> for FillMaskInputs {
    fn from(inputs: Vec<S>) -> Self {
        FillMaskInputs::Batch(inputs.into_iter().map(Into::into).collect())
    }
}

impl TryFrom<serde_json::Value> for FillMaskInputs {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(input) => Ok(FillMaskInputs::Single(input)),
            serde_json::Value::Array(inputs) => inputs
                .into_iter()
                .enumerate()
                .map(|(i, input)| match input {
                    serde_json::Value::String(input) => Ok(input),
                    other => Err(Error::invalid_input(format!(
                        "Input {i} must be a string, got `{other}`"
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(FillMaskInputs::Batch),
            other => Err(Error::invalid_input(format!(
                "Inputs must be a string or a list of strings, got `{other}`"
            ))),
        }
    }
}

/// The predictions for one sentence. A sentence with a single mask token gets a flat list, while
/// a sentence with several gets one list per mask token.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MaskPredictions {
    Single(Vec<Prediction>),
    Multiple(Vec<Vec<Prediction>>),
}

impl From<Vec<Vec<Prediction>>> for MaskPredictions {
    fn from(mut predictions: Vec<Vec<Prediction>>) -> Self {
        match predictions.len() {
            1 => MaskPredictions::Single(predictions.remove(0)),
            _ => MaskPredictions::Multiple(predictions),
        }
    }
}

/// The output of the fill-mask pipeline, shaped after its [`FillMaskInputs`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FillMaskOutput {
    Single(MaskPredictions),
    Batch(Vec<MaskPredictions>),
}

/// A pipeline for filling masked tokens in a sentence.
pub struct FillMaskPipeline {
    model: Box<dyn PreTrainedModel>,
    tokenizer: Box<dyn Tokenizer>,
    device: Device,
    options: FillMaskOptions,
}

impl FillMaskPipeline {
    /// Creates a new `FillMaskPipeline`.
    ///
    /// # Arguments
    ///
    /// * `identifier` - The repository id of the model to load or the path of a local directory.
    /// * `device` - The device to run the model on.
    /// * `dtype` - The numeric type in which the model parameters should be loaded.
    /// * `params` - Optional parameters to specify the revision, user agent, and auth token.
    ///
    /// # Returns
    ///
    /// The `FillMaskPipeline` instance.
    pub fn new<S: AsRef<str> + Copy>(
        identifier: S,
        device: &Device,
        dtype: Option<DType>,
        params: Option<FromPretrainedParameters>,
    ) -> Result<Self> {
        let model =
            AutoModelForMaskedLM::from_pretrained(identifier, device, dtype, params.clone())?;
        let tokenizer = AutoTokenizer::from_pretrained(identifier, None, params)?;
        Ok(Self::from_model_and_tokenizer(model, tokenizer, device))
    }

    /// Creates a new `FillMaskPipeline` from an already loaded model and tokenizer.
    pub fn from_model_and_tokenizer(
        model: Box<dyn PreTrainedModel>,
        tokenizer: Box<dyn Tokenizer>,
        device: &Device,
    ) -> Self {
        Self {
            model,
            tokenizer,
            device: device.clone(),
            options: FillMaskOptions::default(),
        }
    }

    /// Sets the options used by every call of the pipeline. Options passed to a call take
    /// precedence over these.
    pub fn with_options(mut self, options: FillMaskOptions) -> Result<Self> {
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    pub fn get_options(&self) -> &FillMaskOptions {
        &self.options
    }

    pub fn get_tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    /// Resolves the targets to token ids. A target that isn't in the vocabulary is replaced by
    /// the first token it's tokenized into, and a target that tokenizes into nothing is ignored.
    /// The ids are deduplicated and sorted in ascending order.
    fn get_target_ids(&self, targets: &[String]) -> Result<Vec<u32>> {
        let vocab = self.tokenizer.get_vocab();

        let mut target_ids = BTreeSet::new();
        for target in targets {
            if let Some(id) = vocab.get(target) {
                target_ids.insert(*id);
                continue;
            }

            let encodings = self.tokenizer.encode(vec![target.clone()], false, None)?;
            match encodings
                .get_encodings()
                .first()
                .and_then(|encoding| encoding.get_ids().first())
            {
                Some(&id) => {
                    let replacement = self.tokenizer.decode(&[id], false)?;
                    tracing::warn!(
                        "The specified target token `{}` does not exist in the model vocabulary. Replacing with `{}`.",
                        target,
                        replacement
                    );
                    target_ids.insert(id);
                }
                None => {
                    tracing::warn!(
                        "The specified target token `{}` does not exist in the model vocabulary. We cannot replace it with anything meaningful, ignoring it.",
                        target
                    );
                }
            }
        }

        if target_ids.is_empty() {
            return Err(Error::invalid_input(
                "None of the targets could be resolved to a token of the vocabulary",
            ));
        }

        Ok(target_ids.into_iter().collect())
    }

    fn get_masked_index(&self, encodings: &BatchEncoding) -> Result<Vec<Vec<u32>>> {
        let mask_token_id = self.tokenizer.get_mask_token_id().ok_or_else(|| {
            Error::execution("The tokenizer doesn't define a mask token, so it can't fill masks")
        })?;

        encodings
            .get_encodings()
            .iter()
            .enumerate()
            .map(|(i, encoding)| {
                let indexes: Vec<u32> = encoding
                    .get_ids()
                    .iter()
                    .enumerate()
                    .filter(|(_, id)| **id == mask_token_id)
                    .map(|(idx, _)| idx as u32)
                    .collect();
                if indexes.is_empty() {
                    return Err(Error::execution(format!(
                        "No mask token (`{}`) found in input {}",
                        self.tokenizer.get_mask_token().unwrap_or_default(),
                        i
                    )));
                }
                Ok(indexes)
            })
            .collect()
    }

    fn preprocess(&self, inputs: Vec<String>) -> Result<(BatchEncoding, Vec<Vec<u32>>)> {
        let padding = match inputs.len() {
            1 => None,
            _ => Some(PaddingOptions::new(Padding::Longest, None)),
        };
        let mut encodings = self.tokenizer.encode(inputs, true, padding)?;
        let masked_index = self.get_masked_index(&encodings)?;
        encodings.to_device(&self.device)?;
        Ok((encodings, masked_index))
    }

    fn postprocess(
        &self,
        logits: &Tensor,
        encodings: &BatchEncoding,
        masked_index: Vec<Vec<u32>>,
        target_ids: Option<&[u32]>,
        top_k: usize,
    ) -> Result<Vec<Vec<Vec<Prediction>>>> {
        let pad_token_id = self.tokenizer.get_pad_token_id();
        let target_ids_tensor = target_ids
            .map(|ids| Tensor::new(ids, &self.device))
            .transpose()?;

        let mut results = Vec::with_capacity(masked_index.len());
        for (i, (indexes, encoding)) in masked_index
            .into_iter()
            .zip(encodings.get_encodings())
            .enumerate()
        {
            let single_mask = indexes.len() == 1;

            // Probabilities over the whole vocabulary for each mask token of the sentence
            let mask_logits = logits
                .i(i)?
                .index_select(&Tensor::new(indexes.as_slice(), &self.device)?, 0)?;
            let probs = softmax(&mask_logits.to_dtype(DType::F32)?, D::Minus1)?;
            let probs = match &target_ids_tensor {
                Some(ids) => probs.index_select(ids, 1)?,
                None => probs,
            };
            let probs = probs.to_vec2::<f32>()?;

            let mut sentence_results = Vec::with_capacity(indexes.len());
            for (mask_probs, index) in probs.into_iter().zip(indexes) {
                let mut mask_results = Vec::new();
                for (score, candidate) in topk(&mask_probs, top_k) {
                    let token = match target_ids {
                        Some(ids) => ids[candidate as usize],
                        None => candidate,
                    };

                    let mut input_ids = encoding.get_ids().to_vec();
                    input_ids[index as usize] = token;
                    if let Some(pad_token_id) = pad_token_id {
                        input_ids.retain(|&id| id != pad_token_id);
                    }

                    mask_results.push(Prediction {
                        sequence: self.tokenizer.decode(&input_ids, single_mask)?,
                        score,
                        token,
                        token_str: self.tokenizer.decode(&[token], false)?,
                    });
                }
                sentence_results.push(mask_results);
            }
            results.push(sentence_results);
        }

        Ok(results)
    }

    /// Runs the pipeline on a batch of sentences, returning for each sentence one list of
    /// predictions per mask token.
    fn fill(
        &self,
        inputs: Vec<String>,
        options: Option<FillMaskOptions>,
    ) -> Result<Vec<Vec<Vec<Prediction>>>> {
        let options = match options {
            Some(options) => self.options.merge(&options),
            None => self.options.clone(),
        };
        options.validate()?;

        if inputs.is_empty() {
            return Ok(vec![]);
        }

        let target_ids = options
            .get_targets()
            .map(|targets| self.get_target_ids(targets))
            .transpose()?;

        let (encodings, masked_index) = self.preprocess(inputs)?;
        tracing::debug!(
            "Filling {} mask tokens in a batch of shape {:?}",
            masked_index.iter().map(Vec::len).sum::<usize>(),
            encodings.get_input_ids().dims()
        );

        let output = self.model.forward(ForwardParams::from(&encodings))?;
        let logits = output
            .get_logits()
            .ok_or_else(|| Error::msg("The model didn't return logits"))?;

        self.postprocess(
            logits,
            &encodings,
            masked_index,
            target_ids.as_deref(),
            options.get_top_k(),
        )
    }

    /// Fills the masked tokens in a sentence.
    ///
    /// # Arguments
    ///
    /// * `input` - The input sentence with at least one mask token.
    /// * `options` - Optional parameters of the pipeline.
    ///
    /// # Returns
    ///
    /// The top k predictions for each mask token in the sentence.
    pub fn run<I: Into<String>>(
        &self,
        input: I,
        options: Option<FillMaskOptions>,
    ) -> Result<Vec<Vec<Prediction>>> {
        self.fill(vec![input.into()], options)?
            .pop()
            .ok_or_else(|| Error::msg("The pipeline didn't return any result"))
    }

    /// Fills the masked tokens in a list of sentences.
    ///
    /// # Arguments
    ///
    /// * `inputs` - The list of input sentences with at least one mask token.
    /// * `options` - Optional parameters of the pipeline.
    ///
    /// # Returns
    ///
    /// The top k predictions for each mask token in each sentence.
    pub fn run_batch<I: Into<String>>(
        &self,
        inputs: Vec<I>,
        options: Option<FillMaskOptions>,
    ) -> Result<Vec<Vec<Vec<Prediction>>>> {
        let inputs: Vec<String> = inputs.into_iter().map(|x| x.into()).collect();
        self.fill(inputs, options)
    }

    /// Fills the masked tokens of a single sentence or a batch, shaping the output after the
    /// inputs.
    pub fn run_inputs(
        &self,
        inputs: FillMaskInputs,
        options: Option<FillMaskOptions>,
    ) -> Result<FillMaskOutput> {
        match inputs {
            FillMaskInputs::Single(input) => {
                let predictions = self.run(input, options)?;
                Ok(FillMaskOutput::Single(predictions.into()))
            }
            FillMaskInputs::Batch(inputs) => {
                let predictions = self.run_batch(inputs, options)?;
                Ok(FillMaskOutput::Batch(
                    predictions.into_iter().map(MaskPredictions::from).collect(),
                ))
            }
        }
    }
}

/// Gets the `k` largest values with their indexes, sorted in descending order. Equal values keep
/// their original order, so ties go to the lowest index.
pub fn topk<N: PartialOrd + Clone>(vec: &[N], k: usize) -> Vec<(N, u32)> {
    if k == 0 {
        return vec![];
    }

    let mut indexed_vec: Vec<(N, u32)> = vec
        .iter()
        .enumerate()
        .map(|(i, v)| (v.clone(), i as u32))
        .collect();
    indexed_vec.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    indexed_vec.truncate(k);
    indexed_vec
}
