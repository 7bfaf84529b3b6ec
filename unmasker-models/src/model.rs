use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use unmasker::{Error, FromPretrainedParameters, Result};

use crate::config::PretrainedConfig;
use crate::from_pretrained::from_pretrained;
use crate::models::bert::{BertForMaskedLM, BERT_DTYPE};
use crate::models::roberta::{RobertaForMaskedLM, ROBERTA_DTYPE};

/// Parameters for the `forward` method of a `PreTrainedModel`.
#[derive(Debug, Default)]
pub struct ForwardParams<'a> {
    pub input_ids: Option<&'a Tensor>,
    pub attention_mask: Option<&'a Tensor>,
    pub token_type_ids: Option<&'a Tensor>,
    pub position_ids: Option<&'a Tensor>,
}

impl<'a> ForwardParams<'a> {
    pub fn new(
        input_ids: Option<&'a Tensor>,
        attention_mask: Option<&'a Tensor>,
        token_type_ids: Option<&'a Tensor>,
        position_ids: Option<&'a Tensor>,
    ) -> Self {
        Self {
            input_ids,
            attention_mask,
            token_type_ids,
            position_ids,
        }
    }

    pub fn get_input_ids(&self) -> Option<&'a Tensor> {
        self.input_ids
    }

    pub fn get_attention_mask(&self) -> Option<&'a Tensor> {
        self.attention_mask
    }

    pub fn get_token_type_ids(&self) -> Option<&'a Tensor> {
        self.token_type_ids
    }

    pub fn get_position_ids(&self) -> Option<&'a Tensor> {
        self.position_ids
    }

    /// Gets the input ids, which every model requires.
    pub fn require_input_ids(&self) -> Result<&'a Tensor> {
        self.input_ids
            .ok_or_else(|| Error::MissingForwardParam("input_ids".to_string()))
    }
}

#[cfg(feature = "tokenizers")]
impl<'a> From<&'a unmasker_tokenizers::BatchEncoding> for ForwardParams<'a> {
    fn from(encodings: &'a unmasker_tokenizers::BatchEncoding) -> Self {
        Self::new(
            Some(encodings.get_input_ids()),
            Some(encodings.get_attention_mask()),
            Some(encodings.get_token_type_ids()),
            None,
        )
    }
}

/// The output of the `forward` method of a `PreTrainedModel`.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    logits: Option<Tensor>,
    last_hidden_state: Option<Tensor>,
}

impl ModelOutput {
    pub fn new(logits: Option<Tensor>, last_hidden_state: Option<Tensor>) -> Self {
        Self {
            logits,
            last_hidden_state,
        }
    }

    /// Gets the prediction scores of the model head. For masked language models these have shape
    /// `(batch_size, seq_len, vocab_size)`.
    pub fn get_logits(&self) -> Option<&Tensor> {
        self.logits.as_ref()
    }

    pub fn get_last_hidden_state(&self) -> Option<&Tensor> {
        self.last_hidden_state.as_ref()
    }
}

/// Trait for a pre-trained model.
pub trait PreTrainedModel: Send + Sync {
    /// Loads the model from the weights in the `VarBuilder` and the `config.json` contents.
    fn load(vb: VarBuilder, config: serde_json::Value) -> Result<Self>
    where
        Self: Sized;
    fn get_config(&self) -> &PretrainedConfig;
    fn forward(&self, params: ForwardParams) -> Result<ModelOutput>;
}

/// Implement `from_pretrained` method for a model struct.
#[macro_export]
macro_rules! impl_from_pretrained_method {
    ($model_struct:ident, $model_prefix:expr, $default_dtype:expr) => {
        impl $model_struct {
            /// Loads a model from a Hugging Face Hub repository or a local directory.
            ///
            /// # Arguments
            ///
            /// * `repo_id` - The repository id of the model or the path of a local directory.
            /// * `device` - The device to run the model on.
            /// * `dtype` - The numeric type in which the model parameters should be loaded.
            /// * `params` - Optional parameters to specify the revision, user agent, and auth token.
            ///
            /// # Returns
            ///
            /// The loaded model.
            pub fn from_pretrained<S: AsRef<str>>(
                repo_id: S,
                device: &Device,
                dtype: Option<DType>,
                params: Option<FromPretrainedParameters>,
            ) -> Result<Self> {
                let model_info = from_pretrained(repo_id, params)?;
                let config = model_info.get_config()?.clone();
                let dtype = dtype.unwrap_or($default_dtype);
                let vb = model_info.get_var_builder($model_prefix, dtype, device)?;
                Self::load(vb, config)
            }
        }
    };
}

/// Implement `from_pretrained` method for the `AutoModel` struct.
#[macro_export]
macro_rules! impl_auto_model_from_pretrained_method {
    ($auto_model_struct:ident, $(($model_type:pat, $model_prefix:expr, $model_struct:ident, $default_dtype:expr)), *) => {
        impl $auto_model_struct {
            /// Loads a model from a Hugging Face Hub repository or a local directory, selecting
            /// the implementation from the `model_type` of its `config.json`.
            ///
            /// # Arguments
            ///
            /// * `repo_id` - The repository id of the model or the path of a local directory.
            /// * `device` - The device to run the model on.
            /// * `dtype` - The numeric type in which the model parameters should be loaded.
            /// * `params` - Optional parameters to specify the revision, user agent, and auth token.
            ///
            /// # Returns
            ///
            /// The loaded model.
            pub fn from_pretrained<S: AsRef<str>>(
                repo_id: S,
                device: &Device,
                dtype: Option<DType>,
                params: Option<FromPretrainedParameters>,
            ) -> Result<Box<dyn PreTrainedModel>> {
                let model_info = from_pretrained(repo_id, params)?;
                let config = model_info.get_config()?.clone();
                let model_type = config["model_type"].as_str().unwrap_or_default().to_string();

                match model_type.as_str() {
                    $(
                        $model_type => {
                            let dtype = dtype.unwrap_or($default_dtype);
                            let vb = model_info.get_var_builder($model_prefix, dtype, device)?;
                            Ok(Box::new($model_struct::load(vb, config)?))
                        },
                    )*
                    _ => Err(Error::ModelNotImplemented(model_type)),
                }
            }
        }
    };
}

/// Allows to automatically load a `PreTrainedModel` for masked language modeling from a Hugging
/// Face Hub repository or a local directory.
#[derive(Debug)]
pub struct AutoModelForMaskedLM {}

impl_auto_model_from_pretrained_method!(
    AutoModelForMaskedLM,
    ("bert", "bert", BertForMaskedLM, BERT_DTYPE),
    ("roberta", "roberta", RobertaForMaskedLM, ROBERTA_DTYPE)
);

impl_from_pretrained_method!(BertForMaskedLM, "bert", BERT_DTYPE);
impl_from_pretrained_method!(RobertaForMaskedLM, "roberta", ROBERTA_DTYPE);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bert::BertConfig;
    use candle_nn::VarMap;
    use std::path::Path;

    fn write_tiny_bert(dir: &Path, model_type: &str) -> BertForMaskedLM {
        let config = BertConfig {
            vocab_size: 10,
            hidden_size: 8,
            num_hidden_layers: 1,
            num_attention_heads: 2,
            intermediate_size: 16,
            max_position_embeddings: 16,
            ..BertConfig::default()
        };
        let varmap = VarMap::new();
        let model = BertForMaskedLM::random(&config, &varmap, &Device::Cpu).unwrap();
        varmap.save(dir.join("model.safetensors")).unwrap();

        let mut config_json = serde_json::to_value(&config).unwrap();
        config_json["model_type"] = model_type.into();
        std::fs::write(dir.join("config.json"), config_json.to_string()).unwrap();
        model
    }

    #[test]
    fn test_auto_model_for_masked_lm_from_local_dir() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_tiny_bert(dir.path(), "bert");

        let loaded = AutoModelForMaskedLM::from_pretrained(
            dir.path().to_str().unwrap(),
            &Device::Cpu,
            None,
            None,
        )
        .unwrap();
        assert_eq!(loaded.get_config().get_model_type(), Some("bert"));

        let input_ids = Tensor::new(&[[2u32, 4, 3]], &Device::Cpu).unwrap();
        let expected = model
            .forward(ForwardParams::new(Some(&input_ids), None, None, None))
            .unwrap();
        let actual = loaded
            .forward(ForwardParams::new(Some(&input_ids), None, None, None))
            .unwrap();

        let expected = expected.get_logits().unwrap().flatten_all().unwrap();
        let actual = actual.get_logits().unwrap().flatten_all().unwrap();
        let diff = (expected - actual)
            .unwrap()
            .abs()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_auto_model_unknown_model_type() {
        let dir = tempfile::tempdir().unwrap();
        write_tiny_bert(dir.path(), "gpt2");

        let result = AutoModelForMaskedLM::from_pretrained(
            dir.path().to_str().unwrap(),
            &Device::Cpu,
            None,
            None,
        );
        assert!(matches!(result, Err(Error::ModelNotImplemented(model_type)) if model_type == "gpt2"));
    }
}
