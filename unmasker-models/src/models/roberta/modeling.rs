use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use unmasker::Result;

use super::config::RobertaConfig;
use crate::{
    config::{HiddenAct, PretrainedConfig},
    model::{ForwardParams, ModelOutput, PreTrainedModel},
    models::bert::{modeling::MaskedLMHead, Bert},
};

pub const ROBERTA_DTYPE: DType = DType::F32;

/// Computes the position ids of RoBERTa. Non-padding tokens are numbered from `padding_idx + 1`
/// onwards and padding tokens get `padding_idx`, so left and right padding yield the same
/// positions for the real tokens.
///
/// # Arguments
///
/// * `input_ids` - The input ids with shape `(batch_size, seq_len)`.
/// * `padding_idx` - The id of the padding token.
///
/// # Returns
///
/// The position ids with shape `(batch_size, seq_len)`.
pub fn create_position_ids_from_input_ids(input_ids: &Tensor, padding_idx: u32) -> Result<Tensor> {
    let (b_sz, seq_len) = input_ids.dims2()?;
    let position_ids: Vec<u32> = input_ids
        .to_dtype(DType::U32)?
        .to_vec2::<u32>()?
        .into_iter()
        .flat_map(|sequence| {
            let mut position = padding_idx;
            sequence
                .into_iter()
                .map(|id| {
                    if id == padding_idx {
                        padding_idx
                    } else {
                        position += 1;
                        position
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect();
    Ok(Tensor::from_vec(
        position_ids,
        (b_sz, seq_len),
        input_ids.device(),
    )?)
}

/// RoBERTa with a masked language modeling head on top.
pub struct RobertaForMaskedLM {
    model: Bert,
    head: MaskedLMHead,
    config: RobertaConfig,
}

impl PreTrainedModel for RobertaForMaskedLM {
    fn load(vb: VarBuilder, config: serde_json::Value) -> Result<Self> {
        let config: RobertaConfig = serde_json::from_value(config)?;
        let model = Bert::load(vb.pp("roberta"), &config.encoder)?;
        let vb_head = vb.pp("lm_head");
        let head = MaskedLMHead::load(
            vb_head.clone(),
            vb_head.pp("decoder"),
            vb_head.clone(),
            "layer_norm",
            HiddenAct::Gelu,
            &config.encoder,
            model.get_embeddings().get_word_embeddings(),
        )?;
        Ok(Self {
            model,
            head,
            config,
        })
    }

    fn get_config(&self) -> &PretrainedConfig {
        &self.config.encoder.pretrained_config
    }

    fn forward(&self, params: ForwardParams) -> Result<ModelOutput> {
        let input_ids = params.require_input_ids()?;
        let position_ids = match params.get_position_ids() {
            Some(position_ids) => position_ids.clone(),
            None => create_position_ids_from_input_ids(input_ids, self.config.padding_idx())?,
        };
        // RoBERTa checkpoints have a single token type, whatever the tokenizer returns
        let token_type_ids = input_ids.zeros_like()?;
        let sequence_output = self.model.forward(
            input_ids,
            params.get_attention_mask(),
            Some(&token_type_ids),
            Some(&position_ids),
        )?;
        let logits = self.head.forward(&sequence_output)?;
        Ok(ModelOutput::new(Some(logits), Some(sequence_output)))
    }
}

impl RobertaForMaskedLM {
    /// Builds a model with randomly initialised weights stored in `varmap`.
    pub fn random(
        config: &RobertaConfig,
        varmap: &candle_nn::VarMap,
        device: &Device,
    ) -> Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, ROBERTA_DTYPE, device);
        Self::load(vb, serde_json::to_value(config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bert::BertConfig;
    use candle_nn::VarMap;

    #[test]
    fn test_position_ids_skip_padding() {
        let input_ids = Tensor::new(&[[0u32, 5, 6, 2, 1, 1], [1, 1, 0, 5, 2, 1]], &Device::Cpu)
            .unwrap();
        let position_ids = create_position_ids_from_input_ids(&input_ids, 1)
            .unwrap()
            .to_vec2::<u32>()
            .unwrap();
        assert_eq!(
            position_ids,
            vec![vec![2, 3, 4, 5, 1, 1], vec![1, 1, 2, 3, 4, 1]]
        );
    }

    #[test]
    fn test_roberta_masked_lm_logits_shape() {
        let config = RobertaConfig {
            encoder: BertConfig {
                vocab_size: 12,
                hidden_size: 8,
                num_hidden_layers: 1,
                num_attention_heads: 2,
                intermediate_size: 16,
                max_position_embeddings: 16,
                type_vocab_size: 1,
                ..BertConfig::default()
            },
        };
        let varmap = VarMap::new();
        let model = RobertaForMaskedLM::random(&config, &varmap, &Device::Cpu).unwrap();

        let input_ids = Tensor::new(&[[0u32, 5, 4, 2], [0, 4, 2, 1]], &Device::Cpu).unwrap();
        let output = model
            .forward(ForwardParams::new(Some(&input_ids), None, None, None))
            .unwrap();
        assert_eq!(output.get_logits().unwrap().dims(), &[2, 4, 12]);
    }
}
