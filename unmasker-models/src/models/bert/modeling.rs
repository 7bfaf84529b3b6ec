use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{embedding, layer_norm, linear, ops::softmax, Embedding, LayerNorm, Linear, VarBuilder};
use unmasker::Result;

use super::config::BertConfig;
use crate::{
    config::{HiddenAct, PretrainedConfig},
    model::{ForwardParams, ModelOutput, PreTrainedModel},
    utils::attn_mask::get_extended_attention_mask,
};

pub const BERT_DTYPE: DType = DType::F32;

pub struct BertEmbeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    layer_norm: LayerNorm,
}

impl BertEmbeddings {
    pub fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let word_embeddings = embedding(
            config.vocab_size,
            config.hidden_size,
            vb.pp("word_embeddings"),
        )?;
        let position_embeddings = embedding(
            config.max_position_embeddings,
            config.hidden_size,
            vb.pp("position_embeddings"),
        )?;
        let token_type_embeddings = embedding(
            config.type_vocab_size,
            config.hidden_size,
            vb.pp("token_type_embeddings"),
        )?;
        let layer_norm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb.pp("LayerNorm"),
        )?;
        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            layer_norm,
        })
    }

    pub fn get_word_embeddings(&self) -> &Embedding {
        &self.word_embeddings
    }

    /// Embeds the input ids. `position_ids` can be shaped `(seq_len)`, shared by the whole
    /// batch, or `(batch_size, seq_len)`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        position_ids: &Tensor,
    ) -> Result<Tensor> {
        let input_embeddings = self.word_embeddings.forward(input_ids)?;
        let token_type_embeddings = self.token_type_embeddings.forward(token_type_ids)?;
        let position_embeddings = self.position_embeddings.forward(position_ids)?;
        let embeddings = (&input_embeddings + token_type_embeddings)?
            .broadcast_add(&position_embeddings)?;
        Ok(self.layer_norm.forward(&embeddings)?)
    }
}

struct BertSelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    num_attention_heads: usize,
    attention_head_size: usize,
}

impl BertSelfAttention {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let attention_head_size = config.attention_head_size();
        let all_head_size = config.num_attention_heads * attention_head_size;
        let hidden_size = config.hidden_size;
        let query = linear(hidden_size, all_head_size, vb.pp("query"))?;
        let key = linear(hidden_size, all_head_size, vb.pp("key"))?;
        let value = linear(hidden_size, all_head_size, vb.pp("value"))?;
        Ok(Self {
            query,
            key,
            value,
            num_attention_heads: config.num_attention_heads,
            attention_head_size,
        })
    }

    /// `(batch_size, seq_len, all_head_size)` -> `(batch_size, num_heads, seq_len, head_size)`
    fn transpose_for_scores(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (b_sz, seq_len, _) = xs.dims3()?;
        xs.reshape((
            b_sz,
            seq_len,
            self.num_attention_heads,
            self.attention_head_size,
        ))?
        .transpose(1, 2)?
        .contiguous()
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let query_layer = self.transpose_for_scores(&self.query.forward(hidden_states)?)?;
        let key_layer = self.transpose_for_scores(&self.key.forward(hidden_states)?)?;
        let value_layer = self.transpose_for_scores(&self.value.forward(hidden_states)?)?;

        let attention_scores = query_layer.matmul(&key_layer.t()?)?;
        let attention_scores = (attention_scores / (self.attention_head_size as f64).sqrt())?;
        let attention_scores = attention_scores.broadcast_add(attention_mask)?;
        let attention_probs = softmax(&attention_scores, D::Minus1)?;

        let context_layer = attention_probs.matmul(&value_layer)?;
        let context_layer = context_layer.transpose(1, 2)?.contiguous()?;
        Ok(context_layer.flatten_from(D::Minus2)?)
    }
}

/// Dense projection followed by a residual connection and a LayerNorm. Used after both the
/// attention and the feed-forward blocks.
struct BertResidualOutput {
    dense: Linear,
    layer_norm: LayerNorm,
}

impl BertResidualOutput {
    fn load(vb: VarBuilder, config: &BertConfig, in_size: usize) -> Result<Self> {
        let dense = linear(in_size, config.hidden_size, vb.pp("dense"))?;
        let layer_norm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb.pp("LayerNorm"),
        )?;
        Ok(Self { dense, layer_norm })
    }

    fn forward(&self, hidden_states: &Tensor, input_tensor: &Tensor) -> Result<Tensor> {
        let hidden_states = self.dense.forward(hidden_states)?;
        Ok(self.layer_norm.forward(&(hidden_states + input_tensor)?)?)
    }
}

struct BertLayer {
    self_attention: BertSelfAttention,
    attention_output: BertResidualOutput,
    intermediate: Linear,
    intermediate_act: HiddenAct,
    output: BertResidualOutput,
}

impl BertLayer {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let self_attention = BertSelfAttention::load(vb.pp("attention.self"), config)?;
        let attention_output =
            BertResidualOutput::load(vb.pp("attention.output"), config, config.hidden_size)?;
        let intermediate = linear(
            config.hidden_size,
            config.intermediate_size,
            vb.pp("intermediate.dense"),
        )?;
        let output = BertResidualOutput::load(vb.pp("output"), config, config.intermediate_size)?;
        Ok(Self {
            self_attention,
            attention_output,
            intermediate,
            intermediate_act: config.hidden_act,
            output,
        })
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let self_outputs = self.self_attention.forward(hidden_states, attention_mask)?;
        let attention_output = self.attention_output.forward(&self_outputs, hidden_states)?;
        let intermediate_output = self
            .intermediate_act
            .forward(&self.intermediate.forward(&attention_output)?)?;
        self.output.forward(&intermediate_output, &attention_output)
    }
}

pub struct BertEncoder {
    layers: Vec<BertLayer>,
}

impl BertEncoder {
    pub fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let layers = (0..config.num_hidden_layers)
            .map(|index| BertLayer::load(vb.pp(format!("layer.{index}")), config))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    /// Runs the layers of the encoder. `attention_mask` must be the extended mask returned by
    /// [`get_extended_attention_mask`].
    pub fn forward(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let mut hidden_states = hidden_states.clone();
        for layer in self.layers.iter() {
            hidden_states = layer.forward(&hidden_states, attention_mask)?;
        }
        Ok(hidden_states)
    }
}

/// The BERT transformer without any head on top.
pub struct Bert {
    embeddings: BertEmbeddings,
    encoder: BertEncoder,
}

impl Bert {
    pub fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let embeddings = BertEmbeddings::load(vb.pp("embeddings"), config)?;
        let encoder = BertEncoder::load(vb.pp("encoder"), config)?;
        Ok(Self {
            embeddings,
            encoder,
        })
    }

    pub fn get_embeddings(&self) -> &BertEmbeddings {
        &self.embeddings
    }

    /// Computes the last hidden state with shape `(batch_size, seq_len, hidden_size)`. Missing
    /// token type ids default to zeros, missing attention mask attends to every token and missing
    /// position ids are `0..seq_len`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        token_type_ids: Option<&Tensor>,
        position_ids: Option<&Tensor>,
    ) -> Result<Tensor> {
        let device = input_ids.device();
        let (b_sz, seq_len) = input_ids.dims2()?;

        let token_type_ids = match token_type_ids {
            Some(token_type_ids) => token_type_ids.clone(),
            None => input_ids.zeros_like()?,
        };
        let position_ids = match position_ids {
            Some(position_ids) => position_ids.clone(),
            None => Tensor::arange(0u32, seq_len as u32, device)?,
        };
        let attention_mask = match attention_mask {
            Some(attention_mask) => attention_mask.clone(),
            None => Tensor::ones((b_sz, seq_len), DType::U8, device)?,
        };

        let embedding_output =
            self.embeddings
                .forward(input_ids, &token_type_ids, &position_ids)?;
        let attention_mask =
            get_extended_attention_mask(&attention_mask, embedding_output.dtype())?;
        self.encoder.forward(&embedding_output, &attention_mask)
    }
}

/// The masked language modeling head: a dense layer with activation and LayerNorm followed by a
/// projection to the vocabulary.
pub struct MaskedLMHead {
    dense: Linear,
    act: HiddenAct,
    layer_norm: LayerNorm,
    decoder: Linear,
}

impl MaskedLMHead {
    /// Loads the head. The decoder weight is tied to the word embeddings when the checkpoint
    /// doesn't store it.
    ///
    /// # Arguments
    ///
    /// * `vb_transform` - The `VarBuilder` of the dense and LayerNorm layers.
    /// * `vb_decoder` - The `VarBuilder` of the decoder weight.
    /// * `vb_bias` - The `VarBuilder` containing the vocabulary `bias`.
    /// * `layer_norm_name` - The name of the LayerNorm inside `vb_transform`.
    /// * `act` - The activation applied after the dense layer.
    /// * `word_embeddings` - The input word embeddings of the model.
    pub fn load(
        vb_transform: VarBuilder,
        vb_decoder: VarBuilder,
        vb_bias: VarBuilder,
        layer_norm_name: &str,
        act: HiddenAct,
        config: &BertConfig,
        word_embeddings: &Embedding,
    ) -> Result<Self> {
        let dense = linear(config.hidden_size, config.hidden_size, vb_transform.pp("dense"))?;
        let layer_norm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb_transform.pp(layer_norm_name),
        )?;

        let decoder_weight = if vb_decoder.contains_tensor("weight") {
            vb_decoder.get((config.vocab_size, config.hidden_size), "weight")?
        } else {
            tracing::debug!("Decoder weight not found, tying it to the word embeddings");
            word_embeddings.embeddings().clone()
        };
        let bias = vb_bias.get(config.vocab_size, "bias")?;
        let decoder = Linear::new(decoder_weight, Some(bias));

        Ok(Self {
            dense,
            act,
            layer_norm,
            decoder,
        })
    }

    /// Projects the hidden states to `(batch_size, seq_len, vocab_size)` logits.
    pub fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let hidden_states = self.act.forward(&self.dense.forward(hidden_states)?)?;
        let hidden_states = self.layer_norm.forward(&hidden_states)?;
        Ok(self.decoder.forward(&hidden_states)?)
    }
}

/// BERT with a masked language modeling head on top.
pub struct BertForMaskedLM {
    model: Bert,
    head: MaskedLMHead,
    config: BertConfig,
}

impl PreTrainedModel for BertForMaskedLM {
    fn load(vb: VarBuilder, config: serde_json::Value) -> Result<Self> {
        let config: BertConfig = serde_json::from_value(config)?;
        let model = Bert::load(vb.pp("bert"), &config)?;
        let vb_predictions = vb.pp("cls").pp("predictions");
        let head = MaskedLMHead::load(
            vb_predictions.pp("transform"),
            vb_predictions.pp("decoder"),
            vb_predictions.clone(),
            "LayerNorm",
            config.hidden_act,
            &config,
            model.get_embeddings().get_word_embeddings(),
        )?;
        Ok(Self {
            model,
            head,
            config,
        })
    }

    fn get_config(&self) -> &PretrainedConfig {
        &self.config.pretrained_config
    }

    fn forward(&self, params: ForwardParams) -> Result<ModelOutput> {
        let sequence_output = self.model.forward(
            params.require_input_ids()?,
            params.get_attention_mask(),
            params.get_token_type_ids(),
            params.get_position_ids(),
        )?;
        let logits = self.head.forward(&sequence_output)?;
        Ok(ModelOutput::new(Some(logits), Some(sequence_output)))
    }
}

impl BertForMaskedLM {
    pub fn get_bert_config(&self) -> &BertConfig {
        &self.config
    }

    /// Builds a model with randomly initialised weights stored in `varmap`.
    pub fn random(config: &BertConfig, varmap: &candle_nn::VarMap, device: &Device) -> Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, BERT_DTYPE, device);
        Self::load(vb, serde_json::to_value(config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn tiny_config() -> BertConfig {
        BertConfig {
            vocab_size: 10,
            hidden_size: 8,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            intermediate_size: 16,
            max_position_embeddings: 16,
            ..BertConfig::default()
        }
    }

    #[test]
    fn test_masked_lm_logits_shape() {
        let varmap = VarMap::new();
        let model = BertForMaskedLM::random(&tiny_config(), &varmap, &Device::Cpu).unwrap();

        let input_ids = Tensor::new(&[[2u32, 7, 4, 3], [2, 4, 3, 0]], &Device::Cpu).unwrap();
        let attention_mask = Tensor::new(&[[1u8, 1, 1, 1], [1, 1, 1, 0]], &Device::Cpu).unwrap();
        let output = model
            .forward(ForwardParams::new(
                Some(&input_ids),
                Some(&attention_mask),
                None,
                None,
            ))
            .unwrap();

        assert_eq!(output.get_logits().unwrap().dims(), &[2, 4, 10]);
        assert_eq!(output.get_last_hidden_state().unwrap().dims(), &[2, 4, 8]);
    }

    #[test]
    fn test_padding_does_not_change_logits() {
        let varmap = VarMap::new();
        let model = BertForMaskedLM::random(&tiny_config(), &varmap, &Device::Cpu).unwrap();

        let unpadded = Tensor::new(&[[2u32, 4, 3]], &Device::Cpu).unwrap();
        let padded = Tensor::new(&[[2u32, 4, 3, 0, 0]], &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1u8, 1, 1, 0, 0]], &Device::Cpu).unwrap();

        let a = model
            .forward(ForwardParams::new(Some(&unpadded), None, None, None))
            .unwrap();
        let b = model
            .forward(ForwardParams::new(Some(&padded), Some(&mask), None, None))
            .unwrap();

        let a = a.get_logits().unwrap().to_vec3::<f32>().unwrap();
        let b = b.get_logits().unwrap().to_vec3::<f32>().unwrap();
        for (x, y) in a[0][1].iter().zip(b[0][1].iter()) {
            assert!((x - y).abs() < 1e-4);
        }
    }

    #[test]
    fn test_missing_input_ids() {
        let varmap = VarMap::new();
        let model = BertForMaskedLM::random(&tiny_config(), &varmap, &Device::Cpu).unwrap();
        let result = model.forward(ForwardParams::default());
        assert!(matches!(
            result,
            Err(unmasker::Error::MissingForwardParam(_))
        ));
    }
}
