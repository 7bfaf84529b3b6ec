use serde::{Deserialize, Serialize};

/// The configuration fields shared by every pretrained model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PretrainedConfig {
    /// The type of the model, e.g. `bert` or `roberta`.
    model_type: Option<String>,
    /// The ID of the PAD token.
    pad_token_id: Option<u32>,
    /// The ID of the BOS token.
    bos_token_id: Option<u32>,
    /// The ID of the EOS token.
    eos_token_id: Option<u32>,
}

impl PretrainedConfig {
    pub fn get_model_type(&self) -> Option<&str> {
        self.model_type.as_deref()
    }

    pub fn get_pad_token_id(&self) -> Option<u32> {
        self.pad_token_id
    }

    pub fn get_bos_token_id(&self) -> Option<u32> {
        self.bos_token_id
    }

    pub fn get_eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }
}

/// The activation function used in the feed-forward layers of the transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HiddenAct {
    Gelu,
    #[serde(alias = "gelu_new", alias = "gelu_pytorch_tanh")]
    GeluApproximate,
    Relu,
}

impl HiddenAct {
    pub fn forward(&self, xs: &candle_core::Tensor) -> candle_core::Result<candle_core::Tensor> {
        match self {
            HiddenAct::Gelu => xs.gelu_erf(),
            HiddenAct::GeluApproximate => xs.gelu(),
            HiddenAct::Relu => xs.relu(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pretrained_config_from_model_config() {
        let config: PretrainedConfig = serde_json::from_str(
            r#"{"model_type": "roberta", "pad_token_id": 1, "hidden_size": 768}"#,
        )
        .unwrap();
        assert_eq!(config.get_model_type(), Some("roberta"));
        assert_eq!(config.get_pad_token_id(), Some(1));
        assert_eq!(config.get_bos_token_id(), None);
    }

    #[test]
    fn test_hidden_act_aliases() {
        let act: HiddenAct = serde_json::from_str(r#""gelu_new""#).unwrap();
        assert_eq!(act, HiddenAct::GeluApproximate);
        let act: HiddenAct = serde_json::from_str(r#""gelu""#).unwrap();
        assert_eq!(act, HiddenAct::Gelu);
    }
}
