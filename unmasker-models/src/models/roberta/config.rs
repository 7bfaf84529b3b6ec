use serde::{Deserialize, Serialize};

use crate::models::bert::BertConfig;

const ROBERTA_PAD_TOKEN_ID: u32 = 1;

/// The configuration of a RoBERTa model. The transformer is the same as BERT's, so the encoder
/// fields are shared with [`BertConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobertaConfig {
    #[serde(flatten)]
    pub encoder: BertConfig,
}

impl RobertaConfig {
    /// The id of the padding token. Position ids are counted from `padding_idx + 1`.
    pub fn padding_idx(&self) -> u32 {
        self.encoder
            .pretrained_config
            .get_pad_token_id()
            .unwrap_or(ROBERTA_PAD_TOKEN_ID)
    }
}
