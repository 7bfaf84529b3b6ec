use std::collections::HashMap;

use serde::Deserialize;
use tokenizers::AddedToken;
use unmasker::Result;

use crate::from_pretrained::SpecialTokenName;
use crate::tokenizer::PaddingSide;

/// Tokenizer configuration, as stored in `tokenizer_config.json`.
#[derive(Debug, Default, Deserialize)]
pub struct TokenizerConfig {
    pub add_prefix_space: Option<bool>,
    pub added_tokens_decoder: Option<HashMap<u32, AddedToken>>,
    pub bos_token: Option<String>,
    pub clean_up_tokenization_spaces: Option<bool>,
    pub cls_token: Option<String>,
    pub eos_token: Option<String>,
    pub do_lower_case: Option<bool>,
    pub mask_token: Option<String>,
    pub model_max_length: Option<f64>,
    pub pad_token: Option<String>,
    pub padding_side: Option<String>,
    pub sep_token: Option<String>,
    pub strip_accents: Option<bool>,
    pub tokenize_chinese_chars: Option<bool>,
    pub tokenizer_class: Option<String>,
    pub unk_token: Option<String>,
}

impl TokenizerConfig {
    /// Loads the tokenizer config from a `tokenizer_config.json` file.
    ///
    /// # Arguments
    ///
    /// * `file` - Path to the `tokenizer_config.json` file.
    ///
    /// # Returns
    ///
    /// The tokenizer configuration.
    pub fn from_file(file: std::path::PathBuf) -> Result<Self> {
        let config = std::fs::read_to_string(file)?;
        let tokenizer_config: TokenizerConfig = serde_json::from_str(&config)?;
        Ok(tokenizer_config)
    }

    pub fn get_special_token(&self, name: SpecialTokenName) -> Option<&str> {
        match name {
            SpecialTokenName::Cls => self.cls_token.as_deref(),
            SpecialTokenName::Mask => self.mask_token.as_deref(),
            SpecialTokenName::Pad => self.pad_token.as_deref(),
            SpecialTokenName::Sep => self.sep_token.as_deref(),
            SpecialTokenName::Bos => self.bos_token.as_deref(),
            SpecialTokenName::Eos => self.eos_token.as_deref(),
            SpecialTokenName::Unk => self.unk_token.as_deref(),
        }
    }

    pub fn get_padding_side(&self) -> Option<PaddingSide> {
        match self.padding_side.as_deref() {
            Some("left") => Some(PaddingSide::Left),
            Some("right") => Some(PaddingSide::Right),
            _ => None,
        }
    }

    /// Gets the maximum sequence length. Configs without a limit store a huge sentinel value
    /// instead, which is treated as missing.
    pub fn get_model_max_length(&self) -> Option<usize> {
        self.model_max_length
            .filter(|&length| length > 0.0 && length < 1e9)
            .map(|length| length as usize)
    }
}
