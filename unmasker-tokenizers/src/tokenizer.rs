use std::collections::HashMap;

use crate::tokenizers::bert::{BertTokenizer, BertTokenizerBuilder};
use crate::tokenizers::roberta::{RobertaTokenizer, RobertaTokenizerBuilder};
use crate::{
    encoding::BatchEncoding,
    from_pretrained::{from_pretrained, SpecialTokenName, TokenizerInfo},
};
use candle_core::{Device, Tensor};
use tokenizers::{
    pad_encodings, AddedToken, Encoding, PaddingDirection, PaddingParams, PaddingStrategy,
    Tokenizer as CoreTokenizer,
};
use unmasker::{Error, FromPretrainedParameters, Result};

/// An enum containing the available padding configurations for the tokenizer.
#[derive(Debug, Clone)]
pub enum Padding {
    /// Pad to the longest sequence in the batch.
    Longest,
    /// Pad to the maximum length of the model.
    MaxLength,
    /// Pad to a specific length.
    Fixed(usize),
}

/// The side on which the padding tokens are added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaddingSide {
    Left,
    Right,
}

impl From<&PaddingSide> for PaddingDirection {
    fn from(side: &PaddingSide) -> Self {
        match side {
            PaddingSide::Left => PaddingDirection::Left,
            PaddingSide::Right => PaddingDirection::Right,
        }
    }
}

/// The padding strategy and, optionally, the side to pad on. If no side is given, the default
/// padding side of the tokenizer is used.
#[derive(Debug, Clone)]
pub struct PaddingOptions {
    padding: Padding,
    side: Option<PaddingSide>,
}

impl PaddingOptions {
    pub fn new(padding: Padding, side: Option<PaddingSide>) -> Self {
        Self { padding, side }
    }
}

/// A thin wrapper around `tokenizers::Tokenizer` that provides additional functionality
/// for encoding and decoding sequences and to automatically load the tokenizer from a Hugging Face
/// Hub repository.
pub trait Tokenizer: std::fmt::Debug + Send + Sync {
    fn get_tokenizer(&self) -> &CoreTokenizer;
    fn get_padding_side(&self) -> &PaddingSide;
    fn get_max_length(&self) -> usize;
    fn get_bos_token(&self) -> Option<&str>;
    fn get_cls_token(&self) -> Option<&str>;
    fn get_eos_token(&self) -> Option<&str>;
    fn get_mask_token(&self) -> Option<&str>;
    fn get_pad_token(&self) -> Option<&str>;
    fn get_sep_token(&self) -> Option<&str>;
    fn get_unk_token(&self) -> Option<&str>;

    /// Gets the vocabulary of the tokenizer, including the added tokens.
    fn get_vocab(&self) -> HashMap<String, u32> {
        self.get_tokenizer().get_vocab(true)
    }

    /// Get the token ID of a given token.
    ///
    /// # Arguments
    ///
    /// * `token` - A string slice representing the token.
    ///
    /// # Returns
    ///
    /// The token ID if the token exists in the tokenizer, `None` otherwise.
    fn get_token_id(&self, token: &str) -> Option<u32> {
        self.get_tokenizer().token_to_id(token)
    }

    /// Get the token ID of the BOS token.
    fn get_bos_token_id(&self) -> Option<u32> {
        self.get_token_id(self.get_bos_token()?)
    }

    /// Get the token ID of the CLS token.
    fn get_cls_token_id(&self) -> Option<u32> {
        self.get_token_id(self.get_cls_token()?)
    }

    /// Get the token ID of the EOS token.
    fn get_eos_token_id(&self) -> Option<u32> {
        self.get_token_id(self.get_eos_token()?)
    }

    /// Get the token ID of the MASK token.
    fn get_mask_token_id(&self) -> Option<u32> {
        self.get_token_id(self.get_mask_token()?)
    }

    /// Get the token ID of the PAD token.
    fn get_pad_token_id(&self) -> Option<u32> {
        self.get_token_id(self.get_pad_token()?)
    }

    /// Get the token ID of the SEP token.
    fn get_sep_token_id(&self) -> Option<u32> {
        self.get_token_id(self.get_sep_token()?)
    }

    /// Get the token ID of the UNK token.
    fn get_unk_token_id(&self) -> Option<u32> {
        self.get_token_id(self.get_unk_token()?)
    }

    /// Builds the `tokenizers` padding parameters for the given padding options.
    fn get_padding_params(&self, options: &PaddingOptions) -> Result<PaddingParams> {
        let pad_token = self
            .get_pad_token()
            .ok_or_else(|| Error::MissingSpecialToken("pad_token".to_string()))?
            .to_string();

        let pad_id = self
            .get_pad_token_id()
            .ok_or_else(|| Error::MissingSpecialTokenId("pad_token".to_string()))?;

        let direction = options
            .side
            .as_ref()
            .unwrap_or_else(|| self.get_padding_side())
            .into();

        let strategy = match options.padding {
            Padding::Longest => PaddingStrategy::BatchLongest,
            Padding::MaxLength => PaddingStrategy::Fixed(self.get_max_length()),
            Padding::Fixed(length) => PaddingStrategy::Fixed(length),
        };

        Ok(PaddingParams {
            strategy,
            direction,
            pad_to_multiple_of: None,
            pad_id,
            pad_type_id: 0,
            pad_token,
        })
    }

    /// Encodes a list of sequences.
    ///
    /// # Arguments
    ///
    /// * `inputs` - A list of sequences to encode.
    /// * `add_special_tokens` - A flag indicating if special tokens should be added.
    /// * `padding` - An optional padding configuration.
    ///
    /// # Returns
    ///
    /// A `BatchEncoding` containing the encoded sequences.
    fn encode(
        &self,
        inputs: Vec<String>,
        add_special_tokens: bool,
        padding: Option<PaddingOptions>,
    ) -> Result<BatchEncoding> {
        let mut encodings = self
            .get_tokenizer()
            .encode_batch(inputs, add_special_tokens)
            .map_err(|e| Error::TokenizerEncodingError(e.to_string()))?;

        if let Some(padding) = padding {
            let params = self.get_padding_params(&padding)?;
            pad_encodings(&mut encodings, &params)
                .map_err(|e| Error::TokenizerEncodingError(e.to_string()))?;
        }

        encodings_to_batch_encoding(encodings)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        let tokenizer = self.get_tokenizer();
        tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| Error::TokenizerEncodingError(e.to_string()))
    }
}

/// Stacks the ids, type ids and attention masks of a list of encodings into tensors. All the
/// encodings must have the same length, so they have to be padded beforehand.
fn encodings_to_batch_encoding(encodings: Vec<Encoding>) -> Result<BatchEncoding> {
    let batch_size = encodings.len();
    let seq_len = encodings.first().map(|e| e.len()).unwrap_or(0);

    if encodings.iter().any(|e| e.len() != seq_len) {
        return Err(Error::TokenizerEncodingError(
            "sequences of different lengths cannot be batched without padding".to_string(),
        ));
    }

    let mut input_ids: Vec<u32> = Vec::with_capacity(batch_size * seq_len);
    let mut token_type_ids: Vec<u32> = Vec::with_capacity(batch_size * seq_len);
    let mut attention_mask: Vec<u8> = Vec::with_capacity(batch_size * seq_len);

    for encoding in &encodings {
        input_ids.extend_from_slice(encoding.get_ids());
        token_type_ids.extend_from_slice(encoding.get_type_ids());
        attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as u8));
    }

    let shape = (batch_size, seq_len);
    let input_ids = Tensor::from_vec(input_ids, shape, &Device::Cpu)?;
    let token_type_ids = Tensor::from_vec(token_type_ids, shape, &Device::Cpu)?;
    let attention_mask = Tensor::from_vec(attention_mask, shape, &Device::Cpu)?;

    Ok(BatchEncoding::new(
        input_ids,
        token_type_ids,
        attention_mask,
        encodings,
    ))
}

/// A macro that implements the `Tokenizer` trait for a given tokenizer type.
#[macro_export]
macro_rules! impl_tokenizer {
    ($tokenizer_type:ty) => {
        impl $crate::tokenizer::Tokenizer for $tokenizer_type {
            fn get_tokenizer(&self) -> &::tokenizers::Tokenizer {
                &self.tokenizer
            }

            fn get_padding_side(&self) -> &$crate::tokenizer::PaddingSide {
                &self.padding_side
            }

            fn get_max_length(&self) -> usize {
                self.max_length
            }

            fn get_bos_token(&self) -> Option<&str> {
                self.bos_token.as_deref()
            }

            fn get_cls_token(&self) -> Option<&str> {
                self.cls_token.as_deref()
            }

            fn get_eos_token(&self) -> Option<&str> {
                self.eos_token.as_deref()
            }

            fn get_mask_token(&self) -> Option<&str> {
                self.mask_token.as_deref()
            }

            fn get_pad_token(&self) -> Option<&str> {
                self.pad_token.as_deref()
            }

            fn get_sep_token(&self) -> Option<&str> {
                self.sep_token.as_deref()
            }

            fn get_unk_token(&self) -> Option<&str> {
                self.unk_token.as_deref()
            }
        }
    };
}

/// A trait that defines the methods required to build a `Tokenizer`.
pub trait TokenizerBuilder<T: Tokenizer> {
    fn new(tokenizer_info: TokenizerInfo, padding_side: Option<PaddingSide>) -> Self;
    fn get_tokenizer_info(&self) -> &TokenizerInfo;

    /// Gets a special token of the tokenizer, falling back to the default of the tokenizer type
    /// when the repository doesn't declare it.
    fn get_special_token(&self, name: SpecialTokenName) -> Option<String>;

    fn get_special_tokens(&self) -> Vec<String> {
        SpecialTokenName::ALL
            .iter()
            .filter_map(|&name| self.get_special_token(name))
            .collect()
    }

    /// Builds the core tokenizer from the vocabulary files when the repository has no
    /// `tokenizer.json`.
    fn build_tokenizer(&mut self) -> Result<CoreTokenizer>;

    /// Wraps the core tokenizer, resolving the special tokens of the tokenizer.
    fn build_with_tokenizer(&self, tokenizer: CoreTokenizer) -> Result<T>;

    fn build(&mut self) -> Result<T> {
        // Try to build from `tokenizer.json`. Otherwise, build from `vocab.txt`, `vocab.json` and `merges.txt`
        let tokenizer_file_path = self.get_tokenizer_info().tokenizer_file_path.clone();
        let mut tokenizer = match tokenizer_file_path {
            Some(tokenizer_file_path) => CoreTokenizer::from_file(tokenizer_file_path)
                .map_err(|e| Error::TokenizerBuildError(e.to_string()))?,
            None => self.build_tokenizer()?,
        };

        let tokenizer_info = self.get_tokenizer_info();

        // Special tokens are only registered if they're part of the vocabulary, so no new ids
        // unknown to the model are created
        let special_tokens: Vec<AddedToken> = self
            .get_special_tokens()
            .into_iter()
            .filter(|token| tokenizer.token_to_id(token).is_some())
            .map(|token| AddedToken::from(token, true))
            .collect();

        let mut added_tokens: Vec<AddedToken> = Vec::new();
        if let Some(config) = &tokenizer_info.config {
            if let Some(added_tokens_decoder) = &config.added_tokens_decoder {
                for added_token in added_tokens_decoder.values() {
                    added_tokens.push(added_token.clone());
                }
            }
        }

        tokenizer.add_special_tokens(&special_tokens);
        tokenizer.add_tokens(&added_tokens);

        self.build_with_tokenizer(tokenizer)
    }
}

/// Allows to automatically load a tokenizer from a Hugging Face Hub repository or a local
/// directory.
#[derive(Debug)]
pub struct AutoTokenizer {}

/// Implement the `from_pretrained` method for the `AutoTokenizer` struct.
#[macro_export]
macro_rules! impl_auto_tokenizer_from_pretrained_method {
    ($auto_tokenizer_struct:ident, $(($tokenizer_class:pat, $tokenizer_struct:ident, $tokenizer_builder_struct:ident)), *) => {
        impl $auto_tokenizer_struct {
            /// Loads a tokenizer from a Hugging Face Hub repository or a local directory,
            /// selecting the implementation from the tokenizer class declared in the repository.
            ///
            /// # Arguments
            ///
            /// * `repo_id` - The repository id or the path of a local directory.
            /// * `padding_side` - Optional side to pad on. Defaults to the tokenizer's side.
            /// * `params` - Optional parameters to specify the revision, user agent, and auth token.
            ///
            /// # Returns
            ///
            /// The loaded tokenizer.
            pub fn from_pretrained<S: AsRef<str>>(
                repo_id: S,
                padding_side: Option<PaddingSide>,
                params: Option<FromPretrainedParameters>
            ) -> Result<Box<dyn Tokenizer>> {
                let tokenizer_info = from_pretrained(repo_id, params)?;
                let tokenizer_class = tokenizer_info.get_tokenizer_class().to_string();

                match tokenizer_class.as_str() {
                    $(
                        $tokenizer_class => {
                            $tokenizer_builder_struct::new(tokenizer_info, padding_side)
                                .build()
                                .map(|tokenizer: $tokenizer_struct| Box::new(tokenizer) as Box<dyn Tokenizer>)
                        }
                    )*
                    _ => Err(Error::TokenizerNotImplemented(tokenizer_class)),
                }
            }
        }
    };
}

impl_auto_tokenizer_from_pretrained_method!(
    AutoTokenizer,
    (
        "BertTokenizer" | "BertTokenizerFast",
        BertTokenizer,
        BertTokenizerBuilder
    ),
    (
        "RobertaTokenizer" | "RobertaTokenizerFast",
        RobertaTokenizer,
        RobertaTokenizerBuilder
    )
);

// Implement `from_pretrained` method for each tokenizer
#[macro_export]
macro_rules! impl_tokenizer_from_pretrained_method {
    ($tokenizer_struct:ident, $tokenizer_builder_struct:ident) => {
        impl $tokenizer_struct {
            pub fn from_pretrained<S: AsRef<str>>(
                repo_id: S,
                padding_side: Option<PaddingSide>,
                params: Option<FromPretrainedParameters>,
            ) -> Result<Box<dyn Tokenizer>> {
                let tokenizer_info = from_pretrained(repo_id, params)?;
                let tokenizer = $tokenizer_builder_struct::new(tokenizer_info, padding_side).build()?;
                Ok(Box::new(tokenizer))
            }
        }
    };
}

impl_tokenizer_from_pretrained_method!(BertTokenizer, BertTokenizerBuilder);
impl_tokenizer_from_pretrained_method!(RobertaTokenizer, RobertaTokenizerBuilder);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_word_level_repo;

    #[test]
    fn test_auto_tokenizer_special_tokens() {
        let dir = tempfile::tempdir().unwrap();
        write_word_level_repo(dir.path());

        let tokenizer =
            AutoTokenizer::from_pretrained(dir.path().to_str().unwrap(), None, None).unwrap();

        assert_eq!(tokenizer.get_mask_token(), Some("[MASK]"));
        assert_eq!(tokenizer.get_mask_token_id(), Some(4));
        assert_eq!(tokenizer.get_pad_token_id(), Some(0));
        assert_eq!(tokenizer.get_cls_token_id(), Some(2));
        assert_eq!(tokenizer.get_padding_side(), &PaddingSide::Right);
        assert_eq!(tokenizer.get_vocab().get("paris"), Some(&7));
    }

    #[test]
    fn test_encode_with_padding() {
        let dir = tempfile::tempdir().unwrap();
        write_word_level_repo(dir.path());
        let tokenizer =
            AutoTokenizer::from_pretrained(dir.path().to_str().unwrap(), None, None).unwrap();

        let encodings = tokenizer
            .encode(
                vec!["paris is [MASK]".to_string(), "[MASK]".to_string()],
                true,
                Some(PaddingOptions::new(Padding::Longest, None)),
            )
            .unwrap();

        let input_ids = encodings.get_input_ids().to_vec2::<u32>().unwrap();
        assert_eq!(input_ids, vec![vec![2, 7, 8, 4, 3], vec![2, 4, 3, 0, 0]]);

        let attention_mask = encodings.get_attention_mask().to_vec2::<u8>().unwrap();
        assert_eq!(attention_mask[1], vec![1, 1, 1, 0, 0]);

        let left = tokenizer
            .encode(
                vec!["paris is [MASK]".to_string(), "[MASK]".to_string()],
                true,
                Some(PaddingOptions::new(Padding::Longest, Some(PaddingSide::Left))),
            )
            .unwrap();
        let input_ids = left.get_input_ids().to_vec2::<u32>().unwrap();
        assert_eq!(input_ids[1], vec![0, 0, 2, 4, 3]);
    }

    #[test]
    fn test_encode_without_padding_requires_same_length() {
        let dir = tempfile::tempdir().unwrap();
        write_word_level_repo(dir.path());
        let tokenizer =
            AutoTokenizer::from_pretrained(dir.path().to_str().unwrap(), None, None).unwrap();

        let result = tokenizer.encode(
            vec!["paris is [MASK]".to_string(), "[MASK]".to_string()],
            true,
            None,
        );
        assert!(matches!(result, Err(Error::TokenizerEncodingError(_))));
    }

    #[test]
    fn test_decode() {
        let dir = tempfile::tempdir().unwrap();
        write_word_level_repo(dir.path());
        let tokenizer =
            AutoTokenizer::from_pretrained(dir.path().to_str().unwrap(), None, None).unwrap();

        assert_eq!(tokenizer.decode(&[2, 7, 8, 9, 3], true).unwrap(), "paris is big");
        assert_eq!(
            tokenizer.decode(&[2, 7, 8, 4, 3], false).unwrap(),
            "[CLS] paris is [MASK] [SEP]"
        );
    }

    #[test]
    fn test_unknown_tokenizer_class() {
        let dir = tempfile::tempdir().unwrap();
        write_word_level_repo(dir.path());
        std::fs::write(
            dir.path().join("tokenizer_config.json"),
            r#"{"tokenizer_class": "T5Tokenizer"}"#,
        )
        .unwrap();

        let result = AutoTokenizer::from_pretrained(dir.path().to_str().unwrap(), None, None);
        assert!(matches!(result, Err(Error::TokenizerNotImplemented(class)) if class == "T5Tokenizer"));
    }
}
