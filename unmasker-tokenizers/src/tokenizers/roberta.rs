use tokenizers::{
    models::bpe::{Merges, Vocab, BPE},
    processors::{byte_level::ByteLevel, roberta::RobertaProcessing},
    NormalizerWrapper, Tokenizer as CoreTokenizer, TokenizerBuilder as CoreTokenizerBuilder,
    TokenizerImpl,
};
use unmasker::{Error, Result};

use crate::{
    from_pretrained::{SpecialTokenName, TokenizerInfo},
    impl_tokenizer,
    tokenizer::{PaddingSide, TokenizerBuilder},
};

const ROBERTA_MAX_LENGTH: usize = 512;
const ROBERTA_BOS_TOKEN: &str = "<s>";
const ROBERTA_CLS_TOKEN: &str = "<s>";
const ROBERTA_EOS_TOKEN: &str = "</s>";
const ROBERTA_MASK_TOKEN: &str = "<mask>";
const ROBERTA_PAD_TOKEN: &str = "<pad>";
const ROBERTA_SEP_TOKEN: &str = "</s>";
const ROBERTA_UNK_TOKEN: &str = "<unk>";

/// Roberta Tokenizer
#[derive(Debug)]
pub struct RobertaTokenizer {
    tokenizer: CoreTokenizer,
    padding_side: PaddingSide,
    max_length: usize,
    bos_token: Option<String>,
    cls_token: Option<String>,
    eos_token: Option<String>,
    mask_token: Option<String>,
    pad_token: Option<String>,
    sep_token: Option<String>,
    unk_token: Option<String>,
}

impl_tokenizer!(RobertaTokenizer);

/// `RobertaTokenizer` builder
pub struct RobertaTokenizerBuilder {
    tokenizer_info: TokenizerInfo,
    padding_side: Option<PaddingSide>,
}

impl RobertaTokenizerBuilder {
    fn build_model(&self, vocab: Vocab, merges: Merges) -> Result<BPE> {
        BPE::builder()
            .vocab_and_merges(vocab, merges)
            .build()
            .map_err(|e| Error::TokenizerBuildError(e.to_string()))
    }

    fn add_prefix_space(&self) -> bool {
        self.tokenizer_info
            .get_config()
            .and_then(|config| config.add_prefix_space)
            .unwrap_or(false)
    }

    fn get_token(&self, name: SpecialTokenName) -> String {
        self.get_special_token(name).unwrap_or_default()
    }
}

impl TokenizerBuilder<RobertaTokenizer> for RobertaTokenizerBuilder {
    fn new(tokenizer_info: TokenizerInfo, padding_side: Option<PaddingSide>) -> Self {
        RobertaTokenizerBuilder {
            tokenizer_info,
            padding_side,
        }
    }

    fn get_tokenizer_info(&self) -> &TokenizerInfo {
        &self.tokenizer_info
    }

    fn get_special_token(&self, name: SpecialTokenName) -> Option<String> {
        self.tokenizer_info.get_special_token(name).or_else(|| {
            let default = match name {
                SpecialTokenName::Bos => ROBERTA_BOS_TOKEN,
                SpecialTokenName::Cls => ROBERTA_CLS_TOKEN,
                SpecialTokenName::Eos => ROBERTA_EOS_TOKEN,
                SpecialTokenName::Mask => ROBERTA_MASK_TOKEN,
                SpecialTokenName::Pad => ROBERTA_PAD_TOKEN,
                SpecialTokenName::Sep => ROBERTA_SEP_TOKEN,
                SpecialTokenName::Unk => ROBERTA_UNK_TOKEN,
            };
            Some(default.to_string())
        })
    }

    fn build_tokenizer(&mut self) -> Result<CoreTokenizer> {
        let vocab = self.tokenizer_info.vocab.take().ok_or_else(|| {
            Error::TokenizerBuildError(
                "Cannot build RobertaTokenizer without 'vocab.json'.".to_string(),
            )
        })?;
        let merges = self.tokenizer_info.merges.take().ok_or_else(|| {
            Error::TokenizerBuildError(
                "Cannot build RobertaTokenizer without 'merges.txt'.".to_string(),
            )
        })?;
        let cls_token = self.get_token(SpecialTokenName::Cls);
        let sep_token = self.get_token(SpecialTokenName::Sep);
        let cls_token_id = *vocab.get(&cls_token).unwrap_or(&0);
        let sep_token_id = *vocab.get(&sep_token).unwrap_or(&2);
        let add_prefix_space = self.add_prefix_space();

        let tokenizer: TokenizerImpl<
            BPE,
            NormalizerWrapper,
            ByteLevel,
            RobertaProcessing,
            ByteLevel,
        > = CoreTokenizerBuilder::new()
            .with_model(self.build_model(vocab, merges)?)
            .with_normalizer(None)
            .with_pre_tokenizer(Some(ByteLevel::new(add_prefix_space, true, true)))
            .with_post_processor(Some(
                RobertaProcessing::new((sep_token, sep_token_id), (cls_token, cls_token_id))
                    .trim_offsets(true)
                    .add_prefix_space(add_prefix_space),
            ))
            .with_decoder(Some(ByteLevel::new(true, true, true)))
            .build()
            .map_err(|e| Error::TokenizerBuildError(e.to_string()))?;

        Ok(CoreTokenizer::from(tokenizer))
    }

    fn build_with_tokenizer(&self, tokenizer: CoreTokenizer) -> Result<RobertaTokenizer> {
        let config = self.tokenizer_info.get_config();
        let max_length = config
            .and_then(|config| config.get_model_max_length())
            .unwrap_or(ROBERTA_MAX_LENGTH);
        let padding_side = self
            .padding_side
            .clone()
            .or_else(|| config.and_then(|config| config.get_padding_side()))
            .unwrap_or(PaddingSide::Right);

        Ok(RobertaTokenizer {
            tokenizer,
            padding_side,
            max_length,
            bos_token: self.get_special_token(SpecialTokenName::Bos),
            cls_token: self.get_special_token(SpecialTokenName::Cls),
            eos_token: self.get_special_token(SpecialTokenName::Eos),
            mask_token: self.get_special_token(SpecialTokenName::Mask),
            pad_token: self.get_special_token(SpecialTokenName::Pad),
            sep_token: self.get_special_token(SpecialTokenName::Sep),
            unk_token: self.get_special_token(SpecialTokenName::Unk),
        })
    }
}
