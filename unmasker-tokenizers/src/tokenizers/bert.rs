use tokenizers::models::bpe::Vocab;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::BertNormalizer;
use tokenizers::{
    decoders::wordpiece::WordPiece as WordPieceDecoder, pre_tokenizers::bert::BertPreTokenizer,
    processors::template::TemplateProcessing, Tokenizer as CoreTokenizer,
    TokenizerBuilder as CoreTokenizerBuilder, TokenizerImpl,
};
use unmasker::{Error, Result};

use crate::config::TokenizerConfig;
use crate::from_pretrained::{SpecialTokenName, TokenizerInfo};
use crate::impl_tokenizer;
use crate::tokenizer::{PaddingSide, TokenizerBuilder};

const BERT_MAX_LENGTH: usize = 512;
const BERT_CLS_TOKEN: &str = "[CLS]";
const BERT_MASK_TOKEN: &str = "[MASK]";
const BERT_PAD_TOKEN: &str = "[PAD]";
const BERT_SEP_TOKEN: &str = "[SEP]";
const BERT_UNK_TOKEN: &str = "[UNK]";

/// BertTokenizer
#[derive(Debug)]
pub struct BertTokenizer {
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

impl_tokenizer!(BertTokenizer);

/// `BertTokenizer` builder.
pub struct BertTokenizerBuilder {
    tokenizer_info: TokenizerInfo,
    padding_side: Option<PaddingSide>,
}

impl BertTokenizerBuilder {
    fn build_normalizer(&self, config: Option<&TokenizerConfig>) -> BertNormalizer {
        BertNormalizer::new(
            true,
            config.and_then(|c| c.tokenize_chinese_chars).unwrap_or(true),
            config.and_then(|c| c.strip_accents),
            config.and_then(|c| c.do_lower_case).unwrap_or(true),
        )
    }

    fn build_model(&self, vocab: Vocab, unk_token: String) -> Result<WordPiece> {
        WordPiece::builder()
            .vocab(vocab)
            .unk_token(unk_token)
            .continuing_subword_prefix("##".to_string())
            .max_input_chars_per_word(100)
            .build()
            .map_err(|e| Error::TokenizerBuildError(e.to_string()))
    }

    fn build_post_processor(
        &self,
        sep_token: (String, u32),
        cls_token: (String, u32),
    ) -> Result<TemplateProcessing> {
        TemplateProcessing::builder()
            .try_single(format!("{} $A {}", cls_token.0, sep_token.0))
            .map_err(Error::TokenizerBuildError)?
            .try_pair(format!(
                "{} $A:0 {} $B:1 {}:1",
                cls_token.0, sep_token.0, sep_token.0
            ))
            .map_err(Error::TokenizerBuildError)?
            .special_tokens(vec![cls_token, sep_token])
            .build()
            .map_err(|e| Error::TokenizerBuildError(e.to_string()))
    }

    fn get_token(&self, name: SpecialTokenName) -> String {
        self.get_special_token(name).unwrap_or_default()
    }
}

impl TokenizerBuilder<BertTokenizer> for BertTokenizerBuilder {
    fn new(tokenizer_info: TokenizerInfo, padding_side: Option<PaddingSide>) -> Self {
        BertTokenizerBuilder {
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
                SpecialTokenName::Cls => BERT_CLS_TOKEN,
                SpecialTokenName::Mask => BERT_MASK_TOKEN,
                SpecialTokenName::Pad => BERT_PAD_TOKEN,
                SpecialTokenName::Sep => BERT_SEP_TOKEN,
                SpecialTokenName::Unk => BERT_UNK_TOKEN,
                SpecialTokenName::Bos | SpecialTokenName::Eos => return None,
            };
            Some(default.to_string())
        })
    }

    fn build_tokenizer(&mut self) -> Result<CoreTokenizer> {
        let vocab = self.tokenizer_info.vocab.take().ok_or_else(|| {
            Error::TokenizerBuildError(
                "Cannot build BertTokenizer without 'vocab.txt'.".to_string(),
            )
        })?;
        let cls_token = self.get_token(SpecialTokenName::Cls);
        let sep_token = self.get_token(SpecialTokenName::Sep);
        let unk_token = self.get_token(SpecialTokenName::Unk);
        let cls_token_id = *vocab.get(&cls_token).unwrap_or(&101u32);
        let sep_token_id = *vocab.get(&sep_token).unwrap_or(&102u32);

        let tokenizer: TokenizerImpl<
            WordPiece,
            BertNormalizer,
            BertPreTokenizer,
            TemplateProcessing,
            WordPieceDecoder,
        > = CoreTokenizerBuilder::new()
            .with_model(self.build_model(vocab, unk_token)?)
            .with_normalizer(Some(
                self.build_normalizer(self.tokenizer_info.get_config()),
            ))
            .with_pre_tokenizer(Some(BertPreTokenizer))
            .with_post_processor(Some(
                self.build_post_processor((sep_token, sep_token_id), (cls_token, cls_token_id))?,
            ))
            .with_decoder(Some(WordPieceDecoder::new("##".to_string(), true)))
            .build()
            .map_err(|e| Error::TokenizerBuildError(e.to_string()))?;

        Ok(CoreTokenizer::from(tokenizer))
    }

    fn build_with_tokenizer(&self, tokenizer: CoreTokenizer) -> Result<BertTokenizer> {
        let config = self.tokenizer_info.get_config();
        let max_length = config
            .and_then(|config| config.get_model_max_length())
            .unwrap_or(BERT_MAX_LENGTH);
        let padding_side = self
            .padding_side
            .clone()
            .or_else(|| config.and_then(|config| config.get_padding_side()))
            .unwrap_or(PaddingSide::Right);

        Ok(BertTokenizer {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Tokenizer;
    use std::fs;

    #[test]
    fn test_build_from_vocab_txt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("vocab.txt"),
            "[PAD]\n[UNK]\n[CLS]\n[SEP]\n[MASK]\nthe\ncapital\n##s\nparis\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("tokenizer_config.json"),
            r#"{"tokenizer_class": "BertTokenizer", "do_lower_case": true}"#,
        )
        .unwrap();

        let tokenizer =
            BertTokenizer::from_pretrained(dir.path().to_str().unwrap(), None, None).unwrap();
        assert_eq!(tokenizer.get_mask_token_id(), Some(4));

        let encoding = tokenizer
            .encode(vec!["The CAPITALS [MASK]".to_string()], true, None)
            .unwrap();
        assert_eq!(
            encoding.get_encodings()[0].get_ids(),
            &[2, 5, 6, 7, 4, 3]
        );
        assert_eq!(tokenizer.decode(&[5, 6, 7], true).unwrap(), "the capitals");
    }

    #[test]
    fn test_missing_vocab() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("tokenizer_config.json"),
            r#"{"tokenizer_class": "BertTokenizer"}"#,
        )
        .unwrap();

        let result = BertTokenizer::from_pretrained(dir.path().to_str().unwrap(), None, None);
        assert!(matches!(result, Err(Error::TokenizerBuildError(_))));
    }
}
