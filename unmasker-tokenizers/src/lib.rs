pub mod config;
pub mod encoding;
pub mod from_pretrained;
pub mod tokenizer;
pub mod tokenizers;

#[cfg(test)]
pub(crate) mod testing;

pub use encoding::BatchEncoding;
pub use tokenizer::{AutoTokenizer, Padding, PaddingOptions, PaddingSide, Tokenizer, TokenizerBuilder};
pub use crate::tokenizers::bert::BertTokenizer;
pub use crate::tokenizers::roberta::RobertaTokenizer;
