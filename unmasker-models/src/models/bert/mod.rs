pub mod config;
pub mod modeling;

pub use config::BertConfig;
pub use modeling::{Bert, BertForMaskedLM, BERT_DTYPE};
