pub mod config;
pub mod from_pretrained;
pub mod model;
pub mod models;
pub mod utils;

pub use config::{HiddenAct, PretrainedConfig};
pub use model::{AutoModelForMaskedLM, ForwardParams, ModelOutput, PreTrainedModel};

// BERT
pub use models::bert::{Bert, BertConfig, BertForMaskedLM};

// RoBERTa
pub use models::roberta::{RobertaConfig, RobertaForMaskedLM};
