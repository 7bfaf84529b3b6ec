pub mod config;
pub mod modeling;

pub use config::RobertaConfig;
pub use modeling::{create_position_ids_from_input_ids, RobertaForMaskedLM, ROBERTA_DTYPE};
