pub mod from_pretrained;
pub mod serde;

pub use from_pretrained::{
    get_repo, load_model_config, FromPretrainedParameters, Repository, MODEL_CONFIG_FILE,
};
