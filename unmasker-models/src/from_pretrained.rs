use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::PathBuf,
};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use serde::Deserialize;
use unmasker::{
    get_repo,
    utils::{load_model_config, FromPretrainedParameters, MODEL_CONFIG_FILE},
    Error, Repository, Result,
};

use crate::utils::var_builder::CompatibilityTensorRetrievalBackend;

const MODEL_SAFETENSORS_INDEX_FILE: &str = "model.safetensors.index.json";
const MODEL_SAFETENSORS_FILE: &str = "model.safetensors";
const MODEL_PYTORCH_FILE: &str = "pytorch_model.bin";

/// An struct holding all the information required to load a model from a repository.
#[derive(Debug)]
pub struct ModelInfo {
    /// The model configuration loaded from the `config.json` file.
    config: Option<serde_json::Value>,
    /// The paths to the model weights files.
    weights_file_paths: Vec<PathBuf>,
    /// A flag indicating whether the model weights are stored in PyTorch format.
    from_pth: bool,
}

impl ModelInfo {
    /// Loads the model weights from the provided paths into a `VarBuilder`. The weights are read
    /// through a [`CompatibilityTensorRetrievalBackend`], so checkpoints saved without the model
    /// prefix or with legacy `gamma`/`beta` names can be loaded too.
    ///
    /// # Arguments
    ///
    /// - `model_prefix` - The prefix of the base model weights, e.g. `bert`.
    /// - `dtype` - The data type of the model weights.
    /// - `device` - The device on which the model weights should be loaded.
    ///
    /// # Returns
    ///
    /// A `VarBuilder` containing the model weights.
    pub fn get_var_builder(
        &self,
        model_prefix: &str,
        dtype: DType,
        device: &Device,
    ) -> Result<VarBuilder<'static>> {
        let backend = match self.from_pth {
            true => CompatibilityTensorRetrievalBackend::from_pth(
                &self.weights_file_paths[0],
                model_prefix.to_string(),
            )?,
            false => unsafe {
                CompatibilityTensorRetrievalBackend::from_mmaped_safetensors(
                    &self.weights_file_paths,
                    model_prefix.to_string(),
                )?
            },
        };
        Ok(VarBuilder::from_backend(
            Box::new(backend),
            dtype,
            device.clone(),
        ))
    }

    /// Gets a reference to the model configuration.
    pub fn get_config(&self) -> Result<&serde_json::Value> {
        self.config.as_ref().ok_or(Error::ModelMissingConfig)
    }
}

/// Representation of the `model.safetensors.index.json` file which contains the weight map of a
/// sharded checkpoint.
#[derive(Debug, Clone, Deserialize)]
struct SafetensorsIndex {
    /// A map of the model weights, where the key is the layer name and the value is the file path
    /// to the `safetensors` file containing the weights of that layer.
    weight_map: HashMap<String, String>,
}

impl SafetensorsIndex {
    /// Gets the sorted list of `safetensors` files required to load the model.
    fn get_safetensors_files(&self) -> Vec<String> {
        self.weight_map
            .values()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Gets the model weight files of the repository. It tries to first load the weights from the
/// `model.safetensors.index.json` file (and the corresponding `safetensors` files), then from the
/// `model.safetensors` file, and finally from the `pytorch_model.bin` file.
///
/// # Arguments
///
/// * `repo` - The repository of the model.
///
/// # Returns
///
/// A tuple containing the paths to the model weights files and a flag indicating whether the
/// weights are stored in PyTorch format.
fn load_model_weights(repo: &Repository) -> Result<(Vec<PathBuf>, bool)> {
    if let Ok(model_safetensors_index_file_path) = repo.get(MODEL_SAFETENSORS_INDEX_FILE) {
        let safetensors_index = fs::read_to_string(model_safetensors_index_file_path)?;
        let safetensors_index: SafetensorsIndex = serde_json::from_str(&safetensors_index)?;
        let safetensors_files = safetensors_index
            .get_safetensors_files()
            .iter()
            .map(|file_name| repo.get(file_name))
            .collect::<Result<Vec<_>>>()?;
        return Ok((safetensors_files, false));
    }

    if let Ok(model_safetensor_file_path) = repo.get(MODEL_SAFETENSORS_FILE) {
        return Ok((vec![model_safetensor_file_path], false));
    }

    if let Ok(model_pytorch_file_path) = repo.get(MODEL_PYTORCH_FILE) {
        return Ok((vec![model_pytorch_file_path], true));
    }

    Err(Error::ModelWeightsNotFound)
}

/// Loads all the required files for loading a model from a Hugging Face Hub repository or a local
/// directory.
///
/// # Arguments
///
/// * `repo_id`: The Hugging Face Hub model repository id or the path of a local directory.
/// * `params`: Optional parameters to specify the revision, user agent, and auth token.
///
/// # Returns
///
/// A `ModelInfo` struct containing all the information required to load the model.
pub fn from_pretrained<I: AsRef<str>>(
    repo_id: I,
    params: Option<FromPretrainedParameters>,
) -> Result<ModelInfo> {
    let repo = get_repo(repo_id.as_ref(), params)?;

    let config = match repo.get(MODEL_CONFIG_FILE) {
        Ok(model_config_file_path) => Some(load_model_config(model_config_file_path)?),
        Err(_) => None,
    };

    let (weights_file_paths, from_pth) = load_model_weights(&repo)?;
    tracing::debug!(
        "Model weights found in {:?} (pytorch format: {})",
        weights_file_paths,
        from_pth
    );

    Ok(ModelInfo {
        config,
        weights_file_paths,
        from_pth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safetensors_index_files() {
        let index: SafetensorsIndex = serde_json::from_str(
            r#"{
                "metadata": {"total_size": 10},
                "weight_map": {
                    "a.weight": "model-00002-of-00002.safetensors",
                    "b.weight": "model-00001-of-00002.safetensors",
                    "c.weight": "model-00002-of-00002.safetensors"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(
            index.get_safetensors_files(),
            vec![
                "model-00001-of-00002.safetensors".to_string(),
                "model-00002-of-00002.safetensors".to_string()
            ]
        );
    }

    #[test]
    fn test_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MODEL_CONFIG_FILE), r#"{"model_type": "bert"}"#).unwrap();
        let result = from_pretrained(dir.path().to_str().unwrap(), None);
        assert!(matches!(result, Err(Error::ModelWeightsNotFound)));
    }
}
