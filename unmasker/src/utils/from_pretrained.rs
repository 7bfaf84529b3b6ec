use hf_hub::{
    api::sync::{ApiBuilder, ApiRepo},
    Repo, RepoType,
};

use crate::{Error, Result};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

pub const MODEL_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone)]
pub struct FromPretrainedParameters {
    pub revision: String,
    pub user_agent: HashMap<String, String>,
    pub auth_token: Option<String>,
}

impl Default for FromPretrainedParameters {
    fn default() -> Self {
        Self {
            revision: "main".into(),
            user_agent: HashMap::new(),
            auth_token: None,
        }
    }
}

/// The place the files of a model repository are read from.
pub enum Repository {
    /// A directory in the local filesystem.
    Local(PathBuf),
    /// A repository of the Hugging Face Hub. Files are downloaded and cached on first access.
    Hub(ApiRepo),
}

impl Repository {
    /// Gets the local path of a file of the repository, downloading it first if the repository
    /// lives in the Hugging Face Hub.
    ///
    /// # Arguments
    ///
    /// * `file_name` - The name of the file relative to the repository root.
    ///
    /// # Returns
    ///
    /// The path of the file in the local filesystem.
    pub fn get(&self, file_name: &str) -> Result<PathBuf> {
        match self {
            Repository::Local(dir) => {
                let path = dir.join(file_name);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(Error::RepositoryFileNotFound(file_name.to_string()))
                }
            }
            Repository::Hub(api) => Ok(api.get(file_name)?),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Repository::Local(_))
    }
}

/// Gets a [`Repository`] from the provided repository ID using the provided parameters. If the ID
/// is the path of an existing directory, the files are read from that directory. Otherwise, the
/// repository is looked up in the Hugging Face Hub and it will be checked that it exists.
///
/// # Arguments
///
/// * `repo_id` - The repository ID or the path of a local directory.
/// * `params` - The parameters to use when creating the API instance.
///
/// # Returns
///
/// The repository.
pub fn get_repo<S: AsRef<str>>(
    repo_id: S,
    params: Option<FromPretrainedParameters>,
) -> Result<Repository> {
    let repo_id = repo_id.as_ref();

    let local_dir = Path::new(repo_id);
    if local_dir.is_dir() {
        return Ok(Repository::Local(local_dir.to_path_buf()));
    }

    let params = params.unwrap_or_default();
    let repo = Repo::with_revision(repo_id.to_string(), RepoType::Model, params.revision);

    let mut builder = ApiBuilder::new();
    if let Some(token) = params.auth_token {
        builder = builder.with_token(Some(token));
    }
    let api = builder.build()?.repo(repo);

    if api.info().is_err() && api.get(MODEL_CONFIG_FILE).is_err() {
        return Err(Error::RepositoryNotFound(repo_id.to_string()));
    }

    Ok(Repository::Hub(api))
}

/// Loads the model configuration from the provided file path.
///
/// # Arguments
///
/// * `file_path` - The path to the `config.json` file containing the model configuration.
///
/// # Returns
///
/// The loaded model configuration.
pub fn load_model_config(file_path: PathBuf) -> Result<serde_json::Value> {
    let model_config = fs::read_to_string(file_path)?;
    let model_config = serde_json::from_str(&model_config)?;
    Ok(model_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_repository() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(MODEL_CONFIG_FILE),
            r#"{"model_type": "bert"}"#,
        )
        .unwrap();

        let repo = get_repo(dir.path().to_str().unwrap(), None).unwrap();
        assert!(repo.is_local());

        let config = load_model_config(repo.get(MODEL_CONFIG_FILE).unwrap()).unwrap();
        assert_eq!(config["model_type"], "bert");

        assert!(matches!(
            repo.get("tokenizer.json"),
            Err(Error::RepositoryFileNotFound(_))
        ));
    }
}
