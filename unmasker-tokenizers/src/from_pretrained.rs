use std::{collections::HashMap, fs, path::PathBuf};

use lazy_static::lazy_static;
use serde::{Deserialize, Deserializer};
use tokenizers::{
    models::bpe::{Merges, Vocab},
    AddedToken,
};
use unmasker::{
    get_repo,
    utils::from_pretrained::{load_model_config, FromPretrainedParameters, MODEL_CONFIG_FILE},
    Error, Repository, Result,
};

use crate::config::TokenizerConfig;

const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const VOCAB_TXT_FILE: &str = "vocab.txt";
const VOCAB_JSON_FILE: &str = "vocab.json";
const MERGES_FILE: &str = "merges.txt";
const SPECIAL_TOKENS_MAP_FILE: &str = "special_tokens_map.json";

lazy_static! {
    static ref MODEL_TYPE_TO_TOKENIZER_CLASS: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("bert", "BertTokenizer");
        map.insert("roberta", "RobertaTokenizer");
        map
    };
    static ref IGNORE_TOKENIZER_CLASSES: Vec<&'static str> = vec!["PreTrainedTokenizerFast"];
}

/// The names of the special tokens a tokenizer can define.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialTokenName {
    Cls,
    Mask,
    Pad,
    Sep,
    Bos,
    Eos,
    Unk,
}

impl SpecialTokenName {
    pub const ALL: [SpecialTokenName; 7] = [
        SpecialTokenName::Cls,
        SpecialTokenName::Mask,
        SpecialTokenName::Pad,
        SpecialTokenName::Sep,
        SpecialTokenName::Bos,
        SpecialTokenName::Eos,
        SpecialTokenName::Unk,
    ];
}

/// Deserializes a special token that can be written either as a plain string or as a full
/// `AddedToken` object.
fn deserialize_special_token<'de, D>(deserializer: D) -> std::result::Result<Option<AddedToken>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(content)) => Some(AddedToken::from(content, true)),
        Some(value) => serde_json::from_value(value).ok(),
        None => None,
    })
}

/// The special tokens map of a tokenizer, as stored in `special_tokens_map.json`.
#[derive(Debug, Default, Deserialize)]
pub struct SpecialTokensMap {
    #[serde(deserialize_with = "deserialize_special_token", default)]
    cls_token: Option<AddedToken>,
    #[serde(deserialize_with = "deserialize_special_token", default)]
    mask_token: Option<AddedToken>,
    #[serde(deserialize_with = "deserialize_special_token", default)]
    pad_token: Option<AddedToken>,
    #[serde(deserialize_with = "deserialize_special_token", default)]
    sep_token: Option<AddedToken>,
    #[serde(deserialize_with = "deserialize_special_token", default)]
    bos_token: Option<AddedToken>,
    #[serde(deserialize_with = "deserialize_special_token", default)]
    eos_token: Option<AddedToken>,
    #[serde(deserialize_with = "deserialize_special_token", default)]
    unk_token: Option<AddedToken>,
}

impl SpecialTokensMap {
    pub fn get(&self, name: SpecialTokenName) -> Option<&AddedToken> {
        match name {
            SpecialTokenName::Cls => self.cls_token.as_ref(),
            SpecialTokenName::Mask => self.mask_token.as_ref(),
            SpecialTokenName::Pad => self.pad_token.as_ref(),
            SpecialTokenName::Sep => self.sep_token.as_ref(),
            SpecialTokenName::Bos => self.bos_token.as_ref(),
            SpecialTokenName::Eos => self.eos_token.as_ref(),
            SpecialTokenName::Unk => self.unk_token.as_ref(),
        }
    }
}

/// A struct containing all the required information to load a tokenizer model.
#[derive(Debug)]
pub struct TokenizerInfo {
    /// The configuration of the tokenizer.
    pub config: Option<TokenizerConfig>,
    /// The configuration of the model. Used to infer the tokenizer class.
    pub model_config: Option<serde_json::Value>,
    /// The path to the `tokenizer.json` file.
    pub tokenizer_file_path: Option<PathBuf>,
    /// The vocabulary of the tokenizer model.
    pub vocab: Option<Vocab>,
    /// The merges of the tokenizer model.
    pub merges: Option<Merges>,
    /// The special tokens of the tokenizer.
    pub special_tokens_map: Option<SpecialTokensMap>,
}

impl TokenizerInfo {
    pub fn get_config(&self) -> Option<&TokenizerConfig> {
        self.config.as_ref()
    }

    /// Gets the tokenizer class, first from the tokenizer configuration and then from the
    /// `model_type` of the model configuration. Returns an empty string if none can be found.
    pub fn get_tokenizer_class(&self) -> &str {
        if let Some(tokenizer_class) = self
            .config
            .as_ref()
            .and_then(|config| config.tokenizer_class.as_deref())
        {
            if !IGNORE_TOKENIZER_CLASSES.contains(&tokenizer_class) {
                return tokenizer_class;
            }
        }

        self.model_config
            .as_ref()
            .and_then(|model_config| model_config["model_type"].as_str())
            .and_then(|model_type| MODEL_TYPE_TO_TOKENIZER_CLASS.get(model_type).copied())
            .unwrap_or("")
    }

    /// Gets the `String` representation of a special token. It will first try to get the token from
    /// the special tokens map and if it doesn't exist, it will try to get it from the config file.
    pub fn get_special_token(&self, name: SpecialTokenName) -> Option<String> {
        if let Some(token) = self
            .special_tokens_map
            .as_ref()
            .and_then(|map| map.get(name))
        {
            return Some(token.content.clone());
        }

        self.config
            .as_ref()
            .and_then(|config| config.get_special_token(name))
            .map(String::from)
    }
}

/// Loads the vocabulary of the tokenizer model from a text file with one token per line.
///
/// # Arguments
///
/// - `file_path` - The path to the vocabulary file.
///
/// # Returns
///
/// The vocabulary mapping each token to its line index.
pub fn load_vocab_txt(file_path: PathBuf) -> Result<Vocab> {
    let vocab = fs::read_to_string(file_path)?
        .lines()
        .enumerate()
        .map(|(idx, line)| (line.to_string(), idx as u32))
        .collect::<Vocab>();
    Ok(vocab)
}

/// Loads the vocabulary of the tokenizer model from a JSON file.
pub fn load_vocab_json(file_path: PathBuf) -> Result<Vocab> {
    let vocab = fs::read_to_string(file_path)?;
    let vocab: Vocab = serde_json::from_str(vocab.as_str())?;
    Ok(vocab)
}

/// Loads the merges of the tokenizer model from a text file. The `#version` header is skipped.
///
/// # Arguments
///
/// - `file_path` - The path to the merges file.
///
/// # Returns
///
/// The merges as pairs of tokens.
pub fn load_merges(file_path: PathBuf) -> Result<Merges> {
    fs::read_to_string(file_path)?
        .lines()
        .filter(|line| !line.starts_with("#version") && !line.trim().is_empty())
        .map(|line| {
            line.split_once(' ')
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .ok_or_else(|| Error::TokenizerBuildError(format!("Invalid merge: '{line}'")))
        })
        .collect()
}

/// Loads the special tokens map of the tokenizer model from a JSON file.
pub fn load_special_tokens_map(file_path: PathBuf) -> Result<SpecialTokensMap> {
    let special_tokens_map = fs::read_to_string(file_path)?;
    let special_tokens_map: SpecialTokensMap = serde_json::from_str(&special_tokens_map)?;
    Ok(special_tokens_map)
}

/// Loads an optional file of the repository. A file missing from the repository is `None`, but a
/// file that exists and cannot be parsed is an error.
fn load_optional<T>(
    repo: &Repository,
    file_name: &str,
    load: impl FnOnce(PathBuf) -> Result<T>,
) -> Result<Option<T>> {
    match repo.get(file_name) {
        Ok(path) => load(path).map(Some),
        Err(_) => Ok(None),
    }
}

/// Gets all the information and files needed to load a tokenizer from a Hugging Face Hub
/// repository or a local directory.
///
/// # Arguments
///
/// * `repo_id` - The ID of the repository or the path of a local directory.
/// * `params` - Optional parameters to specify the revision, user agent, and auth token.
///
/// # Returns
///
/// A `TokenizerInfo` struct containing all the information needed to load a tokenizer.
pub fn from_pretrained<I: AsRef<str>>(
    repo_id: I,
    params: Option<FromPretrainedParameters>,
) -> Result<TokenizerInfo> {
    let repo = get_repo(repo_id.as_ref(), params)?;

    let config = load_optional(&repo, TOKENIZER_CONFIG_FILE, TokenizerConfig::from_file)?;

    // Used to determine the tokenizer class if the tokenizer config doesn't declare it
    let model_config = load_optional(&repo, MODEL_CONFIG_FILE, load_model_config)?;

    let tokenizer_file_path = repo.get(TOKENIZER_FILE).ok();

    // The vocabulary and merges files are only needed when there's no `tokenizer.json`
    let (vocab, merges) = if tokenizer_file_path.is_none() {
        let vocab = match load_optional(&repo, VOCAB_JSON_FILE, load_vocab_json)? {
            Some(vocab) => Some(vocab),
            None => load_optional(&repo, VOCAB_TXT_FILE, load_vocab_txt)?,
        };
        let merges = load_optional(&repo, MERGES_FILE, load_merges)?;
        (vocab, merges)
    } else {
        (None, None)
    };

    let special_tokens_map =
        load_optional(&repo, SPECIAL_TOKENS_MAP_FILE, load_special_tokens_map)?;

    Ok(TokenizerInfo {
        config,
        model_config,
        tokenizer_file_path,
        vocab,
        merges,
        special_tokens_map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_tokens_map_precedence() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(TOKENIZER_CONFIG_FILE),
            r#"{"mask_token": "[MASK]", "pad_token": "[PAD]"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join(SPECIAL_TOKENS_MAP_FILE),
            r#"{"mask_token": {"content": "<mask>", "single_word": false, "lstrip": true, "rstrip": false, "normalized": false, "special": true}}"#,
        )
        .unwrap();

        let info = from_pretrained(dir.path().to_str().unwrap(), None).unwrap();
        assert_eq!(
            info.get_special_token(SpecialTokenName::Mask),
            Some("<mask>".to_string())
        );
        assert_eq!(
            info.get_special_token(SpecialTokenName::Pad),
            Some("[PAD]".to_string())
        );
        assert_eq!(info.get_special_token(SpecialTokenName::Bos), None);
    }

    #[test]
    fn test_tokenizer_class_from_model_type() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(TOKENIZER_CONFIG_FILE),
            r#"{"tokenizer_class": "PreTrainedTokenizerFast"}"#,
        )
        .unwrap();
        fs::write(dir.path().join(MODEL_CONFIG_FILE), r#"{"model_type": "roberta"}"#).unwrap();

        let info = from_pretrained(dir.path().to_str().unwrap(), None).unwrap();
        assert_eq!(info.get_tokenizer_class(), "RobertaTokenizer");
    }

    #[test]
    fn test_load_vocab_and_merges() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(VOCAB_TXT_FILE), "[PAD]\n[UNK]\nhello\n").unwrap();
        fs::write(dir.path().join(MERGES_FILE), "#version: 0.2\nh e\nhe llo\n").unwrap();

        let info = from_pretrained(dir.path().to_str().unwrap(), None).unwrap();
        let vocab = info.vocab.unwrap();
        assert_eq!(vocab.get("hello"), Some(&2));

        let merges = info.merges.unwrap();
        assert_eq!(
            merges,
            vec![
                ("h".to_string(), "e".to_string()),
                ("he".to_string(), "llo".to_string())
            ]
        );
    }

    #[test]
    fn test_invalid_merges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MERGES_FILE);
        fs::write(&path, "#version: 0.2\nbroken\n").unwrap();
        assert!(matches!(
            load_merges(path),
            Err(Error::TokenizerBuildError(_))
        ));
    }
}
