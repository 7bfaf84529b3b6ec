use std::{fs, path::Path};

use candle_core::Device;
use candle_nn::VarMap;
use serde_json::json;
use tempfile::TempDir;
use unmasker_models::{BertConfig, BertForMaskedLM};
use unmasker_pipelines::FillMaskPipeline;

pub const VOCAB: [&str; 20] = [
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "my", "name", "is", "patrick", "clara",
    "teven", "the", "capital", "of", "france", "paris", "lyon", "big", "small", "city",
];

fn special_token(id: usize, content: &str) -> serde_json::Value {
    json!({
        "id": id,
        "content": content,
        "single_word": false,
        "lstrip": false,
        "rstrip": false,
        "normalized": false,
        "special": true
    })
}

fn write_tokenizer(dir: &Path, mask_token: &str) {
    let vocab: serde_json::Map<String, serde_json::Value> = VOCAB
        .iter()
        .enumerate()
        .map(|(id, token)| (token.to_string(), json!(id)))
        .collect();

    let tokenizer = json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": VOCAB[..5]
            .iter()
            .enumerate()
            .map(|(id, token)| special_token(id, token))
            .collect::<Vec<_>>(),
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "WhitespaceSplit"},
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [
                {"SpecialToken": {"id": "[CLS]", "type_id": 0}},
                {"Sequence": {"id": "A", "type_id": 0}},
                {"SpecialToken": {"id": "[SEP]", "type_id": 0}}
            ],
            "pair": [
                {"SpecialToken": {"id": "[CLS]", "type_id": 0}},
                {"Sequence": {"id": "A", "type_id": 0}},
                {"SpecialToken": {"id": "[SEP]", "type_id": 0}},
                {"Sequence": {"id": "B", "type_id": 1}},
                {"SpecialToken": {"id": "[SEP]", "type_id": 1}}
            ],
            "special_tokens": {
                "[CLS]": {"id": "[CLS]", "ids": [2], "tokens": ["[CLS]"]},
                "[SEP]": {"id": "[SEP]", "ids": [3], "tokens": ["[SEP]"]}
            }
        },
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]"}
    });
    fs::write(dir.join("tokenizer.json"), tokenizer.to_string()).unwrap();

    let tokenizer_config = json!({
        "tokenizer_class": "BertTokenizer",
        "cls_token": "[CLS]",
        "mask_token": mask_token,
        "pad_token": "[PAD]",
        "sep_token": "[SEP]",
        "unk_token": "[UNK]",
        "model_max_length": 32
    });
    fs::write(dir.join("tokenizer_config.json"), tokenizer_config.to_string()).unwrap();
}

fn write_model(dir: &Path) {
    let config = BertConfig {
        vocab_size: VOCAB.len(),
        hidden_size: 16,
        num_hidden_layers: 2,
        num_attention_heads: 2,
        intermediate_size: 32,
        max_position_embeddings: 32,
        ..BertConfig::default()
    };
    let varmap = VarMap::new();
    BertForMaskedLM::random(&config, &varmap, &Device::Cpu).unwrap();
    varmap.save(dir.join("model.safetensors")).unwrap();

    let mut config_json = serde_json::to_value(&config).unwrap();
    config_json["model_type"] = "bert".into();
    fs::write(dir.join("config.json"), config_json.to_string()).unwrap();
}

/// Writes a tiny randomly initialized BERT with a whitespace tokenizer to a temporary directory.
pub fn write_tiny_repo() -> TempDir {
    write_tiny_repo_with_mask_token("[MASK]")
}

/// Same as [`write_tiny_repo`], but with a custom mask token. A mask token outside the vocabulary
/// leaves the tokenizer without a mask id.
pub fn write_tiny_repo_with_mask_token(mask_token: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_tokenizer(dir.path(), mask_token);
    write_model(dir.path());
    dir
}

pub fn load_pipeline(dir: &TempDir) -> FillMaskPipeline {
    FillMaskPipeline::new(dir.path().to_str().unwrap(), &Device::Cpu, None, None).unwrap()
}
