use candle_core::{DType, Device, Shape, Tensor};
use candle_nn::{var_builder::SimpleBackend, Init};

/// A backend for retrieving tensors that ensures compatibility with old tensor naming conventions.
/// This backend is able to handle the following cases:
///
/// 1. The model prefix is missing from the tensor name, e.g. a `BertModel` checkpoint loaded
///    into `BertForMaskedLM`.
/// 2. LayerNorm tensors are named `gamma` and `beta` instead of `weight` and `bias`.
pub struct CompatibilityTensorRetrievalBackend {
    inner: Box<dyn SimpleBackend>,
    model_prefix: String,
}

impl CompatibilityTensorRetrievalBackend {
    pub fn new(inner: Box<dyn SimpleBackend>, model_prefix: String) -> Self {
        Self {
            inner,
            model_prefix,
        }
    }

    /// Creates a backend that reads tensors from a PyTorch `.bin` file.
    pub fn from_pth<P: AsRef<std::path::Path>>(
        p: P,
        model_prefix: String,
    ) -> candle_core::Result<Self> {
        let pth = candle_core::pickle::PthTensors::new(p, None)?;
        Ok(Self::new(Box::new(pth), model_prefix))
    }

    /// Creates a backend that reads tensors from memory mapped `.safetensors` files.
    ///
    /// # Safety
    ///
    /// The files are memory mapped, so they must not be modified while the backend is alive.
    pub unsafe fn from_mmaped_safetensors<P: AsRef<std::path::Path>>(
        paths: &[P],
        model_prefix: String,
    ) -> candle_core::Result<Self> {
        let tensors = candle_core::safetensors::MmapedSafetensors::multi(paths)?;
        Ok(Self::new(Box::new(tensors), model_prefix))
    }

    /// Maps the name requested by the model to the name stored in the checkpoint. If no candidate
    /// exists the original name is returned, so the inner backend reports the missing tensor.
    fn rename(&self, name: &str) -> String {
        if self.inner.contains_tensor(name) {
            return name.to_string();
        }

        let without_prefix = name
            .strip_prefix(&format!("{}.", self.model_prefix))
            .unwrap_or(name);

        let legacy_layer_norm = |s: &str| -> Option<String> {
            if let Some(base) = s.strip_suffix(".weight") {
                Some(format!("{base}.gamma"))
            } else {
                s.strip_suffix(".bias").map(|base| format!("{base}.beta"))
            }
        };

        let candidates = [
            Some(without_prefix.to_string()),
            legacy_layer_norm(name),
            legacy_layer_norm(without_prefix),
        ];

        candidates
            .into_iter()
            .flatten()
            .find(|candidate| self.inner.contains_tensor(candidate))
            .unwrap_or_else(|| name.to_string())
    }
}

impl SimpleBackend for CompatibilityTensorRetrievalBackend {
    fn get(
        &self,
        s: Shape,
        name: &str,
        h: Init,
        dtype: DType,
        dev: &Device,
    ) -> candle_core::Result<Tensor> {
        let renamed = self.rename(name);
        self.inner.get(s, &renamed, h, dtype, dev)
    }

    fn contains_tensor(&self, name: &str) -> bool {
        let renamed = self.rename(name);
        self.inner.contains_tensor(&renamed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn backend(names: &[&str]) -> CompatibilityTensorRetrievalBackend {
        let tensors: HashMap<String, Tensor> = names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    Tensor::zeros(2, DType::F32, &Device::Cpu).unwrap(),
                )
            })
            .collect();
        CompatibilityTensorRetrievalBackend::new(Box::new(tensors), "bert".to_string())
    }

    #[test]
    fn test_rename_missing_prefix() {
        let backend = backend(&["embeddings.word_embeddings.weight"]);
        assert_eq!(
            backend.rename("bert.embeddings.word_embeddings.weight"),
            "embeddings.word_embeddings.weight"
        );
        assert!(backend.contains_tensor("bert.embeddings.word_embeddings.weight"));
    }

    #[test]
    fn test_rename_gamma_beta() {
        let backend = backend(&["bert.embeddings.LayerNorm.gamma", "embeddings.LayerNorm.beta"]);
        assert_eq!(
            backend.rename("bert.embeddings.LayerNorm.weight"),
            "bert.embeddings.LayerNorm.gamma"
        );
        assert_eq!(
            backend.rename("bert.embeddings.LayerNorm.bias"),
            "embeddings.LayerNorm.beta"
        );
        assert_eq!(backend.rename("cls.predictions.bias"), "cls.predictions.bias");
        assert!(!backend.contains_tensor("cls.predictions.bias"));
    }
}
