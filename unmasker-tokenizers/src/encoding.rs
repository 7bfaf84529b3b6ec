use candle_core::{Device, Tensor};
use tokenizers::Encoding;
use unmasker::Result;

/// The encoding of a batch of sequences, with the ids stacked into `(batch_size, seq_len)`
/// tensors.
#[derive(Debug)]
pub struct BatchEncoding {
    input_ids: Tensor,
    token_type_ids: Tensor,
    attention_mask: Tensor,
    encodings: Vec<Encoding>,
}

impl BatchEncoding {
    pub fn new(
        input_ids: Tensor,
        token_type_ids: Tensor,
        attention_mask: Tensor,
        encodings: Vec<Encoding>,
    ) -> Self {
        BatchEncoding {
            input_ids,
            token_type_ids,
            attention_mask,
            encodings,
        }
    }

    pub fn get_input_ids(&self) -> &Tensor {
        &self.input_ids
    }

    pub fn get_token_type_ids(&self) -> &Tensor {
        &self.token_type_ids
    }

    pub fn get_attention_mask(&self) -> &Tensor {
        &self.attention_mask
    }

    pub fn get_encodings(&self) -> &[Encoding] {
        &self.encodings
    }

    pub fn len(&self) -> usize {
        self.encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encodings.is_empty()
    }

    /// Moves the tensors to the given device.
    pub fn to_device(&mut self, device: &Device) -> Result<()> {
        self.input_ids = self.input_ids.to_device(device)?;
        self.token_type_ids = self.token_type_ids.to_device(device)?;
        self.attention_mask = self.attention_mask.to_device(device)?;
        Ok(())
    }
}
