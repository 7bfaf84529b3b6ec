use candle_core::{DType, Tensor};
use unmasker::Result;

/// Creates a broadcastable attention mask so padding tokens are ignored by the attention layers.
/// Attended positions get `0` and masked positions get `-inf`, so the mask can be added to the
/// attention scores before the softmax.
///
/// # Arguments
///
/// * `attention_mask` - The attention mask tensor with shape `(batch_size, seq_len)`, with `1` for
///   tokens to attend to and `0` for padding.
/// * `dtype` - The data type of the attention mask tensor to create.
///
/// # Returns
///
/// The broadcastable attention mask tensor with shape `(batch_size, 1, 1, seq_len)`.
pub fn get_extended_attention_mask(attention_mask: &Tensor, dtype: DType) -> Result<Tensor> {
    let extended_attention_mask = attention_mask
        .to_dtype(DType::U8)?
        .unsqueeze(1)?
        .unsqueeze(2)?;
    let on_true = Tensor::zeros(extended_attention_mask.shape(), dtype, attention_mask.device())?;
    let on_false = Tensor::new(f32::NEG_INFINITY, attention_mask.device())?
        .to_dtype(dtype)?
        .broadcast_as(extended_attention_mask.shape())?;
    let extended_attention_mask = extended_attention_mask.where_cond(&on_true, &on_false)?;
    Ok(extended_attention_mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_extended_attention_mask() {
        let attention_mask = Tensor::new(&[[1u8, 1, 0], [1, 1, 1]], &Device::Cpu).unwrap();
        let mask = get_extended_attention_mask(&attention_mask, DType::F32).unwrap();
        assert_eq!(mask.dims(), &[2, 1, 1, 3]);

        let values = mask.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(&values[..2], &[0.0, 0.0]);
        assert_eq!(values[2], f32::NEG_INFINITY);
        assert_eq!(&values[3..], &[0.0, 0.0, 0.0]);
    }
}
