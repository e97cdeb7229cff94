use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// Encodes a batch padded to its longest row (capped at `max_len`).
/// Returns `(input_ids, attention_mask)`, both `[B,T]` u32.
pub fn tokenize_batch(
    tokenizer: &Tokenizer,
    texts: &[String],
    max_len: usize,
    pad_id: u32,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    let width = encodings
        .iter()
        .map(|enc| enc.get_ids().len().min(max_len))
        .max()
        .unwrap_or(0)
        .max(1);

    let mut ids = Vec::with_capacity(encodings.len() * width);
    let mut mask = Vec::with_capacity(encodings.len() * width);
    for enc in &encodings {
        let row_ids = &enc.get_ids()[..enc.get_ids().len().min(width)];
        let row_mask = &enc.get_attention_mask()[..row_ids.len()];
        let pad = width - row_ids.len();
        ids.extend_from_slice(row_ids);
        ids.extend(std::iter::repeat(pad_id).take(pad));
        mask.extend_from_slice(row_mask);
        mask.extend(std::iter::repeat(0u32).take(pad));
    }
    let input_ids = Tensor::from_vec(ids, (encodings.len(), width), device)?;
    let attention_mask = Tensor::from_vec(mask, (encodings.len(), width), device)?;
    Ok((input_ids, attention_mask))
}
