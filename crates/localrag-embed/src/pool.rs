//! Sentence pooling over encoder token states.

use anyhow::{ensure, Result};
use candle_core::{Tensor, D};

const NORM_EPS: f64 = 1e-12;

/// Averages the token states whose mask bit is set: `[B, T, H]` with a
/// `[B, T]` mask gives `[B, H]`.
pub fn masked_mean(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, tokens, _) = hidden.dims3()?;
    ensure!(
        attention_mask.dims() == [batch, tokens],
        "mask shape {:?} does not match hidden states {:?}",
        attention_mask.dims(),
        hidden.dims()
    );
    let mask = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let summed = hidden.broadcast_mul(&mask.unsqueeze(D::Minus1)?)?.sum(1)?;
    let counts = mask.sum_keepdim(1)?;
    Ok(summed.broadcast_div(&counts)?)
}

/// Scales every row to unit length. Zero rows stay zero.
pub fn l2_normalize(rows: &Tensor) -> Result<Tensor> {
    let norm = rows.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?.affine(1.0, NORM_EPS)?;
    Ok(rows.broadcast_div(&norm)?)
}

pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    l2_normalize(&masked_mean(hidden, attention_mask)?)
}
