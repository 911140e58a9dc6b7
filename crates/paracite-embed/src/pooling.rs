//! Sentence pooling for the local transformer.

use candle_core::Tensor;

/// Mean over non-padding tokens.
///
/// `embeddings` is (batch, seq_len, hidden), `attention_mask` is (batch, seq_len)
/// in F32. Returns (batch, hidden).
pub fn mean_pool(embeddings: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask = attention_mask.unsqueeze(2)?;
    let summed = embeddings.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1e-9f32, f32::MAX)?;
    summed.broadcast_div(&counts)
}

/// L2-normalise each row so cosine similarity reduces to a dot product.
pub fn l2_normalize(embeddings: &Tensor) -> candle_core::Result<Tensor> {
    let norms = embeddings.sqr()?.sum_keepdim(1)?.sqrt()?;
    embeddings.broadcast_div(&norms.clamp(1e-9f32, f32::MAX)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_mean_pool_ignores_padding() {
        let device = Device::Cpu;
        let embeddings = Tensor::from_vec(
            vec![
                1.0f32, 2.0,   3.0, 4.0,   // seq 0: two real tokens
                2.0, 2.0,      9.0, 9.0,   // seq 1: second token is padding
            ],
            (2, 2, 2),
            &device,
        ).unwrap();
        let mask = Tensor::from_vec(vec![1.0f32, 1.0, 1.0, 0.0], (2, 2), &device).unwrap();

        let pooled = mean_pool(&embeddings, &mask).unwrap().to_vec2::<f32>().unwrap();
        assert!((pooled[0][0] - 2.0).abs() < 1e-5);
        assert!((pooled[0][1] - 3.0).abs() < 1e-5);
        assert!((pooled[1][0] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_l2_normalize_rows_have_unit_norm() {
        let device = Device::Cpu;
        let t = Tensor::from_vec(vec![3.0f32, 4.0, 1.0, 1.0], (2, 2), &device).unwrap();
        let rows = l2_normalize(&t).unwrap().to_vec2::<f32>().unwrap();
        assert!((rows[0][0] - 0.6).abs() < 1e-5);
        for row in rows {
            let norm: f32 = row.iter().map(|x| x * x).sum();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }
}
