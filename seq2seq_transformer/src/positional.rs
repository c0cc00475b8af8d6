//! Fixed sinusoidal positional encoding.

use ndarray::Array2;

/// Build the `(max_len, embed_size)` positional table.
///
/// Even columns carry `sin(pos / 10000^(i / embed_size))`, odd columns the
/// matching cosine. The table is computed once at model construction and
/// sliced per call.
pub fn positional_encoding(max_len: usize, embed_size: usize) -> Array2<f32> {
    let mut table = Array2::zeros((max_len, embed_size));
    for pos in 0..max_len {
        for i in (0..embed_size).step_by(2) {
            let div_term = (-(10000.0f32.ln()) * i as f32 / embed_size as f32).exp();
            let angle = pos as f32 * div_term;
            table[[pos, i]] = angle.sin();
            if i + 1 < embed_size {
                table[[pos, i + 1]] = angle.cos();
            }
        }
    }
    table
}
