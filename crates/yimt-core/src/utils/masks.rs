use ndarray::{Array1, Array2, Array3, Axis, Zip, s};

use super::tensor_ops::roll_last_axis;

/// `[batch, max_len]` mask holding 1.0 for positions within each length.
pub fn sequence_mask(sequence_length: &Array1<usize>, max_len: usize) -> Array2<f32> {
    Array2::from_shape_fn((sequence_length.len(), max_len), |(b, t)| {
        if t < sequence_length[b] { 1.0 } else { 0.0 }
    })
}

/// Restricts `[batch, target_time, source_time]` attention to source tokens.
///
/// With a start marker the source axis is shifted left by one so that
/// position 0 is the first real token. Positions at or beyond
/// `source_length` (lengths without markers) are zeroed. Nothing changes
/// when the source carries no markers.
pub fn mask_attention(
    attention: &Array3<f32>,
    source_length: &Array1<usize>,
    has_start: bool,
    has_end: bool,
) -> Array3<f32> {
    if !has_start && !has_end {
        return attention.clone();
    }
    let mut masked = if has_start {
        roll_last_axis(attention, 1)
    } else {
        attention.clone()
    };
    let source_time = masked.len_of(Axis(2));
    let mask = sequence_mask(source_length, source_time);
    for (mut rows, mask_row) in masked.axis_iter_mut(Axis(0)).zip(mask.rows()) {
        for mut row in rows.axis_iter_mut(Axis(0)) {
            Zip::from(&mut row).and(&mask_row).for_each(|a, &m| *a *= m);
        }
    }
    masked
}

/// Zeroes attention rows of target positions beyond `target_length`.
pub fn mask_target_positions(attention: &mut Array3<f32>, target_length: &Array1<usize>) {
    let time = attention.len_of(Axis(1));
    for (b, &length) in target_length.iter().enumerate() {
        if length < time {
            attention.slice_mut(s![b, length.., ..]).fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sequence_mask() {
        let mask = sequence_mask(&array![2usize, 0], 3);
        assert_eq!(mask, array![[1.0f32, 1.0, 0.0], [0.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_mask_attention_without_markers_is_identity() {
        let attention = array![[[0.2f32, 0.3, 0.5]]];
        assert_eq!(mask_attention(&attention, &array![1usize], false, false), attention);
    }

    #[test]
    fn test_mask_attention_shifts_and_masks() {
        // Source: <s> x y </s>, two real tokens.
        let attention = array![[[0.1f32, 0.2, 0.3, 0.4]]];
        let masked = mask_attention(&attention, &array![2usize], true, true);
        assert_eq!(masked, array![[[0.2f32, 0.3, 0.0, 0.0]]]);
    }

    #[test]
    fn test_mask_target_positions() {
        let mut attention = Array3::from_elem((1, 3, 2), 1.0f32);
        mask_target_positions(&mut attention, &array![1usize]);
        assert_eq!(attention[[0, 0, 1]], 1.0);
        assert_eq!(attention[[0, 1, 0]], 0.0);
    }
}
