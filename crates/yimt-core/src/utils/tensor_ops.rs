use ndarray::{Array, Array3, ArrayView1, Axis, Dimension, RemoveAxis, s};

/// Repeats every batch entry `multiplier` times consecutively:
/// `[a, b]` becomes `[a, a, b, b]` for a multiplier of 2.
pub fn tile_batch<A, D>(array: &Array<A, D>, multiplier: usize) -> Array<A, D>
where
    A: Clone,
    D: Dimension + RemoveAxis,
{
    let indices: Vec<usize> = (0..array.len_of(Axis(0)))
        .flat_map(|index| std::iter::repeat_n(index, multiplier))
        .collect();
    array.select(Axis(0), &indices)
}

/// Index of the largest value, the first one on ties. 0 for an empty view.
pub fn argmax(values: ArrayView1<'_, f32>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// Pads with zeros or truncates the time axis (axis 1) of
/// `[batch, time, source_time]` attention to `length`.
pub fn align_in_time(attention: &Array3<f32>, length: usize) -> Array3<f32> {
    let (batch, time, source_time) = attention.dim();
    let mut aligned = Array3::zeros((batch, length, source_time));
    let kept = time.min(length);
    aligned
        .slice_mut(s![.., ..kept, ..])
        .assign(&attention.slice(s![.., ..kept, ..]));
    aligned
}

/// Rotates the last axis left by `shift`: element `i` takes the value at
/// `(i + shift) % len`.
pub fn roll_last_axis(array: &Array3<f32>, shift: usize) -> Array3<f32> {
    let width = array.len_of(Axis(2));
    if width == 0 {
        return array.clone();
    }
    Array3::from_shape_fn(array.dim(), |(b, t, i)| array[[b, t, (i + shift) % width]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_tile_batch_repeats_consecutively() {
        let tiled = tile_batch(&array![[1, 2], [3, 4]], 2);
        assert_eq!(tiled, array![[1, 2], [1, 2], [3, 4], [3, 4]]);
        let lengths = tile_batch(&array![5usize, 7], 3);
        assert_eq!(lengths, array![5usize, 5, 5, 7, 7, 7]);
    }

    #[test]
    fn test_align_in_time() {
        let attention = Array3::from_elem((1, 2, 3), 1.0f32);
        let padded = align_in_time(&attention, 4);
        assert_eq!(padded.dim(), (1, 4, 3));
        assert_eq!(padded[[0, 1, 2]], 1.0);
        assert_eq!(padded[[0, 3, 0]], 0.0);
        assert_eq!(align_in_time(&attention, 1).dim(), (1, 1, 3));
    }

    #[test]
    fn test_argmax_prefers_first_maximum() {
        assert_eq!(argmax(array![0.1f32, 0.7, 0.7].view()), 1);
        assert_eq!(argmax(array![0.0f32, 0.0].view()), 0);
    }

    #[test]
    fn test_roll_last_axis() {
        let rolled = roll_last_axis(&array![[[1.0f32, 2.0, 3.0]]], 1);
        assert_eq!(rolled, array![[[2.0f32, 3.0, 1.0]]]);
    }
}
