/// Indices of the `k` largest entries of `values[offset..]`, best first.
///
/// Returned indices are relative to `offset`, i.e. they live in the label space of the
/// ground truth rather than the model's output space. Ties keep the lower index first.
pub fn top_k_with_offset<T: PartialOrd + Copy>(values: &[T], k: usize, offset: usize) -> Vec<usize> {
    let Some(scores) = values.get(offset..) else {
        return Vec::new();
    };

    let mut indices: Vec<usize> = (0..scores.len()).collect();
    indices.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    indices.truncate(k);
    indices
}

/// Top-1 shortcut for [`top_k_with_offset`] without the sort.
pub fn argmax_with_offset<T: PartialOrd + Copy>(values: &[T], offset: usize) -> Option<usize> {
    let scores = values.get(offset..)?;
    let mut best: Option<(usize, T)> = None;
    for (i, &v) in scores.iter().enumerate() {
        if best.is_none_or(|(_, current)| v > current) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_skips_background_slot() {
        // Index 0 is background and holds the largest value; it must be ignored.
        let logits = [9.0f32, 0.1, 0.7, 0.2];
        assert_eq!(argmax_with_offset(&logits, 1), Some(1));
        assert_eq!(argmax_with_offset(&logits, 0), Some(0));
    }

    #[test]
    fn argmax_prefers_first_of_equal_scores() {
        let scores = [3u8, 7, 7, 1];
        assert_eq!(argmax_with_offset(&scores, 0), Some(1));
    }

    #[test]
    fn argmax_of_empty_range_is_none() {
        let scores = [1i8, 2];
        assert_eq!(argmax_with_offset(&scores, 2), None);
        assert_eq!(argmax_with_offset(&scores, 5), None);
    }

    #[test]
    fn top_k_orders_best_first() {
        let scores = [0.0f32, 0.5, 0.1, 0.9, 0.3];
        assert_eq!(top_k_with_offset(&scores, 3, 1), vec![2, 0, 3]);
    }

    #[test]
    fn top_k_agrees_with_argmax() {
        let scores = [4i32, -1, 12, 12, 3];
        assert_eq!(
            top_k_with_offset(&scores, 1, 0).first().copied(),
            argmax_with_offset(&scores, 0)
        );
    }
}
