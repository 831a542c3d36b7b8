//! Weighted combination of visual and textual embeddings.
//!
//! A found item is embedded twice: once from the vision model's description
//! of its images, once from its title/description/tags text. The stored
//! vector is the elementwise weighted sum of the two. Pure computation,
//! no I/O; callers supply already-computed vectors.

#[derive(Debug, thiserror::Error)]
pub enum CombineError {
    #[error("Dimension mismatch: visual {visual}, text {text}")]
    DimensionMismatch { visual: usize, text: usize },
}

/// Combine a visual-feature embedding and a textual embedding into one
/// vector: `c[i] = visual[i]*visual_weight + text[i]*text_weight`.
///
/// Fails when the two vectors disagree on dimensionality, which indicates
/// embedding-model version skew and must never be coerced.
pub fn combine(
    visual: &[f32],
    text: &[f32],
    visual_weight: f32,
    text_weight: f32,
) -> Result<Vec<f32>, CombineError> {
    if visual.len() != text.len() {
        return Err(CombineError::DimensionMismatch {
            visual: visual.len(),
            text: text.len(),
        });
    }

    Ok(visual
        .iter()
        .zip(text.iter())
        .map(|(v, t)| v * visual_weight + t * text_weight)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_sum() {
        let visual = vec![1.0, 0.0, 0.5];
        let text = vec![0.0, 1.0, 0.5];

        let combined = combine(&visual, &text, 0.6, 0.4).unwrap();
        assert_eq!(combined, vec![0.6, 0.4, 0.5]);
    }

    #[test]
    fn test_deterministic() {
        let visual: Vec<f32> = (0..128).map(|i| (i as f32).sin()).collect();
        let text: Vec<f32> = (0..128).map(|i| (i as f32).cos()).collect();

        let a = combine(&visual, &text, 0.6, 0.4).unwrap();
        let b = combine(&visual, &text, 0.6, 0.4).unwrap();
        // bit-identical, not merely approximately equal
        assert_eq!(a, b);
    }

    #[test]
    fn test_dimension_mismatch() {
        let visual = vec![0.0; 1536];
        let text = vec![0.0; 768];

        let result = combine(&visual, &text, 0.6, 0.4);
        assert!(matches!(
            result,
            Err(CombineError::DimensionMismatch { visual: 1536, text: 768 })
        ));
    }

    #[test]
    fn test_zero_visual_weight_degenerates_to_text() {
        let visual = vec![9.0, 9.0];
        let text = vec![0.25, -0.5];

        let combined = combine(&visual, &text, 0.0, 1.0).unwrap();
        assert_eq!(combined, text);
    }
}
