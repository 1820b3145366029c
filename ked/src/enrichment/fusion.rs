//! Weighted fusion of transcript, professional and personality vectors.

use crate::config::FusionWeights;
use crate::error::{KedError, Result};

/// Fused vector plus the weights that actually contributed.
#[derive(Debug, Clone, PartialEq)]
pub struct Fusion {
    pub vector: Vec<f32>,
    pub weights: FusionWeights,
    pub components: Vec<String>,
}

pub struct FusionEngine {
    weights: FusionWeights,
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn usable<'a>(name: &str, v: Option<&'a [f32]>, dim: usize) -> Option<&'a [f32]> {
    let v = v?;
    if v.len() != dim {
        tracing::warn!(
            component = name,
            expected = dim,
            actual = v.len(),
            "Dropping fusion component with mismatched dimension"
        );
        return None;
    }
    if v.iter().any(|x| !x.is_finite()) {
        tracing::warn!(component = name, "Dropping fusion component with non-finite values");
        return None;
    }
    Some(v)
}

impl FusionEngine {
    pub fn new(weights: FusionWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> FusionWeights {
        self.weights
    }

    /// `w_t·transcript + w_p·professional + w_s·personality`, L2-normalized.
    ///
    /// Missing or unusable components count as zero vectors. A zero sum falls
    /// back to the transcript vector as given.
    pub fn fuse(
        &self,
        transcript: &[f32],
        professional: Option<&[f32]>,
        personality: Option<&[f32]>,
    ) -> Result<Fusion> {
        if transcript.is_empty() {
            return Err(KedError::Validation(
                "transcript vector must not be empty".to_string(),
            ));
        }
        if transcript.iter().any(|x| !x.is_finite()) {
            return Err(KedError::Validation(
                "transcript vector contains non-finite values".to_string(),
            ));
        }

        let dim = transcript.len();
        let professional = usable("professional", professional, dim);
        let personality = usable("personality", personality, dim);

        let used = FusionWeights {
            transcript: self.weights.transcript,
            professional: if professional.is_some() {
                self.weights.professional
            } else {
                0.0
            },
            personality: if personality.is_some() {
                self.weights.personality
            } else {
                0.0
            },
        };

        let mut components = vec!["transcript".to_string()];
        let mut fused: Vec<f32> = transcript.iter().map(|x| x * used.transcript).collect();
        for (name, vector, weight) in [
            ("professional", professional, used.professional),
            ("personality", personality, used.personality),
        ] {
            if let Some(vector) = vector {
                components.push(name.to_string());
                for (acc, x) in fused.iter_mut().zip(vector) {
                    *acc += x * weight;
                }
            }
        }

        let norm = l2_norm(&fused);
        let vector = if norm > f32::EPSILON && norm.is_finite() {
            fused.into_iter().map(|x| x / norm).collect()
        } else {
            transcript.to_vec()
        };

        Ok(Fusion {
            vector,
            weights: used,
            components,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> FusionEngine {
        FusionEngine::new(FusionWeights::default())
    }

    fn assert_unit(v: &[f32]) {
        assert!((l2_norm(v) - 1.0).abs() < 1e-5, "norm {}", l2_norm(v));
    }

    #[test]
    fn test_transcript_only_equals_normalized_transcript() {
        let t = [3.0, 4.0, 0.0];
        let fused = engine().fuse(&t, None, None).unwrap();
        assert_unit(&fused.vector);
        assert!((fused.vector[0] - 0.6).abs() < 1e-6);
        assert!((fused.vector[1] - 0.8).abs() < 1e-6);
        assert_eq!(fused.components, vec!["transcript"]);
        assert_eq!(fused.weights.professional, 0.0);
        assert_eq!(fused.weights.personality, 0.0);
    }

    #[test]
    fn test_all_components_weighted() {
        let fused = engine()
            .fuse(&[1.0, 0.0], Some(&[0.0, 1.0]), Some(&[1.0, 1.0]))
            .unwrap();
        // 0.4*[1,0] + 0.4*[0,1] + 0.2*[1,1] = [0.6, 0.6]
        assert_unit(&fused.vector);
        assert!((fused.vector[0] - fused.vector[1]).abs() < 1e-6);
        assert_eq!(fused.weights, FusionWeights::default());
        assert_eq!(fused.components.len(), 3);
    }

    #[test]
    fn test_mismatched_dimension_is_treated_as_missing() {
        let fused = engine()
            .fuse(&[1.0, 0.0], Some(&[1.0, 0.0, 0.0]), None)
            .unwrap();
        assert_eq!(fused.components, vec!["transcript"]);
        assert_unit(&fused.vector);
        assert_eq!(fused.vector[1], 0.0);
    }

    #[test]
    fn test_zero_sum_falls_back_to_transcript() {
        let fused = engine()
            .fuse(&[1.0, 0.0], Some(&[-1.0, 0.0]), None)
            .unwrap();
        // 0.4*[1,0] + 0.4*[-1,0] is the zero vector.
        assert_eq!(fused.vector, vec![1.0, 0.0]);

        let zero = engine().fuse(&[0.0, 0.0], None, None).unwrap();
        assert_eq!(zero.vector, vec![0.0, 0.0]);
    }

    #[test]
    fn test_custom_weights() {
        let engine = FusionEngine::new(FusionWeights {
            transcript: 1.0,
            professional: 0.0,
            personality: 0.0,
        });
        let fused = engine.fuse(&[0.0, 2.0], Some(&[5.0, 0.0]), None).unwrap();
        assert_eq!(fused.vector, vec![0.0, 1.0]);
    }

    #[test]
    fn test_empty_transcript_is_rejected() {
        assert!(matches!(
            engine().fuse(&[], None, None),
            Err(KedError::Validation(_))
        ));
        assert!(matches!(
            engine().fuse(&[f32::NAN], None, None),
            Err(KedError::Validation(_))
        ));
    }

    #[test]
    fn test_deterministic() {
        let e = engine();
        let a = e.fuse(&[0.1, 0.2, 0.3], Some(&[0.3, 0.2, 0.1]), Some(&[0.5, 0.5, 0.5])).unwrap();
        let b = e.fuse(&[0.1, 0.2, 0.3], Some(&[0.3, 0.2, 0.1]), Some(&[0.5, 0.5, 0.5])).unwrap();
        assert_eq!(a, b);
    }
}
