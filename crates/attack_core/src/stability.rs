//! Eigenvalues of a Jacobian and the equilibrium type they imply.

use std::fmt;

use nalgebra::DMatrix;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Tolerances;

/// One eigenvalue, always stored with both parts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Eigenvalue {
    pub real: f64,
    pub imag: f64,
}

impl Eigenvalue {
    pub fn new(real: f64, imag: f64) -> Self {
        Self { real, imag }
    }

    pub fn is_real(&self, threshold: f64) -> bool {
        self.imag.abs() <= threshold
    }

    /// Plain number when the imaginary part is noise, `{real, imag}` otherwise.
    pub fn to_wire(self, threshold: f64) -> WireEigenvalue {
        if self.is_real(threshold) {
            WireEigenvalue::Real(self.real)
        } else {
            WireEigenvalue::Complex {
                real: self.real,
                imag: self.imag,
            }
        }
    }
}

impl From<Complex64> for Eigenvalue {
    fn from(value: Complex64) -> Self {
        Self {
            real: value.re,
            imag: value.im,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireEigenvalue {
    Real(f64),
    Complex { real: f64, imag: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StabilityClass {
    #[serde(rename = "stable node")]
    StableNode,
    #[serde(rename = "unstable node")]
    UnstableNode,
    #[serde(rename = "saddle point")]
    SaddlePoint,
    #[serde(rename = "spiral sink")]
    SpiralSink,
    #[serde(rename = "spiral source")]
    SpiralSource,
    #[serde(rename = "center")]
    Center,
}

impl StabilityClass {
    pub fn as_str(self) -> &'static str {
        match self {
            StabilityClass::StableNode => "stable node",
            StabilityClass::UnstableNode => "unstable node",
            StabilityClass::SaddlePoint => "saddle point",
            StabilityClass::SpiralSink => "spiral sink",
            StabilityClass::SpiralSource => "spiral source",
            StabilityClass::Center => "center",
        }
    }
}

impl fmt::Display for StabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StabilityAnalysis {
    pub eigenvalues: Vec<Eigenvalue>,
    pub stability: StabilityClass,
}

/// Eigenvalues of the row-major `dim x dim` matrix, sorted by decreasing
/// real part (then decreasing imaginary part).
pub fn eigenvalues(dim: usize, jacobian: &[f64]) -> Vec<Eigenvalue> {
    let matrix = DMatrix::from_row_slice(dim, dim, jacobian);
    let mut values: Vec<Eigenvalue> = matrix
        .complex_eigenvalues()
        .iter()
        .map(|&lambda| Eigenvalue::from(lambda))
        .collect();
    values.sort_by(|a, b| b.real.total_cmp(&a.real).then(b.imag.total_cmp(&a.imag)));
    values
}

/// Classifies an equilibrium from its eigenvalues.
///
/// Parts within `threshold` of zero count as zero. Purely real spectra give
/// nodes or saddles; spectra with a complex pair give spirals. Anything with
/// a vanishing real part is reported as a center, and a complex spectrum
/// whose real parts have mixed signs as a saddle.
pub fn classify(eigenvalues: &[Eigenvalue], threshold: f64) -> StabilityClass {
    let has_complex = eigenvalues.iter().any(|e| !e.is_real(threshold));
    let any_negative = eigenvalues.iter().any(|e| e.real < -threshold);
    let any_positive = eigenvalues.iter().any(|e| e.real > threshold);
    let all_negative = eigenvalues.iter().all(|e| e.real < -threshold);
    let all_positive = eigenvalues.iter().all(|e| e.real > threshold);

    if eigenvalues.is_empty() {
        return StabilityClass::Center;
    }

    match (has_complex, all_negative, all_positive) {
        (false, true, _) => StabilityClass::StableNode,
        (false, _, true) => StabilityClass::UnstableNode,
        (true, true, _) => StabilityClass::SpiralSink,
        (true, _, true) => StabilityClass::SpiralSource,
        _ if any_negative && any_positive => StabilityClass::SaddlePoint,
        _ => StabilityClass::Center,
    }
}

/// Eigenvalues and classification of a row-major `dim x dim` Jacobian.
///
/// Never fails: a Jacobian with non-finite entries yields NaN eigenvalues and
/// the `center` fallback.
pub fn analyze(dim: usize, jacobian: &[f64], tolerances: &Tolerances) -> StabilityAnalysis {
    if jacobian.len() != dim * dim || jacobian.iter().any(|v| !v.is_finite()) {
        warn!("Jacobian is not a finite {dim}x{dim} matrix; skipping eigenvalue computation");
        return StabilityAnalysis {
            eigenvalues: vec![Eigenvalue::new(f64::NAN, 0.0); dim],
            stability: StabilityClass::Center,
        };
    }
    let eigenvalues = eigenvalues(dim, jacobian);
    let stability = classify(&eigenvalues, tolerances.classification_threshold);
    StabilityAnalysis {
        eigenvalues,
        stability,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TOL: f64 = 1e-10;

    fn diagonal(values: [f64; 4]) -> Vec<f64> {
        let mut out = vec![0.0; 16];
        for (i, v) in values.iter().enumerate() {
            out[i * 4 + i] = *v;
        }
        out
    }

    fn classify_matrix(matrix: &[f64]) -> StabilityClass {
        analyze(4, matrix, &Tolerances::default()).stability
    }

    #[test]
    fn diagonal_matrices_classify_as_nodes_and_saddles() {
        assert_eq!(classify_matrix(&diagonal([-1.0, -2.0, -3.0, -4.0])), StabilityClass::StableNode);
        assert_eq!(classify_matrix(&diagonal([1.0, 2.0, 3.0, 4.0])), StabilityClass::UnstableNode);
        assert_eq!(classify_matrix(&diagonal([-1.0, 2.0, -3.0, 4.0])), StabilityClass::SaddlePoint);
    }

    #[test]
    fn complex_pair_with_negative_real_part_is_spiral_sink() {
        #[rustfmt::skip]
        let matrix = [
            -1.0, 2.0, 0.0, 0.0,
            -2.0, -1.0, 0.0, 0.0,
            0.0, 0.0, -3.0, 0.0,
            0.0, 0.0, 0.0, -4.0,
        ];
        let analysis = analyze(4, &matrix, &Tolerances::default());
        assert_eq!(analysis.stability, StabilityClass::SpiralSink);
        let complex: Vec<_> = analysis
            .eigenvalues
            .iter()
            .filter(|e| !e.is_real(TOL))
            .collect();
        assert_eq!(complex.len(), 2);
        for e in complex {
            assert!((e.real + 1.0).abs() < 1e-9);
            assert!((e.imag.abs() - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn complex_pair_with_positive_real_parts_is_spiral_source() {
        #[rustfmt::skip]
        let matrix = [
            0.5, 3.0, 0.0, 0.0,
            -3.0, 0.5, 0.0, 0.0,
            0.0, 0.0, 2.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        assert_eq!(classify_matrix(&matrix), StabilityClass::SpiralSource);
    }

    #[test]
    fn zero_real_parts_are_centers() {
        assert_eq!(classify_matrix(&diagonal([-1.0, 0.0, -3.0, -4.0])), StabilityClass::Center);
        let rotation = [
            Eigenvalue::new(0.0, 1.0),
            Eigenvalue::new(0.0, -1.0),
            Eigenvalue::new(1e-12, 2.0),
            Eigenvalue::new(-1e-12, -2.0),
        ];
        assert_eq!(classify(&rotation, TOL), StabilityClass::Center);
    }

    #[test]
    fn complex_spectrum_with_mixed_signs_is_saddle() {
        let values = [
            Eigenvalue::new(-1.0, 2.0),
            Eigenvalue::new(-1.0, -2.0),
            Eigenvalue::new(0.5, 0.0),
            Eigenvalue::new(-3.0, 0.0),
        ];
        assert_eq!(classify(&values, TOL), StabilityClass::SaddlePoint);
    }

    #[test]
    fn non_finite_jacobian_falls_back_to_center() {
        let mut matrix = diagonal([-1.0, -2.0, -3.0, -4.0]);
        matrix[5] = f64::INFINITY;
        let analysis = analyze(4, &matrix, &Tolerances::default());
        assert_eq!(analysis.stability, StabilityClass::Center);
        assert_eq!(analysis.eigenvalues.len(), 4);
    }

    #[test]
    fn eigenvalues_are_sorted_by_real_part() {
        let values = eigenvalues(4, &diagonal([-1.0, 2.0, -3.0, 4.0]));
        let reals: Vec<f64> = values.iter().map(|e| e.real).collect();
        for (got, want) in reals.iter().zip([4.0, 2.0, -1.0, -3.0]) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn wire_format_drops_negligible_imaginary_parts() {
        let real = serde_json::to_value(Eigenvalue::new(-0.5, 1e-14).to_wire(TOL)).unwrap();
        assert_eq!(real, serde_json::json!(-0.5));
        let complex = serde_json::to_value(Eigenvalue::new(-0.5, 2.0).to_wire(TOL)).unwrap();
        assert_eq!(complex, serde_json::json!({ "real": -0.5, "imag": 2.0 }));
    }

    #[test]
    fn class_labels_match_serialized_names() {
        for class in [
            StabilityClass::StableNode,
            StabilityClass::UnstableNode,
            StabilityClass::SaddlePoint,
            StabilityClass::SpiralSink,
            StabilityClass::SpiralSource,
            StabilityClass::Center,
        ] {
            let json = serde_json::to_string(&class).unwrap();
            assert_eq!(json, format!("\"{class}\""));
        }
    }

    fn signed_magnitude() -> impl Strategy<Value = f64> {
        (0.01f64..100.0, any::<bool>()).prop_map(|(m, negative)| if negative { -m } else { m })
    }

    proptest! {
        #[test]
        fn diagonal_classification_follows_sign_pattern(
            a in signed_magnitude(),
            b in signed_magnitude(),
            c in signed_magnitude(),
            d in signed_magnitude(),
        ) {
            let values = [a, b, c, d];
            let expected = if values.iter().all(|v| *v < 0.0) {
                StabilityClass::StableNode
            } else if values.iter().all(|v| *v > 0.0) {
                StabilityClass::UnstableNode
            } else {
                StabilityClass::SaddlePoint
            };
            prop_assert_eq!(classify_matrix(&diagonal(values)), expected);
        }

        #[test]
        fn rotation_block_sign_decides_spiral_direction(
            re in 0.01f64..10.0,
            im in 0.1f64..10.0,
            rest in 0.01f64..10.0,
        ) {
            #[rustfmt::skip]
            let sink = [
                -re, im, 0.0, 0.0,
                -im, -re, 0.0, 0.0,
                0.0, 0.0, -rest, 0.0,
                0.0, 0.0, 0.0, -rest,
            ];
            prop_assert_eq!(classify_matrix(&sink), StabilityClass::SpiralSink);
            let source: Vec<f64> = sink.iter().map(|v| -v).collect();
            prop_assert_eq!(classify_matrix(&source), StabilityClass::SpiralSource);
        }
    }
}
