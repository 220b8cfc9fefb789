//! 4x4 affine helpers
//!
//! Affines are row-major `[f64; 16]` matrices mapping voxel indices to
//! world millimetres, the same convention as the NIfTI sform. Every spatial
//! artifact in the pipeline carries one, and stage boundaries compare them
//! instead of assuming same-space inputs.

use crate::error::{ExtractError, Result};

/// Identity affine.
pub const IDENTITY: [f64; 16] = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// Multiply two row-major 4x4 matrices: `a * b`.
pub fn mat_mul(a: &[f64; 16], b: &[f64; 16]) -> [f64; 16] {
    let mut out = [0.0; 16];
    for i in 0..4 {
        for j in 0..4 {
            let mut sum = 0.0;
            for k in 0..4 {
                sum += a[i * 4 + k] * b[k * 4 + j];
            }
            out[i * 4 + j] = sum;
        }
    }
    out
}

/// Apply an affine to a 3D point (homogeneous w = 1).
pub fn apply(m: &[f64; 16], p: [f64; 3]) -> [f64; 3] {
    [
        m[0] * p[0] + m[1] * p[1] + m[2] * p[2] + m[3],
        m[4] * p[0] + m[5] * p[1] + m[6] * p[2] + m[7],
        m[8] * p[0] + m[9] * p[1] + m[10] * p[2] + m[11],
    ]
}

/// Invert a 4x4 matrix by Gauss-Jordan elimination with partial pivoting.
///
/// Fails if the matrix is singular, which for a registration means the
/// file did not contain a usable transform.
pub fn invert(m: &[f64; 16]) -> Result<[f64; 16]> {
    let mut a = *m;
    let mut inv = IDENTITY;

    for col in 0..4 {
        // Pivot on the largest remaining entry in this column
        let mut pivot = col;
        for row in (col + 1)..4 {
            if a[row * 4 + col].abs() > a[pivot * 4 + col].abs() {
                pivot = row;
            }
        }
        if a[pivot * 4 + col].abs() < 1e-12 {
            return Err(ExtractError::invalid(
                "affine",
                "singular transform matrix cannot be inverted",
            ));
        }
        if pivot != col {
            for j in 0..4 {
                a.swap(col * 4 + j, pivot * 4 + j);
                inv.swap(col * 4 + j, pivot * 4 + j);
            }
        }

        let diag = a[col * 4 + col];
        for j in 0..4 {
            a[col * 4 + j] /= diag;
            inv[col * 4 + j] /= diag;
        }

        for row in 0..4 {
            if row == col {
                continue;
            }
            let factor = a[row * 4 + col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..4 {
                a[row * 4 + j] -= factor * a[col * 4 + j];
                inv[row * 4 + j] -= factor * inv[col * 4 + j];
            }
        }
    }

    Ok(inv)
}

/// Whether two affines agree within `tol` elementwise.
pub fn affines_close(a: &[f64; 16], b: &[f64; 16], tol: f64) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrip() {
        let p = [3.0, -2.5, 7.0];
        assert_eq!(apply(&IDENTITY, p), p);
        let inv = invert(&IDENTITY).unwrap();
        assert!(affines_close(&inv, &IDENTITY, 1e-12));
    }

    #[test]
    fn test_invert_translation_scale() {
        let m = [
            2.0, 0.0, 0.0, 10.0,
            0.0, 2.0, 0.0, -4.0,
            0.0, 0.0, 2.0, 1.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        let inv = invert(&m).unwrap();
        let prod = mat_mul(&m, &inv);
        assert!(affines_close(&prod, &IDENTITY, 1e-10));

        let p = [1.0, 2.0, 3.0];
        let back = apply(&inv, apply(&m, p));
        for i in 0..3 {
            assert!((back[i] - p[i]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_invert_singular_fails() {
        let mut m = IDENTITY;
        m[0] = 0.0; // zero row
        m[1] = 0.0;
        m[2] = 0.0;
        m[3] = 0.0;
        assert!(invert(&m).is_err());
    }

    #[test]
    fn test_mat_mul_order() {
        // Translation then scale is not scale then translation
        let t = [
            1.0, 0.0, 0.0, 5.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        let s = [
            2.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        let st = mat_mul(&s, &t);
        let ts = mat_mul(&t, &s);
        assert_eq!(apply(&st, [0.0; 3]), [10.0, 0.0, 0.0]);
        assert_eq!(apply(&ts, [0.0; 3]), [5.0, 0.0, 0.0]);
    }
}
