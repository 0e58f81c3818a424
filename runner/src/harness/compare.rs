use serde::{Deserialize, Serialize};

/// Allowed deviation for floating point outputs, ignored by exact types
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Tolerance {
    pub absolute: f64,
    pub relative: f64,
}

impl Tolerance {
    pub const EXACT: Tolerance = Tolerance {
        absolute: 0.0,
        relative: 0.0,
    };

    pub fn absolute(epsilon: f64) -> Self {
        Self {
            absolute: epsilon,
            relative: 0.0,
        }
    }

    pub fn relative(epsilon: f64) -> Self {
        Self {
            absolute: 0.0,
            relative: epsilon,
        }
    }

    pub fn close(&self, actual: f64, expected: f64) -> bool {
        if actual == expected || (actual.is_nan() && expected.is_nan()) {
            return true;
        }

        let difference = (actual - expected).abs();
        let scale = actual.abs().max(expected.abs());

        difference <= self.absolute || difference <= self.relative * scale
    }
}

/// Equality under a [`Tolerance`]
pub trait Approx {
    fn approx_eq(&self, expected: &Self, tolerance: &Tolerance) -> bool;
}

macro_rules! exact {
    ($($ty:ty),*) => {
        $(
            impl Approx for $ty {
                fn approx_eq(&self, expected: &Self, _tolerance: &Tolerance) -> bool {
                    self == expected
                }
            }
        )*
    };
}

exact!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, bool, char, String, ());

impl Approx for f64 {
    fn approx_eq(&self, expected: &Self, tolerance: &Tolerance) -> bool {
        tolerance.close(*self, *expected)
    }
}

impl Approx for f32 {
    fn approx_eq(&self, expected: &Self, tolerance: &Tolerance) -> bool {
        tolerance.close(f64::from(*self), f64::from(*expected))
    }
}

impl<T: Approx> Approx for Vec<T> {
    fn approx_eq(&self, expected: &Self, tolerance: &Tolerance) -> bool {
        self.len() == expected.len()
            && self
                .iter()
                .zip(expected.iter())
                .all(|(actual, expected)| actual.approx_eq(expected, tolerance))
    }
}

impl<T: Approx> Approx for Option<T> {
    fn approx_eq(&self, expected: &Self, tolerance: &Tolerance) -> bool {
        match (self, expected) {
            (Some(actual), Some(expected)) => actual.approx_eq(expected, tolerance),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<A: Approx, B: Approx> Approx for (A, B) {
    fn approx_eq(&self, expected: &Self, tolerance: &Tolerance) -> bool {
        self.0.approx_eq(&expected.0, tolerance) && self.1.approx_eq(&expected.1, tolerance)
    }
}

impl<A: Approx, B: Approx, C: Approx> Approx for (A, B, C) {
    fn approx_eq(&self, expected: &Self, tolerance: &Tolerance) -> bool {
        self.0.approx_eq(&expected.0, tolerance)
            && self.1.approx_eq(&expected.1, tolerance)
            && self.2.approx_eq(&expected.2, tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_ignore_tolerance() {
        assert!(5i64.approx_eq(&5, &Tolerance::absolute(10.0)));
        assert!(!5i64.approx_eq(&6, &Tolerance::absolute(10.0)));
    }

    #[test]
    fn floats_use_absolute_or_relative_bound() {
        assert!(!1.0f64.approx_eq(&1.001, &Tolerance::EXACT));
        assert!(1.0f64.approx_eq(&1.001, &Tolerance::absolute(1e-2)));
        assert!(1000.0f64.approx_eq(&1000.5, &Tolerance::relative(1e-3)));
        assert!(!1000.0f64.approx_eq(&1002.0, &Tolerance::relative(1e-3)));
        assert!(f64::NAN.approx_eq(&f64::NAN, &Tolerance::EXACT));
    }

    #[test]
    fn sequences_compare_element_wise() {
        let tolerance = Tolerance::absolute(0.1);

        assert!(vec![1.0, 2.0].approx_eq(&vec![1.05, 1.95], &tolerance));
        assert!(!vec![1.0, 2.0].approx_eq(&vec![1.0], &tolerance));
        assert!(("abc".to_string(), 1.0).approx_eq(&("abc".to_string(), 1.01), &tolerance));
    }
}
