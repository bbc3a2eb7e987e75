use serde::{Deserialize, Serialize};

/// Converts a value from instrument units into display units.
pub trait UnitTransform {
    fn apply(&self, value: f64) -> f64;
}

impl<F> UnitTransform for F
where
    F: Fn(f64) -> f64,
{
    fn apply(&self, value: f64) -> f64 {
        self(value)
    }
}

/// Multiply by a unit multiplier, then divide by a normalization divider
/// (electrode area, active mass, ...).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Scale {
    pub multiplier: f64,
    pub divider: f64,
}

impl Scale {
    pub const IDENTITY: Scale = Scale {
        multiplier: 1.0,
        divider: 1.0,
    };

    pub fn multiplier(multiplier: f64) -> Self {
        Self {
            multiplier,
            divider: 1.0,
        }
    }

    /// Zero or non-finite dividers fall back to 1.
    pub fn normalized(multiplier: f64, divider: f64) -> Self {
        let divider = if divider.is_finite() && divider != 0.0 {
            divider
        } else {
            1.0
        };
        Self {
            multiplier,
            divider,
        }
    }
}

impl Default for Scale {
    fn default() -> Self {
        Scale::IDENTITY
    }
}

impl UnitTransform for Scale {
    fn apply(&self, value: f64) -> f64 {
        value * self.multiplier / self.divider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_leaves_values_alone() {
        assert_eq!(Scale::IDENTITY.apply(3.25), 3.25);
        assert_eq!(Scale::default(), Scale::IDENTITY);
    }

    #[test]
    fn multiplier_then_divider() {
        let scale = Scale::normalized(1000.0, 4.0);
        assert!((scale.apply(0.5) - 125.0).abs() < 1e-12);
    }

    #[test]
    fn bad_divider_falls_back_to_one() {
        assert_eq!(Scale::normalized(2.0, 0.0).divider, 1.0);
        assert_eq!(Scale::normalized(2.0, f64::NAN).divider, 1.0);
    }

    #[test]
    fn closures_are_transforms() {
        let to_minutes = |seconds: f64| seconds / 60.0;
        assert_eq!(UnitTransform::apply(&to_minutes, 120.0), 2.0);
    }
}
