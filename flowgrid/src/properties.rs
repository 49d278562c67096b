//! Named, bounded properties.
//!
//! Tunable knobs are exposed by name so that frontends can list and change them at runtime
//! without knowing the concrete type behind them.

use crate::prelude::v1::*;
use std::ops::{Deref, DerefMut};

/// Object with custom properties.
pub trait Properties {
    /// Get available properties.
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        vec![]
    }

    fn props(&mut self) -> Vec<(&str, Property)> {
        self.props_mut()
            .into_iter()
            .map(|(n, p)| (n, p.into()))
            .collect()
    }

    /// Set a property by name.
    ///
    /// The value is clamped to the property bounds. Fails if there is no property with the
    /// name, or if its type does not match.
    fn set_prop(&mut self, name: &str, value: &Property) -> Result<()> {
        let mut props = self.props_mut();
        let (_, prop) = props
            .iter_mut()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| anyhow!("Unknown property \"{name}\""))?;
        prop.set(value)
    }

    /// Set a property by name, parsing the value from a string.
    fn set_prop_str(&mut self, name: &str, value: &str) -> Result<()> {
        let mut props = self.props_mut();
        let (_, prop) = props
            .iter_mut()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| anyhow!("Unknown property \"{name}\""))?;
        prop.parse(value)
    }
}

/// Property with a lower and upper bound.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct BoundedProp<T> {
    pub val: T,
    pub min: T,
    pub max: T,
}

impl<T> Deref for BoundedProp<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.val
    }
}

impl<T> DerefMut for BoundedProp<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.val
    }
}

impl<'a, T: Copy> From<BoundedPropMut<'a, T>> for BoundedProp<T> {
    fn from(BoundedPropMut { val, min, max }: BoundedPropMut<'a, T>) -> Self {
        Self {
            val: *val,
            min,
            max,
        }
    }
}

fn clamp_partial<T: PartialOrd + Copy>(val: T, min: T, max: T) -> T {
    if val < min {
        min
    } else if val > max {
        max
    } else {
        val
    }
}

/// Describes the type of a property.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub enum Property {
    Float(BoundedProp<f32>),
    Usize(BoundedProp<usize>),
}

impl Property {
    /// Unbounded float value, for use with [`Properties::set_prop`].
    pub fn float(val: f32) -> Self {
        Self::Float(BoundedProp {
            val,
            min: f32::MIN,
            max: f32::MAX,
        })
    }

    /// Unbounded integer value, for use with [`Properties::set_prop`].
    pub fn usize(val: usize) -> Self {
        Self::Usize(BoundedProp {
            val,
            min: usize::MIN,
            max: usize::MAX,
        })
    }
}

impl<'a> From<PropertyMut<'a>> for Property {
    fn from(prop: PropertyMut<'a>) -> Self {
        match prop {
            PropertyMut::Float(p) => Self::Float(p.into()),
            PropertyMut::Usize(p) => Self::Usize(p.into()),
        }
    }
}

/// Property with a lower and upper bound.
pub struct BoundedPropMut<'a, T> {
    pub val: &'a mut T,
    pub min: T,
    pub max: T,
}

impl<'a, T> Deref for BoundedPropMut<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.val
    }
}

impl<'a, T> DerefMut for BoundedPropMut<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.val
    }
}

impl<'a, T: PartialOrd + Copy> BoundedPropMut<'a, T> {
    /// Clamp the underlying value between the lower and upper bounds.
    pub fn clamp(&mut self) {
        *self.val = clamp_partial(*self.val, self.min, self.max);
    }
}

/// Describes the type of a property.
pub enum PropertyMut<'a> {
    Float(BoundedPropMut<'a, f32>),
    Usize(BoundedPropMut<'a, usize>),
}

impl<'a> PropertyMut<'a> {
    /// Create a floating point property.
    ///
    /// # Arguments
    ///
    /// * `val` - reference to the underlying float to be mutated.
    /// * `min` - lowest value for the property.
    /// * `max` - highest value for the property.
    pub fn float(val: &'a mut f32, min: f32, max: f32) -> Self {
        Self::Float(BoundedPropMut { val, min, max })
    }

    /// Create an integer property.
    ///
    /// # Arguments
    ///
    /// * `val` - reference to the underlying usize to be mutated.
    /// * `min` - lowest value for the property.
    /// * `max` - highest value for the property.
    pub fn usize(val: &'a mut usize, min: usize, max: usize) -> Self {
        Self::Usize(BoundedPropMut { val, min, max })
    }

    /// Copy the value of `other`, clamped to own bounds.
    pub fn set(&mut self, other: &Property) -> Result<()> {
        match (self, other) {
            (Self::Float(val), Property::Float(oval)) => {
                if !oval.val.is_finite() {
                    return Err(anyhow!("Non-finite value {}", oval.val));
                }
                *val.val = oval.val;
                val.clamp();
            }
            (Self::Usize(val), Property::Usize(oval)) => {
                *val.val = oval.val;
                val.clamp();
            }
            _ => return Err(anyhow!("Property type mismatch")),
        }
        Ok(())
    }

    /// Parse and set the value from a string.
    pub fn parse(&mut self, value: &str) -> Result<()> {
        let value = value.trim();
        let prop = match self {
            Self::Float(_) => Property::float(value.parse()?),
            Self::Usize(_) => Property::usize(value.parse()?),
        };
        self.set(&prop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Knobs {
        gain: f32,
        count: usize,
    }

    impl Properties for Knobs {
        fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
            vec![
                ("Gain", PropertyMut::float(&mut self.gain, 0.0, 2.0)),
                ("Count", PropertyMut::usize(&mut self.count, 1, 10)),
            ]
        }
    }

    #[test]
    fn set_and_clamp() {
        let mut knobs = Knobs::default();

        knobs.set_prop("Gain", &Property::float(1.5)).unwrap();
        assert_eq!(knobs.gain, 1.5);

        knobs.set_prop("Gain", &Property::float(5.0)).unwrap();
        assert_eq!(knobs.gain, 2.0);

        knobs.set_prop("Count", &Property::usize(0)).unwrap();
        assert_eq!(knobs.count, 1);
    }

    #[test]
    fn set_errors() {
        let mut knobs = Knobs::default();
        assert!(knobs.set_prop("Missing", &Property::float(1.0)).is_err());
        assert!(knobs.set_prop("Gain", &Property::usize(1)).is_err());
        assert!(knobs.set_prop("Gain", &Property::float(f32::NAN)).is_err());
    }

    #[test]
    fn parse_from_str() {
        let mut knobs = Knobs::default();
        knobs.set_prop_str("Gain", " 0.25").unwrap();
        knobs.set_prop_str("Count", "7").unwrap();
        assert_eq!(knobs.gain, 0.25);
        assert_eq!(knobs.count, 7);
        assert!(knobs.set_prop_str("Count", "seven").is_err());
    }

    #[test]
    fn listing() {
        let mut knobs = Knobs {
            gain: 1.0,
            count: 3,
        };
        let props = knobs.props();
        assert_eq!(props.len(), 2);
        assert_eq!(
            props[1],
            (
                "Count",
                Property::Usize(BoundedProp {
                    val: 3,
                    min: 1,
                    max: 10
                })
            )
        );
    }
}
