//! Final key/value states.

use std::fmt;

use crate::phase::{KeyIndex, key_path};

/// A mapping from key to integer value. Every key starts at 0.
///
/// Two states are equal iff they cover the same keys with the same values.
/// The total order exists only so result sets iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct State(Vec<i64>);

impl State {
    /// Returns the all-zero state over `num_keys` keys.
    pub fn zero(num_keys: usize) -> Self {
        Self(vec![0; num_keys])
    }

    /// Builds a state from per-key values, in key order.
    pub fn from_values(values: Vec<i64>) -> Self {
        Self(values)
    }

    /// Returns the value of `key`.
    pub fn get(&self, key: KeyIndex) -> i64 {
        self.0[key]
    }

    pub(crate) fn set(&mut self, key: KeyIndex, value: i64) {
        self.0[key] = value;
    }

    /// Returns the values in key order.
    pub fn values(&self) -> &[i64] {
        &self.0
    }

    /// Returns the number of keys.
    pub fn num_keys(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (key, value) in self.0.iter().enumerate() {
            if key > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={value}", key_path(key))?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_state() {
        let state = State::zero(3);
        assert_eq!(state.values(), &[0, 0, 0]);
        assert_eq!(state.num_keys(), 3);
    }

    #[test]
    fn test_value_equality() {
        let mut a = State::zero(2);
        a.set(1, 302);
        assert_eq!(a, State::from_values(vec![0, 302]));
        assert_ne!(a, State::from_values(vec![0, 302, 0]));
    }

    #[test]
    fn test_display() {
        let state = State::from_values(vec![102, 0]);
        assert_eq!(state.to_string(), "{/key0=102, /key1=0}");
    }
}
