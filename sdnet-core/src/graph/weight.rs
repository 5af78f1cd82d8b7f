//! Edge weights
//!
//! A weight is a non-negative cost. Negative weights are the traversal
//! exclusion sentinel: an edge weighed [`Weight::NON_VIABLE`] is invisible
//! to every search.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Weight(f64);

impl Weight {
    pub const ZERO: Weight = Weight(0.0);
    pub const NON_VIABLE: Weight = Weight(-1.0);

    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_viable(&self) -> bool {
        self.0 >= 0.0 && self.0.is_finite()
    }
}

impl Add for Weight {
    type Output = Weight;

    fn add(self, rhs: Weight) -> Weight {
        Weight(self.0 + rhs.0)
    }
}

impl From<f64> for Weight {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Assigns a traversal cost to edges
pub trait EdgeWeigher<E>: Send + Sync {
    fn weight(&self, edge: &E) -> Weight;
}

impl<E, F> EdgeWeigher<E> for F
where
    F: Fn(&E) -> Weight + Send + Sync,
{
    fn weight(&self, edge: &E) -> Weight {
        self(edge)
    }
}

/// Every edge costs one hop
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitWeigher;

impl<E> EdgeWeigher<E> for UnitWeigher {
    fn weight(&self, _edge: &E) -> Weight {
        Weight(1.0)
    }
}
