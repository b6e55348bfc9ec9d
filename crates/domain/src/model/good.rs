//! Goods held in the warehouse locker wall.

use common::GoodId;
use serde::{Deserialize, Serialize};

/// Physical dimensions of a good or a locker cell.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub weight: f64,
    pub height: f64,
    pub length: f64,
    pub width: f64,
}

impl Dimensions {
    /// Creates dimensions from weight, height, length and width.
    pub fn new(weight: f64, height: f64, length: f64, width: f64) -> Self {
        Self {
            weight,
            height,
            length,
            width,
        }
    }

    /// Zero-sized dimensions; every cell fits them.
    pub fn zero() -> Self {
        Self::default()
    }
}

/// A catalog item with an available stock quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Good {
    pub id: GoodId,
    pub name: String,
    pub dimensions: Dimensions,
    /// Never negative; repositories reject adjustments below zero.
    pub quantity_available: i64,
}

impl Good {
    /// Creates a new good with a fresh id.
    pub fn new(name: impl Into<String>, dimensions: Dimensions, quantity_available: i64) -> Self {
        Self {
            id: GoodId::new(),
            name: name.into(),
            dimensions,
            quantity_available,
        }
    }

    /// Returns true if at least one unit can be reserved.
    pub fn in_stock(&self) -> bool {
        self.quantity_available > 0
    }
}
