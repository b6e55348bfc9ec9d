//! Locker cells of a parcel automat.

use common::{AutomatId, CellId};
use serde::{Deserialize, Serialize};

use super::good::Dimensions;

/// Status of a locker cell.
///
/// ```text
/// Available ──► Reserved ──► Occupied ──► Opened
///     ▲            │            │           │
///     └────────────┴────────────┴───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    #[default]
    Available,
    Reserved,
    Occupied,
    Opened,
}

status_strings!(CellStatus, "cell", {
    Available => "available",
    Reserved => "reserved",
    Occupied => "occupied",
    Opened => "opened",
});

/// A cell in either the external (customer-facing) or internal (transfer) pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockerCell {
    pub id: CellId,
    pub automat_id: AutomatId,
    /// Position of the cell inside its automat; pools are ordered by it.
    pub number: u32,
    pub dimensions: Dimensions,
    pub status: CellStatus,
}

impl LockerCell {
    /// Creates an available cell.
    pub fn new(automat_id: AutomatId, number: u32, dimensions: Dimensions) -> Self {
        Self {
            id: CellId::new(),
            automat_id,
            number,
            dimensions,
            status: CellStatus::Available,
        }
    }

    /// Returns true if a good with the given dimensions fits into this cell.
    ///
    /// Weight is not a constraint for cells.
    pub fn fits(&self, good: &Dimensions) -> bool {
        self.dimensions.height >= good.height
            && self.dimensions.length >= good.length
            && self.dimensions.width >= good.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits() {
        let cell = LockerCell::new(AutomatId::new(), 1, Dimensions::new(0.0, 30.0, 30.0, 30.0));
        assert!(cell.fits(&Dimensions::new(5.0, 30.0, 10.0, 10.0)));
        assert!(cell.fits(&Dimensions::zero()));
        assert!(!cell.fits(&Dimensions::new(1.0, 31.0, 10.0, 10.0)));
        assert!(!cell.fits(&Dimensions::new(1.0, 10.0, 10.0, 30.5)));
    }

    #[test]
    fn test_status_parse_and_display() {
        for status in CellStatus::ALL {
            assert_eq!(status.as_str().parse::<CellStatus>().unwrap(), *status);
        }
        assert!("broken".parse::<CellStatus>().is_err());
        assert_eq!(CellStatus::Occupied.to_string(), "occupied");
    }
}
