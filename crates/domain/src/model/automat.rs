//! Parcel automats (locker installations).

use common::AutomatId;
use serde::{Deserialize, Serialize};

/// A physical parcel-locker installation with external and internal cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelAutomat {
    pub id: AutomatId,
    pub ip_address: String,
    pub city: String,
    pub address: String,
    pub number_of_cells: u32,
    /// Landing coordinates as "lat,lon".
    pub coordinates: String,
    /// ArUco marker the drone lands on.
    pub aruco_id: i32,
    pub is_working: bool,
}

impl ParcelAutomat {
    /// Creates a working automat.
    pub fn new(
        city: impl Into<String>,
        address: impl Into<String>,
        coordinates: impl Into<String>,
        aruco_id: i32,
    ) -> Self {
        Self {
            id: AutomatId::new(),
            ip_address: String::new(),
            city: city.into(),
            address: address.into(),
            number_of_cells: 0,
            coordinates: coordinates.into(),
            aruco_id,
            is_working: true,
        }
    }
}
