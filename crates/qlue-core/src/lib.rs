//! Core domain model for Qlue report ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "qlue-core";

/// Feed-assigned contribution identifier. Monotonically assigned upstream, so it
/// doubles as the dedup key and the recency proxy.
pub type ReportId = i64;

/// WGS84 coordinates as delivered by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// The feed reports `0, 0` when the contributor shared no location.
    pub fn is_unknown(&self) -> bool {
        self.longitude == 0.0 && self.latitude == 0.0
    }

    /// `"lon lat"` pair in WKT coordinate order.
    pub fn wkt_coordinates(&self) -> String {
        format!("{} {}", self.longitude, self.latitude)
    }
}

/// One contribution pulled from the feed, normalized from the wire schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub content: String,
    pub title: String,
    pub photo: Option<String>,
    pub location: GeoPoint,
    pub author: String,
}

impl Report {
    pub fn has_location(&self) -> bool {
        !self.location.is_unknown()
    }
}

/// Feed pages are expected newest first. Early exit in the result filter relies on it.
pub fn is_newest_first(reports: &[Report]) -> bool {
    reports.windows(2).all(|pair| pair[0].id > pair[1].id)
}
