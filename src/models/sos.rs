use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::AlertStatus;

/// Where the patient was when the alert fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            address: None,
        }
    }

    /// Reject coordinates outside the WGS84 range or non-finite values.
    pub fn validate(&self) -> Result<(), String> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("latitude out of range: {}", self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(format!("longitude out of range: {}", self.longitude));
        }
        Ok(())
    }
}

/// A single emergency event.
///
/// `notified_contacts` is a snapshot of who was entitled to the alert at
/// trigger time; it is written once right after creation and never again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SosAlert {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub location: Location,
    pub status: AlertStatus,
    pub notified_contacts: Vec<String>,
    pub trigger_time: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SosAlert {
    /// Fresh `active` alert with no contacts recorded yet.
    pub fn new(patient_id: Uuid, location: Location) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            patient_id,
            location,
            status: AlertStatus::Active,
            notified_contacts: Vec::new(),
            trigger_time: now,
            resolved_at: None,
            created_at: now,
        }
    }
}
