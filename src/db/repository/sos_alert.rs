use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::parse_uuid;
use crate::db::DatabaseError;
use crate::models::{AlertStatus, Location, SosAlert};

const ALERT_COLUMNS: &str = "id, patient_id, latitude, longitude, address, status,
     notified_contacts, trigger_time, resolved_at, created_at";

struct AlertRow {
    id: String,
    patient_id: String,
    latitude: f64,
    longitude: f64,
    address: Option<String>,
    status: String,
    notified_contacts: String,
    trigger_time: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

fn read_alert_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRow> {
    Ok(AlertRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        address: row.get(4)?,
        status: row.get(5)?,
        notified_contacts: row.get(6)?,
        trigger_time: row.get(7)?,
        resolved_at: row.get(8)?,
        created_at: row.get(9)?,
    })
}

impl AlertRow {
    fn into_alert(self) -> Result<SosAlert, DatabaseError> {
        let notified_contacts: Vec<String> = serde_json::from_str(&self.notified_contacts)
            .map_err(|e| DatabaseError::ConstraintViolation(format!("notified_contacts: {e}")))?;
        Ok(SosAlert {
            id: parse_uuid(&self.id)?,
            patient_id: parse_uuid(&self.patient_id)?,
            location: Location {
                latitude: self.latitude,
                longitude: self.longitude,
                address: self.address,
            },
            status: AlertStatus::from_str(&self.status)?,
            notified_contacts,
            trigger_time: self.trigger_time,
            resolved_at: self.resolved_at,
            created_at: self.created_at,
        })
    }
}

pub fn insert_sos_alert(conn: &Connection, alert: &SosAlert) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO sos_alerts
         (id, patient_id, latitude, longitude, address, status,
          trigger_time, resolved_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            alert.id.to_string(),
            alert.patient_id.to_string(),
            alert.location.latitude,
            alert.location.longitude,
            alert.location.address,
            alert.status.as_str(),
            alert.trigger_time,
            alert.resolved_at,
            alert.created_at,
        ],
    )?;
    Ok(())
}

/// Store the recipient snapshot. Succeeds once per alert; any later call
/// is a constraint violation and leaves the stored list untouched.
pub fn record_notified_contacts(
    conn: &Connection,
    alert_id: &Uuid,
    contacts: &[String],
) -> Result<(), DatabaseError> {
    let encoded = serde_json::to_string(contacts)
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
    let n = conn.execute(
        "UPDATE sos_alerts SET notified_contacts = ?2, contacts_recorded = 1
         WHERE id = ?1 AND contacts_recorded = 0",
        params![alert_id.to_string(), encoded],
    )?;
    if n == 0 {
        return Err(DatabaseError::ConstraintViolation(format!(
            "notified contacts already recorded for alert {alert_id}"
        )));
    }
    Ok(())
}

pub fn get_sos_alert(conn: &Connection, id: &Uuid) -> Result<Option<SosAlert>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {ALERT_COLUMNS} FROM sos_alerts WHERE id = ?1"),
            [id.to_string()],
            read_alert_row,
        )
        .optional()?;
    row.map(AlertRow::into_alert).transpose()
}

/// Alerts raised by the patient, newest first.
pub fn list_sos_alerts_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<SosAlert>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ALERT_COLUMNS} FROM sos_alerts
         WHERE patient_id = ?1
         ORDER BY trigger_time DESC, rowid DESC"
    ))?;
    let rows = stmt.query_map([patient_id.to_string()], read_alert_row)?;

    let mut alerts = Vec::new();
    for row in rows {
        alerts.push(row?.into_alert()?);
    }
    Ok(alerts)
}

/// Move an active alert to a terminal status. Returns false when the alert
/// is missing or no longer active.
pub fn close_sos_alert(
    conn: &Connection,
    id: &Uuid,
    status: AlertStatus,
    resolved_at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let n = conn.execute(
        "UPDATE sos_alerts SET status = ?2, resolved_at = ?3
         WHERE id = ?1 AND status = 'active'",
        params![id.to_string(), status.as_str(), resolved_at],
    )?;
    Ok(n > 0)
}
