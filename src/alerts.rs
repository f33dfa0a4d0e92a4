//! Alert dispatcher.
//!
//! Persists SOS alerts with their recipient snapshot and fans events out
//! to the patient's room. The durable record always wins: a failed publish
//! is logged and never undoes or fails the write.
//!
//! A client that raises SOS on its socket and then posts it over REST
//! produces two `sos_alert` frames in the room: the relayed one and the
//! persisted one. Only the persisted frame carries `alertId`, so caregiver
//! clients should de-duplicate by `patientId` and timestamp.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use crate::caregivers::{self, CaregiverError};
use crate::db::{repository, DatabaseError};
use crate::models::{
    Account, AlertStatus, CaregiverContact, Location, MedicationStatus, Permission, SosAlert,
};
use crate::realtime::{
    Audience, Broadcast, Delivery, MedicationUpdatePayload, RoomKey, ServerEvent,
    SosAlertPayload,
};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid location: {0}")]
    InvalidLocation(String),
    #[error("Medicine name must not be empty")]
    MissingMedicine,
    #[error("An alert can only be closed as resolved or false_alarm")]
    InvalidStatus,
    #[error("SOS alert not found")]
    NotFound,
    #[error("SOS alert is already {0}")]
    AlreadyClosed(AlertStatus),
    #[error("Caregiver lookup failed: {0}")]
    Directory(#[from] CaregiverError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for DispatchError {
    fn from(e: rusqlite::Error) -> Self {
        DispatchError::Database(DatabaseError::Sqlite(e))
    }
}

/// The patient plus everyone in `contacts`.
fn audience_for(patient_id: Uuid, contacts: Vec<CaregiverContact>) -> Audience {
    let accounts = std::iter::once(patient_id)
        .chain(contacts.iter().filter_map(|c| c.account_id))
        .collect::<Vec<_>>();
    Audience::restricted(accounts, contacts.into_iter().map(|c| c.email))
}

pub struct AlertDispatcher {
    channel: Arc<dyn Broadcast>,
}

impl AlertDispatcher {
    pub fn new(channel: Arc<dyn Broadcast>) -> Self {
        Self { channel }
    }

    /// Publish and swallow failures. Returns what was delivered, if anything.
    fn publish(&self, patient_id: &Uuid, event: ServerEvent, audience: &Audience) -> Delivery {
        let room = RoomKey::patient(patient_id);
        match self.channel.publish(&room, event, audience) {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::warn!(room = %room, error = %e, "Broadcast failed");
                Delivery::default()
            }
        }
    }

    /// Record an SOS and notify the patient's room.
    ///
    /// The alert row and its recipient snapshot are committed together
    /// before anything is published.
    pub fn trigger_sos(
        &self,
        conn: &Connection,
        patient_id: Uuid,
        location: Location,
    ) -> Result<SosAlert, DispatchError> {
        location.validate().map_err(DispatchError::InvalidLocation)?;

        let mut alert = SosAlert::new(patient_id, location);
        let tx = conn.unchecked_transaction()?;
        repository::insert_sos_alert(&tx, &alert)?;
        let contacts = caregivers::alert_recipients(&tx, &patient_id)?;
        let emails: Vec<String> = contacts.iter().map(|c| c.email.clone()).collect();
        repository::record_notified_contacts(&tx, &alert.id, &emails)?;
        tx.commit()?;
        alert.notified_contacts = emails;

        tracing::warn!(
            patient_id = %patient_id,
            alert_id = %alert.id,
            recipients = alert.notified_contacts.len(),
            "SOS alert triggered"
        );

        let mut payload =
            SosAlertPayload::new(patient_id, alert.location.clone(), alert.trigger_time);
        payload.alert_id = Some(alert.id);
        let delivery = self.publish(
            &patient_id,
            ServerEvent::SosAlert(payload),
            &audience_for(patient_id, contacts),
        );
        tracing::info!(alert_id = %alert.id, delivered = delivery.delivered, "SOS fan-out");

        Ok(alert)
    }

    /// Socket-originated SOS: resolve recipients and publish, no record.
    pub fn relay_sos(
        &self,
        conn: &Connection,
        patient_id: Uuid,
        location: Location,
    ) -> Result<Delivery, DispatchError> {
        location.validate().map_err(DispatchError::InvalidLocation)?;
        let contacts = caregivers::alert_recipients(conn, &patient_id)?;

        tracing::warn!(patient_id = %patient_id, "SOS relayed from socket");
        let payload = SosAlertPayload::new(patient_id, location, Utc::now());
        Ok(self.publish(
            &patient_id,
            ServerEvent::SosAlert(payload),
            &audience_for(patient_id, contacts),
        ))
    }

    /// Tell the patient's medication viewers about a dose event.
    pub fn publish_medication_event(
        &self,
        conn: &Connection,
        patient_id: Uuid,
        medicine: &str,
        status: MedicationStatus,
    ) -> Result<Delivery, DispatchError> {
        let medicine = medicine.trim();
        if medicine.is_empty() {
            return Err(DispatchError::MissingMedicine);
        }
        let contacts = caregivers::audience(conn, &patient_id, Permission::ViewMedicines)?;

        tracing::info!(patient_id = %patient_id, status = %status, "Medication update");
        let payload = MedicationUpdatePayload {
            patient_id,
            medicine: medicine.to_string(),
            status,
        };
        Ok(self.publish(
            &patient_id,
            ServerEvent::PatientMedicationUpdate(payload),
            &audience_for(patient_id, contacts),
        ))
    }

    /// Close one of the patient's active alerts.
    pub fn resolve_sos(
        &self,
        conn: &Connection,
        patient: &Account,
        alert_id: &Uuid,
        status: AlertStatus,
    ) -> Result<SosAlert, DispatchError> {
        if status == AlertStatus::Active {
            return Err(DispatchError::InvalidStatus);
        }
        let alert = repository::get_sos_alert(conn, alert_id)?
            .filter(|a| a.patient_id == patient.id)
            .ok_or(DispatchError::NotFound)?;
        if alert.status != AlertStatus::Active {
            return Err(DispatchError::AlreadyClosed(alert.status));
        }

        if !repository::close_sos_alert(conn, alert_id, status, Utc::now())? {
            // Closed by a concurrent request between the read and the update.
            let current = repository::get_sos_alert(conn, alert_id)?
                .map_or(status, |a| a.status);
            return Err(DispatchError::AlreadyClosed(current));
        }
        tracing::info!(alert_id = %alert_id, status = %status, "SOS alert closed");

        repository::get_sos_alert(conn, alert_id)?.ok_or(DispatchError::NotFound)
    }

    pub fn list_alerts(
        &self,
        conn: &Connection,
        patient_id: &Uuid,
    ) -> Result<Vec<SosAlert>, DispatchError> {
        Ok(repository::list_sos_alerts_for_patient(conn, patient_id)?)
    }
}
