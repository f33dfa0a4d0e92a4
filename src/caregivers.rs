//! Caregiver directory: invitations, link lifecycle, and the permission
//! queries that decide who hears about a patient's events.

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use crate::accounts::is_valid_email;
use crate::db::{repository, DatabaseError};
use crate::models::{
    normalize_email, Account, CaredPatient, CaregiverContact, CaregiverIdentity, CaregiverLink,
    LinkStatus, LinkedCaregiver, Permission, Permissions, DEFAULT_RELATIONSHIP,
    PENDING_CAREGIVER_NAME,
};

#[derive(Debug, thiserror::Error)]
pub enum CaregiverError {
    #[error("You cannot invite yourself as a caregiver")]
    SelfInvite,
    #[error("This caregiver has already been invited")]
    AlreadyInvited,
    #[error("Invalid caregiver email")]
    InvalidEmail,
    #[error("Caregiver link not found")]
    NotFound,
    #[error("Invitation is already {0}")]
    InvalidTransition(LinkStatus),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Patient-supplied invitation fields.
#[derive(Debug, Clone, Default)]
pub struct Invitation {
    pub email: String,
    pub relationship: Option<String>,
    pub name: Option<String>,
    pub permissions: Option<Permissions>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Create a pending link from `patient` to the invited email.
///
/// When the email already belongs to an account the identity is linked
/// straight away; the link still waits for the caregiver to accept.
pub fn invite(
    conn: &Connection,
    patient: &Account,
    invitation: Invitation,
) -> Result<CaregiverLink, CaregiverError> {
    let email = normalize_email(&invitation.email);
    if !is_valid_email(&email) {
        return Err(CaregiverError::InvalidEmail);
    }
    if email == patient.email {
        return Err(CaregiverError::SelfInvite);
    }
    if repository::find_caregiver_link(conn, &patient.id, &email)?.is_some() {
        return Err(CaregiverError::AlreadyInvited);
    }

    let existing = repository::find_account_by_email(conn, &email)?;
    let name = existing
        .as_ref()
        .map(|a| a.name.clone())
        .or_else(|| non_blank(invitation.name))
        .unwrap_or_else(|| PENDING_CAREGIVER_NAME.to_string());

    let link = CaregiverLink {
        id: Uuid::new_v4(),
        patient_id: patient.id,
        caregiver_identity: CaregiverIdentity::from(existing.map(|a| a.id)),
        caregiver_email: email,
        name,
        relationship: non_blank(invitation.relationship)
            .unwrap_or_else(|| DEFAULT_RELATIONSHIP.to_string()),
        permissions: invitation.permissions.unwrap_or_default(),
        status: LinkStatus::Pending,
        created_at: Utc::now(),
    };

    match repository::insert_caregiver_link(conn, &link) {
        Ok(()) => {}
        // Lost a race with a concurrent invite for the same pair.
        Err(e) if e.is_constraint_violation() => return Err(CaregiverError::AlreadyInvited),
        Err(e) => return Err(e.into()),
    }

    tracing::info!(
        patient_id = %patient.id,
        link_id = %link.id,
        linked = link.caregiver_identity.is_linked(),
        "Caregiver invited"
    );
    Ok(link)
}

/// Every link the patient created, whatever its status.
pub fn list_caregivers_of(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<LinkedCaregiver>, CaregiverError> {
    Ok(repository::list_links_for_patient(conn, patient_id)?)
}

/// Active links where `caregiver` is on the receiving side.
pub fn list_patients_of(
    conn: &Connection,
    caregiver: &Account,
) -> Result<Vec<CaredPatient>, CaregiverError> {
    Ok(repository::list_active_links_for_caregiver(
        conn,
        &caregiver.id,
        &caregiver.email,
    )?)
}

/// Active caregivers of the patient holding `permission`.
pub fn audience(
    conn: &Connection,
    patient_id: &Uuid,
    permission: Permission,
) -> Result<Vec<CaregiverContact>, CaregiverError> {
    Ok(repository::list_active_contacts_with(conn, patient_id, permission)?)
}

/// Contacts entitled to an SOS from this patient.
pub fn alert_recipients(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<CaregiverContact>, CaregiverError> {
    audience(conn, patient_id, Permission::ReceiveSos)
}

/// Emails entitled to an SOS from this patient. Read-only.
pub fn resolve_alert_recipients(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<String>, CaregiverError> {
    Ok(alert_recipients(conn, patient_id)?
        .into_iter()
        .map(|c| c.email)
        .collect())
}

/// Accept or decline an invitation addressed to `caregiver`.
pub fn respond_to_invitation(
    conn: &Connection,
    caregiver: &Account,
    link_id: &Uuid,
    accept: bool,
) -> Result<CaregiverLink, CaregiverError> {
    let link = repository::get_caregiver_link(conn, link_id)?
        .filter(|l| l.addresses(caregiver.id, &caregiver.email))
        .ok_or(CaregiverError::NotFound)?;

    if link.status != LinkStatus::Pending {
        return Err(CaregiverError::InvalidTransition(link.status));
    }

    let status = if accept {
        LinkStatus::Active
    } else {
        LinkStatus::Rejected
    };
    repository::update_link_status(conn, link_id, status, Some(&caregiver.id))?;

    tracing::info!(link_id = %link_id, status = %status, "Caregiver invitation answered");
    repository::get_caregiver_link(conn, link_id)?.ok_or(CaregiverError::NotFound)
}

/// Replace all six permission flags. Only the owning patient may do this.
pub fn update_permissions(
    conn: &Connection,
    patient: &Account,
    link_id: &Uuid,
    permissions: Permissions,
) -> Result<CaregiverLink, CaregiverError> {
    let mut link = repository::get_caregiver_link(conn, link_id)?
        .filter(|l| l.patient_id == patient.id)
        .ok_or(CaregiverError::NotFound)?;

    repository::update_link_permissions(conn, link_id, &permissions)?;
    link.permissions = permissions;
    Ok(link)
}

/// Link invitations sent before `account` existed.
pub fn link_pending_invitations(
    conn: &Connection,
    account: &Account,
) -> Result<usize, DatabaseError> {
    repository::link_invitations_to_account(conn, &account.id, &account.email)
}

/// Whether `account` may subscribe to the patient's realtime room.
pub fn may_join_room(
    conn: &Connection,
    account: &Account,
    patient_id: &Uuid,
) -> Result<bool, CaregiverError> {
    if account.id == *patient_id {
        return Ok(true);
    }
    Ok(repository::is_active_caregiver(
        conn,
        patient_id,
        &account.id,
        &account.email,
    )?)
}
