use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::parse_uuid;
use crate::db::DatabaseError;
use crate::models::{
    AccountProfile, CaredPatient, CaregiverContact, CaregiverIdentity, CaregiverLink,
    LinkStatus, LinkedCaregiver, Permission, Permissions,
};

const LINK_COLUMNS: &str = "l.id, l.patient_id, l.caregiver_id, l.caregiver_email, l.name,
     l.relationship, l.view_symptoms, l.view_medicines, l.view_vitals,
     l.view_appointments, l.receive_alerts, l.receive_sos, l.status, l.created_at";

/// Number of columns in `LINK_COLUMNS`; joined profile columns start here.
const LINK_WIDTH: usize = 14;

struct LinkRow {
    id: String,
    patient_id: String,
    caregiver_id: Option<String>,
    caregiver_email: String,
    name: String,
    relationship: String,
    permissions: Permissions,
    status: String,
    created_at: DateTime<Utc>,
}

fn read_link_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LinkRow> {
    Ok(LinkRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        caregiver_id: row.get(2)?,
        caregiver_email: row.get(3)?,
        name: row.get(4)?,
        relationship: row.get(5)?,
        permissions: Permissions {
            view_symptoms: row.get(6)?,
            view_medicines: row.get(7)?,
            view_vitals: row.get(8)?,
            view_appointments: row.get(9)?,
            receive_alerts: row.get(10)?,
            receive_sos: row.get(11)?,
        },
        status: row.get(12)?,
        created_at: row.get(13)?,
    })
}

impl LinkRow {
    fn into_link(self) -> Result<CaregiverLink, DatabaseError> {
        let caregiver_id = self.caregiver_id.as_deref().map(parse_uuid).transpose()?;
        Ok(CaregiverLink {
            id: parse_uuid(&self.id)?,
            patient_id: parse_uuid(&self.patient_id)?,
            caregiver_identity: CaregiverIdentity::from(caregiver_id),
            caregiver_email: self.caregiver_email,
            name: self.name,
            relationship: self.relationship,
            permissions: self.permissions,
            status: LinkStatus::from_str(&self.status)?,
            created_at: self.created_at,
        })
    }
}

type ProfileRow = (String, String, String, Option<String>);

fn read_profile_columns(
    row: &rusqlite::Row<'_>,
    offset: usize,
) -> rusqlite::Result<Option<ProfileRow>> {
    let id: Option<String> = row.get(offset)?;
    match id {
        Some(id) => Ok(Some((
            id,
            row.get(offset + 1)?,
            row.get(offset + 2)?,
            row.get(offset + 3)?,
        ))),
        None => Ok(None),
    }
}

fn profile_from_row(row: ProfileRow) -> Result<AccountProfile, DatabaseError> {
    let (id, name, email, phone) = row;
    Ok(AccountProfile {
        id: parse_uuid(&id)?,
        name,
        email,
        phone,
    })
}

pub fn insert_caregiver_link(conn: &Connection, link: &CaregiverLink) -> Result<(), DatabaseError> {
    let p = &link.permissions;
    conn.execute(
        "INSERT INTO caregiver_links
         (id, patient_id, caregiver_id, caregiver_email, name, relationship,
          view_symptoms, view_medicines, view_vitals, view_appointments,
          receive_alerts, receive_sos, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            link.id.to_string(),
            link.patient_id.to_string(),
            link.caregiver_identity.account_id().map(|id| id.to_string()),
            link.caregiver_email,
            link.name,
            link.relationship,
            p.view_symptoms,
            p.view_medicines,
            p.view_vitals,
            p.view_appointments,
            p.receive_alerts,
            p.receive_sos,
            link.status.as_str(),
            link.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_caregiver_link(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<CaregiverLink>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {LINK_COLUMNS} FROM caregiver_links l WHERE l.id = ?1"),
            [id.to_string()],
            read_link_row,
        )
        .optional()?;
    row.map(LinkRow::into_link).transpose()
}

pub fn find_caregiver_link(
    conn: &Connection,
    patient_id: &Uuid,
    caregiver_email: &str,
) -> Result<Option<CaregiverLink>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {LINK_COLUMNS} FROM caregiver_links l
                 WHERE l.patient_id = ?1 AND l.caregiver_email = ?2"
            ),
            params![patient_id.to_string(), caregiver_email],
            read_link_row,
        )
        .optional()?;
    row.map(LinkRow::into_link).transpose()
}

/// Every link owned by the patient, any status, with caregiver profiles
/// joined in where the identity is linked.
pub fn list_links_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<LinkedCaregiver>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LINK_COLUMNS}, c.id, c.name, c.email, c.phone
         FROM caregiver_links l
         LEFT JOIN accounts c ON c.id = l.caregiver_id
         WHERE l.patient_id = ?1
         ORDER BY l.rowid"
    ))?;

    let rows = stmt.query_map([patient_id.to_string()], |row| {
        Ok((read_link_row(row)?, read_profile_columns(row, LINK_WIDTH)?))
    })?;

    let mut links = Vec::new();
    for row in rows {
        let (link_row, profile_row) = row?;
        links.push(LinkedCaregiver {
            link: link_row.into_link()?,
            caregiver: profile_row.map(profile_from_row).transpose()?,
        });
    }
    Ok(links)
}

/// Active links where the caller is the caregiver, matched by account id
/// or by invited email.
pub fn list_active_links_for_caregiver(
    conn: &Connection,
    caregiver_id: &Uuid,
    caregiver_email: &str,
) -> Result<Vec<CaredPatient>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LINK_COLUMNS}, p.id, p.name, p.email, p.phone
         FROM caregiver_links l
         JOIN accounts p ON p.id = l.patient_id
         WHERE (l.caregiver_id = ?1 OR l.caregiver_email = ?2)
           AND l.status = 'active'
         ORDER BY l.rowid"
    ))?;

    let rows = stmt.query_map(params![caregiver_id.to_string(), caregiver_email], |row| {
        Ok((read_link_row(row)?, read_profile_columns(row, LINK_WIDTH)?))
    })?;

    let mut links = Vec::new();
    for row in rows {
        let (link_row, profile_row) = row?;
        let patient = profile_row
            .map(profile_from_row)
            .transpose()?
            .ok_or_else(|| DatabaseError::NotFound {
                entity_type: "account".into(),
                id: link_row.patient_id.clone(),
            })?;
        links.push(CaredPatient {
            link: link_row.into_link()?,
            patient,
        });
    }
    Ok(links)
}

/// Active caregivers of `patient_id` holding `permission`.
pub fn list_active_contacts_with(
    conn: &Connection,
    patient_id: &Uuid,
    permission: Permission,
) -> Result<Vec<CaregiverContact>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT caregiver_email, caregiver_id FROM caregiver_links
         WHERE patient_id = ?1 AND status = 'active' AND {} = 1
         ORDER BY rowid",
        permission.column()
    ))?;

    let rows = stmt.query_map([patient_id.to_string()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
    })?;

    let mut contacts = Vec::new();
    for row in rows {
        let (email, caregiver_id) = row?;
        contacts.push(CaregiverContact {
            email,
            account_id: caregiver_id.as_deref().map(parse_uuid).transpose()?,
        });
    }
    Ok(contacts)
}

/// Whether the account is an active caregiver of the patient.
pub fn is_active_caregiver(
    conn: &Connection,
    patient_id: &Uuid,
    caregiver_id: &Uuid,
    caregiver_email: &str,
) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM caregiver_links
             WHERE patient_id = ?1
               AND (caregiver_id = ?2 OR caregiver_email = ?3)
               AND status = 'active'
             LIMIT 1",
            params![patient_id.to_string(), caregiver_id.to_string(), caregiver_email],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Set a link's status, linking the caregiver account at the same time
/// when one is given.
pub fn update_link_status(
    conn: &Connection,
    id: &Uuid,
    status: LinkStatus,
    caregiver_id: Option<&Uuid>,
) -> Result<(), DatabaseError> {
    let n = conn.execute(
        "UPDATE caregiver_links
         SET status = ?2, caregiver_id = COALESCE(?3, caregiver_id)
         WHERE id = ?1",
        params![
            id.to_string(),
            status.as_str(),
            caregiver_id.map(|c| c.to_string()),
        ],
    )?;
    if n == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "caregiver_link".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn update_link_permissions(
    conn: &Connection,
    id: &Uuid,
    permissions: &Permissions,
) -> Result<(), DatabaseError> {
    let n = conn.execute(
        "UPDATE caregiver_links SET
         view_symptoms = ?2, view_medicines = ?3, view_vitals = ?4,
         view_appointments = ?5, receive_alerts = ?6, receive_sos = ?7
         WHERE id = ?1",
        params![
            id.to_string(),
            permissions.view_symptoms,
            permissions.view_medicines,
            permissions.view_vitals,
            permissions.view_appointments,
            permissions.receive_alerts,
            permissions.receive_sos,
        ],
    )?;
    if n == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "caregiver_link".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Attach a newly registered account to every invitation sent to its email.
pub fn link_invitations_to_account(
    conn: &Connection,
    account_id: &Uuid,
    email: &str,
) -> Result<usize, DatabaseError> {
    let n = conn.execute(
        "UPDATE caregiver_links SET caregiver_id = ?1
         WHERE caregiver_email = ?2 AND caregiver_id IS NULL AND patient_id != ?1",
        params![account_id.to_string(), email],
    )?;
    Ok(n)
}
