use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::AccountProfile;
use super::enums::LinkStatus;

pub const DEFAULT_RELATIONSHIP: &str = "Family";
pub const PENDING_CAREGIVER_NAME: &str = "Pending Caregiver";

/// Whether the invited email has been tied to a registered account yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "caregiverId", rename_all = "snake_case")]
pub enum CaregiverIdentity {
    Unlinked,
    Linked(Uuid),
}

impl CaregiverIdentity {
    pub fn account_id(&self) -> Option<Uuid> {
        match self {
            CaregiverIdentity::Unlinked => None,
            CaregiverIdentity::Linked(id) => Some(*id),
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, CaregiverIdentity::Linked(_))
    }
}

impl From<Option<Uuid>> for CaregiverIdentity {
    fn from(id: Option<Uuid>) -> Self {
        id.map_or(CaregiverIdentity::Unlinked, CaregiverIdentity::Linked)
    }
}

/// One permission flag, used when a single capability gates an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ViewSymptoms,
    ViewMedicines,
    ViewVitals,
    ViewAppointments,
    ReceiveAlerts,
    ReceiveSos,
}

impl Permission {
    /// Column holding this flag in `caregiver_links`.
    pub fn column(&self) -> &'static str {
        match self {
            Permission::ViewSymptoms => "view_symptoms",
            Permission::ViewMedicines => "view_medicines",
            Permission::ViewVitals => "view_vitals",
            Permission::ViewAppointments => "view_appointments",
            Permission::ReceiveAlerts => "receive_alerts",
            Permission::ReceiveSos => "receive_sos",
        }
    }
}

/// The six independent caregiver permissions. Omitted flags default to `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Permissions {
    #[serde(alias = "canViewSymptoms")]
    pub view_symptoms: bool,
    #[serde(alias = "canViewMedicines")]
    pub view_medicines: bool,
    #[serde(alias = "canViewVitals")]
    pub view_vitals: bool,
    #[serde(alias = "canViewAppointments")]
    pub view_appointments: bool,
    #[serde(alias = "canReceiveAlerts")]
    pub receive_alerts: bool,
    #[serde(rename = "receiveSOS", alias = "canReceiveSOS")]
    pub receive_sos: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            view_symptoms: true,
            view_medicines: true,
            view_vitals: true,
            view_appointments: true,
            receive_alerts: true,
            receive_sos: true,
        }
    }
}

impl Permissions {
    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::ViewSymptoms => self.view_symptoms,
            Permission::ViewMedicines => self.view_medicines,
            Permission::ViewVitals => self.view_vitals,
            Permission::ViewAppointments => self.view_appointments,
            Permission::ReceiveAlerts => self.receive_alerts,
            Permission::ReceiveSos => self.receive_sos,
        }
    }
}

/// Directed relationship from a patient to a caregiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaregiverLink {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub caregiver_identity: CaregiverIdentity,
    pub caregiver_email: String,
    pub name: String,
    pub relationship: String,
    pub permissions: Permissions,
    pub status: LinkStatus,
    pub created_at: DateTime<Utc>,
}

impl CaregiverLink {
    /// True when `account_id`/`email` identify the caregiver side of this link.
    pub fn addresses(&self, account_id: Uuid, email: &str) -> bool {
        self.caregiver_identity.account_id() == Some(account_id) || self.caregiver_email == email
    }
}

/// A link as the patient sees it, with the caregiver profile when known.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedCaregiver {
    #[serde(flatten)]
    pub link: CaregiverLink,
    pub caregiver: Option<AccountProfile>,
}

/// A link as the caregiver sees it, with the patient profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaredPatient {
    #[serde(flatten)]
    pub link: CaregiverLink,
    pub patient: AccountProfile,
}

/// Who a caregiver link resolves to for delivery purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaregiverContact {
    pub email: String,
    pub account_id: Option<Uuid>,
}
