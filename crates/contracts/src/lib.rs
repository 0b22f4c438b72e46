use serde::{Deserialize, Deserializer, Serialize};

pub mod requests;
pub mod storage;

pub const APPLICATIONS_TABLE: &str = "applications";
pub const USER_PROFILES_TABLE: &str = "user_profiles";
pub const FIELD_VISITS_TABLE: &str = "field_visits";
pub const CASE_EVENTS_TABLE: &str = "case_events";
pub const APPLICATION_DOCUMENTS_TABLE: &str = "application_documents";
pub const VISIT_PHOTOS_TABLE: &str = "visit_photos";
pub const CLIENTS_TABLE: &str = "clients";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    #[default]
    Pending,
    Contacted,
    InProgress,
    Qualified,
    Closed,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 5] = [
        ApplicationStatus::Pending,
        ApplicationStatus::Contacted,
        ApplicationStatus::InProgress,
        ApplicationStatus::Qualified,
        ApplicationStatus::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Contacted => "contacted",
            ApplicationStatus::InProgress => "in_progress",
            ApplicationStatus::Qualified => "qualified",
            ApplicationStatus::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|status| status.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicantSource {
    #[default]
    WebApplication,
    FieldIntake,
}

impl ApplicantSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicantSource::WebApplication => "web_application",
            ApplicantSource::FieldIntake => "field_intake",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "web_application" => Some(ApplicantSource::WebApplication),
            "field_intake" => Some(ApplicantSource::FieldIntake),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    FieldWorker,
    Staff,
    Admin,
    Volunteer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::FieldWorker, Role::Staff, Role::Admin, Role::Volunteer];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::FieldWorker => "field_worker",
            Role::Staff => "staff",
            Role::Admin => "admin",
            Role::Volunteer => "volunteer",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|role| role.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitOutcome {
    Attempt,
    Engagement,
}

impl VisitOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            VisitOutcome::Attempt => "attempt",
            VisitOutcome::Engagement => "engagement",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "attempt" => Some(VisitOutcome::Attempt),
            "engagement" => Some(VisitOutcome::Engagement),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseEventType {
    Note,
    Contact,
    Meeting,
    DocumentReceived,
    StatusChange,
    Milestone,
}

impl CaseEventType {
    pub const ALL: [CaseEventType; 6] = [
        CaseEventType::Note,
        CaseEventType::Contact,
        CaseEventType::Meeting,
        CaseEventType::DocumentReceived,
        CaseEventType::StatusChange,
        CaseEventType::Milestone,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CaseEventType::Note => "note",
            CaseEventType::Contact => "contact",
            CaseEventType::Meeting => "meeting",
            CaseEventType::DocumentReceived => "document_received",
            CaseEventType::StatusChange => "status_change",
            CaseEventType::Milestone => "milestone",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

/// Boolean hardship flags captured on the intake form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrisisIndicators {
    #[serde(default, deserialize_with = "null_as_false")]
    pub facing_foreclosure: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub behind_on_payments: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub behind_on_taxes: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub code_violations: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub needs_repairs: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub inherited_property: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub divorce_or_separation: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub job_loss: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub medical_hardship: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub vacant_property: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Applicant {
    pub id: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub property_address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub property_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_owner: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub on_title: bool,
    #[serde(default)]
    pub title_holders: Option<String>,
    #[serde(flatten)]
    pub crisis: CrisisIndicators,
    #[serde(default)]
    pub auction_date: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: ApplicationStatus,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: ApplicantSource,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub submitted_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    /// Free-form on stored rows; only account creation restricts it to [`Role`].
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_active: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub can_field_intake: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub can_access_dashboard: bool,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub last_login: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub applicant_id: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
