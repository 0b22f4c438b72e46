//! Input schemas for every endpoint that accepts a body or query string.
//!
//! Each schema deserializes leniently and then goes through a `validate`
//! step that produces the typed row (or plan) the handler works with. Nothing
//! in here talks to the backend.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{
    ApplicantSource, ApplicationStatus, CaseEventType, CrisisIndicators, Role, VisitOutcome,
};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_SEARCH_LEN: usize = 2;
pub const DEFAULT_VISIT_LIST_LIMIT: usize = 50;
pub const MAX_VISIT_LIST_LIMIT: usize = 200;
pub const DEFAULT_VISIT_TYPE: &str = "in_person";

/// Columns a field visit update may touch. Everything else in a patch body is dropped.
pub const VISIT_PATCH_ALLOWED_FIELDS: [&str; 11] = [
    "contact_name",
    "contact_phone",
    "contact_email",
    "property_condition_notes",
    "occupant_situation",
    "immediate_needs",
    "follow_up_needed",
    "follow_up_date",
    "follow_up_notes",
    "interest_level",
    "admin_notes",
];

const APPLICATION_PATCH_IMMUTABLE_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Request metadata stamped onto every intake submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionMeta {
    pub ip_address: String,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeForm {
    #[serde(default, alias = "full_name")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, alias = "property_address")]
    pub property_address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, alias = "zip_code", alias = "zip")]
    pub zip_code: Option<String>,
    #[serde(default, alias = "property_type")]
    pub property_type: Option<String>,
    #[serde(default, alias = "is_owner", deserialize_with = "flexible_bool")]
    pub is_owner: bool,
    #[serde(default, alias = "on_title", deserialize_with = "flexible_bool")]
    pub on_title: bool,
    #[serde(default, alias = "title_holders")]
    pub title_holders: Option<String>,
    #[serde(default, alias = "facing_foreclosure", deserialize_with = "flexible_bool")]
    pub facing_foreclosure: bool,
    #[serde(default, alias = "behind_on_payments", deserialize_with = "flexible_bool")]
    pub behind_on_payments: bool,
    #[serde(default, alias = "behind_on_taxes", deserialize_with = "flexible_bool")]
    pub behind_on_taxes: bool,
    #[serde(default, alias = "code_violations", deserialize_with = "flexible_bool")]
    pub code_violations: bool,
    #[serde(default, alias = "needs_repairs", deserialize_with = "flexible_bool")]
    pub needs_repairs: bool,
    #[serde(default, alias = "inherited_property", deserialize_with = "flexible_bool")]
    pub inherited_property: bool,
    #[serde(
        default,
        alias = "divorce_or_separation",
        deserialize_with = "flexible_bool"
    )]
    pub divorce_or_separation: bool,
    #[serde(default, alias = "job_loss", deserialize_with = "flexible_bool")]
    pub job_loss: bool,
    #[serde(default, alias = "medical_hardship", deserialize_with = "flexible_bool")]
    pub medical_hardship: bool,
    #[serde(default, alias = "vacant_property", deserialize_with = "flexible_bool")]
    pub vacant_property: bool,
    #[serde(default, alias = "auction_date")]
    pub auction_date: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub longitude: Option<f64>,
    #[serde(default, alias = "submitted_by")]
    pub submitted_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewApplicant {
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub property_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    pub is_owner: bool,
    pub on_title: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_holders: Option<String>,
    #[serde(flatten)]
    pub crisis: CrisisIndicators,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auction_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub status: ApplicationStatus,
    pub source: ApplicantSource,
    pub ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<String>,
}

impl IntakeForm {
    pub fn into_new_applicant(self, meta: SubmissionMeta) -> Result<NewApplicant, ValidationError> {
        let full_name = clean(self.full_name)
            .ok_or_else(|| ValidationError::new("fullName", "full name is required"))?;
        let property_address = clean(self.property_address).ok_or_else(|| {
            ValidationError::new("propertyAddress", "property address is required")
        })?;

        let email = clean(self.email).map(|email| email.to_lowercase());
        let phone = clean(self.phone);
        if email.is_none() && phone.is_none() {
            return Err(ValidationError::new(
                "phone",
                "a phone number or email address is required",
            ));
        }
        if let Some(email) = email.as_deref()
            && !email.contains('@')
        {
            return Err(ValidationError::new("email", "email address is invalid"));
        }

        let source = match clean(self.source) {
            None => ApplicantSource::WebApplication,
            Some(raw) => ApplicantSource::parse(&raw).ok_or_else(|| {
                ValidationError::new("source", "source must be web_application or field_intake")
            })?,
        };

        let (latitude, longitude) = validate_coordinates(self.latitude, self.longitude)?;

        Ok(NewApplicant {
            full_name,
            email,
            phone,
            property_address,
            city: clean(self.city),
            state: clean(self.state),
            zip_code: clean(self.zip_code),
            property_type: clean(self.property_type),
            is_owner: self.is_owner,
            on_title: self.on_title,
            title_holders: clean(self.title_holders),
            crisis: CrisisIndicators {
                facing_foreclosure: self.facing_foreclosure,
                behind_on_payments: self.behind_on_payments,
                behind_on_taxes: self.behind_on_taxes,
                code_violations: self.code_violations,
                needs_repairs: self.needs_repairs,
                inherited_property: self.inherited_property,
                divorce_or_separation: self.divorce_or_separation,
                job_loss: self.job_loss,
                medical_hardship: self.medical_hardship,
                vacant_property: self.vacant_property,
            },
            auction_date: clean(self.auction_date),
            comments: clean(self.comments),
            status: ApplicationStatus::Pending,
            source,
            ip_address: meta.ip_address,
            user_agent: meta.user_agent,
            latitude,
            longitude,
            submitted_by: clean(self.submitted_by),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationListQuery {
    #[serde(default)]
    pub status: Option<String>,
}

impl ApplicationListQuery {
    pub fn validate(self) -> Result<Option<ApplicationStatus>, ValidationError> {
        match clean(self.status) {
            None => Ok(None),
            Some(raw) if raw == "all" => Ok(None),
            Some(raw) => ApplicationStatus::parse(&raw)
                .map(Some)
                .ok_or_else(|| ValidationError::new("status", "unknown application status")),
        }
    }
}

/// Strips immutable columns from an arbitrary applicant patch and stamps `updated_at`.
pub fn sanitize_application_patch(
    body: Value,
    now: &str,
) -> Result<Map<String, Value>, ValidationError> {
    let Value::Object(mut patch) = body else {
        return Err(ValidationError::new("body", "expected a JSON object"));
    };

    for field in APPLICATION_PATCH_IMMUTABLE_FIELDS {
        patch.remove(field);
    }

    if let Some(status) = patch.get("status") {
        let valid = status.as_str().and_then(ApplicationStatus::parse).is_some();
        if !valid {
            return Err(ValidationError::new("status", "unknown application status"));
        }
    }

    if patch.is_empty() {
        return Err(ValidationError::new("body", "no updatable fields supplied"));
    }

    patch.insert("updated_at".to_string(), Value::String(now.to_string()));
    Ok(patch)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: Option<String>,
}

/// Returns the trimmed needle, or `None` when it is too short to search for.
pub fn normalize_search_query(raw: Option<&str>) -> Option<String> {
    let needle = raw.map(str::trim).unwrap_or_default();
    if needle.chars().count() < MIN_SEARCH_LEN {
        return None;
    }
    Some(needle.to_string())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MergeRequest {
    #[serde(default, rename = "duplicateId", alias = "duplicate_id")]
    pub duplicate_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub master_id: String,
    pub duplicate_id: String,
}

impl MergeRequest {
    pub fn validate(self, master_id: &str) -> Result<MergePlan, ValidationError> {
        let master_id = master_id.trim();
        if master_id.is_empty() {
            return Err(ValidationError::new("id", "master id is required"));
        }
        let duplicate_id = clean(self.duplicate_id)
            .ok_or_else(|| ValidationError::new("duplicateId", "duplicateId is required"))?;
        if duplicate_id == master_id {
            return Err(ValidationError::new(
                "duplicateId",
                "cannot merge an applicant into itself",
            ));
        }
        Ok(MergePlan {
            master_id: master_id.to_string(),
            duplicate_id,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseEventInput {
    #[serde(default)]
    pub applicant_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub event_date: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub is_milestone: bool,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub is_urgent: bool,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCaseEvent {
    pub applicant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub event_type: CaseEventType,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub event_date: String,
    pub is_milestone: bool,
    pub is_urgent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl CaseEventInput {
    pub fn validate(self, now: &str) -> Result<NewCaseEvent, ValidationError> {
        let applicant_id = clean(self.applicant_id)
            .ok_or_else(|| ValidationError::new("applicant_id", "applicant_id is required"))?;
        let event_type = clean(self.event_type)
            .ok_or_else(|| ValidationError::new("event_type", "event_type is required"))?;
        let event_type = CaseEventType::parse(&event_type)
            .ok_or_else(|| ValidationError::new("event_type", "unknown event_type"))?;
        let title = clean(self.title)
            .ok_or_else(|| ValidationError::new("title", "title is required"))?;
        let (latitude, longitude) = validate_coordinates(self.latitude, self.longitude)?;

        Ok(NewCaseEvent {
            applicant_id,
            client_id: clean(self.client_id),
            event_type,
            title,
            description: clean(self.description),
            event_date: clean(self.event_date).unwrap_or_else(|| now.to_string()),
            is_milestone: self.is_milestone || event_type == CaseEventType::Milestone,
            is_urgent: self.is_urgent,
            created_by: clean(self.created_by),
            latitude,
            longitude,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseEventFilter {
    #[serde(default)]
    pub applicant_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl CaseEventFilter {
    pub fn normalized(self) -> Self {
        Self {
            applicant_id: clean(self.applicant_id),
            client_id: clean(self.client_id),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldVisitInput {
    #[serde(default)]
    pub applicant_id: Option<String>,
    #[serde(default)]
    pub staff_member: Option<String>,
    #[serde(default)]
    pub visit_date: Option<String>,
    #[serde(default)]
    pub visit_type: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub property_address: Option<String>,
    #[serde(default)]
    pub property_condition_notes: Option<String>,
    #[serde(default)]
    pub occupant_situation: Option<String>,
    #[serde(default)]
    pub immediate_needs: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub follow_up_needed: bool,
    #[serde(default)]
    pub follow_up_date: Option<String>,
    #[serde(default)]
    pub follow_up_notes: Option<String>,
    #[serde(default)]
    pub interest_level: Option<String>,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewFieldVisit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicant_id: Option<String>,
    pub staff_member: String,
    pub visit_date: String,
    pub visit_type: String,
    pub outcome: VisitOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_condition_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupant_situation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immediate_needs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub follow_up_needed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interest_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl FieldVisitInput {
    pub fn validate(self, now: &str) -> Result<NewFieldVisit, ValidationError> {
        let staff_member = clean(self.staff_member)
            .ok_or_else(|| ValidationError::new("staff_member", "staff_member is required"))?;
        let outcome = clean(self.outcome)
            .ok_or_else(|| ValidationError::new("outcome", "outcome is required"))?;
        let outcome = VisitOutcome::parse(&outcome).ok_or_else(|| {
            ValidationError::new("outcome", "outcome must be attempt or engagement")
        })?;
        let (latitude, longitude) = validate_coordinates(self.latitude, self.longitude)?;

        Ok(NewFieldVisit {
            applicant_id: clean(self.applicant_id),
            staff_member,
            visit_date: clean(self.visit_date).unwrap_or_else(|| now.to_string()),
            visit_type: clean(self.visit_type).unwrap_or_else(|| DEFAULT_VISIT_TYPE.to_string()),
            outcome,
            contact_name: clean(self.contact_name),
            contact_phone: clean(self.contact_phone),
            contact_email: clean(self.contact_email),
            property_address: clean(self.property_address),
            property_condition_notes: clean(self.property_condition_notes),
            occupant_situation: clean(self.occupant_situation),
            immediate_needs: clean(self.immediate_needs),
            notes: clean(self.notes),
            follow_up_needed: self.follow_up_needed,
            follow_up_date: clean(self.follow_up_date),
            follow_up_notes: clean(self.follow_up_notes),
            interest_level: clean(self.interest_level),
            latitude,
            longitude,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisitListQuery {
    #[serde(default, rename = "userId", alias = "user_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

impl VisitListQuery {
    pub fn validate(self) -> Result<(String, usize), ValidationError> {
        let user_id = clean(self.user_id)
            .ok_or_else(|| ValidationError::new("userId", "userId is required"))?;
        let limit = match clean(self.limit) {
            None => DEFAULT_VISIT_LIST_LIMIT,
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| ValidationError::new("limit", "limit must be a positive integer"))?
                .clamp(1, MAX_VISIT_LIST_LIMIT),
        };
        Ok((user_id, limit))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentListQuery {
    #[serde(default, rename = "applicationId", alias = "application_id")]
    pub application_id: Option<String>,
}

impl DocumentListQuery {
    pub fn validate(self) -> Result<String, ValidationError> {
        clean(self.application_id)
            .ok_or_else(|| ValidationError::new("applicationId", "applicationId is required"))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhotoListQuery {
    #[serde(default, rename = "visitId", alias = "visit_id")]
    pub visit_id: Option<String>,
}

impl PhotoListQuery {
    pub fn validate(self) -> Result<String, ValidationError> {
        clean(self.visit_id).ok_or_else(|| ValidationError::new("visitId", "visitId is required"))
    }
}

/// Keeps only allow-listed columns of a visit patch and stamps `updated_at`.
pub fn sanitize_visit_patch(
    body: Value,
    now: &str,
) -> Result<Map<String, Value>, ValidationError> {
    let Value::Object(body) = body else {
        return Err(ValidationError::new("body", "expected a JSON object"));
    };

    let mut patch = body
        .into_iter()
        .filter(|(key, _)| VISIT_PATCH_ALLOWED_FIELDS.contains(&key.as_str()))
        .collect::<Map<String, Value>>();

    if patch.is_empty() {
        return Err(ValidationError::new("body", "no valid fields to update"));
    }

    patch.insert("updated_at".to_string(), Value::String(now.to_string()));
    Ok(patch)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub can_field_intake: Option<bool>,
    #[serde(default)]
    pub can_access_dashboard: Option<bool>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
    pub can_field_intake: bool,
    pub can_access_dashboard: bool,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub is_active: bool,
    pub can_field_intake: bool,
    pub can_access_dashboard: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl CreateUserRequest {
    pub fn validate(self) -> Result<NewAccount, ValidationError> {
        let email = clean(self.email)
            .map(|email| email.to_lowercase())
            .ok_or_else(|| ValidationError::new("email", "email is required"))?;
        if !email.contains('@') {
            return Err(ValidationError::new("email", "email address is invalid"));
        }
        let password = self
            .password
            .filter(|password| !password.is_empty())
            .ok_or_else(|| ValidationError::new("password", "password is required"))?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::new(
                "password",
                format!("password must be at least {} characters", MIN_PASSWORD_LEN),
            ));
        }
        let full_name = clean(self.full_name)
            .ok_or_else(|| ValidationError::new("full_name", "full_name is required"))?;
        let role = match clean(self.role) {
            None => Role::FieldWorker,
            Some(raw) => {
                Role::parse(&raw).ok_or_else(|| ValidationError::new("role", "unknown role"))?
            }
        };

        Ok(NewAccount {
            email,
            password,
            full_name,
            role,
            can_field_intake: self.can_field_intake.unwrap_or(true),
            can_access_dashboard: self.can_access_dashboard.unwrap_or(false),
            phone: clean(self.phone),
        })
    }
}

impl NewAccount {
    pub fn profile_row(&self, user_id: &str) -> NewProfile {
        NewProfile {
            id: user_id.to_string(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            role: self.role,
            is_active: true,
            can_field_intake: self.can_field_intake,
            can_access_dashboard: self.can_access_dashboard,
            phone: self.phone.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(self) -> Result<Credentials, ValidationError> {
        let email = clean(self.email)
            .map(|email| email.to_lowercase())
            .ok_or_else(|| ValidationError::new("email", "email and password are required"))?;
        let password = self
            .password
            .filter(|password| !password.is_empty())
            .ok_or_else(|| ValidationError::new("password", "email and password are required"))?;
        Ok(Credentials { email, password })
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn validate_coordinates(
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> Result<(Option<f64>, Option<f64>), ValidationError> {
    if let Some(lat) = latitude
        && !(-90.0..=90.0).contains(&lat)
    {
        return Err(ValidationError::new("latitude", "latitude out of range"));
    }
    if let Some(lng) = longitude
        && !(-180.0..=180.0).contains(&lng)
    {
        return Err(ValidationError::new("longitude", "longitude out of range"));
    }
    Ok((latitude, longitude))
}

pub fn parse_bool_str(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(b),
        Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        Some(Value::String(s)) => parse_bool_str(&s)
            .ok_or_else(|| D::Error::custom(format!("invalid boolean value `{}`", s))),
        Some(_) => Err(D::Error::custom("expected a boolean")),
    }
}

fn flexible_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid number `{}`", s))),
        Some(_) => Err(D::Error::custom("expected a number")),
    }
}
