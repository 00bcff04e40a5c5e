//! Pipeline data models: Pipeline, Stage, Lead, Deal, StageHistoryEntry, Customer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{
    CustomerId, DealId, HistoryEntryId, IdentityId, LeadId, OrganizationId, PipelineId, StageId,
};
use crate::rbac::TenantScoped;

// ═══════════════════════════════════════════════════════════════════════════════
// Pipeline & Stage
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub pipeline_id: PipelineId,
    pub organization_id: OrganizationId,
    pub name: String,
    #[serde(rename = "order")]
    pub order_index: i32,
    /// Percentage, 0..=100.
    pub win_probability: i32,
    pub is_closed_won: bool,
    pub is_closed_lost: bool,
    pub is_active: bool,
}

impl Stage {
    pub fn is_closed(&self) -> bool {
        self.is_closed_won || self.is_closed_lost
    }
}

/// Input for a new stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStage {
    pub name: String,
    pub order_index: i32,
    pub win_probability: i32,
    #[serde(default)]
    pub is_closed_won: bool,
    #[serde(default)]
    pub is_closed_lost: bool,
}

impl NewStage {
    pub fn new(name: impl Into<String>, order_index: i32, win_probability: i32) -> Self {
        Self {
            name: name.into(),
            order_index,
            win_probability,
            is_closed_won: false,
            is_closed_lost: false,
        }
    }

    pub fn closed_won(mut self) -> Self {
        self.is_closed_won = true;
        self
    }

    pub fn closed_lost(mut self) -> Self {
        self.is_closed_lost = true;
        self
    }
}

/// A transition target: a stage id or a case-insensitive stage name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageRef {
    Id(StageId),
    Name(String),
}

impl StageRef {
    pub fn matches(&self, stage: &Stage) -> bool {
        match self {
            Self::Id(id) => stage.id == *id,
            Self::Name(name) => stage.name.trim().eq_ignore_ascii_case(name.trim()),
        }
    }
}

impl From<&str> for StageRef {
    fn from(value: &str) -> Self {
        match value.parse::<StageId>() {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Name(value.to_string()),
        }
    }
}

impl From<StageId> for StageRef {
    fn from(id: StageId) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for StageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Name(name) => f.write_str(name),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Contact
// ═══════════════════════════════════════════════════════════════════════════════

/// Contact and address fields shared by leads and customers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub address_line: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl ContactInfo {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    /// Normalized email used as the customer lookup key.
    pub fn normalized_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(|e| e.trim().to_ascii_lowercase())
            .filter(|e| !e.is_empty())
    }

    /// Fill empty fields from `other`.
    pub fn merge_missing(&mut self, other: &ContactInfo) {
        fn fill(dst: &mut Option<String>, src: &Option<String>) {
            if dst.is_none() {
                dst.clone_from(src);
            }
        }
        fill(&mut self.email, &other.email);
        fill(&mut self.phone, &other.phone);
        fill(&mut self.company, &other.company);
        fill(&mut self.address_line, &other.address_line);
        fill(&mut self.city, &other.city);
        fill(&mut self.region, &other.region);
        fill(&mut self.postal_code, &other.postal_code);
        fill(&mut self.country, &other.country);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Lead
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualificationStatus {
    #[default]
    New,
    Contacted,
    Qualified,
    Unqualified,
}

impl QualificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Qualified => "qualified",
            Self::Unqualified => "unqualified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "contacted" => Some(Self::Contacted),
            "qualified" => Some(Self::Qualified),
            "unqualified" => Some(Self::Unqualified),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub contact: ContactInfo,
    pub qualification: QualificationStatus,
    pub stage_id: Option<StageId>,
    pub is_converted: bool,
    pub converted_at: Option<DateTime<Utc>>,
    pub created_by: Option<IdentityId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLead {
    pub name: String,
    #[serde(default)]
    pub contact: ContactInfo,
    #[serde(default)]
    pub qualification: QualificationStatus,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Deal
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub value_cents: i64,
    pub currency: String,
    pub lead_id: Option<LeadId>,
    pub customer_id: Option<CustomerId>,
    pub stage_id: Option<StageId>,
    /// Mirrors the current stage's win probability.
    pub probability: i32,
    pub is_won: bool,
    pub is_lost: bool,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_by: Option<IdentityId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDeal {
    pub name: String,
    #[serde(default)]
    pub value_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub lead_id: Option<LeadId>,
    pub customer_id: Option<CustomerId>,
    /// Initial open stage; defaults to the first stage of the pipeline.
    pub stage: Option<StageRef>,
}

impl NewDeal {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_cents: 0,
            currency: default_currency(),
            lead_id: None,
            customer_id: None,
            stage: None,
        }
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stage history
// ═══════════════════════════════════════════════════════════════════════════════

/// The entity a history entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum StageSubject {
    Lead(LeadId),
    Deal(DealId),
}

impl StageSubject {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lead(_) => "lead",
            Self::Deal(_) => "deal",
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        match self {
            Self::Lead(id) => id.0,
            Self::Deal(id) => id.0,
        }
    }
}

/// Append-only record of a transition. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub id: HistoryEntryId,
    pub organization_id: OrganizationId,
    pub subject: StageSubject,
    pub from_stage_id: Option<StageId>,
    pub to_stage_id: StageId,
    pub changed_by: Option<IdentityId>,
    pub note: Option<String>,
    pub changed_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Customer
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    Active,
    Inactive,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// A customer, created directly or derived from a won lead/deal.
///
/// `converted_from_lead` is the only back-reference; customers never point at a deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub organization_id: OrganizationId,
    /// Portal login, when the customer has one.
    pub identity_id: Option<IdentityId>,
    pub name: String,
    pub contact: ContactInfo,
    pub status: CustomerStatus,
    pub converted_from_lead: Option<LeadId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn is_active(&self) -> bool {
        self.status == CustomerStatus::Active
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    #[serde(default)]
    pub contact: ContactInfo,
    pub identity_id: Option<IdentityId>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tenant scoping
// ═══════════════════════════════════════════════════════════════════════════════

impl TenantScoped for Lead {
    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    fn entity_type(&self) -> &'static str {
        "lead"
    }

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

impl TenantScoped for Deal {
    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    fn entity_type(&self) -> &'static str {
        "deal"
    }

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

impl TenantScoped for Customer {
    fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    fn owner_identity(&self) -> Option<IdentityId> {
        self.identity_id
    }

    fn entity_type(&self) -> &'static str {
        "customer"
    }

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str) -> Stage {
        Stage {
            id: StageId::new(),
            pipeline_id: PipelineId::new(),
            organization_id: OrganizationId::new(),
            name: name.to_string(),
            order_index: 1,
            win_probability: 10,
            is_closed_won: false,
            is_closed_lost: false,
            is_active: true,
        }
    }

    #[test]
    fn test_stage_ref_name_is_case_insensitive() {
        let s = stage("Closed Won");
        assert!(StageRef::Name("closed won".into()).matches(&s));
        assert!(StageRef::Name(" CLOSED WON ".into()).matches(&s));
        assert!(!StageRef::Name("Closed".into()).matches(&s));
        assert!(StageRef::Id(s.id).matches(&s));
    }

    #[test]
    fn test_stage_ref_from_str() {
        let id = StageId::new();
        assert_eq!(StageRef::from(id.to_string().as_str()), StageRef::Id(id));
        assert_eq!(StageRef::from("Proposal"), StageRef::Name("Proposal".into()));
    }

    #[test]
    fn test_contact_merge_missing_keeps_existing() {
        let mut existing = ContactInfo {
            email: Some("a@example.com".into()),
            ..ContactInfo::default()
        };
        let incoming = ContactInfo {
            email: Some("b@example.com".into()),
            city: Some("Lisbon".into()),
            ..ContactInfo::default()
        };
        existing.merge_missing(&incoming);
        assert_eq!(existing.email.as_deref(), Some("a@example.com"));
        assert_eq!(existing.city.as_deref(), Some("Lisbon"));
    }

    #[test]
    fn test_normalized_email() {
        assert_eq!(
            ContactInfo::with_email(" Ana@Example.COM ").normalized_email().as_deref(),
            Some("ana@example.com")
        );
        assert_eq!(ContactInfo::with_email("  ").normalized_email(), None);
    }

    #[test]
    fn test_stage_subject_serialization() {
        let id = LeadId::new();
        let json = serde_json::to_value(StageSubject::Lead(id)).unwrap();
        assert_eq!(json["type"], "lead");
        assert_eq!(json["id"], id.to_string());
    }
}
