//! PostgreSQL store.
//!
//! Plain `sqlx::query_as` over row structs, converted into domain models at
//! the boundary. Uniqueness is enforced by the schema in `migrations/`; stage
//! transitions lock the lead/deal row with `SELECT ... FOR UPDATE` inside a
//! `sqlx::Transaction`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{PipelineStore, PipelineTx, RbacStore, TenancyStore};
use crate::error::{CrmError, ErrorCode, Result};
use crate::ids::{
    CustomerId, DealId, IdentityId, LeadId, OrganizationId, PermissionId, PipelineId, RoleId,
    StageId,
};
use crate::pipeline::models::{
    ContactInfo, Customer, CustomerStatus, Deal, Lead, Pipeline, QualificationStatus, Stage,
    StageHistoryEntry, StageSubject,
};
use crate::rbac::models::{IdentityRoleAssignment, Permission, Role};
use crate::tenancy::models::{
    Employee, Identity, Organization, OrganizationMembership, Profile, ProfileKind,
};

fn corrupt(column: &str, value: &str) -> CrmError {
    CrmError::with_internal(
        ErrorCode::DatabaseError,
        "A database error occurred",
        format!("unexpected value {:?} in column {}", value, column),
    )
}

fn expect_row(rows: u64, what: &str) -> Result<()> {
    if rows == 0 {
        return Err(CrmError::with_internal(
            ErrorCode::NotFound,
            "The requested record was not found",
            format!("update of missing {}", what),
        ));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rows
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct IdentityRow {
    id: Uuid,
    email: String,
    is_verified: bool,
    is_locked: bool,
    is_active: bool,
    is_superuser: bool,
    created_at: DateTime<Utc>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Identity {
            id: row.id.into(),
            email: row.email,
            is_verified: row.is_verified,
            is_locked: row.is_locked,
            is_active: row.is_active,
            is_superuser: row.is_superuser,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    slug: String,
    is_active: bool,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Organization {
            id: row.id.into(),
            name: row.name,
            slug: row.slug,
            is_active: row.is_active,
            created_by: row.created_by.into(),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MembershipRow {
    identity_id: Uuid,
    organization_id: Uuid,
    is_active: bool,
    is_owner: bool,
    joined_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
}

impl From<MembershipRow> for OrganizationMembership {
    fn from(row: MembershipRow) -> Self {
        OrganizationMembership {
            identity_id: row.identity_id.into(),
            organization_id: row.organization_id.into(),
            is_active: row.is_active,
            is_owner: row.is_owner,
            joined_at: row.joined_at,
            left_at: row.left_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    identity_id: Uuid,
    kind: String,
    organization_id: Option<Uuid>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = CrmError;

    fn try_from(row: ProfileRow) -> Result<Self> {
        let kind: ProfileKind = row.kind.parse().map_err(|_| corrupt("profiles.kind", &row.kind))?;
        Ok(Profile {
            id: row.id.into(),
            identity_id: row.identity_id.into(),
            kind,
            organization_id: row.organization_id.map(Into::into),
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EmployeeRow {
    id: Uuid,
    identity_id: Uuid,
    organization_id: Uuid,
    role_id: Option<Uuid>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<EmployeeRow> for Employee {
    fn from(row: EmployeeRow) -> Self {
        Employee {
            id: row.id.into(),
            identity_id: row.identity_id.into(),
            organization_id: row.organization_id.into(),
            role_id: row.role_id.map(Into::into),
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    description: String,
    is_system: bool,
    created_at: DateTime<Utc>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: row.id.into(),
            organization_id: row.organization_id.into(),
            name: row.name,
            description: row.description,
            is_system: row.is_system,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PermissionRow {
    id: Uuid,
    organization_id: Uuid,
    resource: String,
    action: String,
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Permission {
            id: row.id.into(),
            organization_id: row.organization_id.into(),
            resource: row.resource,
            action: row.action,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AssignmentRow {
    id: Uuid,
    identity_id: Uuid,
    organization_id: Uuid,
    role_id: Uuid,
    is_active: bool,
    assigned_by: Option<Uuid>,
    assigned_at: DateTime<Utc>,
}

impl From<AssignmentRow> for IdentityRoleAssignment {
    fn from(row: AssignmentRow) -> Self {
        IdentityRoleAssignment {
            id: row.id.into(),
            identity_id: row.identity_id.into(),
            organization_id: row.organization_id.into(),
            role_id: row.role_id.into(),
            is_active: row.is_active,
            assigned_by: row.assigned_by.map(Into::into),
            assigned_at: row.assigned_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    is_default: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        Pipeline {
            id: row.id.into(),
            organization_id: row.organization_id.into(),
            name: row.name,
            is_default: row.is_default,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StageRow {
    id: Uuid,
    pipeline_id: Uuid,
    organization_id: Uuid,
    name: String,
    order_index: i32,
    win_probability: i32,
    is_closed_won: bool,
    is_closed_lost: bool,
    is_active: bool,
}

impl From<StageRow> for Stage {
    fn from(row: StageRow) -> Self {
        Stage {
            id: row.id.into(),
            pipeline_id: row.pipeline_id.into(),
            organization_id: row.organization_id.into(),
            name: row.name,
            order_index: row.order_index,
            win_probability: row.win_probability,
            is_closed_won: row.is_closed_won,
            is_closed_lost: row.is_closed_lost,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LeadRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    contact: Json<ContactInfo>,
    qualification: String,
    stage_id: Option<Uuid>,
    is_converted: bool,
    converted_at: Option<DateTime<Utc>>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LeadRow> for Lead {
    type Error = CrmError;

    fn try_from(row: LeadRow) -> Result<Self> {
        let qualification = QualificationStatus::parse(&row.qualification)
            .ok_or_else(|| corrupt("leads.qualification", &row.qualification))?;
        Ok(Lead {
            id: row.id.into(),
            organization_id: row.organization_id.into(),
            name: row.name,
            contact: row.contact.0,
            qualification,
            stage_id: row.stage_id.map(Into::into),
            is_converted: row.is_converted,
            converted_at: row.converted_at,
            created_by: row.created_by.map(Into::into),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DealRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    value_cents: i64,
    currency: String,
    lead_id: Option<Uuid>,
    customer_id: Option<Uuid>,
    stage_id: Option<Uuid>,
    probability: i32,
    is_won: bool,
    is_lost: bool,
    closed_at: Option<DateTime<Utc>>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DealRow> for Deal {
    fn from(row: DealRow) -> Self {
        Deal {
            id: row.id.into(),
            organization_id: row.organization_id.into(),
            name: row.name,
            value_cents: row.value_cents,
            currency: row.currency,
            lead_id: row.lead_id.map(Into::into),
            customer_id: row.customer_id.map(Into::into),
            stage_id: row.stage_id.map(Into::into),
            probability: row.probability,
            is_won: row.is_won,
            is_lost: row.is_lost,
            closed_at: row.closed_at,
            created_by: row.created_by.map(Into::into),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    organization_id: Uuid,
    identity_id: Option<Uuid>,
    name: String,
    contact: Json<ContactInfo>,
    status: String,
    converted_from_lead: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CustomerRow> for Customer {
    type Error = CrmError;

    fn try_from(row: CustomerRow) -> Result<Self> {
        let status = CustomerStatus::parse(&row.status)
            .ok_or_else(|| corrupt("customers.status", &row.status))?;
        Ok(Customer {
            id: row.id.into(),
            organization_id: row.organization_id.into(),
            identity_id: row.identity_id.map(Into::into),
            name: row.name,
            contact: row.contact.0,
            status,
            converted_from_lead: row.converted_from_lead.map(Into::into),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    organization_id: Uuid,
    subject_type: String,
    subject_id: Uuid,
    from_stage_id: Option<Uuid>,
    to_stage_id: Uuid,
    changed_by: Option<Uuid>,
    note: Option<String>,
    changed_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for StageHistoryEntry {
    type Error = CrmError;

    fn try_from(row: HistoryRow) -> Result<Self> {
        let subject = match row.subject_type.as_str() {
            "lead" => StageSubject::Lead(row.subject_id.into()),
            "deal" => StageSubject::Deal(row.subject_id.into()),
            other => return Err(corrupt("stage_history.subject_type", other)),
        };
        Ok(StageHistoryEntry {
            id: row.id.into(),
            organization_id: row.organization_id.into(),
            subject,
            from_stage_id: row.from_stage_id.map(Into::into),
            to_stage_id: row.to_stage_id.into(),
            changed_by: row.changed_by.map(Into::into),
            note: row.note,
            changed_at: row.changed_at,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Shared queries (pool or transaction)
// ═══════════════════════════════════════════════════════════════════════════════

const LEAD_COLUMNS: &str = "id, organization_id, name, contact, qualification, stage_id, \
     is_converted, converted_at, created_by, created_at, updated_at";
const DEAL_COLUMNS: &str = "id, organization_id, name, value_cents, currency, lead_id, \
     customer_id, stage_id, probability, is_won, is_lost, closed_at, created_by, created_at, updated_at";
const CUSTOMER_COLUMNS: &str = "id, organization_id, identity_id, name, contact, status, \
     converted_from_lead, created_at, updated_at";
const STAGE_COLUMNS: &str = "id, pipeline_id, organization_id, name, order_index, \
     win_probability, is_closed_won, is_closed_lost, is_active";

async fn fetch_lead<'e>(executor: impl PgExecutor<'e>, id: LeadId, lock: bool) -> Result<Option<Lead>> {
    let sql = format!(
        "SELECT {} FROM leads WHERE id = $1{}",
        LEAD_COLUMNS,
        if lock { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, LeadRow>(&sql)
        .bind(id.0)
        .fetch_optional(executor)
        .await?
        .map(Lead::try_from)
        .transpose()
}

async fn fetch_deal<'e>(executor: impl PgExecutor<'e>, id: DealId, lock: bool) -> Result<Option<Deal>> {
    let sql = format!(
        "SELECT {} FROM deals WHERE id = $1{}",
        DEAL_COLUMNS,
        if lock { " FOR UPDATE" } else { "" }
    );
    Ok(sqlx::query_as::<_, DealRow>(&sql)
        .bind(id.0)
        .fetch_optional(executor)
        .await?
        .map(Deal::from))
}

async fn fetch_stage<'e>(executor: impl PgExecutor<'e>, id: StageId) -> Result<Option<Stage>> {
    let sql = format!("SELECT {} FROM stages WHERE id = $1", STAGE_COLUMNS);
    Ok(sqlx::query_as::<_, StageRow>(&sql)
        .bind(id.0)
        .fetch_optional(executor)
        .await?
        .map(Stage::from))
}

async fn fetch_stages<'e>(executor: impl PgExecutor<'e>, pipeline: PipelineId) -> Result<Vec<Stage>> {
    let sql = format!(
        "SELECT {} FROM stages WHERE pipeline_id = $1 ORDER BY order_index, name",
        STAGE_COLUMNS
    );
    Ok(sqlx::query_as::<_, StageRow>(&sql)
        .bind(pipeline.0)
        .fetch_all(executor)
        .await?
        .into_iter()
        .map(Stage::from)
        .collect())
}

async fn fetch_pipelines<'e>(executor: impl PgExecutor<'e>, organization: OrganizationId) -> Result<Vec<Pipeline>> {
    Ok(sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, organization_id, name, is_default, is_active, created_at
        FROM pipelines
        WHERE organization_id = $1
        ORDER BY created_at, id
        "#,
    )
    .bind(organization.0)
    .fetch_all(executor)
    .await?
    .into_iter()
    .map(Pipeline::from)
    .collect())
}

async fn fetch_customer<'e>(executor: impl PgExecutor<'e>, id: CustomerId) -> Result<Option<Customer>> {
    let sql = format!("SELECT {} FROM customers WHERE id = $1", CUSTOMER_COLUMNS);
    sqlx::query_as::<_, CustomerRow>(&sql)
        .bind(id.0)
        .fetch_optional(executor)
        .await?
        .map(Customer::try_from)
        .transpose()
}

async fn write_customer<'e>(executor: impl PgExecutor<'e>, customer: &Customer) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO customers (id, organization_id, identity_id, name, contact, email, status,
                               converted_from_lead, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(customer.id.0)
    .bind(customer.organization_id.0)
    .bind(customer.identity_id.map(|i| i.0))
    .bind(&customer.name)
    .bind(Json(&customer.contact))
    .bind(customer.contact.normalized_email())
    .bind(customer.status.as_str())
    .bind(customer.converted_from_lead.map(|l| l.0))
    .bind(customer.created_at)
    .bind(customer.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// PgStore
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TenancyStore for PgStore {
    async fn insert_identity(&self, identity: &Identity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO identities (id, email, is_verified, is_locked, is_active, is_superuser, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(identity.id.0)
        .bind(&identity.email)
        .bind(identity.is_verified)
        .bind(identity.is_locked)
        .bind(identity.is_active)
        .bind(identity.is_superuser)
        .bind(identity.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>> {
        Ok(sqlx::query_as::<_, IdentityRow>(
            "SELECT id, email, is_verified, is_locked, is_active, is_superuser, created_at \
             FROM identities WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .map(Identity::from))
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>> {
        Ok(sqlx::query_as::<_, IdentityRow>(
            "SELECT id, email, is_verified, is_locked, is_active, is_superuser, created_at \
             FROM identities WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .map(Identity::from))
    }

    async fn update_identity(&self, identity: &Identity) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET email = $2, is_verified = $3, is_locked = $4, is_active = $5, is_superuser = $6
            WHERE id = $1
            "#,
        )
        .bind(identity.id.0)
        .bind(&identity.email)
        .bind(identity.is_verified)
        .bind(identity.is_locked)
        .bind(identity.is_active)
        .bind(identity.is_superuser)
        .execute(&self.pool)
        .await?;
        expect_row(result.rows_affected(), "identity")
    }

    async fn insert_organization(&self, organization: &Organization) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, slug, is_active, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(organization.id.0)
        .bind(&organization.name)
        .bind(&organization.slug)
        .bind(organization.is_active)
        .bind(organization.created_by.0)
        .bind(organization.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_organization(&self, id: OrganizationId) -> Result<Option<Organization>> {
        Ok(sqlx::query_as::<_, OrganizationRow>(
            "SELECT id, name, slug, is_active, created_by, created_at FROM organizations WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .map(Organization::from))
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM organizations WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn upsert_membership(&self, membership: &OrganizationMembership) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO organization_memberships
                (identity_id, organization_id, is_active, is_owner, joined_at, left_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (identity_id, organization_id) DO UPDATE
            SET is_active = EXCLUDED.is_active,
                is_owner = EXCLUDED.is_owner,
                joined_at = EXCLUDED.joined_at,
                left_at = EXCLUDED.left_at
            "#,
        )
        .bind(membership.identity_id.0)
        .bind(membership.organization_id.0)
        .bind(membership.is_active)
        .bind(membership.is_owner)
        .bind(membership.joined_at)
        .bind(membership.left_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_membership(
        &self,
        identity: IdentityId,
        organization: OrganizationId,
    ) -> Result<Option<OrganizationMembership>> {
        Ok(sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT identity_id, organization_id, is_active, is_owner, joined_at, left_at
            FROM organization_memberships
            WHERE identity_id = $1 AND organization_id = $2
            "#,
        )
        .bind(identity.0)
        .bind(organization.0)
        .fetch_optional(&self.pool)
        .await?
        .map(OrganizationMembership::from))
    }

    async fn owned_organization(&self, identity: IdentityId) -> Result<Option<OrganizationId>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT m.organization_id
            FROM organization_memberships m
            JOIN organizations o ON o.id = m.organization_id
            WHERE m.identity_id = $1 AND m.is_owner AND m.is_active AND o.is_active
            ORDER BY m.joined_at
            LIMIT 1
            "#,
        )
        .bind(identity.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id.map(Into::into))
    }

    async fn find_profile(&self, identity: IdentityId, kind: ProfileKind) -> Result<Option<Profile>> {
        sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT id, identity_id, kind, organization_id, is_active, created_at
            FROM profiles
            WHERE identity_id = $1 AND kind = $2
            "#,
        )
        .bind(identity.0)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(Profile::try_from)
        .transpose()
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO profiles (id, identity_id, kind, organization_id, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(profile.id.0)
        .bind(profile.identity_id.0)
        .bind(profile.kind.as_str())
        .bind(profile.organization_id.map(|o| o.0))
        .bind(profile.is_active)
        .bind(profile.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => match CrmError::from(e) {
                e if e.code() == ErrorCode::DuplicateRecord => Err(CrmError::duplicate_profile(profile.kind)),
                e => Err(e),
            },
        }
    }

    async fn update_profile(&self, profile: &Profile) -> Result<()> {
        let result = sqlx::query(
            "UPDATE profiles SET organization_id = $2, is_active = $3 WHERE id = $1",
        )
        .bind(profile.id.0)
        .bind(profile.organization_id.map(|o| o.0))
        .bind(profile.is_active)
        .execute(&self.pool)
        .await?;
        expect_row(result.rows_affected(), "profile")
    }

    async fn find_employee(&self, identity: IdentityId) -> Result<Option<Employee>> {
        Ok(sqlx::query_as::<_, EmployeeRow>(
            "SELECT id, identity_id, organization_id, role_id, is_active, created_at \
             FROM employees WHERE identity_id = $1",
        )
        .bind(identity.0)
        .fetch_optional(&self.pool)
        .await?
        .map(Employee::from))
    }

    async fn upsert_employee(&self, employee: &Employee) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO employees (id, identity_id, organization_id, role_id, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (identity_id) DO UPDATE
            SET organization_id = EXCLUDED.organization_id,
                role_id = EXCLUDED.role_id,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(employee.id.0)
        .bind(employee.identity_id.0)
        .bind(employee.organization_id.0)
        .bind(employee.role_id.map(|r| r.0))
        .bind(employee.is_active)
        .bind(employee.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn customer_organizations(&self, identity: IdentityId) -> Result<Vec<OrganizationId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT organization_id
            FROM customers
            WHERE identity_id = $1 AND status = 'active'
            ORDER BY organization_id
            "#,
        )
        .bind(identity.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl RbacStore for PgStore {
    async fn insert_role(&self, role: &Role) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO roles (id, organization_id, name, description, is_system, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(role.id.0)
        .bind(role.organization_id.0)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_system)
        .bind(role.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<Role>> {
        Ok(sqlx::query_as::<_, RoleRow>(
            "SELECT id, organization_id, name, description, is_system, created_at FROM roles WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .map(Role::from))
    }

    async fn find_role_by_name(&self, organization: OrganizationId, name: &str) -> Result<Option<Role>> {
        Ok(sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT id, organization_id, name, description, is_system, created_at
            FROM roles
            WHERE organization_id = $1 AND lower(name) = lower($2)
            "#,
        )
        .bind(organization.0)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .map(Role::from))
    }

    async fn list_roles(&self, organization: OrganizationId) -> Result<Vec<Role>> {
        Ok(sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT id, organization_id, name, description, is_system, created_at
            FROM roles
            WHERE organization_id = $1
            ORDER BY name
            "#,
        )
        .bind(organization.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Role::from)
        .collect())
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<()> {
        sqlx::query(
            "INSERT INTO permissions (id, organization_id, resource, action) VALUES ($1, $2, $3, $4)",
        )
        .bind(permission.id.0)
        .bind(permission.organization_id.0)
        .bind(&permission.resource)
        .bind(&permission.action)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>> {
        Ok(sqlx::query_as::<_, PermissionRow>(
            "SELECT id, organization_id, resource, action FROM permissions WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .map(Permission::from))
    }

    async fn find_permission(
        &self,
        organization: OrganizationId,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>> {
        Ok(sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT id, organization_id, resource, action
            FROM permissions
            WHERE organization_id = $1 AND resource = $2 AND action = $3
            "#,
        )
        .bind(organization.0)
        .bind(resource)
        .bind(action)
        .fetch_optional(&self.pool)
        .await?
        .map(Permission::from))
    }

    async fn grant(&self, role: RoleId, permission: PermissionId) -> Result<()> {
        sqlx::query(
            "INSERT INTO role_grants (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(role.0)
        .bind(permission.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke(&self, role: RoleId, permission: PermissionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM role_grants WHERE role_id = $1 AND permission_id = $2")
            .bind(role.0)
            .bind(permission.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn role_permissions(&self, role: RoleId) -> Result<Vec<Permission>> {
        Ok(sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT p.id, p.organization_id, p.resource, p.action
            FROM permissions p
            JOIN role_grants g ON g.permission_id = p.id
            WHERE g.role_id = $1
            ORDER BY p.resource, p.action
            "#,
        )
        .bind(role.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Permission::from)
        .collect())
    }

    async fn insert_assignment(&self, assignment: &IdentityRoleAssignment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO identity_role_assignments
                (id, identity_id, organization_id, role_id, is_active, assigned_by, assigned_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(assignment.id.0)
        .bind(assignment.identity_id.0)
        .bind(assignment.organization_id.0)
        .bind(assignment.role_id.0)
        .bind(assignment.is_active)
        .bind(assignment.assigned_by.map(|i| i.0))
        .bind(assignment.assigned_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_assignment(&self, assignment: &IdentityRoleAssignment) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE identity_role_assignments
            SET is_active = $2, assigned_by = $3, assigned_at = $4
            WHERE id = $1
            "#,
        )
        .bind(assignment.id.0)
        .bind(assignment.is_active)
        .bind(assignment.assigned_by.map(|i| i.0))
        .bind(assignment.assigned_at)
        .execute(&self.pool)
        .await?;
        expect_row(result.rows_affected(), "assignment")
    }

    async fn list_assignments(
        &self,
        identity: IdentityId,
        organization: OrganizationId,
    ) -> Result<Vec<IdentityRoleAssignment>> {
        Ok(sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT id, identity_id, organization_id, role_id, is_active, assigned_by, assigned_at
            FROM identity_role_assignments
            WHERE identity_id = $1 AND organization_id = $2
            ORDER BY assigned_at
            "#,
        )
        .bind(identity.0)
        .bind(organization.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(IdentityRoleAssignment::from)
        .collect())
    }
}

#[async_trait]
impl PipelineStore for PgStore {
    async fn insert_pipeline(&self, pipeline: &Pipeline, stages: &[Stage]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO pipelines (id, organization_id, name, is_default, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(pipeline.id.0)
        .bind(pipeline.organization_id.0)
        .bind(&pipeline.name)
        .bind(pipeline.is_default)
        .bind(pipeline.is_active)
        .bind(pipeline.created_at)
        .execute(&mut *tx)
        .await?;

        for stage in stages {
            sqlx::query(
                r#"
                INSERT INTO stages (id, pipeline_id, organization_id, name, order_index,
                                    win_probability, is_closed_won, is_closed_lost, is_active)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(stage.id.0)
            .bind(stage.pipeline_id.0)
            .bind(stage.organization_id.0)
            .bind(&stage.name)
            .bind(stage.order_index)
            .bind(stage.win_probability)
            .bind(stage.is_closed_won)
            .bind(stage.is_closed_lost)
            .bind(stage.is_active)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let result = sqlx::query(
            "UPDATE pipelines SET name = $2, is_default = $3, is_active = $4 WHERE id = $1",
        )
        .bind(pipeline.id.0)
        .bind(&pipeline.name)
        .bind(pipeline.is_default)
        .bind(pipeline.is_active)
        .execute(&self.pool)
        .await?;
        expect_row(result.rows_affected(), "pipeline")
    }

    async fn get_pipeline(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        Ok(sqlx::query_as::<_, PipelineRow>(
            "SELECT id, organization_id, name, is_default, is_active, created_at FROM pipelines WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .map(Pipeline::from))
    }

    async fn list_pipelines(&self, organization: OrganizationId) -> Result<Vec<Pipeline>> {
        fetch_pipelines(&self.pool, organization).await
    }

    async fn list_stages(&self, pipeline: PipelineId) -> Result<Vec<Stage>> {
        fetch_stages(&self.pool, pipeline).await
    }

    async fn get_stage(&self, id: StageId) -> Result<Option<Stage>> {
        fetch_stage(&self.pool, id).await
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO leads (id, organization_id, name, contact, qualification, stage_id,
                               is_converted, converted_at, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(lead.id.0)
        .bind(lead.organization_id.0)
        .bind(&lead.name)
        .bind(Json(&lead.contact))
        .bind(lead.qualification.as_str())
        .bind(lead.stage_id.map(|s| s.0))
        .bind(lead.is_converted)
        .bind(lead.converted_at)
        .bind(lead.created_by.map(|i| i.0))
        .bind(lead.created_at)
        .bind(lead.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_lead(&self, id: LeadId) -> Result<Option<Lead>> {
        fetch_lead(&self.pool, id, false).await
    }

    async fn insert_deal(&self, deal: &Deal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deals (id, organization_id, name, value_cents, currency, lead_id, customer_id,
                               stage_id, probability, is_won, is_lost, closed_at, created_by,
                               created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(deal.id.0)
        .bind(deal.organization_id.0)
        .bind(&deal.name)
        .bind(deal.value_cents)
        .bind(&deal.currency)
        .bind(deal.lead_id.map(|l| l.0))
        .bind(deal.customer_id.map(|c| c.0))
        .bind(deal.stage_id.map(|s| s.0))
        .bind(deal.probability)
        .bind(deal.is_won)
        .bind(deal.is_lost)
        .bind(deal.closed_at)
        .bind(deal.created_by.map(|i| i.0))
        .bind(deal.created_at)
        .bind(deal.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_deal(&self, id: DealId) -> Result<Option<Deal>> {
        fetch_deal(&self.pool, id, false).await
    }

    async fn insert_customer(&self, customer: &Customer) -> Result<()> {
        write_customer(&self.pool, customer).await
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        fetch_customer(&self.pool, id).await
    }

    async fn list_history(&self, subject: StageSubject) -> Result<Vec<StageHistoryEntry>> {
        sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, organization_id, subject_type, subject_id, from_stage_id, to_stage_id,
                   changed_by, note, changed_at
            FROM stage_history
            WHERE subject_type = $1 AND subject_id = $2
            ORDER BY changed_at, id
            "#,
        )
        .bind(subject.kind())
        .bind(subject.id())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StageHistoryEntry::try_from)
        .collect()
    }

    async fn begin(&self) -> Result<Box<dyn PipelineTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PgTx
// ═══════════════════════════════════════════════════════════════════════════════

/// Unit of work over one database transaction; dropping it rolls back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PipelineTx for PgTx {
    async fn lock_lead(&mut self, id: LeadId) -> Result<Option<Lead>> {
        fetch_lead(&mut *self.tx, id, true).await
    }

    async fn lock_deal(&mut self, id: DealId) -> Result<Option<Deal>> {
        fetch_deal(&mut *self.tx, id, true).await
    }

    async fn get_lead(&mut self, id: LeadId) -> Result<Option<Lead>> {
        fetch_lead(&mut *self.tx, id, false).await
    }

    async fn get_stage(&mut self, id: StageId) -> Result<Option<Stage>> {
        fetch_stage(&mut *self.tx, id).await
    }

    async fn list_pipelines(&mut self, organization: OrganizationId) -> Result<Vec<Pipeline>> {
        fetch_pipelines(&mut *self.tx, organization).await
    }

    async fn list_stages(&mut self, pipeline: PipelineId) -> Result<Vec<Stage>> {
        fetch_stages(&mut *self.tx, pipeline).await
    }

    async fn update_lead(&mut self, lead: &Lead) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET name = $2, contact = $3, qualification = $4, stage_id = $5,
                is_converted = $6, converted_at = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(lead.id.0)
        .bind(&lead.name)
        .bind(Json(&lead.contact))
        .bind(lead.qualification.as_str())
        .bind(lead.stage_id.map(|s| s.0))
        .bind(lead.is_converted)
        .bind(lead.converted_at)
        .bind(lead.updated_at)
        .execute(&mut *self.tx)
        .await?;
        expect_row(result.rows_affected(), "lead")
    }

    async fn update_deal(&mut self, deal: &Deal) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE deals
            SET name = $2, value_cents = $3, currency = $4, lead_id = $5, customer_id = $6,
                stage_id = $7, probability = $8, is_won = $9, is_lost = $10, closed_at = $11,
                updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(deal.id.0)
        .bind(&deal.name)
        .bind(deal.value_cents)
        .bind(&deal.currency)
        .bind(deal.lead_id.map(|l| l.0))
        .bind(deal.customer_id.map(|c| c.0))
        .bind(deal.stage_id.map(|s| s.0))
        .bind(deal.probability)
        .bind(deal.is_won)
        .bind(deal.is_lost)
        .bind(deal.closed_at)
        .bind(deal.updated_at)
        .execute(&mut *self.tx)
        .await?;
        expect_row(result.rows_affected(), "deal")
    }

    async fn append_history(&mut self, entry: &StageHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stage_history (id, organization_id, subject_type, subject_id, from_stage_id,
                                       to_stage_id, changed_by, note, changed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id.0)
        .bind(entry.organization_id.0)
        .bind(entry.subject.kind())
        .bind(entry.subject.id())
        .bind(entry.from_stage_id.map(|s| s.0))
        .bind(entry.to_stage_id.0)
        .bind(entry.changed_by.map(|i| i.0))
        .bind(&entry.note)
        .bind(entry.changed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_customer(&mut self, id: CustomerId) -> Result<Option<Customer>> {
        fetch_customer(&mut *self.tx, id).await
    }

    async fn find_customer_by_email(
        &mut self,
        organization: OrganizationId,
        email: &str,
    ) -> Result<Option<Customer>> {
        let sql = format!(
            "SELECT {} FROM customers WHERE organization_id = $1 AND email = $2 FOR UPDATE",
            CUSTOMER_COLUMNS
        );
        sqlx::query_as::<_, CustomerRow>(&sql)
            .bind(organization.0)
            .bind(email.trim().to_ascii_lowercase())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Customer::try_from)
            .transpose()
    }

    async fn find_customer_by_name(
        &mut self,
        organization: OrganizationId,
        name: &str,
    ) -> Result<Option<Customer>> {
        let sql = format!(
            "SELECT {} FROM customers WHERE organization_id = $1 AND lower(trim(name)) = lower(trim($2)) \
             ORDER BY created_at LIMIT 1 FOR UPDATE",
            CUSTOMER_COLUMNS
        );
        sqlx::query_as::<_, CustomerRow>(&sql)
            .bind(organization.0)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Customer::try_from)
            .transpose()
    }

    async fn customers_converted_from(&mut self, lead: LeadId) -> Result<Vec<Customer>> {
        let sql = format!(
            "SELECT {} FROM customers WHERE converted_from_lead = $1 ORDER BY created_at FOR UPDATE",
            CUSTOMER_COLUMNS
        );
        sqlx::query_as::<_, CustomerRow>(&sql)
            .bind(lead.0)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(Customer::try_from)
            .collect()
    }

    async fn insert_customer(&mut self, customer: &Customer) -> Result<()> {
        write_customer(&mut *self.tx, customer).await
    }

    async fn update_customer(&mut self, customer: &Customer) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE customers
            SET identity_id = $2, name = $3, contact = $4, email = $5, status = $6,
                converted_from_lead = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(customer.id.0)
        .bind(customer.identity_id.map(|i| i.0))
        .bind(&customer.name)
        .bind(Json(&customer.contact))
        .bind(customer.contact.normalized_email())
        .bind(customer.status.as_str())
        .bind(customer.converted_from_lead.map(|l| l.0))
        .bind(customer.updated_at)
        .execute(&mut *self.tx)
        .await?;
        expect_row(result.rows_affected(), "customer")
    }

    async fn count_won_deals(&mut self, customer: CustomerId, excluding: Option<DealId>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM deals
            WHERE customer_id = $1 AND is_won AND ($2::uuid IS NULL OR id <> $2)
            "#,
        )
        .bind(customer.0)
        .bind(excluding.map(|d| d.0))
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
