//! Customer conversion and reversal.
//!
//! Winning a lead or a deal get-or-creates the matching customer; moving it
//! out of a closed-won stage deactivates customers that no longer have a won
//! deal. Both directions run one algorithm parameterized by
//! [`ConversionSource`], inside the caller's unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::models::{ContactInfo, Customer, CustomerStatus, Deal, Lead};
use crate::error::Result;
use crate::ids::{CustomerId, DealId, LeadId, OrganizationId};
use crate::store::PipelineTx;

/// What a transition did to a customer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", content = "customer_id", rename_all = "snake_case")]
pub enum ConversionEffect {
    Created(CustomerId),
    Reactivated(CustomerId),
    /// Already active (win) or still backed by another won deal (reversal).
    Retained(CustomerId),
    Deactivated(CustomerId),
}

impl ConversionEffect {
    pub fn customer_id(&self) -> CustomerId {
        match self {
            Self::Created(id) | Self::Reactivated(id) | Self::Retained(id) | Self::Deactivated(id) => *id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Created(_) => "customer_created",
            Self::Reactivated(_) => "customer_reactivated",
            Self::Retained(_) => "customer_retained",
            Self::Deactivated(_) => "customer_deactivated",
        }
    }
}

/// The entity driving a conversion.
pub enum ConversionSource<'a> {
    Lead(&'a mut Lead),
    Deal(&'a mut Deal),
}

impl ConversionSource<'_> {
    fn organization_id(&self) -> OrganizationId {
        match self {
            Self::Lead(lead) => lead.organization_id,
            Self::Deal(deal) => deal.organization_id,
        }
    }
}

/// Fields a new customer is built from.
struct CustomerSeed {
    name: String,
    contact: ContactInfo,
    converted_from_lead: Option<LeadId>,
}

impl CustomerSeed {
    fn from_lead(lead: &Lead) -> Self {
        Self {
            name: lead.name.clone(),
            contact: lead.contact.clone(),
            converted_from_lead: Some(lead.id),
        }
    }
}

/// Mark the source won and get-or-create its customer.
pub async fn convert(
    tx: &mut dyn PipelineTx,
    source: ConversionSource<'_>,
    now: DateTime<Utc>,
) -> Result<ConversionEffect> {
    let org = source.organization_id();
    let seed = seed_for(tx, &source, org).await?;

    let effect = match find_existing(tx, &source, org, &seed).await? {
        Some(mut customer) => {
            let effect = if customer.is_active() {
                ConversionEffect::Retained(customer.id)
            } else {
                ConversionEffect::Reactivated(customer.id)
            };
            customer.status = CustomerStatus::Active;
            let incoming = contact_to_merge(tx, &customer, &seed.contact).await?;
            customer.contact.merge_missing(&incoming);
            if customer.converted_from_lead.is_none() {
                customer.converted_from_lead = seed.converted_from_lead;
            }
            customer.updated_at = now;
            tx.update_customer(&customer).await?;
            effect
        }
        None => {
            let customer = Customer {
                id: CustomerId::new(),
                organization_id: org,
                identity_id: None,
                name: seed.name,
                contact: seed.contact,
                status: CustomerStatus::Active,
                converted_from_lead: seed.converted_from_lead,
                created_at: now,
                updated_at: now,
            };
            tx.insert_customer(&customer).await?;
            ConversionEffect::Created(customer.id)
        }
    };

    match source {
        ConversionSource::Lead(lead) => {
            lead.is_converted = true;
            lead.converted_at.get_or_insert(now);
        }
        ConversionSource::Deal(deal) => {
            deal.is_won = true;
            deal.is_lost = false;
            deal.closed_at = Some(now);
            deal.customer_id = Some(effect.customer_id());
        }
    }
    Ok(effect)
}

/// Undo a win: clear the source's won state and deactivate customers that
/// have no other won deal. Customers are never deleted.
pub async fn reverse(
    tx: &mut dyn PipelineTx,
    source: ConversionSource<'_>,
    now: DateTime<Utc>,
) -> Result<Vec<ConversionEffect>> {
    let mut effects = Vec::new();
    match source {
        ConversionSource::Lead(lead) => {
            for customer in tx.customers_converted_from(lead.id).await? {
                effects.extend(release(tx, customer, None, now).await?);
            }
            lead.is_converted = false;
            lead.converted_at = None;
        }
        ConversionSource::Deal(deal) => {
            if let Some(customer_id) = deal.customer_id {
                if let Some(customer) = tx.get_customer(customer_id).await? {
                    effects.extend(release(tx, customer, Some(deal.id), now).await?);
                }
            }
            deal.is_won = false;
        }
    }
    Ok(effects)
}

async fn seed_for(
    tx: &mut dyn PipelineTx,
    source: &ConversionSource<'_>,
    org: OrganizationId,
) -> Result<CustomerSeed> {
    Ok(match source {
        ConversionSource::Lead(lead) => CustomerSeed::from_lead(lead),
        ConversionSource::Deal(deal) => {
            let lead = match deal.lead_id {
                Some(id) => tx.get_lead(id).await?.filter(|l| l.organization_id == org),
                None => None,
            };
            match lead {
                Some(lead) => CustomerSeed::from_lead(&lead),
                None => CustomerSeed {
                    name: deal.name.clone(),
                    contact: ContactInfo::default(),
                    converted_from_lead: None,
                },
            }
        }
    })
}

/// Lookup chain: the deal's linked customer, then a customer converted from
/// the same lead, then `(organization, email)`, then `(organization, name)`
/// when there is no email.
async fn find_existing(
    tx: &mut dyn PipelineTx,
    source: &ConversionSource<'_>,
    org: OrganizationId,
    seed: &CustomerSeed,
) -> Result<Option<Customer>> {
    if let ConversionSource::Deal(deal) = source {
        if let Some(id) = deal.customer_id {
            if let Some(customer) = tx.get_customer(id).await?.filter(|c| c.organization_id == org) {
                return Ok(Some(customer));
            }
        }
    }

    if let Some(lead) = seed.converted_from_lead {
        let from_lead = tx
            .customers_converted_from(lead)
            .await?
            .into_iter()
            .find(|c| c.organization_id == org);
        if from_lead.is_some() {
            return Ok(from_lead);
        }
    }

    match seed.contact.normalized_email() {
        Some(email) => tx.find_customer_by_email(org, &email).await,
        None => tx.find_customer_by_name(org, &seed.name).await,
    }
}

/// The seed contact, minus an email another customer of the organization
/// already holds. `(organization, email)` identifies one customer.
async fn contact_to_merge(
    tx: &mut dyn PipelineTx,
    customer: &Customer,
    seed: &ContactInfo,
) -> Result<ContactInfo> {
    let mut incoming = seed.clone();
    if customer.contact.normalized_email().is_none() {
        if let Some(email) = incoming.normalized_email() {
            let holder = tx.find_customer_by_email(customer.organization_id, &email).await?;
            if holder.is_some_and(|c| c.id != customer.id) {
                incoming.email = None;
            }
        }
    }
    Ok(incoming)
}

async fn release(
    tx: &mut dyn PipelineTx,
    mut customer: Customer,
    excluding: Option<DealId>,
    now: DateTime<Utc>,
) -> Result<Option<ConversionEffect>> {
    if !customer.is_active() {
        return Ok(None);
    }
    if tx.count_won_deals(customer.id, excluding).await? > 0 {
        return Ok(Some(ConversionEffect::Retained(customer.id)));
    }
    customer.status = CustomerStatus::Inactive;
    customer.updated_at = now;
    tx.update_customer(&customer).await?;
    Ok(Some(ConversionEffect::Deactivated(customer.id)))
}
