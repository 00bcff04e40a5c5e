//! Pipeline / stage engine.
//!
//! The transition graph is unrestricted: any stage of the pipeline can be
//! reached from any other. A transition, its history entry and its
//! conversion side effects commit together or not at all; side integrations
//! run only after the commit.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use super::conversion::{self, ConversionEffect, ConversionSource};
use super::defaults::{default_stages, DEFAULT_PIPELINE_NAME};
use super::models::{
    Customer, CustomerStatus, Deal, Lead, NewCustomer, NewDeal, NewLead, NewStage, Pipeline,
    Stage, StageHistoryEntry, StageRef, StageSubject,
};
use crate::error::{CrmError, Result};
use crate::ids::{
    CustomerId, DealId, HistoryEntryId, IdentityId, LeadId, OrganizationId, PipelineId, StageId,
};
use crate::integrations::{notify_all, StageEvent, StageEventSink};
use crate::store::{PipelineStore, PipelineTx};
use crate::telemetry::PipelineMetrics;

/// Result of a stage move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub subject: StageSubject,
    /// False for a move to the current stage; nothing was written.
    pub changed: bool,
    pub from_stage_id: Option<StageId>,
    pub to_stage: Stage,
    pub conversion: Vec<ConversionEffect>,
}

#[derive(Clone)]
pub struct StageEngine {
    store: Arc<dyn PipelineStore>,
    sinks: Vec<Arc<dyn StageEventSink>>,
}

impl StageEngine {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self {
            store,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn StageEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pipelines & stages
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a pipeline with its stages. `make_default` clears any other default.
    #[instrument(skip(self, stages))]
    pub async fn create_pipeline(
        &self,
        organization: OrganizationId,
        name: &str,
        stages: Vec<NewStage>,
        make_default: bool,
    ) -> Result<(Pipeline, Vec<Stage>)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CrmError::validation("pipeline name must not be empty"));
        }
        validate_stages(&stages)?;

        let pipeline = Pipeline {
            id: PipelineId::new(),
            organization_id: organization,
            name: name.to_string(),
            is_default: false,
            is_active: true,
            created_at: Utc::now(),
        };
        let mut stages: Vec<Stage> = stages
            .into_iter()
            .map(|s| Stage {
                id: StageId::new(),
                pipeline_id: pipeline.id,
                organization_id: organization,
                name: s.name.trim().to_string(),
                order_index: s.order_index,
                win_probability: s.win_probability,
                is_closed_won: s.is_closed_won,
                is_closed_lost: s.is_closed_lost,
                is_active: true,
            })
            .collect();
        stages.sort_by_key(|s| s.order_index);

        self.store.insert_pipeline(&pipeline, &stages).await?;
        let pipeline = if make_default {
            self.set_default_pipeline(organization, pipeline.id).await?
        } else {
            pipeline
        };
        Ok((pipeline, stages))
    }

    /// Make `pipeline` the organization's only default.
    pub async fn set_default_pipeline(
        &self,
        organization: OrganizationId,
        pipeline: PipelineId,
    ) -> Result<Pipeline> {
        let pipelines = self.store.list_pipelines(organization).await?;
        let mut target = pipelines
            .iter()
            .find(|p| p.id == pipeline)
            .cloned()
            .ok_or_else(|| CrmError::not_found("pipeline", pipeline.to_string()))?;
        if !target.is_active {
            return Err(CrmError::validation("an inactive pipeline cannot be the default"));
        }

        for mut other in pipelines.into_iter().filter(|p| p.is_default && p.id != pipeline) {
            other.is_default = false;
            self.store.update_pipeline(&other).await?;
        }
        target.is_default = true;
        self.store.update_pipeline(&target).await?;
        Ok(target)
    }

    /// The oldest active default pipeline, else the oldest active pipeline.
    pub async fn default_pipeline(&self, organization: OrganizationId) -> Result<Option<Pipeline>> {
        Ok(pick_default(self.store.list_pipelines(organization).await?))
    }

    /// Get-or-create the default pipeline from the default stage template.
    pub async fn ensure_default_pipeline(&self, organization: OrganizationId) -> Result<Pipeline> {
        if let Some(pipeline) = self.default_pipeline(organization).await? {
            return Ok(pipeline);
        }
        let (pipeline, _) = self
            .create_pipeline(organization, DEFAULT_PIPELINE_NAME, default_stages(), true)
            .await?;
        Ok(pipeline)
    }

    /// Active stages of the default pipeline, ordered by `order`.
    pub async fn list_stages(&self, organization: OrganizationId) -> Result<Vec<Stage>> {
        match self.default_pipeline(organization).await? {
            Some(pipeline) => self.list_pipeline_stages(organization, pipeline.id).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn list_pipeline_stages(
        &self,
        organization: OrganizationId,
        pipeline: PipelineId,
    ) -> Result<Vec<Stage>> {
        let pipeline = self
            .store
            .get_pipeline(pipeline)
            .await?
            .filter(|p| p.organization_id == organization)
            .ok_or_else(|| CrmError::not_found("pipeline", pipeline.to_string()))?;
        Ok(self
            .store
            .list_stages(pipeline.id)
            .await?
            .into_iter()
            .filter(|s| s.is_active)
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a lead in the first stage of the default pipeline.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_lead(
        &self,
        organization: OrganizationId,
        input: NewLead,
        actor: Option<IdentityId>,
    ) -> Result<Lead> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(CrmError::validation("lead name must not be empty"));
        }
        let stage = self.list_stages(organization).await?.into_iter().next();

        let now = Utc::now();
        let lead = Lead {
            id: LeadId::new(),
            organization_id: organization,
            name: name.to_string(),
            contact: input.contact,
            qualification: input.qualification,
            stage_id: stage.map(|s| s.id),
            is_converted: false,
            converted_at: None,
            created_by: actor,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_lead(&lead).await?;
        info!(lead_id = %lead.id, organization_id = %organization, "Lead created");
        Ok(lead)
    }

    /// Create a deal in an open stage of the lead's pipeline (or the default one).
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_deal(
        &self,
        organization: OrganizationId,
        input: NewDeal,
        actor: Option<IdentityId>,
    ) -> Result<Deal> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(CrmError::validation("deal name must not be empty"));
        }
        if input.value_cents < 0 {
            return Err(CrmError::validation("deal value must not be negative"));
        }

        let lead = match input.lead_id {
            Some(id) => Some(self.get_lead(organization, id).await?),
            None => None,
        };
        if let Some(id) = input.customer_id {
            self.get_customer(organization, id).await?;
        }

        let lead_stage = match lead.as_ref().and_then(|l| l.stage_id) {
            Some(id) => self.store.get_stage(id).await?,
            None => None,
        };
        let stages = match lead_stage {
            Some(stage) => self.list_pipeline_stages(organization, stage.pipeline_id).await?,
            None => self.list_stages(organization).await?,
        };

        let stage = match &input.stage {
            Some(target) => Some(resolve_target(&stages, target)?),
            None => stages.first().cloned(),
        };
        if stage.as_ref().map_or(false, Stage::is_closed) {
            return Err(CrmError::validation(
                "deals are created in an open stage; move them to close",
            ));
        }

        let now = Utc::now();
        let deal = Deal {
            id: DealId::new(),
            organization_id: organization,
            name: name.to_string(),
            value_cents: input.value_cents,
            currency: input.currency.trim().to_ascii_uppercase(),
            lead_id: input.lead_id,
            customer_id: input.customer_id,
            probability: stage.as_ref().map_or(0, |s| s.win_probability),
            stage_id: stage.map(|s| s.id),
            is_won: false,
            is_lost: false,
            closed_at: None,
            created_by: actor,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_deal(&deal).await?;
        info!(deal_id = %deal.id, organization_id = %organization, "Deal created");
        Ok(deal)
    }

    /// Create a customer directly (not through conversion).
    pub async fn create_customer(&self, organization: OrganizationId, input: NewCustomer) -> Result<Customer> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(CrmError::validation("customer name must not be empty"));
        }
        let now = Utc::now();
        let customer = Customer {
            id: CustomerId::new(),
            organization_id: organization,
            identity_id: input.identity_id,
            name: name.to_string(),
            contact: input.contact,
            status: CustomerStatus::Active,
            converted_from_lead: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_customer(&customer).await?;
        Ok(customer)
    }

    /// A lead of `organization`; other organizations' leads are `NotFound`.
    pub async fn get_lead(&self, organization: OrganizationId, id: LeadId) -> Result<Lead> {
        self.store
            .get_lead(id)
            .await?
            .filter(|l| l.organization_id == organization)
            .ok_or_else(|| CrmError::not_found("lead", id.to_string()))
    }

    pub async fn get_deal(&self, organization: OrganizationId, id: DealId) -> Result<Deal> {
        self.store
            .get_deal(id)
            .await?
            .filter(|d| d.organization_id == organization)
            .ok_or_else(|| CrmError::not_found("deal", id.to_string()))
    }

    pub async fn get_customer(&self, organization: OrganizationId, id: CustomerId) -> Result<Customer> {
        self.store
            .get_customer(id)
            .await?
            .filter(|c| c.organization_id == organization)
            .ok_or_else(|| CrmError::not_found("customer", id.to_string()))
    }

    /// Unscoped lookups feeding the gateway's instance check.
    pub async fn find_lead(&self, id: LeadId) -> Result<Lead> {
        self.store
            .get_lead(id)
            .await?
            .ok_or_else(|| CrmError::not_found("lead", id.to_string()))
    }

    pub async fn find_deal(&self, id: DealId) -> Result<Deal> {
        self.store
            .get_deal(id)
            .await?
            .ok_or_else(|| CrmError::not_found("deal", id.to_string()))
    }

    pub async fn find_customer(&self, id: CustomerId) -> Result<Customer> {
        self.store
            .get_customer(id)
            .await?
            .ok_or_else(|| CrmError::not_found("customer", id.to_string()))
    }

    pub async fn lead_history(&self, organization: OrganizationId, id: LeadId) -> Result<Vec<StageHistoryEntry>> {
        self.get_lead(organization, id).await?;
        self.store.list_history(StageSubject::Lead(id)).await
    }

    pub async fn deal_history(&self, organization: OrganizationId, id: DealId) -> Result<Vec<StageHistoryEntry>> {
        self.get_deal(organization, id).await?;
        self.store.list_history(StageSubject::Deal(id)).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────

    /// Move a lead to `target`.
    ///
    /// Entering a closed-won stage converts the lead into a customer; leaving
    /// one deactivates the customers it produced unless they have a won deal.
    #[instrument(skip(self, note), fields(target = %target))]
    pub async fn move_lead(
        &self,
        organization: OrganizationId,
        id: LeadId,
        target: StageRef,
        actor: Option<IdentityId>,
        note: Option<String>,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.store.begin().await?;
        let mut lead = tx
            .lock_lead(id)
            .await?
            .filter(|l| l.organization_id == organization)
            .ok_or_else(|| CrmError::not_found("lead", id.to_string()))?;

        let (current, target) = resolve_transition(&mut *tx, organization, lead.stage_id, &target).await?;
        let subject = StageSubject::Lead(lead.id);
        if lead.stage_id == Some(target.id) {
            return Ok(unchanged(subject, target));
        }

        let now = Utc::now();
        let was_won = current.as_ref().map_or(false, |s| s.is_closed_won);
        let mut effects = Vec::new();
        if target.is_closed_won {
            effects.push(conversion::convert(&mut *tx, ConversionSource::Lead(&mut lead), now).await?);
        } else if was_won {
            effects = conversion::reverse(&mut *tx, ConversionSource::Lead(&mut lead), now).await?;
        }

        let from = lead.stage_id;
        lead.stage_id = Some(target.id);
        lead.updated_at = now;
        tx.update_lead(&lead).await?;

        self.commit_transition(tx, organization, subject, from, target, actor, note, effects)
            .await
    }

    /// Move a deal to `target`.
    ///
    /// The deal's probability mirrors the target stage. Winning converts the
    /// linked customer (or the lead's, or one keyed by name); leaving a won
    /// stage deactivates the customer unless another deal of theirs is won.
    #[instrument(skip(self, note), fields(target = %target))]
    pub async fn move_deal(
        &self,
        organization: OrganizationId,
        id: DealId,
        target: StageRef,
        actor: Option<IdentityId>,
        note: Option<String>,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.store.begin().await?;
        let mut deal = tx
            .lock_deal(id)
            .await?
            .filter(|d| d.organization_id == organization)
            .ok_or_else(|| CrmError::not_found("deal", id.to_string()))?;

        let (current, target) = resolve_transition(&mut *tx, organization, deal.stage_id, &target).await?;
        let subject = StageSubject::Deal(deal.id);
        if deal.stage_id == Some(target.id) {
            return Ok(unchanged(subject, target));
        }

        let now = Utc::now();
        let was_won = current.as_ref().map_or(false, |s| s.is_closed_won) || deal.is_won;
        let mut effects = Vec::new();
        if target.is_closed_won {
            effects.push(conversion::convert(&mut *tx, ConversionSource::Deal(&mut deal), now).await?);
        } else if was_won {
            effects = conversion::reverse(&mut *tx, ConversionSource::Deal(&mut deal), now).await?;
        }

        deal.is_lost = target.is_closed_lost;
        if !target.is_closed() {
            deal.closed_at = None;
        } else if target.is_closed_lost {
            deal.closed_at = Some(now);
        }
        deal.probability = target.win_probability;

        let from = deal.stage_id;
        deal.stage_id = Some(target.id);
        deal.updated_at = now;
        tx.update_deal(&deal).await?;

        self.commit_transition(tx, organization, subject, from, target, actor, note, effects)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit_transition(
        &self,
        mut tx: Box<dyn PipelineTx>,
        organization: OrganizationId,
        subject: StageSubject,
        from: Option<StageId>,
        target: Stage,
        actor: Option<IdentityId>,
        note: Option<String>,
        effects: Vec<ConversionEffect>,
    ) -> Result<TransitionOutcome> {
        let entry = StageHistoryEntry {
            id: HistoryEntryId::new(),
            organization_id: organization,
            subject,
            from_stage_id: from,
            to_stage_id: target.id,
            changed_by: actor,
            note: note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            changed_at: Utc::now(),
        };
        tx.append_history(&entry).await?;
        tx.commit().await?;

        PipelineMetrics::record_transition(subject.kind(), true);
        for effect in &effects {
            PipelineMetrics::record_conversion(effect.label());
        }
        info!(
            subject = subject.kind(),
            subject_id = %subject.id(),
            to_stage = %target.name,
            conversions = effects.len(),
            "Stage transition committed"
        );

        let event = StageEvent {
            organization_id: organization,
            subject,
            from_stage_id: from,
            to_stage_id: target.id,
            to_stage_name: target.name.clone(),
            changed_by: actor,
            conversion: effects.clone(),
            occurred_at: entry.changed_at,
        };
        notify_all(&self.sinks, &event).await;

        Ok(TransitionOutcome {
            subject,
            changed: true,
            from_stage_id: from,
            to_stage: target,
            conversion: effects,
        })
    }
}

fn unchanged(subject: StageSubject, stage: Stage) -> TransitionOutcome {
    PipelineMetrics::record_transition(subject.kind(), false);
    TransitionOutcome {
        subject,
        changed: false,
        from_stage_id: Some(stage.id),
        to_stage: stage,
        conversion: Vec::new(),
    }
}

fn pick_default(pipelines: Vec<Pipeline>) -> Option<Pipeline> {
    let active: Vec<Pipeline> = pipelines.into_iter().filter(|p| p.is_active).collect();
    active
        .iter()
        .find(|p| p.is_default)
        .or_else(|| active.first())
        .cloned()
}

/// The current stage and the resolved target.
///
/// Targets are looked up in the current stage's pipeline, or in the default
/// pipeline for records without a stage.
async fn resolve_transition(
    tx: &mut dyn PipelineTx,
    organization: OrganizationId,
    current: Option<StageId>,
    target: &StageRef,
) -> Result<(Option<Stage>, Stage)> {
    let current = match current {
        Some(id) => tx.get_stage(id).await?,
        None => None,
    };
    let pipeline = match &current {
        Some(stage) => Some(stage.pipeline_id),
        None => pick_default(tx.list_pipelines(organization).await?).map(|p| p.id),
    };
    let stages: Vec<Stage> = match pipeline {
        Some(id) => tx
            .list_stages(id)
            .await?
            .into_iter()
            .filter(|s| s.is_active && s.organization_id == organization)
            .collect(),
        None => Vec::new(),
    };
    let target = resolve_target(&stages, target)?;
    Ok((current, target))
}

fn resolve_target(stages: &[Stage], target: &StageRef) -> Result<Stage> {
    stages
        .iter()
        .find(|s| target.matches(s))
        .cloned()
        .ok_or_else(|| {
            CrmError::stage_not_found(
                target.to_string(),
                stages.iter().map(|s| s.name.clone()).collect(),
            )
        })
}

fn validate_stages(stages: &[NewStage]) -> Result<()> {
    if stages.is_empty() {
        return Err(CrmError::validation("a pipeline needs at least one stage"));
    }
    for stage in stages {
        if stage.name.trim().is_empty() {
            return Err(CrmError::validation("stage name must not be empty"));
        }
        if !(0..=100).contains(&stage.win_probability) {
            return Err(CrmError::validation(format!(
                "stage '{}': win probability must be between 0 and 100",
                stage.name
            )));
        }
        if stage.is_closed_won && stage.is_closed_lost {
            return Err(CrmError::validation(format!(
                "stage '{}' cannot be both closed-won and closed-lost",
                stage.name
            )));
        }
    }
    let mut names: Vec<String> = stages.iter().map(|s| s.name.trim().to_lowercase()).collect();
    names.sort();
    names.dedup();
    if names.len() != stages.len() {
        return Err(CrmError::validation("stage names must be unique within a pipeline"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_stages_rejects_won_and_lost() {
        let stages = vec![NewStage::new("Odd", 1, 50).closed_won().closed_lost()];
        assert!(validate_stages(&stages).is_err());
    }

    #[test]
    fn test_validate_stages_rejects_duplicate_names() {
        let stages = vec![NewStage::new("Lead", 1, 10), NewStage::new("lead", 2, 20)];
        assert!(validate_stages(&stages).is_err());
    }

    #[test]
    fn test_validate_stages_rejects_probability_out_of_range() {
        assert!(validate_stages(&[NewStage::new("Lead", 1, 101)]).is_err());
        assert!(validate_stages(&default_stages()).is_ok());
    }

    #[test]
    fn test_resolve_target_reports_valid_names() {
        let err = resolve_target(&[], &StageRef::Name("Won".into())).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::StageNotFound);
        assert!(err.valid_stages().is_empty());
    }
}
