//! A stage transition and its conversion side effects commit together or not
//! at all.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crm_core::error::{CrmError, ErrorCode, Result};
use crm_core::ids::{CustomerId, DealId, LeadId, OrganizationId, PipelineId, StageId};
use crm_core::pipeline::models::{
    Customer, Deal, Lead, Pipeline, Stage, StageHistoryEntry, StageSubject,
};
use crm_core::pipeline::{CustomerStatus, StageRef};
use crm_core::service::CrmService;
use crm_core::store::{MemoryStore, PipelineStore, PipelineTx};

/// Which write of a unit of work fails.
#[derive(Default)]
struct Faults {
    customer_writes: AtomicBool,
    history: AtomicBool,
}

/// A pipeline store whose units of work fail on demand.
struct FaultyPipelineStore {
    inner: Arc<MemoryStore>,
    faults: Arc<Faults>,
}

#[async_trait]
impl PipelineStore for FaultyPipelineStore {
    async fn insert_pipeline(&self, pipeline: &Pipeline, stages: &[Stage]) -> Result<()> {
        self.inner.insert_pipeline(pipeline, stages).await
    }
    async fn update_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        self.inner.update_pipeline(pipeline).await
    }
    async fn get_pipeline(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        self.inner.get_pipeline(id).await
    }
    async fn list_pipelines(&self, organization: OrganizationId) -> Result<Vec<Pipeline>> {
        PipelineStore::list_pipelines(&*self.inner, organization).await
    }
    async fn list_stages(&self, pipeline: PipelineId) -> Result<Vec<Stage>> {
        PipelineStore::list_stages(&*self.inner, pipeline).await
    }
    async fn get_stage(&self, id: StageId) -> Result<Option<Stage>> {
        PipelineStore::get_stage(&*self.inner, id).await
    }
    async fn insert_lead(&self, lead: &Lead) -> Result<()> {
        self.inner.insert_lead(lead).await
    }
    async fn get_lead(&self, id: LeadId) -> Result<Option<Lead>> {
        PipelineStore::get_lead(&*self.inner, id).await
    }
    async fn insert_deal(&self, deal: &Deal) -> Result<()> {
        self.inner.insert_deal(deal).await
    }
    async fn get_deal(&self, id: DealId) -> Result<Option<Deal>> {
        self.inner.get_deal(id).await
    }
    async fn insert_customer(&self, customer: &Customer) -> Result<()> {
        PipelineStore::insert_customer(&*self.inner, customer).await
    }
    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        PipelineStore::get_customer(&*self.inner, id).await
    }
    async fn list_history(&self, subject: StageSubject) -> Result<Vec<StageHistoryEntry>> {
        self.inner.list_history(subject).await
    }
    async fn begin(&self) -> Result<Box<dyn PipelineTx>> {
        Ok(Box::new(FaultyTx {
            inner: self.inner.begin().await?,
            faults: self.faults.clone(),
        }))
    }
}

struct FaultyTx {
    inner: Box<dyn PipelineTx>,
    faults: Arc<Faults>,
}

impl FaultyTx {
    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(CrmError::internal(format!("injected failure writing {}", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineTx for FaultyTx {
    async fn lock_lead(&mut self, id: LeadId) -> Result<Option<Lead>> {
        self.inner.lock_lead(id).await
    }
    async fn lock_deal(&mut self, id: DealId) -> Result<Option<Deal>> {
        self.inner.lock_deal(id).await
    }
    async fn get_lead(&mut self, id: LeadId) -> Result<Option<Lead>> {
        self.inner.get_lead(id).await
    }
    async fn get_stage(&mut self, id: StageId) -> Result<Option<Stage>> {
        self.inner.get_stage(id).await
    }
    async fn list_pipelines(&mut self, organization: OrganizationId) -> Result<Vec<Pipeline>> {
        self.inner.list_pipelines(organization).await
    }
    async fn list_stages(&mut self, pipeline: PipelineId) -> Result<Vec<Stage>> {
        self.inner.list_stages(pipeline).await
    }
    async fn update_lead(&mut self, lead: &Lead) -> Result<()> {
        self.inner.update_lead(lead).await
    }
    async fn update_deal(&mut self, deal: &Deal) -> Result<()> {
        self.inner.update_deal(deal).await
    }
    async fn append_history(&mut self, entry: &StageHistoryEntry) -> Result<()> {
        Self::check(&self.faults.history, "history")?;
        self.inner.append_history(entry).await
    }
    async fn get_customer(&mut self, id: CustomerId) -> Result<Option<Customer>> {
        self.inner.get_customer(id).await
    }
    async fn find_customer_by_email(
        &mut self,
        organization: OrganizationId,
        email: &str,
    ) -> Result<Option<Customer>> {
        self.inner.find_customer_by_email(organization, email).await
    }
    async fn find_customer_by_name(
        &mut self,
        organization: OrganizationId,
        name: &str,
    ) -> Result<Option<Customer>> {
        self.inner.find_customer_by_name(organization, name).await
    }
    async fn customers_converted_from(&mut self, lead: LeadId) -> Result<Vec<Customer>> {
        self.inner.customers_converted_from(lead).await
    }
    async fn insert_customer(&mut self, customer: &Customer) -> Result<()> {
        Self::check(&self.faults.customer_writes, "customer")?;
        self.inner.insert_customer(customer).await
    }
    async fn update_customer(&mut self, customer: &Customer) -> Result<()> {
        Self::check(&self.faults.customer_writes, "customer")?;
        self.inner.update_customer(customer).await
    }
    async fn count_won_deals(&mut self, customer: CustomerId, excluding: Option<DealId>) -> Result<i64> {
        self.inner.count_won_deals(customer, excluding).await
    }
    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }
}

fn faulty_service() -> (CrmService, Arc<MemoryStore>, Arc<Faults>) {
    let store = Arc::new(MemoryStore::new());
    let faults = Arc::new(Faults::default());
    let pipeline = Arc::new(FaultyPipelineStore {
        inner: store.clone(),
        faults: faults.clone(),
    });
    (CrmService::new(store.clone(), store.clone(), pipeline), store, faults)
}

async fn customer_with_email(
    store: &MemoryStore,
    organization: OrganizationId,
    email: &str,
) -> Option<Customer> {
    let mut tx = store.begin().await.unwrap();
    tx.find_customer_by_email(organization, email).await.unwrap()
}

#[tokio::test]
async fn test_failed_conversion_leaves_lead_untouched() {
    let (service, store, faults) = faulty_service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let lead = service
        .create_lead(&ctx, None, common::lead_with_email("atomic@example.com"))
        .await
        .unwrap();

    faults.customer_writes.store(true, Ordering::SeqCst);
    let err = service
        .move_lead(&ctx, None, lead.id, StageRef::from("Closed Won"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InternalError);

    let after = service.get_lead(&ctx, None, lead.id).await.unwrap();
    assert_eq!(after.stage_id, lead.stage_id);
    assert!(!after.is_converted);
    assert!(service.lead_history(&ctx, None, lead.id).await.unwrap().is_empty());
    assert!(customer_with_email(&store, tenant.id(), "atomic@example.com").await.is_none());
}

#[tokio::test]
async fn test_failed_history_write_discards_the_new_customer() {
    let (service, store, faults) = faulty_service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let lead = service
        .create_lead(&ctx, None, common::lead_with_email("late@example.com"))
        .await
        .unwrap();

    // Conversion succeeds inside the unit of work; the last write fails.
    faults.history.store(true, Ordering::SeqCst);
    service
        .move_lead(&ctx, None, lead.id, StageRef::from("Closed Won"), None)
        .await
        .unwrap_err();

    let after = service.get_lead(&ctx, None, lead.id).await.unwrap();
    assert_eq!(after.stage_id, lead.stage_id);
    assert!(!after.is_converted);
    assert!(customer_with_email(&store, tenant.id(), "late@example.com").await.is_none());
}

#[tokio::test]
async fn test_failed_reversal_keeps_the_win() {
    let (service, store, faults) = faulty_service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let lead = service
        .create_lead(&ctx, None, common::lead_with_email("keep@example.com"))
        .await
        .unwrap();
    let won = service
        .move_lead(&ctx, None, lead.id, StageRef::from("Closed Won"), None)
        .await
        .unwrap();

    faults.customer_writes.store(true, Ordering::SeqCst);
    service
        .move_lead(&ctx, None, lead.id, StageRef::from("Qualified"), None)
        .await
        .unwrap_err();

    let after = service.get_lead(&ctx, None, lead.id).await.unwrap();
    assert_eq!(after.stage_id, Some(won.to_stage.id));
    assert!(after.is_converted);
    assert_eq!(service.lead_history(&ctx, None, lead.id).await.unwrap().len(), 1);
    let customer = customer_with_email(&store, tenant.id(), "keep@example.com")
        .await
        .unwrap();
    assert_eq!(customer.status, CustomerStatus::Active);
}
