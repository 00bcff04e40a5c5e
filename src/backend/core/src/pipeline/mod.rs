//! Sales pipelines, stage transitions and customer conversion.

pub mod conversion;
pub mod defaults;
pub mod engine;
pub mod models;

pub use conversion::ConversionEffect;
pub use defaults::{default_stages, DEFAULT_PIPELINE_NAME};
pub use engine::{StageEngine, TransitionOutcome};
pub use models::{
    ContactInfo, Customer, CustomerStatus, Deal, Lead, NewCustomer, NewDeal, NewLead, NewStage,
    Pipeline, QualificationStatus, Stage, StageHistoryEntry, StageRef, StageSubject,
};
