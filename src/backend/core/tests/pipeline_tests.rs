//! Stage engine integration tests: transitions, history and conversion.

mod common;

use crm_core::error::ErrorCode;
use crm_core::pipeline::{
    ContactInfo, ConversionEffect, CustomerStatus, NewCustomer, NewDeal, NewLead, NewStage,
    StageRef,
};
use crm_core::rbac::PredefinedRole;

// ============================================================================
// Transitions
// ============================================================================

#[tokio::test]
async fn test_new_lead_starts_in_first_stage_without_history() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();

    let lead = service
        .create_lead(&ctx, None, common::lead_with_email("first@example.com"))
        .await
        .unwrap();
    let stages = service.list_stages(&ctx, None).await.unwrap();

    assert_eq!(lead.stage_id, Some(stages[0].id));
    assert_eq!(lead.organization_id, tenant.id());
    assert_eq!(lead.created_by, Some(tenant.owner));
    assert!(service.lead_history(&ctx, None, lead.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_any_stage_is_reachable_from_any_other() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let lead = service
        .create_lead(&ctx, None, common::lead_with_email("hop@example.com"))
        .await
        .unwrap();

    // Skip forward, jump back, close as lost, then reopen.
    let path = ["Negotiation", "Lead", "Closed Lost", "Proposal"];
    for name in path {
        let outcome = service
            .move_lead(&ctx, None, lead.id, StageRef::from(name), None)
            .await
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.to_stage.name, name);
    }

    let history = service.lead_history(&ctx, None, lead.id).await.unwrap();
    assert_eq!(history.len(), path.len());
    assert_eq!(history[0].from_stage_id, lead.stage_id);
    for pair in history.windows(2) {
        assert_eq!(pair[1].from_stage_id, Some(pair[0].to_stage_id));
    }
}

#[tokio::test]
async fn test_move_to_current_stage_is_a_no_op() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let lead = service
        .create_lead(&ctx, None, common::lead_with_email("stay@example.com"))
        .await
        .unwrap();

    let outcome = service
        .move_lead(&ctx, None, lead.id, StageRef::from("lead"), Some("again".into()))
        .await
        .unwrap();

    assert!(!outcome.changed);
    assert!(outcome.conversion.is_empty());
    assert!(service.lead_history(&ctx, None, lead.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_stage_lists_valid_names() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let lead = service
        .create_lead(&ctx, None, common::lead_with_email("lost@example.com"))
        .await
        .unwrap();

    let err = service
        .move_lead(&ctx, None, lead.id, StageRef::from("Won"), None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::StageNotFound);
    let valid = err.valid_stages();
    assert_eq!(valid.len(), 6);
    assert!(valid.contains(&"Closed Won".to_string()));
    assert!(valid.contains(&"Qualified".to_string()));
}

#[tokio::test]
async fn test_stage_of_another_pipeline_is_not_a_target() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let (_, renewal_stages) = service
        .engine()
        .create_pipeline(
            tenant.id(),
            "Renewals",
            vec![NewStage::new("Due", 1, 50), NewStage::new("Renewed", 2, 100).closed_won()],
            false,
        )
        .await
        .unwrap();
    let lead = service
        .create_lead(&ctx, None, common::lead_with_email("renew@example.com"))
        .await
        .unwrap();

    let err = service
        .move_lead(&ctx, None, lead.id, StageRef::Id(renewal_stages[0].id), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StageNotFound);
}

#[tokio::test]
async fn test_history_records_actor_and_trimmed_note() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let sales = common::employee(&service, &tenant, PredefinedRole::Sales).await;
    let lead = service
        .create_lead(&sales, None, common::lead_with_email("note@example.com"))
        .await
        .unwrap();

    service
        .move_lead(&sales, None, lead.id, StageRef::from("Qualified"), Some("  called back  ".into()))
        .await
        .unwrap();
    service
        .move_lead(&sales, None, lead.id, StageRef::from("Proposal"), Some("   ".into()))
        .await
        .unwrap();

    let history = service.lead_history(&sales, None, lead.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].changed_by, Some(sales.identity_id));
    assert_eq!(history[0].note.as_deref(), Some("called back"));
    assert_eq!(history[1].note, None);
}

// ============================================================================
// Lead conversion
// ============================================================================

#[tokio::test]
async fn test_lead_win_then_reopen() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let lead = service
        .create_lead(&ctx, None, common::lead_with_email("won@example.com"))
        .await
        .unwrap();

    let won = service
        .move_lead(&ctx, None, lead.id, StageRef::from("closed won"), None)
        .await
        .unwrap();
    let customer_id = match won.conversion.as_slice() {
        [ConversionEffect::Created(id)] => *id,
        other => panic!("unexpected conversion: {:?}", other),
    };
    let converted = service.engine().get_lead(tenant.id(), lead.id).await.unwrap();
    assert!(converted.is_converted);
    assert!(converted.converted_at.is_some());
    let customer = service.engine().get_customer(tenant.id(), customer_id).await.unwrap();
    assert!(customer.is_active());
    assert_eq!(customer.converted_from_lead, Some(lead.id));
    assert_eq!(customer.name, lead.name);
    assert_eq!(customer.contact.email.as_deref(), Some("won@example.com"));

    let reopened = service
        .move_lead(&ctx, None, lead.id, StageRef::from("Qualified"), None)
        .await
        .unwrap();
    assert_eq!(reopened.conversion, vec![ConversionEffect::Deactivated(customer_id)]);

    let lead = service.engine().get_lead(tenant.id(), lead.id).await.unwrap();
    assert!(!lead.is_converted);
    assert!(lead.converted_at.is_none());
    let customer = service.engine().get_customer(tenant.id(), customer_id).await.unwrap();
    assert_eq!(customer.status, CustomerStatus::Inactive);

    let history = service.lead_history(&ctx, None, lead.id).await.unwrap();
    assert_eq!(history.len(), 2);

    // Winning again brings the same customer back.
    let rewon = service
        .move_lead(&ctx, None, lead.id, StageRef::from("Closed Won"), None)
        .await
        .unwrap();
    assert_eq!(rewon.conversion, vec![ConversionEffect::Reactivated(customer_id)]);
}

#[tokio::test]
async fn test_conversion_is_idempotent_per_email() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let first = service
        .create_lead(&ctx, None, common::lead_with_email("same@example.com"))
        .await
        .unwrap();
    let second = service
        .create_lead(&ctx, None, common::lead_with_email("  SAME@example.com "))
        .await
        .unwrap();

    let a = service
        .move_lead(&ctx, None, first.id, StageRef::from("Closed Won"), None)
        .await
        .unwrap();
    let b = service
        .move_lead(&ctx, None, second.id, StageRef::from("Closed Won"), None)
        .await
        .unwrap();

    let created = a.conversion[0].customer_id();
    assert!(matches!(a.conversion[0], ConversionEffect::Created(_)));
    assert_eq!(b.conversion, vec![ConversionEffect::Retained(created)]);
}

#[tokio::test]
async fn test_same_email_in_other_organization_is_separate() {
    let service = common::service();
    let first = common::tenant(&service).await;
    let second = common::tenant(&service).await;

    let mut created = Vec::new();
    for tenant in [&first, &second] {
        let ctx = tenant.owner_ctx();
        let lead = service
            .create_lead(&ctx, None, common::lead_with_email("shared@example.com"))
            .await
            .unwrap();
        let outcome = service
            .move_lead(&ctx, None, lead.id, StageRef::from("Closed Won"), None)
            .await
            .unwrap();
        assert!(matches!(outcome.conversion[0], ConversionEffect::Created(_)));
        created.push(outcome.conversion[0].customer_id());
    }
    assert_ne!(created[0], created[1]);
}

// ============================================================================
// Deals
// ============================================================================

#[tokio::test]
async fn test_deal_creation_rules() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let other = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();

    let deal = service
        .create_deal(&ctx, None, NewDeal {
            value_cents: 125_000,
            currency: "eur".into(),
            ..NewDeal::named("Annual plan")
        })
        .await
        .unwrap();
    assert_eq!(deal.currency, "EUR");
    assert_eq!(deal.probability, 10);
    assert!(!deal.is_won && !deal.is_lost);

    let err = service
        .create_deal(&ctx, None, NewDeal {
            value_cents: -1,
            ..NewDeal::named("Refund")
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let err = service
        .create_deal(&ctx, None, NewDeal {
            stage: Some(StageRef::from("Closed Won")),
            ..NewDeal::named("Shortcut")
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let foreign_lead = service
        .create_lead(&other.owner_ctx(), None, common::lead_with_email("x@example.com"))
        .await
        .unwrap();
    let err = service
        .create_deal(&ctx, None, NewDeal {
            lead_id: Some(foreign_lead.id),
            ..NewDeal::named("Poached")
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_deal_win_and_reversal_are_symmetric() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let customer = service
        .create_customer(tenant.id(), NewCustomer {
            name: "Globex".into(),
            ..NewCustomer::default()
        })
        .await
        .unwrap();
    let deal = service
        .create_deal(&ctx, None, NewDeal {
            customer_id: Some(customer.id),
            stage: Some(StageRef::from("Proposal")),
            ..NewDeal::named("Globex expansion")
        })
        .await
        .unwrap();
    assert_eq!(deal.probability, 50);

    let won = service
        .move_deal(&ctx, None, deal.id, StageRef::from("Closed Won"), None)
        .await
        .unwrap();
    assert_eq!(won.conversion, vec![ConversionEffect::Retained(customer.id)]);
    let after_win = service.engine().get_deal(tenant.id(), deal.id).await.unwrap();
    assert!(after_win.is_won);
    assert!(after_win.closed_at.is_some());
    assert_eq!(after_win.probability, 100);

    let reopened = service
        .move_deal(&ctx, None, deal.id, StageRef::from("Negotiation"), None)
        .await
        .unwrap();
    assert_eq!(reopened.conversion, vec![ConversionEffect::Deactivated(customer.id)]);
    let after_reopen = service.engine().get_deal(tenant.id(), deal.id).await.unwrap();
    assert!(!after_reopen.is_won);
    assert!(!after_reopen.is_lost);
    assert!(after_reopen.closed_at.is_none());
    assert_eq!(after_reopen.probability, 75);
    assert_eq!(after_reopen.customer_id, Some(customer.id));

    let customer = service.engine().get_customer(tenant.id(), customer.id).await.unwrap();
    assert_eq!(customer.status, CustomerStatus::Inactive);

    let history = service.deal_history(&ctx, None, deal.id).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_customer_with_another_won_deal_is_retained() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let customer = service
        .create_customer(tenant.id(), NewCustomer {
            name: "Initech".into(),
            ..NewCustomer::default()
        })
        .await
        .unwrap();

    let mut deals = Vec::new();
    for name in ["Licenses", "Support"] {
        let deal = service
            .create_deal(&ctx, None, NewDeal {
                customer_id: Some(customer.id),
                ..NewDeal::named(name)
            })
            .await
            .unwrap();
        service
            .move_deal(&ctx, None, deal.id, StageRef::from("Closed Won"), None)
            .await
            .unwrap();
        deals.push(deal);
    }

    let outcome = service
        .move_deal(&ctx, None, deals[0].id, StageRef::from("Proposal"), None)
        .await
        .unwrap();
    assert_eq!(outcome.conversion, vec![ConversionEffect::Retained(customer.id)]);
    let customer = service.engine().get_customer(tenant.id(), customer.id).await.unwrap();
    assert!(customer.is_active());
}

#[tokio::test]
async fn test_deal_closed_lost() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let deal = service
        .create_deal(&ctx, None, NewDeal::named("Long shot"))
        .await
        .unwrap();

    let outcome = service
        .move_deal(&ctx, None, deal.id, StageRef::from("Closed Lost"), None)
        .await
        .unwrap();
    assert!(outcome.conversion.is_empty());

    let deal = service.get_deal(&ctx, None, deal.id).await.unwrap();
    assert!(deal.is_lost);
    assert!(!deal.is_won);
    assert!(deal.closed_at.is_some());
    assert_eq!(deal.probability, 0);
}

#[tokio::test]
async fn test_deal_from_lead_converts_lead_contact() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let lead = service
        .create_lead(&ctx, None, NewLead {
            name: "Morgan Lee".into(),
            ..common::lead_with_email("morgan@example.com")
        })
        .await
        .unwrap();
    let deal = service
        .create_deal(&ctx, None, NewDeal {
            lead_id: Some(lead.id),
            ..NewDeal::named("Morgan onboarding")
        })
        .await
        .unwrap();

    let outcome = service
        .move_deal(&ctx, None, deal.id, StageRef::from("Closed Won"), None)
        .await
        .unwrap();
    let customer_id = outcome.conversion[0].customer_id();
    let customer = service.engine().get_customer(tenant.id(), customer_id).await.unwrap();
    assert_eq!(customer.name, "Morgan Lee");
    assert_eq!(customer.contact.email.as_deref(), Some("morgan@example.com"));
    assert_eq!(customer.converted_from_lead, Some(lead.id));

    let deal = service.get_deal(&ctx, None, deal.id).await.unwrap();
    assert_eq!(deal.customer_id, Some(customer_id));
}

#[tokio::test]
async fn test_deal_win_does_not_duplicate_a_customer_email() {
    let service = common::service();
    let tenant = common::tenant(&service).await;
    let ctx = tenant.owner_ctx();
    let holder = service
        .create_customer(tenant.id(), NewCustomer {
            name: "Existing Holder".into(),
            contact: ContactInfo::with_email("shared@example.com"),
            ..NewCustomer::default()
        })
        .await
        .unwrap();
    let linked = service
        .create_customer(tenant.id(), NewCustomer {
            name: "No Email Ltd".into(),
            ..NewCustomer::default()
        })
        .await
        .unwrap();
    let lead = service
        .create_lead(&ctx, None, common::lead_with_email("shared@example.com"))
        .await
        .unwrap();
    let deal = service
        .create_deal(&ctx, None, NewDeal {
            lead_id: Some(lead.id),
            customer_id: Some(linked.id),
            ..NewDeal::named("Linked renewal")
        })
        .await
        .unwrap();

    let outcome = service
        .move_deal(&ctx, None, deal.id, StageRef::from("Closed Won"), None)
        .await
        .unwrap();
    assert_eq!(outcome.conversion, vec![ConversionEffect::Retained(linked.id)]);

    let linked = service.engine().get_customer(tenant.id(), linked.id).await.unwrap();
    assert_eq!(linked.contact.email, None);
    let holder = service.engine().get_customer(tenant.id(), holder.id).await.unwrap();
    assert_eq!(holder.contact.email.as_deref(), Some("shared@example.com"));
}
