//! Default pipeline template seeded for new organizations.

use super::models::NewStage;

pub const DEFAULT_PIPELINE_NAME: &str = "Sales";

/// Lead → Qualified → Proposal → Negotiation → Closed Won / Closed Lost.
pub fn default_stages() -> Vec<NewStage> {
    vec![
        NewStage::new("Lead", 1, 10),
        NewStage::new("Qualified", 2, 25),
        NewStage::new("Proposal", 3, 50),
        NewStage::new("Negotiation", 4, 75),
        NewStage::new("Closed Won", 5, 100).closed_won(),
        NewStage::new("Closed Lost", 6, 0).closed_lost(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_won_and_one_lost_stage() {
        let stages = default_stages();
        assert_eq!(stages.iter().filter(|s| s.is_closed_won).count(), 1);
        assert_eq!(stages.iter().filter(|s| s.is_closed_lost).count(), 1);
        assert!(stages.windows(2).all(|w| w[0].order_index < w[1].order_index));
    }
}
