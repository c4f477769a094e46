//! Fixed reporting views
//!
//! Each function returns the descriptor for one pre-aggregated view in the
//! `GOLD` schema. None of them take filters, so every dashboard session
//! shares the same cache entries.

use crate::descriptor::QueryDescriptor;
use crate::error::{Result, WarehouseError};

pub const FRAUD_SUMMARY: &str = "GOLD.VW_TABLEAU_FRAUD_SUMMARY";
pub const DAILY_TRENDS: &str = "GOLD.VW_TABLEAU_DAILY_TRENDS";
pub const ALERT_DISTRIBUTION: &str = "GOLD.VW_TABLEAU_ALERT_DISTRIBUTION";
pub const CUSTOMER_SEGMENTS: &str = "GOLD.VW_TABLEAU_CUSTOMER_SEGMENTS";
pub const GEOGRAPHIC_RISK: &str = "GOLD.VW_TABLEAU_GEOGRAPHIC_RISK";
pub const TIME_PATTERNS: &str = "GOLD.VW_TABLEAU_TIME_PATTERNS";
pub const KYC_RISK_ANALYSIS: &str = "GOLD.VW_KYC_RISK_ANALYSIS";

/// Headline counts: transactions, flagged transactions, fraud rate, high-risk customers
pub fn fraud_summary() -> Result<QueryDescriptor> {
    QueryDescriptor::from_text(format!("SELECT * FROM {}", FRAUD_SUMMARY))
}

/// One row per day, oldest first
pub fn daily_trends() -> Result<QueryDescriptor> {
    QueryDescriptor::from_text(format!("SELECT * FROM {} ORDER BY DATE_VALUE", DAILY_TRENDS))
}

pub fn alert_distribution() -> Result<QueryDescriptor> {
    QueryDescriptor::from_text(format!("SELECT * FROM {}", ALERT_DISTRIBUTION))
}

pub fn customer_segments() -> Result<QueryDescriptor> {
    QueryDescriptor::from_text(format!("SELECT * FROM {}", CUSTOMER_SEGMENTS))
}

/// Locations ordered by fraud rate, riskiest first
///
/// `top` limits the result to the first N locations; `None` returns all.
pub fn geographic_risk(top: Option<u32>) -> Result<QueryDescriptor> {
    let text = format!("SELECT * FROM {} ORDER BY FRAUD_RATE DESC", GEOGRAPHIC_RISK);
    match top {
        Some(0) => Err(WarehouseError::ValidationError(
            "geographic risk limit must be at least 1".to_string(),
        )),
        Some(n) => QueryDescriptor::from_text(format!("{} LIMIT {}", text, n)),
        None => QueryDescriptor::from_text(text),
    }
}

/// One row per hour of day
pub fn time_patterns() -> Result<QueryDescriptor> {
    QueryDescriptor::from_text(format!("SELECT * FROM {} ORDER BY TXN_HOUR", TIME_PATTERNS))
}

/// The whole KYC view; see [`KycFilter`](crate::catalog::KycFilter) for a filtered one
pub fn kyc_risk_analysis() -> Result<QueryDescriptor> {
    QueryDescriptor::from_text(format!("SELECT * FROM {}", KYC_RISK_ANALYSIS))
}
