//! Query catalog for the fraud dashboard
//!
//! Descriptor builders for the reporting views and fact joins the
//! dashboard pages read, plus [`Widget`], the fixed set of unfiltered
//! panels with their recommended freshness.

pub mod filters;
pub mod types;
pub mod views;

use crate::descriptor::QueryDescriptor;
use crate::error::{Result, WarehouseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use filters::{AlertFilter, KycFilter, TransactionFilter};
pub use types::{AlertStatus, AlertType, KycStatus, RiskCategory, Severity};

/// Freshness used by the dashboard unless a widget says otherwise
pub const DASHBOARD_TTL: Duration = Duration::from_secs(600);

/// Number of locations on the overview's geographic panel
pub const OVERVIEW_TOP_LOCATIONS: u32 = 10;

/// Unfiltered dashboard panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Widget {
    FraudSummary,
    DailyTrends,
    AlertDistribution,
    CustomerSegments,
    /// Top locations by fraud rate (overview page)
    TopRiskLocations,
    /// Every location by fraud rate (geographic page)
    GeographicRisk,
    TimePatterns,
    KycRiskAnalysis,
}

impl Widget {
    pub const ALL: [Widget; 8] = [
        Widget::FraudSummary,
        Widget::DailyTrends,
        Widget::AlertDistribution,
        Widget::CustomerSegments,
        Widget::TopRiskLocations,
        Widget::GeographicRisk,
        Widget::TimePatterns,
        Widget::KycRiskAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Widget::FraudSummary => "fraud_summary",
            Widget::DailyTrends => "daily_trends",
            Widget::AlertDistribution => "alert_distribution",
            Widget::CustomerSegments => "customer_segments",
            Widget::TopRiskLocations => "top_risk_locations",
            Widget::GeographicRisk => "geographic_risk",
            Widget::TimePatterns => "time_patterns",
            Widget::KycRiskAnalysis => "kyc_risk_analysis",
        }
    }

    pub fn descriptor(&self) -> Result<QueryDescriptor> {
        match self {
            Widget::FraudSummary => views::fraud_summary(),
            Widget::DailyTrends => views::daily_trends(),
            Widget::AlertDistribution => views::alert_distribution(),
            Widget::CustomerSegments => views::customer_segments(),
            Widget::TopRiskLocations => views::geographic_risk(Some(OVERVIEW_TOP_LOCATIONS)),
            Widget::GeographicRisk => views::geographic_risk(None),
            Widget::TimePatterns => views::time_patterns(),
            Widget::KycRiskAnalysis => views::kyc_risk_analysis(),
        }
    }

    /// How stale this panel may be
    ///
    /// Day- and hour-grain aggregates only change with the daily load.
    pub fn recommended_ttl(&self) -> Duration {
        match self {
            Widget::DailyTrends | Widget::TimePatterns => Duration::from_secs(3600),
            _ => DASHBOARD_TTL,
        }
    }
}

impl fmt::Display for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Widget {
    type Err = WarehouseError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Widget::ALL
            .into_iter()
            .find(|w| w.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Widget::ALL.iter().map(Widget::as_str).collect();
                WarehouseError::ValidationError(format!(
                    "unknown widget '{}', expected one of: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_widget_has_a_descriptor() {
        for widget in Widget::ALL {
            let query = widget.descriptor().unwrap();
            assert!(query.params().is_empty(), "{} should be unfiltered", widget);
            assert!(!widget.recommended_ttl().is_zero());
        }
    }

    #[test]
    fn test_widget_keys_are_distinct() {
        let keys: std::collections::HashSet<_> = Widget::ALL
            .iter()
            .map(|w| w.descriptor().unwrap().cache_key().clone())
            .collect();
        assert_eq!(keys.len(), Widget::ALL.len());
    }

    #[test]
    fn test_widget_from_str() {
        assert_eq!("daily-trends".parse::<Widget>().unwrap(), Widget::DailyTrends);
        assert_eq!("FRAUD_SUMMARY".parse::<Widget>().unwrap(), Widget::FraudSummary);
        let err = "pie_chart".parse::<Widget>().unwrap_err();
        assert!(err.to_string().contains("kyc_risk_analysis"));
    }

    #[test]
    fn test_recommended_ttl() {
        assert_eq!(Widget::FraudSummary.recommended_ttl(), Duration::from_secs(600));
        assert_eq!(Widget::DailyTrends.recommended_ttl(), Duration::from_secs(3600));
    }
}
