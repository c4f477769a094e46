//! Filter vocabularies used by the dashboard pages
//!
//! The string forms are the values stored in the warehouse dimensions.

use serde::{Deserialize, Serialize};

/// Transaction alert filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    #[default]
    All,
    /// Transactions with at least one alert
    FlaggedOnly,
    /// Transactions without alerts
    CleanOnly,
}

impl AlertStatus {
    /// Value `HAS_ALERT` must equal, `None` for no restriction
    pub fn has_alert(&self) -> Option<bool> {
        match self {
            AlertStatus::All => None,
            AlertStatus::FlaggedOnly => Some(true),
            AlertStatus::CleanOnly => Some(false),
        }
    }

    /// Parse status from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "all" => Some(AlertStatus::All),
            "flagged" | "flagged_only" => Some(AlertStatus::FlaggedOnly),
            "clean" | "clean_only" => Some(AlertStatus::CleanOnly),
            _ => None,
        }
    }
}

/// `DIM_ALERT_TYPE.ALERT_SEVERITY`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Severity::Critical, Severity::High, Severity::Medium, Severity::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

/// `DIM_ALERT_TYPE.ALERT_TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertType {
    HighValue,
    RapidVelocity,
    ForeignLocation,
    MultipleFailures,
}

impl AlertType {
    pub const ALL: [AlertType; 4] = [
        AlertType::HighValue,
        AlertType::RapidVelocity,
        AlertType::ForeignLocation,
        AlertType::MultipleFailures,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::HighValue => "High Value",
            AlertType::RapidVelocity => "Rapid Velocity",
            AlertType::ForeignLocation => "Foreign Location",
            AlertType::MultipleFailures => "Multiple Failures",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let wanted = s.trim().replace(['_', '-'], " ");
        Self::ALL.into_iter().find(|v| v.as_str().eq_ignore_ascii_case(&wanted))
    }
}

/// `VW_KYC_RISK_ANALYSIS.RISK_CATEGORY`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskCategory {
    High,
    Medium,
    Low,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 3] = [RiskCategory::High, RiskCategory::Medium, RiskCategory::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::High => "High Risk",
            RiskCategory::Medium => "Medium Risk",
            RiskCategory::Low => "Low Risk",
        }
    }

    /// Accepts the stored label or just its first word ("high")
    pub fn from_str(s: &str) -> Option<Self> {
        let wanted = s.trim();
        Self::ALL.into_iter().find(|v| {
            let label = v.as_str();
            label.eq_ignore_ascii_case(wanted)
                || label.split(' ').next().is_some_and(|word| word.eq_ignore_ascii_case(wanted))
        })
    }
}

/// `VW_KYC_RISK_ANALYSIS.KYC_STATUS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KycStatus {
    Verified,
    Pending,
    Expired,
}

impl KycStatus {
    pub const ALL: [KycStatus; 3] = [KycStatus::Verified, KycStatus::Pending, KycStatus::Expired];

    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::Verified => "Verified",
            KycStatus::Pending => "Pending",
            KycStatus::Expired => "Expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
    }
}
