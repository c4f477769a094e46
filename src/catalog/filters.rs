//! Filtered fact queries
//!
//! Every user-chosen filter value is bound as a parameter; the query text
//! of each builder is constant apart from optional clauses, so equal
//! filter selections share one cache entry.

use crate::catalog::types::{AlertStatus, AlertType, KycStatus, RiskCategory, Severity};
use crate::catalog::views::KYC_RISK_ANALYSIS;
use crate::descriptor::QueryDescriptor;
use crate::error::{Result, WarehouseError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const TRANSACTIONS_SELECT: &str = "SELECT ft.TXN_ID, ft.TXN_TIMESTAMP, dc.CUSTOMER_ID, dc.RISK_SCORE, \
da.ACCOUNT_TYPE, ft.AMOUNT, dl.LOCATION, ft.HAS_ALERT, ft.ALERT_COUNT \
FROM GOLD.FACT_TRANSACTIONS ft \
JOIN GOLD.DIM_CUSTOMER dc ON ft.CUSTOMER_KEY = dc.CUSTOMER_KEY \
JOIN GOLD.DIM_ACCOUNT da ON ft.ACCOUNT_KEY = da.ACCOUNT_KEY \
JOIN GOLD.DIM_LOCATION dl ON ft.LOCATION_KEY = dl.LOCATION_KEY \
WHERE ft.AMOUNT >= :min_amount";

const ALERTS_SELECT: &str = "SELECT fa.ALERT_ID, fa.ALERT_TIMESTAMP, dc.CUSTOMER_ID, dc.RISK_SCORE, \
dat.ALERT_TYPE, dat.ALERT_SEVERITY, dat.ALERT_CATEGORY, fa.TRANSACTION_AMOUNT, fa.CUSTOMER_RISK_SCORE \
FROM GOLD.FACT_ALERTS fa \
JOIN GOLD.DIM_CUSTOMER dc ON fa.CUSTOMER_KEY = dc.CUSTOMER_KEY \
JOIN GOLD.DIM_ALERT_TYPE dat ON fa.ALERT_TYPE_KEY = dat.ALERT_TYPE_KEY \
WHERE dat.ALERT_SEVERITY IN (:severities) \
AND dat.ALERT_TYPE IN (:alert_types) \
AND fa.TRANSACTION_AMOUNT >= :min_amount";

/// Transaction explorer: most recent transactions above an amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub min_amount: u64,
    pub alert_status: AlertStatus,
    pub limit: u32,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            min_amount: 0,
            alert_status: AlertStatus::All,
            limit: 1000,
        }
    }
}

impl TransactionFilter {
    pub fn min_amount(mut self, amount: u64) -> Self {
        self.min_amount = amount;
        self
    }

    pub fn alert_status(mut self, status: AlertStatus) -> Self {
        self.alert_status = status;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn descriptor(&self) -> Result<QueryDescriptor> {
        check_limit(self.limit)?;
        let min_amount = i64::try_from(self.min_amount).map_err(|_| {
            WarehouseError::ValidationError(format!("minimum amount {} is out of range", self.min_amount))
        })?;

        let mut text = TRANSACTIONS_SELECT.to_string();
        if self.alert_status.has_alert().is_some() {
            text.push_str(" AND ft.HAS_ALERT = :has_alert");
        }
        text.push_str(&format!(" ORDER BY ft.TXN_TIMESTAMP DESC LIMIT {}", self.limit));

        let mut builder = QueryDescriptor::builder(text).param("min_amount", min_amount);
        if let Some(has_alert) = self.alert_status.has_alert() {
            builder = builder.param("has_alert", has_alert);
        }
        builder.build()
    }
}

/// Alert management page: alerts by severity, type and amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub severities: BTreeSet<Severity>,
    pub alert_types: BTreeSet<AlertType>,
    pub min_amount: u64,
    pub limit: u32,
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self {
            severities: [Severity::Critical, Severity::High].into_iter().collect(),
            alert_types: AlertType::ALL.into_iter().collect(),
            min_amount: 35_000,
            limit: 500,
        }
    }
}

impl AlertFilter {
    pub fn severities(mut self, severities: impl IntoIterator<Item = Severity>) -> Self {
        self.severities = severities.into_iter().collect();
        self
    }

    pub fn alert_types(mut self, types: impl IntoIterator<Item = AlertType>) -> Self {
        self.alert_types = types.into_iter().collect();
        self
    }

    pub fn min_amount(mut self, amount: u64) -> Self {
        self.min_amount = amount;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// # Errors
    /// `ValidationError` when no severity or no alert type is selected.
    pub fn descriptor(&self) -> Result<QueryDescriptor> {
        if self.severities.is_empty() || self.alert_types.is_empty() {
            return Err(WarehouseError::ValidationError(
                "select at least one severity and one alert type".to_string(),
            ));
        }
        check_limit(self.limit)?;
        let min_amount = i64::try_from(self.min_amount).map_err(|_| {
            WarehouseError::ValidationError(format!("minimum amount {} is out of range", self.min_amount))
        })?;

        // BTreeSet order keeps the bound lists, and so the cache key, stable
        let severities: Vec<&str> = self.severities.iter().map(Severity::as_str).collect();
        let alert_types: Vec<&str> = self.alert_types.iter().map(AlertType::as_str).collect();

        QueryDescriptor::builder(format!(
            "{} ORDER BY fa.ALERT_TIMESTAMP DESC LIMIT {}",
            ALERTS_SELECT, self.limit
        ))
        .param("severities", severities)
        .param("alert_types", alert_types)
        .param("min_amount", min_amount)
        .build()
    }
}

/// Customer risk page: KYC view restricted to risk categories and statuses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KycFilter {
    pub risk_categories: BTreeSet<RiskCategory>,
    pub kyc_statuses: BTreeSet<KycStatus>,
}

impl Default for KycFilter {
    fn default() -> Self {
        Self {
            risk_categories: RiskCategory::ALL.into_iter().collect(),
            kyc_statuses: KycStatus::ALL.into_iter().collect(),
        }
    }
}

impl KycFilter {
    pub fn risk_categories(mut self, categories: impl IntoIterator<Item = RiskCategory>) -> Self {
        self.risk_categories = categories.into_iter().collect();
        self
    }

    pub fn kyc_statuses(mut self, statuses: impl IntoIterator<Item = KycStatus>) -> Self {
        self.kyc_statuses = statuses.into_iter().collect();
        self
    }

    pub fn descriptor(&self) -> Result<QueryDescriptor> {
        if self.risk_categories.is_empty() || self.kyc_statuses.is_empty() {
            return Err(WarehouseError::ValidationError(
                "select at least one risk category and one KYC status".to_string(),
            ));
        }
        let categories: Vec<&str> = self.risk_categories.iter().map(RiskCategory::as_str).collect();
        let statuses: Vec<&str> = self.kyc_statuses.iter().map(KycStatus::as_str).collect();

        QueryDescriptor::builder(format!(
            "SELECT * FROM {} WHERE RISK_CATEGORY IN (:risk_categories) AND KYC_STATUS IN (:kyc_statuses)",
            KYC_RISK_ANALYSIS
        ))
        .param("risk_categories", categories)
        .param("kyc_statuses", statuses)
        .build()
    }
}

fn check_limit(limit: u32) -> Result<()> {
    if limit == 0 {
        return Err(WarehouseError::ValidationError("row limit must be at least 1".to_string()));
    }
    Ok(())
}
