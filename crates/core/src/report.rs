//! Report catalog, download requests and resolved job parameters.
//!
//! A [`DownloadRequest`] arrives on `POST /download`; it is validated,
//! resolved against the [`ReportCatalog`] and turned into the immutable
//! [`JobParameters`] that configure one automation run.

use std::borrow::Cow;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;
use validator::{Validate, ValidationError};

use crate::error::CoreError;

/// Days back from today used when a request names no dates.
pub const DEFAULT_DAYS_FROM_TODAY: u64 = 1;

// ---------------------------------------------------------------------------
// Report definitions
// ---------------------------------------------------------------------------

/// One configured report.
///
/// Field aliases accept the column names of the reports settings sheet
/// (`Report_Name`, `Report_Url_Param`, ...), so the sheet rows can be
/// posted to `/config/reports` unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDefinition {
    #[serde(default, alias = "Row_Number")]
    pub row_number: Option<u32>,
    #[serde(default, alias = "Thinkion_Id")]
    pub thinkion_id: Option<i64>,
    #[serde(default, alias = "Report_Id", deserialize_with = "string_or_number")]
    pub report_id: Option<String>,
    #[serde(default, alias = "Report_Type", alias = "Reporte_Type")]
    pub report_type: Option<String>,
    #[serde(alias = "Report_Name")]
    pub report_name: String,
    #[serde(alias = "Report_Url_Param")]
    pub url_param: String,
    /// Column headers the converted rows must carry. Empty means unchecked.
    #[serde(default, alias = "Report_Columns", deserialize_with = "column_list")]
    pub columns: Vec<String>,
}

impl ReportDefinition {
    /// Definition used when the catalog is empty: the report name doubles
    /// as the page slug and no column schema is enforced.
    pub fn ad_hoc(name: &str) -> Self {
        Self {
            row_number: None,
            thinkion_id: None,
            report_id: None,
            report_type: None,
            report_name: name.to_string(),
            url_param: name.to_string(),
            columns: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.report_name.trim().is_empty() {
            return Err(CoreError::Validation(
                "Report name must not be empty".to_string(),
            ));
        }
        let slug = self.url_param.trim();
        if slug.is_empty() {
            return Err(CoreError::Validation(format!(
                "Report '{}' has an empty url param",
                self.report_name
            )));
        }
        if slug.contains("..") || slug.chars().any(char::is_whitespace) {
            return Err(CoreError::Validation(format!(
                "Report '{}' has an invalid url param: '{slug}'",
                self.report_name
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<StringOrNumber>::deserialize(d)?.map(|v| match v {
        StringOrNumber::Str(s) => s,
        StringOrNumber::Int(n) => n.to_string(),
    }))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColumnSpec {
    List(Vec<String>),
    Joined(String),
}

/// Accepts either a JSON list or the sheet's comma-separated string.
fn column_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let spec = Option::<ColumnSpec>::deserialize(d)?;
    let raw = match spec {
        None => return Ok(Vec::new()),
        Some(ColumnSpec::List(list)) => list,
        Some(ColumnSpec::Joined(joined)) => joined.split(',').map(str::to_string).collect(),
    };
    Ok(raw
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect())
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Runtime-replaceable list of known reports.
#[derive(Default)]
pub struct ReportCatalog {
    reports: RwLock<Vec<ReportDefinition>>,
}

impl ReportCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self) -> Vec<ReportDefinition> {
        self.reports.read().await.clone()
    }

    /// Replace the whole catalog after validating every entry.
    ///
    /// Report names must be unique (case-insensitive). On error the
    /// previous catalog is kept.
    pub async fn replace(&self, reports: Vec<ReportDefinition>) -> Result<(), CoreError> {
        let mut seen = std::collections::HashSet::new();
        for report in &reports {
            report.validate()?;
            if !seen.insert(report.report_name.trim().to_lowercase()) {
                return Err(CoreError::Validation(format!(
                    "Duplicate report name: '{}'",
                    report.report_name
                )));
            }
        }
        *self.reports.write().await = reports;
        Ok(())
    }

    /// Look up a report by name (case-insensitive).
    ///
    /// An empty catalog resolves every name to [`ReportDefinition::ad_hoc`];
    /// a populated one rejects names it does not know.
    pub async fn resolve(&self, name: &str) -> Result<ReportDefinition, CoreError> {
        let reports = self.reports.read().await;
        if reports.is_empty() {
            return Ok(ReportDefinition::ad_hoc(name.trim()));
        }
        let wanted = name.trim().to_lowercase();
        reports
            .iter()
            .find(|r| r.report_name.trim().to_lowercase() == wanted)
            .cloned()
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown report '{name}'. Known reports: {}",
                    reports
                        .iter()
                        .map(|r| r.report_name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Inclusive date range a report is pulled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Body of `POST /download`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_date_selection"))]
pub struct DownloadRequest {
    #[validate(length(min = 1, max = 200))]
    pub report: String,
    pub date: Option<NaiveDate>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    #[validate(range(min = 1))]
    pub account_id: Option<i64>,
    #[validate(length(min = 1, max = 500))]
    pub web_group_selector: Option<String>,
}

fn validation_error(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

fn validate_date_selection(req: &DownloadRequest) -> Result<(), ValidationError> {
    if req.report.trim().is_empty() {
        return Err(validation_error("report", "report must not be blank"));
    }
    match (req.date, req.date_from, req.date_to) {
        (Some(_), None, None) | (None, None, None) => Ok(()),
        (Some(_), _, _) => Err(validation_error(
            "date",
            "use either date or date_from/date_to, not both",
        )),
        (None, Some(from), Some(to)) if from <= to => Ok(()),
        (None, Some(_), Some(_)) => Err(validation_error(
            "date_range",
            "date_from must not be after date_to",
        )),
        _ => Err(validation_error(
            "date_range",
            "date_from and date_to must be given together",
        )),
    }
}

impl DownloadRequest {
    /// Run field and schema validation.
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))
    }

    /// The requested range, defaulting to the single day
    /// [`DEFAULT_DAYS_FROM_TODAY`] days before `today`.
    pub fn date_range(&self, today: NaiveDate) -> DateRange {
        match (self.date, self.date_from, self.date_to) {
            (Some(day), _, _) => DateRange { from: day, to: day },
            (None, Some(from), Some(to)) => DateRange { from, to },
            _ => {
                let day = today
                    .checked_sub_days(Days::new(DEFAULT_DAYS_FROM_TODAY))
                    .unwrap_or(today);
                DateRange { from: day, to: day }
            }
        }
    }

    /// Resolve into job parameters using `report` and the account defaults.
    pub fn into_parameters(
        self,
        report: ReportDefinition,
        defaults: &AccountDefaults,
        today: NaiveDate,
    ) -> JobParameters {
        let range = self.date_range(today);
        JobParameters {
            report,
            date_from: range.from,
            date_to: range.to,
            account_id: self.account_id.unwrap_or(defaults.account_id),
            web_group_selector: self
                .web_group_selector
                .unwrap_or_else(|| defaults.web_group_selector.clone()),
        }
    }
}

/// Non-secret account settings used when a request does not override them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDefaults {
    pub account_id: i64,
    pub web_group_selector: String,
}

/// Everything one automation run needs besides portal credentials.
///
/// Stored verbatim as the job's `parameters`; must never carry secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    pub report: ReportDefinition,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub account_id: i64,
    pub web_group_selector: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
