use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::ExportError;
use crate::model::{DateRange, ExportType};

/// Unvalidated invocation parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInput {
    pub export_type: String,
    pub start_date: String,
    pub end_date: String,
}

/// A request that passed validation and may enter the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportRequest {
    pub export_type: ExportType,
    pub range: DateRange,
}

impl ExportRequest {
    /// Check export type, both dates and their order, in that order.
    pub fn validate(input: &RequestInput, today: NaiveDate) -> Result<Self, ExportError> {
        let export_type: ExportType = input.export_type.parse()?;
        let start = parse_date(&input.start_date, today)?;
        let end = parse_date(&input.end_date, today)?;
        let range = DateRange::new(start, end)?;
        Ok(Self { export_type, range })
    }
}

/// Parse a `YYYY-MM-DD` date that is not later than `today`.
pub fn parse_date(value: &str, today: NaiveDate) -> Result<NaiveDate, ExportError> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ExportError::InvalidDate(value.to_string()))?;
    if date > today {
        return Err(ExportError::FutureDate(value.to_string()));
    }
    Ok(date)
}
