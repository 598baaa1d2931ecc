//! Filter validation, cost estimation and document selection.

use domain::models::{DocumentEstimate, DocumentRef, FilterSpec, FilterValidation};
use domain::services::DocumentCatalog;
use shared::pagination::PageCursor;
use shared::validation::date_span_exceeds;
use std::sync::Arc;
use tracing::debug;
use validator::Validate;

use super::error::ExportError;
use crate::config::ExportConfig;

pub const NO_DOCUMENTS_FOUND: &str = "no documents found";

/// Sanity limits applied to every filter.
#[derive(Debug, Clone)]
pub struct FilterLimits {
    pub max_documents: i64,
    pub max_total_size_bytes: i64,
    pub date_span_warning_days: i64,
    pub citizen_warning_threshold: usize,
    pub request_warning_threshold: usize,
    pub page_size: usize,
}

impl From<&ExportConfig> for FilterLimits {
    fn from(config: &ExportConfig) -> Self {
        Self {
            max_documents: config.max_documents,
            max_total_size_bytes: config.max_total_size_bytes,
            date_span_warning_days: config.date_span_warning_days,
            citizen_warning_threshold: config.citizen_warning_threshold,
            request_warning_threshold: config.request_warning_threshold,
            page_size: config.page_size.max(1),
        }
    }
}

pub struct FilterEstimator {
    catalog: Arc<dyn DocumentCatalog>,
    limits: FilterLimits,
}

impl FilterEstimator {
    pub fn new(catalog: Arc<dyn DocumentCatalog>, limits: FilterLimits) -> Self {
        Self { catalog, limits }
    }

    pub fn limits(&self) -> &FilterLimits {
        &self.limits
    }

    /// Checks the filter and, if it is structurally sound, estimates its
    /// cost against the hard limits.
    ///
    /// Only catalogue failures are returned as `Err`; every problem with the
    /// filter itself ends up in the returned `errors`.
    pub async fn validate(&self, filter: &FilterSpec) -> Result<FilterValidation, ExportError> {
        let filter = filter.normalized();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !filter.has_criteria() {
            errors.push(
                "At least one criterion is required: citizen ids, request ids, document types or a date bound"
                    .to_string(),
            );
        }

        if let Err(validation_errors) = filter.validate() {
            for (_, field_errors) in validation_errors.errors() {
                if let validator::ValidationErrorsKind::Field(list) = field_errors {
                    errors.extend(list.iter().map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    }));
                }
            }
        }

        if let Err(unknown) = filter.parsed_document_types() {
            errors.extend(
                unknown
                    .into_iter()
                    .map(|tag| format!("Unknown document type: {}", tag)),
            );
        }

        if !errors.is_empty() {
            return Ok(FilterValidation::from_parts(errors, warnings, None));
        }

        if date_span_exceeds(
            filter.date_from,
            filter.date_to,
            self.limits.date_span_warning_days,
        ) {
            warnings.push(format!(
                "Date range spans more than {} days",
                self.limits.date_span_warning_days
            ));
        }
        let citizens = filter.citizen_ids.as_ref().map_or(0, |s| s.len());
        if citizens > self.limits.citizen_warning_threshold {
            warnings.push(format!(
                "Filter names {} citizens (more than {})",
                citizens, self.limits.citizen_warning_threshold
            ));
        }
        let requests = filter.request_ids.as_ref().map_or(0, |s| s.len());
        if requests > self.limits.request_warning_threshold {
            warnings.push(format!(
                "Filter names {} requests (more than {})",
                requests, self.limits.request_warning_threshold
            ));
        }

        let estimate = self.estimate(&filter).await?;
        if estimate.document_count == 0 {
            errors.push(NO_DOCUMENTS_FOUND.to_string());
        }
        if estimate.document_count > self.limits.max_documents {
            errors.push(format!(
                "Filter matches {} documents, more than the limit of {}",
                estimate.document_count, self.limits.max_documents
            ));
        }
        if estimate.estimated_size_bytes > self.limits.max_total_size_bytes {
            errors.push(format!(
                "Estimated export size of {} bytes exceeds the limit of {} bytes",
                estimate.estimated_size_bytes, self.limits.max_total_size_bytes
            ));
        }

        Ok(FilterValidation::from_parts(
            errors,
            warnings,
            Some(estimate),
        ))
    }

    /// Count and total size of the matching documents, from one aggregate
    /// query.
    pub async fn estimate(&self, filter: &FilterSpec) -> Result<DocumentEstimate, ExportError> {
        Ok(self.catalog.aggregate(filter).await?)
    }

    /// Materializes the matching documents, newest first, stopping at the
    /// document limit.
    pub async fn select(&self, filter: &FilterSpec) -> Result<Vec<DocumentRef>, ExportError> {
        let max = usize::try_from(self.limits.max_documents).unwrap_or(0);
        let mut selected: Vec<DocumentRef> = Vec::new();
        let mut cursor: Option<PageCursor> = None;

        while selected.len() < max {
            let limit = self.limits.page_size.min(max - selected.len());
            let page = self.catalog.find_page(filter, cursor, limit).await?;
            let exhausted = page.len() < limit;

            if let Some(last) = page.last() {
                cursor = Some(PageCursor::new(last.created_at, last.id));
            }
            selected.extend(page);

            if exhausted {
                break;
            }
        }

        debug!(selected = selected.len(), "Selected documents for export");
        Ok(selected)
    }
}
