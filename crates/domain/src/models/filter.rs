//! Export filter specification and validation results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::document::{DocumentEstimate, DocumentRef, DocumentType};

/// Criteria selecting the documents of one export.
///
/// Immutable once validated: the job record stores the exact spec it was
/// admitted with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_filter_dates"))]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citizen_ids: Option<BTreeSet<Uuid>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_ids: Option<BTreeSet<Uuid>>,

    /// Raw document-type tags; unknown tags are reported by validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_types: Option<BTreeSet<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<DateTime<Utc>>,

    #[serde(default)]
    pub verified_only: bool,

    /// Free-form metadata copied onto the job record.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn validate_filter_dates(filter: &FilterSpec) -> Result<(), ValidationError> {
    shared::validation::validate_date_range(filter.date_from, filter.date_to)
}

impl FilterSpec {
    /// Returns a copy where empty id/type sets are treated as absent.
    pub fn normalized(&self) -> Self {
        fn non_empty<T: Ord + Clone>(set: &Option<BTreeSet<T>>) -> Option<BTreeSet<T>> {
            set.as_ref().filter(|s| !s.is_empty()).cloned()
        }

        Self {
            citizen_ids: non_empty(&self.citizen_ids),
            request_ids: non_empty(&self.request_ids),
            document_types: non_empty(&self.document_types),
            date_from: self.date_from,
            date_to: self.date_to,
            verified_only: self.verified_only,
            metadata: self.metadata.clone(),
        }
    }

    /// True when at least one selecting criterion is present.
    pub fn has_criteria(&self) -> bool {
        let non_empty = |len: Option<usize>| len.is_some_and(|l| l > 0);
        non_empty(self.citizen_ids.as_ref().map(|s| s.len()))
            || non_empty(self.request_ids.as_ref().map(|s| s.len()))
            || non_empty(self.document_types.as_ref().map(|s| s.len()))
            || self.date_from.is_some()
            || self.date_to.is_some()
    }

    /// Parses the document-type tags, collecting every unknown tag.
    pub fn parsed_document_types(&self) -> Result<Option<BTreeSet<DocumentType>>, Vec<String>> {
        let Some(tags) = self.document_types.as_ref().filter(|s| !s.is_empty()) else {
            return Ok(None);
        };

        let mut parsed = BTreeSet::new();
        let mut unknown = Vec::new();
        for tag in tags {
            match DocumentType::from_str(tag) {
                Ok(t) => {
                    parsed.insert(t);
                }
                Err(_) => unknown.push(tag.clone()),
            }
        }

        if unknown.is_empty() {
            Ok(Some(parsed))
        } else {
            Err(unknown)
        }
    }

    /// Evaluates the filter against a single document.
    ///
    /// Date bounds are inclusive. Unknown type tags never match.
    pub fn matches(&self, doc: &DocumentRef) -> bool {
        if let Some(ids) = self.citizen_ids.as_ref().filter(|s| !s.is_empty()) {
            if !ids.contains(&doc.citizen_id) {
                return false;
            }
        }

        if let Some(ids) = self.request_ids.as_ref().filter(|s| !s.is_empty()) {
            match doc.request_id {
                Some(request_id) if ids.contains(&request_id) => {}
                _ => return false,
            }
        }

        if let Some(tags) = self.document_types.as_ref().filter(|s| !s.is_empty()) {
            let matched = tags
                .iter()
                .filter_map(|t| DocumentType::from_str(t).ok())
                .any(|t| t == doc.document_type);
            if !matched {
                return false;
            }
        }

        if self.date_from.is_some_and(|from| doc.created_at < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| doc.created_at > to) {
            return false;
        }

        !self.verified_only || doc.verified
    }
}

/// Outcome of validating a filter before (or instead of) creating a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate: Option<DocumentEstimate>,
}

impl FilterValidation {
    /// Builds a result whose validity follows from the collected errors.
    pub fn from_parts(
        errors: Vec<String>,
        warnings: Vec<String>,
        estimate: Option<DocumentEstimate>,
    ) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
            estimate,
        }
    }
}
