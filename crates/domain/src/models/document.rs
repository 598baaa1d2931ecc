//! Document catalogue projections used by the export pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Document type tags known to the benefits catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    IdentityProof,
    IncomeStatement,
    ResidenceProof,
    MedicalCertificate,
    BankDetails,
    FamilyRecord,
    ApplicationForm,
    DecisionLetter,
    Correspondence,
    Other,
}

impl DocumentType {
    /// Every known tag, in declaration order.
    pub const ALL: [DocumentType; 10] = [
        DocumentType::IdentityProof,
        DocumentType::IncomeStatement,
        DocumentType::ResidenceProof,
        DocumentType::MedicalCertificate,
        DocumentType::BankDetails,
        DocumentType::FamilyRecord,
        DocumentType::ApplicationForm,
        DocumentType::DecisionLetter,
        DocumentType::Correspondence,
        DocumentType::Other,
    ];

    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::IdentityProof => "identity_proof",
            DocumentType::IncomeStatement => "income_statement",
            DocumentType::ResidenceProof => "residence_proof",
            DocumentType::MedicalCertificate => "medical_certificate",
            DocumentType::BankDetails => "bank_details",
            DocumentType::FamilyRecord => "family_record",
            DocumentType::ApplicationForm => "application_form",
            DocumentType::DecisionLetter => "decision_letter",
            DocumentType::Correspondence => "correspondence",
            DocumentType::Other => "other",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        DocumentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("Unknown document type: {}", s))
    }
}

/// Read-only projection of a stored document.
///
/// Owned by the document catalogue; the export pipeline never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub id: Uuid,
    pub citizen_id: Uuid,
    pub request_id: Option<Uuid>,
    pub document_type: DocumentType,
    pub storage_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
    pub verified: bool,
}

/// Result of the count + size aggregate for a filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEstimate {
    pub document_count: i64,
    pub estimated_size_bytes: i64,
}
