//! Analysis requests

use crate::capability::FocusFilter;
use serde::{Deserialize, Serialize};

/// What the caller wants analysed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Subject identifier (ticker)
    pub subject: String,

    /// Display name of the company
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,

    /// Focus-area filter; overrides the workflow-level filter when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<FocusFilter>,

    /// Free-form context from the caller, passed to every worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

impl AnalysisRequest {
    /// Create a request for a subject
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into().trim().to_uppercase(),
            company_name: None,
            focus: None,
            additional_context: None,
        }
    }

    pub fn with_company_name(mut self, name: impl Into<String>) -> Self {
        self.company_name = Some(name.into());
        self
    }

    pub fn with_focus(mut self, focus: FocusFilter) -> Self {
        self.focus = Some(focus);
        self
    }

    pub fn with_additional_context(mut self, context: impl Into<String>) -> Self {
        self.additional_context = Some(context.into());
        self
    }

    /// Name to show for the subject
    pub fn display_name(&self) -> &str {
        self.company_name.as_deref().unwrap_or(&self.subject)
    }
}
