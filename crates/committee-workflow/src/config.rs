//! Run configuration for committee workflows

use committee_core::{AnalysisRequest, ConfigError, FocusFilter};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one committee run
///
/// Passed by reference through the whole call chain; nothing in a run keeps
/// configuration in shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Maximum number of debate rounds
    pub max_debate_rounds: u32,

    /// Whether the devil's advocate takes part
    pub include_devils_advocate: bool,

    /// Focus-area filter; a filter on the request takes precedence
    pub focus_areas: Option<FocusFilter>,

    /// Time budget for a single worker invocation
    pub per_worker_timeout: Duration,

    /// Time budget for the whole run
    pub overall_deadline: Option<Duration>,

    /// Score movement (and ten times that in confidence) below which a
    /// response counts as unchanged
    pub convergence_tolerance: f64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_debate_rounds: 3,
            include_devils_advocate: true,
            focus_areas: None,
            per_worker_timeout: Duration::from_secs(300),
            overall_deadline: Some(Duration::from_secs(900)),
            convergence_tolerance: 0.1,
        }
    }
}

impl WorkflowConfig {
    /// Create a new configuration builder
    pub fn builder() -> WorkflowConfigBuilder {
        WorkflowConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_worker_timeout.is_zero() {
            return Err(ConfigError::InvalidWorkflow(
                "per_worker_timeout must be greater than 0".to_string(),
            ));
        }

        if self.overall_deadline.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidWorkflow(
                "overall_deadline must be greater than 0".to_string(),
            ));
        }

        if !self.convergence_tolerance.is_finite() || self.convergence_tolerance < 0.0 {
            return Err(ConfigError::InvalidWorkflow(format!(
                "convergence_tolerance must be a non-negative number, got {}",
                self.convergence_tolerance
            )));
        }

        if let Some(FocusFilter::Include(set)) = &self.focus_areas {
            if set.is_empty() {
                return Err(ConfigError::InvalidWorkflow(
                    "an include focus filter needs at least one capability".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Focus filter in force for `request`
    pub fn effective_focus<'a>(&'a self, request: &'a AnalysisRequest) -> Option<&'a FocusFilter> {
        request.focus.as_ref().or(self.focus_areas.as_ref())
    }

    /// Whether the debate phase can run at all
    pub fn debate_enabled(&self) -> bool {
        self.include_devils_advocate && self.max_debate_rounds > 0
    }
}

/// Builder for WorkflowConfig
#[derive(Debug, Default)]
pub struct WorkflowConfigBuilder {
    max_debate_rounds: Option<u32>,
    include_devils_advocate: Option<bool>,
    focus_areas: Option<FocusFilter>,
    per_worker_timeout: Option<Duration>,
    overall_deadline: Option<Option<Duration>>,
    convergence_tolerance: Option<f64>,
}

impl WorkflowConfigBuilder {
    pub fn max_debate_rounds(mut self, rounds: u32) -> Self {
        self.max_debate_rounds = Some(rounds);
        self
    }

    pub fn include_devils_advocate(mut self, include: bool) -> Self {
        self.include_devils_advocate = Some(include);
        self
    }

    pub fn focus_areas(mut self, focus: FocusFilter) -> Self {
        self.focus_areas = Some(focus);
        self
    }

    pub fn per_worker_timeout(mut self, timeout: Duration) -> Self {
        self.per_worker_timeout = Some(timeout);
        self
    }

    /// Set the overall deadline
    pub fn overall_deadline(mut self, deadline: Duration) -> Self {
        self.overall_deadline = Some(Some(deadline));
        self
    }

    /// Remove the overall deadline
    pub fn no_deadline(mut self) -> Self {
        self.overall_deadline = Some(None);
        self
    }

    pub fn convergence_tolerance(mut self, tolerance: f64) -> Self {
        self.convergence_tolerance = Some(tolerance);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<WorkflowConfig, ConfigError> {
        let defaults = WorkflowConfig::default();

        let config = WorkflowConfig {
            max_debate_rounds: self.max_debate_rounds.unwrap_or(defaults.max_debate_rounds),
            include_devils_advocate: self
                .include_devils_advocate
                .unwrap_or(defaults.include_devils_advocate),
            focus_areas: self.focus_areas.or(defaults.focus_areas),
            per_worker_timeout: self.per_worker_timeout.unwrap_or(defaults.per_worker_timeout),
            overall_deadline: self.overall_deadline.unwrap_or(defaults.overall_deadline),
            convergence_tolerance: self
                .convergence_tolerance
                .unwrap_or(defaults.convergence_tolerance),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use committee_core::Capability;

    #[test]
    fn test_default_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.max_debate_rounds, 3);
        assert!(config.include_devils_advocate);
        assert_eq!(config.per_worker_timeout, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = WorkflowConfig::builder()
            .max_debate_rounds(2)
            .include_devils_advocate(false)
            .per_worker_timeout(Duration::from_secs(30))
            .no_deadline()
            .build()
            .unwrap();

        assert_eq!(config.max_debate_rounds, 2);
        assert!(!config.debate_enabled());
        assert_eq!(config.overall_deadline, None);
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let result = WorkflowConfig::builder()
            .per_worker_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidWorkflow(_))));
    }

    #[test]
    fn test_validation_rejects_negative_tolerance() {
        let result = WorkflowConfig::builder().convergence_tolerance(-0.5).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_request_focus_wins() {
        let config = WorkflowConfig::builder()
            .focus_areas(FocusFilter::exclude([Capability::Risk]))
            .build()
            .unwrap();

        let plain = AnalysisRequest::new("AAPL");
        assert_eq!(
            config.effective_focus(&plain),
            Some(&FocusFilter::exclude([Capability::Risk]))
        );

        let focused =
            AnalysisRequest::new("AAPL").with_focus(FocusFilter::include([Capability::Macro]));
        assert_eq!(
            config.effective_focus(&focused),
            Some(&FocusFilter::include([Capability::Macro]))
        );
    }
}
