use thiserror::Error;

/// Errors raised while enumerating, compiling, assembling or fitting candidate models.
///
/// Only [`AutodeError::FitDivergence`] is expected during normal operation; the fitter
/// discards the failed attempt and keeps searching. Everything else is a contract
/// violation and aborts the operation that raised it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutodeError {
    #[error("Shape error: {what}")]
    Shape { what: String },

    #[error("Parse error in `{expression}`: {what}")]
    Parse { expression: String, what: String },

    #[error("Resolution error: {what}")]
    Resolution { what: String },

    #[error("Consistency error: {what}")]
    Consistency { what: String },

    #[error("Fit diverged: {what}")]
    FitDivergence { what: String },

    #[error("Interrupted")]
    Interrupted,

    #[error("Invalid settings: {what}")]
    InvalidSettings { what: String },
}

pub type Result<T> = std::result::Result<T, AutodeError>;

impl AutodeError {
    pub(crate) fn shape(what: impl Into<String>) -> Self {
        Self::Shape { what: what.into() }
    }

    pub(crate) fn parse(expression: &str, what: impl Into<String>) -> Self {
        Self::Parse {
            expression: expression.to_string(),
            what: what.into(),
        }
    }

    pub(crate) fn resolution(what: impl Into<String>) -> Self {
        Self::Resolution { what: what.into() }
    }

    pub(crate) fn consistency(what: impl Into<String>) -> Self {
        Self::Consistency { what: what.into() }
    }

    pub(crate) fn divergence(what: impl Into<String>) -> Self {
        Self::FitDivergence { what: what.into() }
    }

    pub(crate) fn settings(what: impl Into<String>) -> Self {
        Self::InvalidSettings { what: what.into() }
    }

    /// True for failures that only invalidate a single fitting attempt.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::FitDivergence { .. })
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
