use serde::Serialize;

/// Classifies every user-visible engine failure. Hosts map the kind to
/// presentation; the message is human-readable detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AlreadyRunning,
    NotRunning,
    PlanNotFound,
    PlanEmpty,
    Validation,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AlreadyRunning => "already_running",
            ErrorKind::NotRunning => "not_running",
            ErrorKind::PlanNotFound => "plan_not_found",
            ErrorKind::PlanEmpty => "plan_empty",
            ErrorKind::Validation => "validation",
            ErrorKind::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("{}: {message}", .kind.as_str())]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = EngineError::new(ErrorKind::PlanNotFound, "no plan with id p1");
        assert_eq!(err.to_string(), "plan_not_found: no plan with id p1");
    }

    #[test]
    fn validation_helper_sets_kind() {
        let err = EngineError::validation("bad range");
        assert_eq!(err.kind, ErrorKind::Validation);
    }
}
