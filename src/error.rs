// Error taxonomy for registration, dispatch, authentication and configuration.
//
// Registration errors are startup-fatal. Dispatch errors are converted into
// `{error}` outcomes and returned to the specific caller; they never cross the
// transport boundary as a dropped connection.

/// Errors raised while populating the capability registry.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate tool name '{tool}' (module '{module}')")]
    DuplicateToolName { tool: String, module: String },

    #[error("Tool '{0}' declares no permitted roles")]
    NoPermittedRoles(String),

    #[error("Tool '{tool}' has an invalid input schema: {reason}")]
    InvalidSchema { tool: String, reason: String },
}

/// Request-time failures of a single `invoke` call.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: '{field}' {reason}")]
    InvalidArguments { field: String, reason: String },

    #[error("Forbidden: role '{role}' may not call '{tool}'")]
    Forbidden { tool: String, role: String },

    #[error("Handler fault: {0}")]
    HandlerFault(String),
}

impl DispatchError {
    /// Machine-readable code, used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::UnknownTool(_) => "UNKNOWN_TOOL",
            DispatchError::InvalidArguments { .. } => "INVALID_ARGUMENTS",
            DispatchError::Forbidden { .. } => "FORBIDDEN",
            DispatchError::HandlerFault(_) => "HANDLER_FAULT",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Admin key has already been issued")]
    AdminKeyAlreadyIssued,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_arguments_names_the_field() {
        let err = DispatchError::InvalidArguments {
            field: "message".into(),
            reason: "is required".into(),
        };
        assert_eq!(err.to_string(), "Invalid arguments: 'message' is required");
        assert_eq!(err.code(), "INVALID_ARGUMENTS");
    }

    #[test]
    fn handler_fault_preserves_message() {
        let err = DispatchError::HandlerFault("disk on fire".into());
        assert!(err.to_string().ends_with("disk on fire"));
    }
}
