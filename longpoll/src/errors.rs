use crate::types::{ApplicationId, ConfigKey, PlatformVersion};
use thiserror::Error;

/// Terminal error classifications returned to clients.
///
/// None of these are retried by the server; the transport decides whether the
/// client should retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("no application is loaded for host '{hostname}'")]
    ApplicationNotLoaded { hostname: String },

    #[error("unknown config definition {0}")]
    UnknownDefinition(String),

    #[error("illegal config id '{config_id}' for {definition}")]
    IllegalConfigId {
        definition: String,
        config_id: String,
    },

    #[error("no config available for version {version} of {application}")]
    UnknownVersion {
        application: ApplicationId,
        version: PlatformVersion,
    },

    #[error("client version {client} is incompatible with deployed version {deployed}")]
    IncompatibleVersion {
        client: PlatformVersion,
        deployed: PlatformVersion,
    },

    #[error("server is overloaded, try again later")]
    Overload,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ValidationError),
}

impl ResolveError {
    /// Stable code used for metric tags and response bodies.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResolveError::ApplicationNotLoaded { .. } => "application_not_loaded",
            ResolveError::UnknownDefinition(_) => "unknown_definition",
            ResolveError::IllegalConfigId { .. } => "illegal_config_id",
            ResolveError::UnknownVersion { .. } => "unknown_version",
            ResolveError::IncompatibleVersion { .. } => "incompatible_version",
            ResolveError::Overload => "overload",
            ResolveError::Internal(_) => "internal_error",
            ResolveError::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Expected errors happen routinely (e.g. during rollouts) and are logged
    /// at low severity. Everything else indicates a server-side problem.
    pub const fn is_expected(&self) -> bool {
        !matches!(self, ResolveError::Internal(_))
    }

    pub fn illegal_config_id(key: &ConfigKey) -> Self {
        ResolveError::IllegalConfigId {
            definition: key.definition(),
            config_id: key.config_id.clone(),
        }
    }
}

/// Structural problems with an incoming request. These are rejected before
/// resolution and never parked.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("config name is empty")]
    EmptyName,

    #[error("config namespace is empty")]
    EmptyNamespace,

    #[error("config id '{0}' is not valid")]
    InvalidConfigId(String),

    #[error("client hostname is empty")]
    EmptyHostname,

    #[error("malformed {kind} checksum '{value}'")]
    MalformedChecksum { kind: &'static str, value: String },
}

/// Failures reported by a configuration backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("config not found")]
    NotFound,

    #[error("unknown config definition")]
    UnknownDefinition,

    #[error("backend failure: {0}")]
    Failure(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_severity() {
        let key = ConfigKey::new("cloud.config", "sentinel", "");
        let err = ResolveError::illegal_config_id(&key);
        assert_eq!(err.as_str(), "illegal_config_id");
        assert!(err.is_expected());

        assert!(!ResolveError::Internal("boom".into()).is_expected());
        assert!(ResolveError::Overload.is_expected());

        let err: ResolveError = ValidationError::EmptyName.into();
        assert_eq!(err.as_str(), "invalid_request");
        assert_eq!(err.to_string(), "invalid request: config name is empty");
    }
}
