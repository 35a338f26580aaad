//! Interfaces to the collaborators that own application state and config
//! content. The long-poll core only consumes these.

use crate::errors::BackendError;
use crate::types::{ApplicationId, ConfigKey, Generation, PlatformVersion};
use async_trait::async_trait;
use bytes::Bytes;

/// The current payload of one config, as produced by the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedPayload {
    pub payload: Bytes,
    pub generation: Generation,
    pub apply_on_restart: bool,
    /// Platform version the serving model was built for, if known.
    pub deployed_version: Option<PlatformVersion>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    Incompatible {
        client: PlatformVersion,
        deployed: PlatformVersion,
    },
}

#[async_trait]
pub trait ConfigBackend: Send + Sync {
    /// Fetches the current payload for `key` in `application`.
    ///
    /// Called from worker tasks. Failures other than `NotFound` and
    /// `UnknownDefinition` are treated as internal errors.
    async fn resolve(
        &self,
        application: &ApplicationId,
        key: &ConfigKey,
        version: Option<PlatformVersion>,
    ) -> Result<ResolvedPayload, BackendError>;

    /// Policy deciding whether a client at `client_version` may consume
    /// `payload`. Everything is compatible unless a backend says otherwise.
    fn check_compatibility(
        &self,
        _key: &ConfigKey,
        _client_version: Option<PlatformVersion>,
        _payload: &ResolvedPayload,
    ) -> Compatibility {
        Compatibility::Compatible
    }
}

pub trait ApplicationRegistry: Send + Sync {
    /// Whether `application` is loaded, and if `version` is given, whether
    /// config for that platform version is available.
    fn has_application(&self, application: &ApplicationId, version: Option<PlatformVersion>)
    -> bool;

    fn resolve_owning_application(&self, hostname: &str) -> Option<ApplicationId>;
}
