//! Deciding whether a config request can be answered now.
//!
//! A request is answered immediately when any of the following holds:
//!
//! - none of the checksums the client asserted matches the current payload
//!   (including the case where the client asserted none),
//! - the payload's generation is newer than the client's,
//! - the request is forced because its parked timeout ran out,
//! - the request was woken by an activation and the application is already
//!   known to be past the client's generation,
//! - the client's platform version cannot consume the payload (answered with
//!   an error).
//!
//! Otherwise the client already holds the current config and the request is
//! parked.

use crate::backend::{ApplicationRegistry, Compatibility, ConfigBackend};
use crate::checksums::{ChecksumCache, DigestKey};
use crate::errors::{BackendError, ResolveError};
use crate::generations::ApplicationGenerations;
use crate::payload::PayloadResponseFactory;
use crate::request::{RequestParams, ResponseResult};
use crate::types::ApplicationId;
use std::collections::HashSet;
use std::sync::Arc;

/// Why a request is being resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveMode {
    /// First resolution of a newly received request.
    Initial,
    /// Woken from the parked queue by an activation or removal.
    Reresolve,
    /// Parked timeout elapsed; the client gets whatever is current.
    Forced,
}

#[derive(Debug)]
pub enum Resolution {
    Answer(ResponseResult),
    Park { application: ApplicationId },
}

impl Resolution {
    pub fn is_park(&self) -> bool {
        matches!(self, Resolution::Park { .. })
    }
}

pub struct RequestResolver {
    backend: Arc<dyn ConfigBackend>,
    applications: Arc<dyn ApplicationRegistry>,
    generations: Arc<ApplicationGenerations>,
    factory: Arc<dyn PayloadResponseFactory>,
    checksum_cache: ChecksumCache,
    aggregate_config_names: HashSet<String>,
}

impl RequestResolver {
    pub fn new(
        backend: Arc<dyn ConfigBackend>,
        applications: Arc<dyn ApplicationRegistry>,
        generations: Arc<ApplicationGenerations>,
        factory: Arc<dyn PayloadResponseFactory>,
        checksum_cache: ChecksumCache,
        aggregate_config_names: HashSet<String>,
    ) -> Self {
        RequestResolver {
            backend,
            applications,
            generations,
            factory,
            checksum_cache,
            aggregate_config_names,
        }
    }

    pub async fn resolve(&self, params: &RequestParams, mode: ResolveMode) -> Resolution {
        match self.try_resolve(params, mode).await {
            Ok(resolution) => resolution,
            Err(e) => {
                if e.is_expected() {
                    tracing::debug!(
                        key = %params.key,
                        host = %params.client_hostname,
                        error = %e,
                        "Config request failed"
                    );
                } else {
                    tracing::error!(
                        key = %params.key,
                        host = %params.client_hostname,
                        error = %e,
                        "Failed to resolve config request"
                    );
                }
                Resolution::Answer(Err(e))
            }
        }
    }

    async fn try_resolve(
        &self,
        params: &RequestParams,
        mode: ResolveMode,
    ) -> Result<Resolution, ResolveError> {
        let application = self.owning_application(params)?;

        let resolved = self
            .backend
            .resolve(&application, &params.key, params.version)
            .await
            .map_err(|e| match e {
                BackendError::NotFound => ResolveError::illegal_config_id(&params.key),
                BackendError::UnknownDefinition => {
                    ResolveError::UnknownDefinition(params.key.definition())
                }
                BackendError::Failure(message) => ResolveError::Internal(message),
            })?;

        if let Compatibility::Incompatible { client, deployed } =
            self.backend
                .check_compatibility(&params.key, params.version, &resolved)
        {
            return Err(ResolveError::IncompatibleVersion { client, deployed });
        }

        let checksums = self.checksum_cache.checksums_for(
            DigestKey::new(
                application.clone(),
                params.key.clone(),
                resolved.generation,
                &resolved.payload,
            ),
            &resolved.payload,
            &params.checksums,
        );

        let stale = !checksums.matches(&params.checksums);
        let newer = resolved.generation > params.generation;
        let superseded = mode == ResolveMode::Reresolve
            && self
                .generations
                .active(&application)
                .is_some_and(|active| active > params.generation);

        if !(stale || newer || superseded || mode == ResolveMode::Forced) {
            return Ok(Resolution::Park { application });
        }

        tracing::trace!(
            key = %params.key,
            %application,
            stale,
            newer,
            superseded,
            ?mode,
            generation = resolved.generation,
            "Answering config request"
        );

        let response = self
            .factory
            .build_response(
                resolved.payload,
                resolved.generation,
                resolved.apply_on_restart,
                checksums,
            )
            .map_err(|e| ResolveError::Internal(e.to_string()))?;

        Ok(Resolution::Answer(Ok(response)))
    }

    /// Application whose model serves this request. Hosts outside every
    /// application can still read the aggregate configs.
    fn owning_application(&self, params: &RequestParams) -> Result<ApplicationId, ResolveError> {
        let Some(application) = self
            .applications
            .resolve_owning_application(&params.client_hostname)
        else {
            if self.aggregate_config_names.contains(&params.key.definition()) {
                return Ok(ApplicationId::global());
            }
            return Err(ResolveError::ApplicationNotLoaded {
                hostname: params.client_hostname.clone(),
            });
        };

        if !self.applications.has_application(&application, None) {
            return Err(ResolveError::ApplicationNotLoaded {
                hostname: params.client_hostname.clone(),
            });
        }

        if let Some(version) = params.version
            && !self.applications.has_application(&application, Some(version))
        {
            return Err(ResolveError::UnknownVersion {
                application,
                version,
            });
        }

        Ok(application)
    }
}
