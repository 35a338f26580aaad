//! Compatibility rule for container bundle manifests. Backends that serve
//! bundle manifests can delegate `ConfigBackend::check_compatibility` here.

use crate::backend::{Compatibility, ResolvedPayload};
use crate::types::{ConfigKey, PlatformVersion};
use serde::Deserialize;

pub const BUNDLE_MANIFEST_DEFINITION: &str = "container.bundles";

#[derive(Deserialize)]
struct BundleManifest {
    #[serde(default)]
    bundle: Vec<String>,
}

/// A client on a different major version than the deploying model cannot load
/// the model's bundles. An empty bundle set is safe for everyone.
pub struct BundleCompatibility {
    definition: String,
}

impl BundleCompatibility {
    pub fn new() -> Self {
        Self::for_definition(BUNDLE_MANIFEST_DEFINITION)
    }

    pub fn for_definition(definition: impl Into<String>) -> Self {
        BundleCompatibility {
            definition: definition.into(),
        }
    }

    pub fn check(
        &self,
        key: &ConfigKey,
        client_version: Option<PlatformVersion>,
        payload: &ResolvedPayload,
    ) -> Compatibility {
        if key.definition() != self.definition {
            return Compatibility::Compatible;
        }
        let (Some(client), Some(deployed)) = (client_version, payload.deployed_version) else {
            return Compatibility::Compatible;
        };
        if client.major == deployed.major {
            return Compatibility::Compatible;
        }

        // An unparseable manifest is the backend's problem, not a version conflict
        let has_bundles = serde_json::from_slice::<BundleManifest>(&payload.payload)
            .map(|manifest| !manifest.bundle.is_empty())
            .unwrap_or(false);

        if has_bundles {
            Compatibility::Incompatible { client, deployed }
        } else {
            Compatibility::Compatible
        }
    }
}

impl Default for BundleCompatibility {
    fn default() -> Self {
        Self::new()
    }
}
