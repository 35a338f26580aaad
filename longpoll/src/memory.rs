//! In-memory implementation of the backend interfaces.
//!
//! Serves configs that were put in programmatically or loaded from the
//! `applications` section of the server config. Used by tests and by the
//! server when it runs without an external model.

use crate::backend::{
    ApplicationRegistry, Compatibility, ConfigBackend, ResolvedPayload,
};
use crate::compat::BundleCompatibility;
use crate::config::StaticApplication;
use crate::errors::BackendError;
use crate::types::{ApplicationId, ConfigKey, Generation, PlatformVersion};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Default)]
struct ApplicationState {
    generation: Generation,
    apply_on_restart: bool,
    hosts: HashSet<String>,
    versions: BTreeSet<PlatformVersion>,
    configs: HashMap<ConfigKey, Bytes>,
}

#[derive(Default)]
struct MemoryState {
    applications: HashMap<ApplicationId, ApplicationState>,
    host_to_application: HashMap<String, ApplicationId>,
    failure: Option<String>,
}

pub struct InMemoryBackend {
    state: RwLock<MemoryState>,
    compatibility: Option<BundleCompatibility>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        InMemoryBackend {
            state: RwLock::new(MemoryState::default()),
            compatibility: None,
        }
    }

    pub fn with_compatibility(mut self, rule: BundleCompatibility) -> Self {
        self.compatibility = Some(rule);
        self
    }

    pub fn from_static(applications: &[StaticApplication]) -> Self {
        let backend = InMemoryBackend::new().with_compatibility(BundleCompatibility::new());
        for app in applications {
            backend.deploy(
                app.id.clone(),
                app.generation,
                app.hosts.iter().cloned(),
                app.version,
            );
            for config in &app.configs {
                backend.set_config(
                    &app.id,
                    ConfigKey::new(&config.namespace, &config.name, &config.config_id),
                    config.payload.clone(),
                );
            }
        }
        backend
    }

    /// Makes `application` known at `generation`, owning `hosts`. Hosts
    /// previously owned by another application move over.
    pub fn deploy<H>(
        &self,
        application: ApplicationId,
        generation: Generation,
        hosts: impl IntoIterator<Item = H>,
        version: Option<PlatformVersion>,
    ) where
        H: Into<String>,
    {
        let mut state = self.state.write();
        let hosts: Vec<String> = hosts.into_iter().map(Into::into).collect();
        for host in &hosts {
            state
                .host_to_application
                .insert(host.clone(), application.clone());
        }

        let app = state.applications.entry(application).or_default();
        app.generation = generation;
        app.hosts.extend(hosts);
        app.versions.extend(version);
    }

    pub fn set_config(&self, application: &ApplicationId, key: ConfigKey, payload: impl Into<Bytes>) {
        self.state
            .write()
            .applications
            .entry(application.clone())
            .or_default()
            .configs
            .insert(key, payload.into());
    }

    pub fn set_generation(&self, application: &ApplicationId, generation: Generation) {
        if let Some(app) = self.state.write().applications.get_mut(application) {
            app.generation = generation;
        }
    }

    pub fn set_apply_on_restart(&self, application: &ApplicationId, apply_on_restart: bool) {
        if let Some(app) = self.state.write().applications.get_mut(application) {
            app.apply_on_restart = apply_on_restart;
        }
    }

    pub fn remove(&self, application: &ApplicationId) {
        let mut state = self.state.write();
        if let Some(app) = state.applications.remove(application) {
            for host in app.hosts {
                state.host_to_application.remove(&host);
            }
        }
    }

    pub fn generation(&self, application: &ApplicationId) -> Option<Generation> {
        self.state
            .read()
            .applications
            .get(application)
            .map(|app| app.generation)
    }

    pub fn payload(&self, application: &ApplicationId, key: &ConfigKey) -> Option<Bytes> {
        self.state
            .read()
            .applications
            .get(application)
            .and_then(|app| app.configs.get(key).cloned())
    }

    /// Makes every subsequent `resolve` fail with `message`, or stops failing.
    pub fn fail_with(&self, message: Option<String>) {
        self.state.write().failure = message;
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigBackend for InMemoryBackend {
    async fn resolve(
        &self,
        application: &ApplicationId,
        key: &ConfigKey,
        _version: Option<PlatformVersion>,
    ) -> Result<ResolvedPayload, BackendError> {
        let state = self.state.read();
        if let Some(message) = &state.failure {
            return Err(BackendError::Failure(message.clone()));
        }

        let app = state
            .applications
            .get(application)
            .ok_or(BackendError::NotFound)?;

        match app.configs.get(key) {
            Some(payload) => Ok(ResolvedPayload {
                payload: payload.clone(),
                generation: app.generation,
                apply_on_restart: app.apply_on_restart,
                // The newest model is the one being rolled out
                deployed_version: app.versions.last().copied(),
            }),
            None if app
                .configs
                .keys()
                .any(|k| k.namespace == key.namespace && k.name == key.name) =>
            {
                Err(BackendError::NotFound)
            }
            None => Err(BackendError::UnknownDefinition),
        }
    }

    fn check_compatibility(
        &self,
        key: &ConfigKey,
        client_version: Option<PlatformVersion>,
        payload: &ResolvedPayload,
    ) -> Compatibility {
        match &self.compatibility {
            Some(rule) => rule.check(key, client_version, payload),
            None => Compatibility::Compatible,
        }
    }
}

impl ApplicationRegistry for InMemoryBackend {
    fn has_application(
        &self,
        application: &ApplicationId,
        version: Option<PlatformVersion>,
    ) -> bool {
        let state = self.state.read();
        let Some(app) = state.applications.get(application) else {
            return false;
        };
        match version {
            Some(version) => app.versions.is_empty() || app.versions.contains(&version),
            None => true,
        }
    }

    fn resolve_owning_application(&self, hostname: &str) -> Option<ApplicationId> {
        self.state.read().host_to_application.get(hostname).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfig;

    fn app1() -> ApplicationId {
        ApplicationId::new("tenant", "app1", "default")
    }

    #[tokio::test]
    async fn test_resolve() {
        let backend = InMemoryBackend::new();
        let key = ConfigKey::new("cloud.config", "sentinel", "node1");
        backend.deploy(app1(), 3, ["node1", "node2"], Some(PlatformVersion::new(8, 1, 0)));
        backend.set_config(&app1(), key.clone(), "payload");

        let resolved = backend.resolve(&app1(), &key, None).await.unwrap();
        assert_eq!(resolved.generation, 3);
        assert_eq!(&resolved.payload[..], b"payload");
        assert_eq!(resolved.deployed_version, Some(PlatformVersion::new(8, 1, 0)));

        let other_id = ConfigKey::new("cloud.config", "sentinel", "node9");
        assert_eq!(
            backend.resolve(&app1(), &other_id, None).await,
            Err(BackendError::NotFound)
        );
        let unknown = ConfigKey::new("cloud.config", "unknown", "node1");
        assert_eq!(
            backend.resolve(&app1(), &unknown, None).await,
            Err(BackendError::UnknownDefinition)
        );
    }

    #[test]
    fn test_registry() {
        let backend = InMemoryBackend::new();
        backend.deploy(app1(), 1, ["node1"], Some(PlatformVersion::new(8, 1, 0)));

        assert_eq!(backend.resolve_owning_application("node1"), Some(app1()));
        assert_eq!(backend.resolve_owning_application("node2"), None);
        assert!(backend.has_application(&app1(), None));
        assert!(backend.has_application(&app1(), Some(PlatformVersion::new(8, 1, 0))));
        assert!(!backend.has_application(&app1(), Some(PlatformVersion::new(8, 2, 0))));

        backend.remove(&app1());
        assert!(!backend.has_application(&app1(), None));
        assert_eq!(backend.resolve_owning_application("node1"), None);
    }

    #[test]
    fn test_from_static() {
        let backend = InMemoryBackend::from_static(&[StaticApplication {
            id: app1(),
            generation: 7,
            hosts: vec!["node1".into()],
            version: None,
            configs: vec![StaticConfig {
                namespace: "cloud.config".into(),
                name: "sentinel".into(),
                config_id: "node1".into(),
                payload: r#"{"service":[]}"#.into(),
            }],
        }]);

        assert_eq!(backend.generation(&app1()), Some(7));
        assert!(
            backend
                .payload(&app1(), &ConfigKey::new("cloud.config", "sentinel", "node1"))
                .is_some()
        );
    }
}
