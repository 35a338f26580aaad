use crate::checksums::ClientChecksums;
use crate::memory::InMemoryBackend;
use crate::request::RequestParams;
use crate::types::{ApplicationId, ConfigKey, Generation, PlatformVersion};
use std::time::Duration;

pub fn app1() -> ApplicationId {
    ApplicationId::new("tenant", "app1", "default")
}

pub fn sentinel_key() -> ConfigKey {
    ConfigKey::new("cloud.config", "sentinel", "hosts/node1/sentinel")
}

pub fn params(host: &str, generation: Generation) -> RequestParams {
    RequestParams {
        key: sentinel_key(),
        client_hostname: host.into(),
        version: None,
        checksums: ClientChecksums::none(),
        generation,
        timeout: Duration::from_secs(30),
    }
}

/// app1 at generation 5 on node1 and node2, serving one sentinel config.
pub fn seeded_backend() -> InMemoryBackend {
    let backend = InMemoryBackend::new();
    backend.deploy(
        app1(),
        5,
        ["node1", "node2"],
        Some(PlatformVersion::new(8, 0, 0)),
    );
    backend.set_config(&app1(), sentinel_key(), "abc123-payload");
    backend
}
