use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type Generation = u64;

/// Identifies one deployed application: `tenant:application:instance`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApplicationId {
    pub tenant: String,
    pub application: String,
    pub instance: String,
}

impl ApplicationId {
    pub fn new<T, A, I>(tenant: T, application: A, instance: I) -> Self
    where
        T: Into<String>,
        A: Into<String>,
        I: Into<String>,
    {
        ApplicationId {
            tenant: tenant.into(),
            application: application.into(),
            instance: instance.into(),
        }
    }

    /// Id under which requests for the aggregate (cross-application) model park.
    pub fn global() -> Self {
        ApplicationId::new("hosted", "global", "default")
    }

    pub fn is_global(&self) -> bool {
        *self == Self::global()
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.tenant, self.application, self.instance)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("invalid application id '{0}', expected tenant:application:instance")]
pub struct InvalidApplicationId(String);

impl FromStr for ApplicationId {
    type Err = InvalidApplicationId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [tenant, application, instance]
                if !tenant.is_empty() && !application.is_empty() && !instance.is_empty() =>
            {
                Ok(ApplicationId::new(*tenant, *application, *instance))
            }
            _ => Err(InvalidApplicationId(s.to_string())),
        }
    }
}

impl TryFrom<String> for ApplicationId {
    type Error = InvalidApplicationId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ApplicationId> for String {
    fn from(id: ApplicationId) -> Self {
        id.to_string()
    }
}

/// Key of one config: definition `namespace.name` plus the config id
/// (the path of the consumer inside the application model).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigKey {
    pub namespace: String,
    pub name: String,
    pub config_id: String,
}

impl ConfigKey {
    pub fn new<N, M, C>(namespace: N, name: M, config_id: C) -> Self
    where
        N: Into<String>,
        M: Into<String>,
        C: Into<String>,
    {
        ConfigKey {
            namespace: namespace.into(),
            name: name.into(),
            config_id: config_id.into(),
        }
    }

    /// Fully qualified definition name, e.g. `cloud.config.sentinel`.
    pub fn definition(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{},{}", self.namespace, self.name, self.config_id)
    }
}

/// Platform version of a client or a deployed model: `major.minor.micro`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlatformVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl PlatformVersion {
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        PlatformVersion {
            major,
            minor,
            micro,
        }
    }
}

impl fmt::Display for PlatformVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("invalid version '{0}'")]
pub struct InvalidVersion(String);

impl FromStr for PlatformVersion {
    type Err = InvalidVersion;

    // Missing trailing components default to 0, so "8" and "8.1" are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidVersion(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> Result<u32, InvalidVersion> {
            match parts.next() {
                Some(part) => part.parse().map_err(|_| invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };
        let version = PlatformVersion::new(next(true)?, next(false)?, next(false)?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl TryFrom<String> for PlatformVersion {
    type Error = InvalidVersion;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PlatformVersion> for String {
    fn from(version: PlatformVersion) -> Self {
        version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_id_parse() {
        let id: ApplicationId = "tenant1:app1:default".parse().unwrap();
        assert_eq!(id, ApplicationId::new("tenant1", "app1", "default"));
        assert_eq!(id.to_string(), "tenant1:app1:default");

        assert!("tenant1:app1".parse::<ApplicationId>().is_err());
        assert!("tenant1::default".parse::<ApplicationId>().is_err());
        assert!("a:b:c:d".parse::<ApplicationId>().is_err());

        assert!(ApplicationId::global().is_global());
        assert!(!id.is_global());
    }

    #[test]
    fn test_application_id_serde() {
        let id: ApplicationId = serde_json::from_str(r#""t:a:i""#).unwrap();
        assert_eq!(id, ApplicationId::new("t", "a", "i"));
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""t:a:i""#);
        assert!(serde_json::from_str::<ApplicationId>(r#""nope""#).is_err());
    }

    #[test]
    fn test_config_key() {
        let key = ConfigKey::new("cloud.config", "sentinel", "hosts/node1");
        assert_eq!(key.definition(), "cloud.config.sentinel");
        assert_eq!(key.to_string(), "cloud.config.sentinel,hosts/node1");
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(
            "8.120.3".parse::<PlatformVersion>().unwrap(),
            PlatformVersion::new(8, 120, 3)
        );
        assert_eq!(
            "7".parse::<PlatformVersion>().unwrap(),
            PlatformVersion::new(7, 0, 0)
        );
        assert!("".parse::<PlatformVersion>().is_err());
        assert!("8.x.1".parse::<PlatformVersion>().is_err());
        assert!("1.2.3.4".parse::<PlatformVersion>().is_err());
        assert!(PlatformVersion::new(8, 1, 0) < PlatformVersion::new(8, 2, 0));

        let version: PlatformVersion = serde_json::from_str(r#""8.2""#).unwrap();
        assert_eq!(version, PlatformVersion::new(8, 2, 0));
        assert_eq!(serde_json::to_string(&version).unwrap(), r#""8.2.0""#);
    }
}
