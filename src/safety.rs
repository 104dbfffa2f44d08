//! Precondition check for running a dev operation.
//!
//! Independent of the in-pipeline production gate: call sites can ask
//! before entering the pipeline at all, and the binary logs the verdict at
//! startup.

use thiserror::Error;

use crate::config::Config;

/// Why dev operations must not run in the current environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnsafeEnvironment {
    #[error("dev operations are not allowed in production")]
    Production,

    #[error("service credential is not configured")]
    MissingServiceCredential,

    #[error("staging requires a configured dev token")]
    StagingWithoutDevToken,
}

/// Check, in order: not production; a service credential is configured;
/// staging has a dev token configured.
///
/// Only the existence of the credentials is checked; their values are never
/// read or logged.
pub fn validate_environment_safety(config: &Config) -> Result<(), UnsafeEnvironment> {
    if config.environment.is_production() {
        return Err(UnsafeEnvironment::Production);
    }

    if config.service_credential.is_none() {
        return Err(UnsafeEnvironment::MissingServiceCredential);
    }

    if config.environment.is_staging() && config.dev_token.is_none() {
        return Err(UnsafeEnvironment::StagingWithoutDevToken);
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{Environment, SecretString};

    fn config(environment: Environment, credential: bool, dev_token: bool) -> Config {
        Config {
            environment,
            service_credential: credential.then(|| SecretString::new("service-role-key")),
            dev_token: dev_token.then(|| SecretString::new("local-dev-token")),
            ..Config::default()
        }
    }

    #[test]
    fn test_development_with_credential_is_safe() {
        assert_eq!(
            validate_environment_safety(&config(Environment::Development, true, false)),
            Ok(())
        );
    }

    #[test]
    fn test_production_is_never_safe() {
        assert_eq!(
            validate_environment_safety(&config(Environment::Production, true, true)),
            Err(UnsafeEnvironment::Production)
        );
    }

    #[test]
    fn test_missing_credential() {
        assert_eq!(
            validate_environment_safety(&config(Environment::Development, false, true)),
            Err(UnsafeEnvironment::MissingServiceCredential)
        );
    }

    #[test]
    fn test_staging_requires_dev_token() {
        assert_eq!(
            validate_environment_safety(&config(Environment::Staging, true, false)),
            Err(UnsafeEnvironment::StagingWithoutDevToken)
        );
        assert_eq!(
            validate_environment_safety(&config(Environment::Staging, true, true)),
            Ok(())
        );
    }
}
