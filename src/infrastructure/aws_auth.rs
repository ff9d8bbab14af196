use std::time::Duration;

use async_trait::async_trait;
use aws_config::{
    profile::{
        profile_file::{ProfileFileKind, ProfileFiles},
        ProfileFileCredentialsProvider,
    },
    sts::AssumeRoleProvider,
    Region,
};
use aws_credential_types::{
    provider::{ProvideCredentials, SharedCredentialsProvider},
    Credentials,
};
use chrono::Utc;
use tracing::{debug, info};

use crate::domain::{
    error::IngestionError,
    models::{AuthMethod, Session},
    ports::AuthBackend,
};

const ROLE_SESSION_NAME: &str = "cur-ingest";

/// Builds AWS credential providers for each auth method kind.
#[derive(Debug, Default, Clone)]
pub struct AwsAuthBackend;

impl AwsAuthBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuthBackend for AwsAuthBackend {
    async fn open_session(&self, index: usize, method: &AuthMethod, region: &str) -> Result<Session, IngestionError> {
        match method {
            AuthMethod::Static { access_key_id, secret_access_key, session_token } => {
                debug!(index, temporary = session_token.is_some(), "Building static credentials session");
                let creds =
                    Credentials::new(access_key_id, secret_access_key, session_token.clone(), None, "cur-ingest-static");
                Ok(Session::new(region, index, method.kind(), SharedCredentialsProvider::new(creds)))
            }

            AuthMethod::Profile { path, profile_name } => {
                debug!(index, profile = %profile_name, "Building shared-profile session");
                let mut builder = ProfileFileCredentialsProvider::builder().profile_name(profile_name);
                if let Some(path) = path {
                    let files = ProfileFiles::builder().with_file(ProfileFileKind::Credentials, path).build();
                    builder = builder.profile_files(files);
                }
                Ok(Session::new(region, index, method.kind(), SharedCredentialsProvider::new(builder.build())))
            }

            AuthMethod::AssumeRole { role_arn, session_duration } => {
                debug!(index, role = %role_arn, "Building assumed-role session");
                let provider = AssumeRoleProvider::builder(role_arn)
                    .session_name(ROLE_SESSION_NAME)
                    .session_length(*session_duration)
                    .region(Region::new(region.to_string()))
                    .build()
                    .await;
                let expires_at = Utc::now()
                    + chrono::Duration::from_std(*session_duration).unwrap_or_else(|_| chrono::Duration::minutes(15));
                Ok(Session::new(region, index, method.kind(), SharedCredentialsProvider::new(provider))
                    .with_expiry(expires_at))
            }

            AuthMethod::Unsupported { kind } => Err(IngestionError::UnsupportedAuthMethod(kind.clone())),
        }
    }

    /// Asks the provider for credentials once; for assumed roles this is the
    /// STS call, for profiles the file read.
    async fn validate(&self, session: &Session) -> Result<(), IngestionError> {
        let creds = session.credentials().provide_credentials().await.map_err(|e| {
            IngestionError::Credentials(format!("{} validation error: {}", session.method_kind(), e))
        })?;

        if let Some(expiry) = creds.expiry() {
            let remaining = expiry.duration_since(std::time::SystemTime::now()).unwrap_or(Duration::ZERO);
            debug!(remaining_secs = remaining.as_secs(), "Temporary credentials issued");
        }
        info!(kind = session.method_kind(), region = session.region(), "Credentials validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_credentials_validate_without_network() {
        let backend = AwsAuthBackend::new();
        let method = AuthMethod::Static {
            access_key_id: "STATIC_ID".into(),
            secret_access_key: "STATIC_SECRET".into(),
            session_token: Some("STATIC_TOKEN".into()),
        };

        let session = backend.open_session(0, &method, "us-west-2").await.unwrap();
        backend.validate(&session).await.unwrap();

        let creds = session.credentials().provide_credentials().await.unwrap();
        assert_eq!(creds.access_key_id(), "STATIC_ID");
        assert_eq!(creds.secret_access_key(), "STATIC_SECRET");
        assert_eq!(creds.session_token(), Some("STATIC_TOKEN"));
        assert!(session.expires_at().is_none());
    }

    #[tokio::test]
    async fn profile_credentials_come_from_the_given_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, "[demo]\naws_access_key_id=PROFILE_ID\naws_secret_access_key=PROFILE_SECRET\n").unwrap();

        let backend = AwsAuthBackend::new();
        let method = AuthMethod::Profile { path: Some(path), profile_name: "demo".into() };
        let session = backend.open_session(1, &method, "us-east-1").await.unwrap();
        backend.validate(&session).await.unwrap();

        let creds = session.credentials().provide_credentials().await.unwrap();
        assert_eq!(creds.access_key_id(), "PROFILE_ID");
        assert_eq!(session.method_index(), 1);
    }

    #[tokio::test]
    async fn missing_profile_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, "[other]\naws_access_key_id=X\naws_secret_access_key=Y\n").unwrap();

        let backend = AwsAuthBackend::new();
        let method = AuthMethod::Profile { path: Some(path), profile_name: "demo".into() };
        let session = backend.open_session(0, &method, "us-east-1").await.unwrap();

        let err = backend.validate(&session).await.unwrap_err();
        assert!(err.to_string().contains("profile validation error"), "{err}");
    }

    #[tokio::test]
    async fn unknown_kind_is_unsupported() {
        let err = AwsAuthBackend::new()
            .open_session(0, &AuthMethod::Unsupported { kind: "sso".into() }, "us-east-1")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::UnsupportedAuthMethod(ref k) if k == "sso"));
    }
}
