use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::until_cancelled;
use crate::domain::{
    error::IngestionError,
    models::{AuthFailure, AuthMethod, ResolvedSession, Session},
    ports::{AuthBackend, SessionResolver},
};

/// Walks the credential chain in order and returns the first session that
/// both builds and validates. Holds no state between calls.
pub struct CredentialResolver {
    backend: Arc<dyn AuthBackend>,
}

impl CredentialResolver {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        Self { backend }
    }

    async fn attempt(&self, index: usize, method: &AuthMethod, region: &str) -> Result<Session, IngestionError> {
        if let AuthMethod::Unsupported { kind } = method {
            return Err(IngestionError::UnsupportedAuthMethod(kind.clone()));
        }
        let session = self.backend.open_session(index, method, region).await?;
        self.backend.validate(&session).await?;
        Ok(session)
    }
}

#[async_trait]
impl SessionResolver for CredentialResolver {
    async fn resolve(
        &self,
        methods: &[AuthMethod],
        region: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSession, IngestionError> {
        let mut failures = Vec::new();

        for (index, method) in methods.iter().enumerate() {
            debug!(index, kind = method.kind(), region, "Trying auth method");

            match until_cancelled(cancel, self.attempt(index, method, region)).await {
                Ok(session) => {
                    info!(index, kind = method.kind(), skipped = failures.len(), "Authenticated with AWS");
                    return Ok(ResolvedSession { session, failures });
                }
                Err(IngestionError::Cancelled) => return Err(IngestionError::Cancelled),
                Err(e) => {
                    warn!(index, kind = method.kind(), "Auth method failed: {}", e);
                    failures.push(AuthFailure {
                        index,
                        kind: method.kind().to_string(),
                        diagnostic: e.to_string(),
                    });
                }
            }
        }

        let last = failures
            .last()
            .map(|f| format!("auth[{}] ({}): {}", f.index, f.kind, f.diagnostic))
            .unwrap_or_else(|| "no auth methods configured".to_string());
        Err(IngestionError::AuthenticationExhausted { attempts: failures.len(), last })
    }
}
