use async_trait::async_trait;
use gatepass_core::{AuditEvent, CardId, CoreResult, IdentityDirectory, Lookup, RegistrationSink};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{DirectoryError, DirectoryResult};
use crate::wire::{
    RegisterRequest, RegisterResponse, VerifyCardRequest, VerifyCardResponse, REGISTER_PATH,
    VERIFY_CARD_PATH,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn build_client(timeout: Duration) -> DirectoryResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DirectoryError::Storage(format!("failed to create HTTP client: {}", e)))
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Resolves cards against a remote gatepass directory server.
pub struct HttpDirectory {
    http: Client,
    url: String,
}

impl HttpDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> DirectoryResult<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            url: endpoint(base_url, VERIFY_CARD_PATH),
        })
    }

    pub async fn verify(&self, card_id: &CardId) -> DirectoryResult<Lookup> {
        let response = self
            .http
            .post(&self.url)
            .json(&VerifyCardRequest {
                card_id: card_id.clone(),
            })
            .send()
            .await
            .map_err(|e| DirectoryError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DirectoryError::Unreachable(format!(
                "directory returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(DirectoryError::InvalidResponse(format!(
                "unexpected status {}",
                status
            )));
        }

        let body: VerifyCardResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))?;

        match (body.success, body.identity) {
            (true, Some(identity)) => Ok(Lookup::Found(identity)),
            (true, None) => Err(DirectoryError::InvalidResponse(
                "success without identity".into(),
            )),
            (false, _) => {
                debug!(card = %card_id, "card not registered");
                Ok(Lookup::NotFound)
            }
        }
    }
}

#[async_trait]
impl IdentityDirectory for HttpDirectory {
    async fn resolve(&self, card_id: &CardId) -> CoreResult<Lookup> {
        self.verify(card_id).await.map_err(|e| {
            warn!(card = %card_id, error = %e, "directory lookup failed");
            e.into_lookup_error()
        })
    }
}

/// Posts finalized decisions to a remote gatepass directory server.
pub struct HttpRegistrationSink {
    http: Client,
    url: String,
}

impl HttpRegistrationSink {
    pub fn new(base_url: &str, timeout: Duration) -> DirectoryResult<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            url: endpoint(base_url, REGISTER_PATH),
        })
    }

    pub async fn register(&self, event: &AuditEvent) -> DirectoryResult<()> {
        let response = self
            .http
            .post(&self.url)
            .json(&RegisterRequest::from(event))
            .send()
            .await
            .map_err(|e| DirectoryError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Unreachable(format!(
                "directory returned {}",
                status
            )));
        }

        let body: RegisterResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))?;
        if !body.success {
            return Err(DirectoryError::InvalidResponse(
                body.message.unwrap_or_else(|| "registration rejected".into()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistrationSink for HttpRegistrationSink {
    async fn record(&self, event: &AuditEvent) -> CoreResult<()> {
        self.register(event)
            .await
            .map_err(DirectoryError::into_sink_error)
    }
}
