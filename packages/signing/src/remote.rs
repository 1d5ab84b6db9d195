//! Network-attached signing manager over HTTP.

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use signer_core::{AuthSecret, BoxFuture, KeySlot, Signer, SigningError};

use crate::config::RemoteConfig;

pub const KEY_SLOT_HEADER: &str = "x-key-slot";
pub const AUTH_SECRET_HEADER: &str = "x-auth-secret";

/// Posts documents to `{endpoint}/sign` and returns the response body.
pub struct RemoteSigner {
    client: Client,
    url: String,
}

impl RemoteSigner {
    pub fn new(config: RemoteConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/sign", config.endpoint.trim_end_matches('/')),
        })
    }

    async fn request(
        &self,
        document: Bytes,
        key_slot: KeySlot,
        secret: &AuthSecret,
    ) -> Result<Bytes, SigningError> {
        tracing::debug!(url = %self.url, slot = key_slot.0, "Sending document to signing manager");

        let response = self
            .client
            .post(&self.url)
            .header(KEY_SLOT_HEADER, key_slot.0.to_string())
            .header(AUTH_SECRET_HEADER, secret.expose())
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(document)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SigningError::DeviceUnavailable("signing manager timed out".to_string())
                } else {
                    SigningError::DeviceUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body.trim()));
        }

        response
            .bytes()
            .await
            .map_err(|e| SigningError::DeviceUnavailable(format!("failed to read signature: {e}")))
    }
}

impl Signer for RemoteSigner {
    fn sign<'a>(
        &'a self,
        document: Bytes,
        key_slot: KeySlot,
        secret: &'a AuthSecret,
    ) -> BoxFuture<'a, Result<Bytes, SigningError>> {
        Box::pin(self.request(document, key_slot, secret))
    }
}

/// Map a non-success response onto a signing error.
pub fn classify_status(status: StatusCode, body: &str) -> SigningError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SigningError::InvalidAuth,
        StatusCode::CONFLICT | StatusCode::LOCKED | StatusCode::TOO_MANY_REQUESTS => {
            SigningError::DeviceBusy
        }
        StatusCode::UNPROCESSABLE_ENTITY | StatusCode::NOT_IMPLEMENTED => {
            SigningError::UnsupportedAlgorithm(body.to_string())
        }
        _ => SigningError::DeviceUnavailable(format!("signing manager returned {status}: {body}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn classifies_status_codes() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            SigningError::InvalidAuth
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            SigningError::DeviceBusy
        );
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "ED448"),
            SigningError::UnsupportedAlgorithm("ED448".to_string())
        );
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
    }

    fn signer(endpoint: String) -> RemoteSigner {
        RemoteSigner::new(RemoteConfig {
            endpoint,
            timeout: Duration::from_secs(5),
        })
        .expect("client builds")
    }

    #[tokio::test]
    async fn posts_document_with_slot_and_secret() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sign"))
            .and(header(KEY_SLOT_HEADER, "5"))
            .and(header(AUTH_SECRET_HEADER, "valid"))
            .and(body_bytes(b"%PDF".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF signed".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let signed = signer(server.uri())
            .sign(Bytes::from("%PDF"), KeySlot(5), &AuthSecret::new("valid"))
            .await?;
        assert_eq!(signed, Bytes::from("%PDF signed"));
        Ok(())
    }

    #[tokio::test]
    async fn rejected_secret_is_invalid_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sign"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = signer(server.uri())
            .sign(Bytes::from("%PDF"), KeySlot(5), &AuthSecret::new("wrong"))
            .await;
        assert_eq!(result, Err(SigningError::InvalidAuth));
    }

    #[tokio::test]
    async fn busy_manager_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sign"))
            .respond_with(ResponseTemplate::new(423).set_body_string("slot in use"))
            .mount(&server)
            .await;

        let result = signer(format!("{}/", server.uri()))
            .sign(Bytes::from("%PDF"), KeySlot(9), &AuthSecret::new("valid"))
            .await;
        assert_eq!(result, Err(SigningError::DeviceBusy));
    }

    #[tokio::test]
    async fn unreachable_manager_is_unavailable() {
        let result = signer("http://127.0.0.1:1".to_string())
            .sign(Bytes::from("%PDF"), KeySlot(5), &AuthSecret::new("valid"))
            .await;
        assert!(matches!(result, Err(SigningError::DeviceUnavailable(_))));
    }
}
