// ============================================================================
// HTTP pull client
// ============================================================================
//
// REST pull API in the style of an Event Grid namespace:
//
//   POST {endpoint}/topics/{topic}/eventsubscriptions/{sub}:receive
//        ?api-version=2023-11-01&maxEvents=N&maxWaitTime=S
//     -> {"value":[{"brokerProperties":{"lockToken","deliveryCount"},"event":{...}}]}
//
//   POST ...:acknowledge | :release | :reject   {"lockTokens":[...]}
//     -> {"succeededLockTokens":[...],
//         "failedLockTokens":[{"lockToken","error":{"code","message"}}]}
//
// Authentication per topic:
// - SharedKey:       Authorization: SharedAccessKey <key>
// - AmbientIdentity: Authorization: Bearer <token>, token fetched from a
//                    TokenSource on every request (by default the environment
//                    variable configured as BROKER_AMBIENT_TOKEN_ENV)
//
// Topic and subscription are percent-encoded as single path segments.
//
// ============================================================================

use super::{BrokerClientFactory, BrokerPullClient, SettleOperation};
use async_trait::async_trait;
use eventpull_error::BrokerError;
use eventpull_types::{
    BrokerCredential, CloudEvent, FailedLockToken, LockTokenResult, ReceivedMessage, Secret,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const RECEIVE_API_VERSION: &str = "2023-11-01";

/// Slack on top of `maxWaitTime` before a receive request is abandoned
const RECEIVE_TIMEOUT_MARGIN: Duration = Duration::from_secs(30);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ===== Wire format =====

#[derive(Debug, Deserialize)]
struct ReceiveResponse {
    #[serde(default)]
    value: Vec<ReceiveDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiveDetails {
    broker_properties: BrokerProperties,
    event: CloudEvent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrokerProperties {
    lock_token: String,
    #[serde(default)]
    delivery_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SettleRequest<'a> {
    lock_tokens: &'a [String],
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleResponse {
    #[serde(default)]
    succeeded_lock_tokens: Vec<String>,
    #[serde(default)]
    failed_lock_tokens: Vec<FailedLockTokenWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailedLockTokenWire {
    lock_token: String,
    #[serde(default)]
    error: WireError,
}

#[derive(Debug, Default, Deserialize)]
struct WireError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl From<SettleResponse> for LockTokenResult {
    fn from(response: SettleResponse) -> Self {
        LockTokenResult {
            succeeded: response.succeeded_lock_tokens,
            failed: response
                .failed_lock_tokens
                .into_iter()
                .map(|f| FailedLockToken {
                    lock_token: f.lock_token,
                    code: f.error.code,
                    description: f.error.message,
                })
                .collect(),
        }
    }
}

// ===== Authorization =====

/// Supplies the bearer token for ambient identity, consulted per request
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<Secret, BrokerError>;
}

/// Reads the token from an environment variable each time it is asked
#[derive(Debug, Clone)]
pub struct EnvTokenSource {
    var: String,
}

impl EnvTokenSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenSource for EnvTokenSource {
    fn token(&self) -> Result<Secret, BrokerError> {
        std::env::var(&self.var)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .map(Secret::new)
            .ok_or_else(|| {
                BrokerError::Auth(format!(
                    "no shared key configured and ambient identity token {} is not set",
                    self.var
                ))
            })
    }
}

#[derive(Clone)]
pub enum HttpAuthorization {
    SharedKey(Secret),
    Ambient(Arc<dyn TokenSource>),
}

impl HttpAuthorization {
    fn header(&self) -> Result<Secret, BrokerError> {
        match self {
            HttpAuthorization::SharedKey(key) => {
                Ok(Secret::new(format!("SharedAccessKey {}", key.expose())))
            }
            HttpAuthorization::Ambient(source) => {
                Ok(Secret::new(format!("Bearer {}", source.token()?.expose())))
            }
        }
    }
}

/// Whole seconds for `maxWaitTime`, rounded up so a sub-second wait still waits
fn wait_time_secs(max_wait: Duration) -> u64 {
    max_wait.as_secs() + u64::from(max_wait.subsec_nanos() > 0)
}

// ===== Client =====

/// Pull client bound to one topic's credential
#[derive(Clone)]
pub struct HttpPullClient {
    http: reqwest::Client,
    endpoint: Url,
    authorization: HttpAuthorization,
}

impl HttpPullClient {
    pub fn new(http: reqwest::Client, endpoint: Url, authorization: HttpAuthorization) -> Self {
        Self {
            http,
            endpoint,
            authorization,
        }
    }

    fn url(&self, topic: &str, subscription: &str, action: &str) -> Result<Url, BrokerError> {
        let operation = format!("{}:{}", subscription, action);
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| BrokerError::Config(format!("endpoint {} cannot take a path", self.endpoint)))?
            .pop_if_empty()
            .extend(["topics", topic, "eventsubscriptions", operation.as_str()]);
        Ok(url)
    }

    async fn post<B, R>(
        &self,
        url: Url,
        query: &[(&str, String)],
        body: Option<&B>,
        timeout: Duration,
    ) -> Result<R, BrokerError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let authorization = self.authorization.header()?;
        let mut request = self
            .http
            .post(url)
            .query(query)
            .header(reqwest::header::AUTHORIZATION, authorization.expose())
            .timeout(timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| BrokerError::Decode(e.to_string()))
    }

    async fn settle(
        &self,
        operation: SettleOperation,
        topic: &str,
        subscription: &str,
        lock_tokens: &[String],
    ) -> Result<LockTokenResult, BrokerError> {
        let response: SettleResponse = self
            .post(
                self.url(topic, subscription, operation.as_str())?,
                &[("api-version", RECEIVE_API_VERSION.to_string())],
                Some(&SettleRequest { lock_tokens }),
                SETTLE_TIMEOUT,
            )
            .await?;

        Ok(response.into())
    }
}

#[async_trait]
impl BrokerPullClient for HttpPullClient {
    async fn receive(
        &self,
        topic: &str,
        subscription: &str,
        max_events: usize,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        let query = [
            ("api-version", RECEIVE_API_VERSION.to_string()),
            ("maxEvents", max_events.to_string()),
            ("maxWaitTime", wait_time_secs(max_wait).to_string()),
        ];

        let response: ReceiveResponse = self
            .post::<(), _>(
                self.url(topic, subscription, "receive")?,
                &query,
                None,
                max_wait + RECEIVE_TIMEOUT_MARGIN,
            )
            .await?;

        debug!(
            topic = %topic,
            subscription = %subscription,
            count = response.value.len(),
            "Received broker batch"
        );

        Ok(response
            .value
            .into_iter()
            .map(|details| ReceivedMessage {
                event: details.event,
                lock_token: details.broker_properties.lock_token,
                delivery_count: details.broker_properties.delivery_count,
            })
            .collect())
    }

    async fn acknowledge(
        &self,
        topic: &str,
        subscription: &str,
        lock_tokens: &[String],
    ) -> Result<LockTokenResult, BrokerError> {
        self.settle(SettleOperation::Acknowledge, topic, subscription, lock_tokens)
            .await
    }

    async fn release(
        &self,
        topic: &str,
        subscription: &str,
        lock_tokens: &[String],
    ) -> Result<LockTokenResult, BrokerError> {
        self.settle(SettleOperation::Release, topic, subscription, lock_tokens)
            .await
    }

    async fn reject(
        &self,
        topic: &str,
        subscription: &str,
        lock_tokens: &[String],
    ) -> Result<LockTokenResult, BrokerError> {
        self.settle(SettleOperation::Reject, topic, subscription, lock_tokens)
            .await
    }
}

// ===== Factory =====

/// Builds one HttpPullClient per topic, sharing the connection pool
#[derive(Clone)]
pub struct HttpClientFactory {
    http: reqwest::Client,
    endpoint: Url,
    token_source: Arc<dyn TokenSource>,
}

impl HttpClientFactory {
    pub fn new(endpoint: &str, ambient_token_env: impl Into<String>) -> Result<Self, BrokerError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| BrokerError::Config(format!("Invalid broker endpoint {}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(BrokerError::Config(format!(
                "Broker endpoint {} cannot take a path",
                endpoint
            )));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BrokerError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            token_source: Arc::new(EnvTokenSource::new(ambient_token_env)),
        })
    }

    /// Replace where ambient identity tokens come from
    pub fn with_token_source(mut self, token_source: Arc<dyn TokenSource>) -> Self {
        self.token_source = token_source;
        self
    }

    fn authorization(&self, credential: &BrokerCredential) -> Result<HttpAuthorization, BrokerError> {
        match credential {
            BrokerCredential::SharedKey(key) => Ok(HttpAuthorization::SharedKey(key.clone())),
            BrokerCredential::AmbientIdentity => {
                // Fail fast when no token is available at all
                self.token_source.token()?;
                Ok(HttpAuthorization::Ambient(self.token_source.clone()))
            }
        }
    }
}

#[async_trait]
impl BrokerClientFactory for HttpClientFactory {
    async fn create(
        &self,
        topic: &str,
        credential: &BrokerCredential,
    ) -> Result<Arc<dyn BrokerPullClient>, BrokerError> {
        let authorization = self.authorization(credential)?;
        debug!(
            topic = %topic,
            shared_key = matches!(credential, BrokerCredential::SharedKey(_)),
            "Building HTTP broker client"
        );
        Ok(Arc::new(HttpPullClient::new(
            self.http.clone(),
            self.endpoint.clone(),
            authorization,
        )))
    }
}
