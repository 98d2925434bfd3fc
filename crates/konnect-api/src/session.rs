// GraphQL-over-HTTP session layer.
//
// The `Connect`/`Session` traits are the seam between the connection
// manager and the wire: production code uses `HttpConnector`/`HttpSession`,
// tests substitute scripted mocks.

use std::future::Future;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::auth::Credential;
use crate::error::Error;
use crate::transport::TransportConfig;

/// One logical GraphQL operation: name, document, and variables.
///
/// Immutable and stateless; serializes directly as the POST body.
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    #[serde(rename = "operationName")]
    pub operation_name: String,
    #[serde(rename = "query")]
    pub document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

impl Operation {
    pub fn new(operation_name: &str, document: &str, variables: Option<Value>) -> Self {
        Self {
            operation_name: operation_name.to_owned(),
            document: document.to_owned(),
            variables,
        }
    }
}

/// An established, authenticated connection bound to one credential.
pub trait Session: Send + Sync + 'static {
    /// Run one operation, returning the `data` portion of the response.
    fn execute(&self, operation: &Operation) -> impl Future<Output = Result<Value, Error>> + Send;

    /// Tear the session down. Called exactly once, after the connection
    /// manager has drained all in-flight operations.
    fn close(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Factory for [`Session`]s; invoked on every (re)connect with the
/// credential current at that instant.
pub trait Connect: Send + Sync + 'static {
    type Session: Session;

    fn connect(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Self::Session, Error>> + Send;
}

// ── HTTP implementation ──────────────────────────────────────────────

/// GraphQL response envelope: `{ data, errors }`.
#[derive(serde::Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphqlError>>,
}

#[derive(serde::Deserialize)]
struct GraphqlError {
    #[serde(default)]
    message: Option<String>,
}

/// Connects [`HttpSession`]s against a fixed endpoint URL.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    url: Url,
    transport: TransportConfig,
}

impl HttpConnector {
    pub fn new(url: &str, transport: TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            url: Url::parse(url)?,
            transport,
        })
    }

    /// The endpoint this connector targets.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connect for HttpConnector {
    type Session = HttpSession;

    async fn connect(&self, credential: &Credential) -> Result<HttpSession, Error> {
        debug!("connecting to {}", self.url);
        let http = self.transport.build_client(credential)?;
        Ok(HttpSession {
            http,
            url: self.url.clone(),
        })
    }
}

/// A live GraphQL-over-HTTP session.
///
/// The bearer header lives in the client's default headers, so the session
/// is bound to the credential it was connected with.
pub struct HttpSession {
    http: reqwest::Client,
    url: Url,
}

impl Session for HttpSession {
    async fn execute(&self, operation: &Operation) -> Result<Value, Error> {
        debug!("POST {} ({})", self.url, operation.operation_name);

        let resp = self
            .http
            .post(self.url.clone())
            .json(operation)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::AuthExpired);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Server {
                status: status.as_u16(),
                message: preview(&body).to_owned(),
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        let envelope: Envelope = serde_json::from_str(&body).map_err(|e| {
            let snippet = preview(&body);
            Error::Deserialization {
                message: format!("{e} (body preview: {snippet:?})"),
                body: body.clone(),
            }
        })?;

        if let Some(errors) = envelope.errors {
            if !errors.is_empty() {
                let message = errors
                    .into_iter()
                    .filter_map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(Error::Protocol {
                    operation: operation.operation_name.clone(),
                    message,
                });
            }
        }

        envelope.data.ok_or(Error::Deserialization {
            message: "response has neither data nor errors".into(),
            body,
        })
    }

    async fn close(&self) -> Result<(), Error> {
        // Dropping the reqwest client releases the connection pool;
        // there is no protocol-level goodbye to send.
        debug!("closing session to {}", self.url);
        Ok(())
    }
}

/// At most the first 200 bytes of a body, truncated on a char boundary so
/// multibyte responses cannot panic the error path.
fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
