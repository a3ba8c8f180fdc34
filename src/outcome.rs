//! Request, response and outcome types shared by the retry controller
//!
//! Every attempt made by the controller produces an [`Outcome`]. An outcome is
//! either a fully-read HTTP [`Response`] or a [`TransportFailure`] synthesized
//! from a timeout. Both are presented to retry predicates uniformly: a
//! transport failure reports `408 Request Timeout` from [`Outcome::status`],
//! so a predicate that retries on 408 also retries timed-out attempts.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Description of one logical request, replayed on every attempt
///
/// # Examples
///
/// ```
/// use backoff_client::outcome::RequestSpec;
/// use reqwest::header::{HeaderValue, ACCEPT};
///
/// let spec = RequestSpec::get("http://localhost:8080/health")
///     .header(ACCEPT, HeaderValue::from_static("application/json"))
///     .query("verbose", "1");
/// assert_eq!(spec.url, "http://localhost:8080/health");
/// ```
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

/// Body sent with each attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl RequestSpec {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Adds a header, replacing any previous value under the same name
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(RequestBody::Bytes(body.into()));
        self
    }

    /// Serializes `value` once; the same JSON document is sent on every attempt
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(RequestBody::Json(serde_json::to_value(value)?));
        Ok(self)
    }
}

/// A fully-read HTTP response from a single attempt
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, with invalid sequences replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Which timeout produced a [`TransportFailure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailureKind {
    /// The connection could not be established in time
    ConnectTimeout,
    /// The attempt as a whole exceeded its timeout
    Timeout,
}

/// Synthetic outcome standing in for an attempt that timed out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub kind: TransportFailureKind,
    pub message: String,
}

impl TransportFailure {
    /// Status reported to predicates for a timed-out attempt
    pub const STATUS: StatusCode = StatusCode::REQUEST_TIMEOUT;
}

/// Result of one attempt as seen by retry predicates and callers
#[derive(Debug, Clone)]
pub enum Outcome {
    Response(Response),
    TransportFailure(TransportFailure),
}

impl Outcome {
    /// Status of the response, or `408 Request Timeout` for transport failures
    pub fn status(&self) -> StatusCode {
        match self {
            Outcome::Response(response) => response.status(),
            Outcome::TransportFailure(_) => TransportFailure::STATUS,
        }
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            Outcome::Response(response) => Some(response),
            Outcome::TransportFailure(_) => None,
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Outcome::TransportFailure(_))
    }

    /// Converts into a response; a transport failure becomes an empty 408
    pub fn into_response(self) -> Response {
        match self {
            Outcome::Response(response) => response,
            Outcome::TransportFailure(failure) => {
                Response::new(TransportFailure::STATUS).with_body(failure.message)
            }
        }
    }
}

impl From<Response> for Outcome {
    fn from(response: Response) -> Self {
        Outcome::Response(response)
    }
}

/// Failure reported by a request executor for a single attempt
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect timed out: {0}")]
    ConnectTimeout(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl TransportError {
    /// Whether this failure is absorbed into an [`Outcome`] instead of
    /// ending the session
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectTimeout(_) | TransportError::Timeout(_)
        )
    }

    /// Translates timeouts into a synthetic outcome; anything else is
    /// handed back unchanged
    pub fn into_outcome(self) -> Result<Outcome, TransportError> {
        match self {
            TransportError::ConnectTimeout(message) => {
                Ok(Outcome::TransportFailure(TransportFailure {
                    kind: TransportFailureKind::ConnectTimeout,
                    message,
                }))
            }
            TransportError::Timeout(message) => Ok(Outcome::TransportFailure(TransportFailure {
                kind: TransportFailureKind::Timeout,
                message,
            })),
            other => Err(other),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() && err.is_connect() {
            TransportError::ConnectTimeout(err.to_string())
        } else if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err)
        }
    }
}
