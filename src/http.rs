//! Outbound HTTP and `file://` helpers shared by the registry client, the
//! orchestrator, the publish flow and the built-in provider.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::TransportError;

pub const USER_AGENT: &str = concat!("mrpd/", env!("CARGO_PKG_VERSION"));

/// Client for protocol traffic. Redirects are not followed.
pub fn protocol_client() -> Result<Client, TransportError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|source| TransportError::Request {
            url: String::new(),
            source,
        })
}

/// Client for fetching content on a caller's behalf. Redirects are followed.
pub fn fetch_client() -> Result<Client, TransportError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|source| TransportError::Request {
            url: String::new(),
            source,
        })
}

/// Status and body of a completed request, whatever the status.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value, TransportError> {
        serde_json::from_str(&self.body).map_err(|source| TransportError::Decode {
            url: self.url.clone(),
            source,
        })
    }

    /// Fail with [`TransportError::Status`] unless 2xx.
    pub fn ensure_success(self) -> Result<Self, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::Status {
                url: self.url,
                status: self.status,
                body: self.body,
            })
        }
    }
}

async fn finish(url: &str, response: reqwest::Response) -> Result<HttpReply, TransportError> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|source| TransportError::Request {
            url: url.to_string(),
            source,
        })?;
    Ok(HttpReply {
        url: url.to_string(),
        status,
        body,
    })
}

/// GET `url` with the given query parameters.
pub async fn get(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
    accept: &str,
    timeout: Duration,
) -> Result<HttpReply, TransportError> {
    let response = client
        .get(url)
        .query(query)
        .header(reqwest::header::ACCEPT, accept)
        .timeout(timeout)
        .send()
        .await
        .map_err(|source| TransportError::Request {
            url: url.to_string(),
            source,
        })?;
    finish(url, response).await
}

/// POST `body` as JSON with an explicit content type.
pub async fn post_json<B: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &B,
    content_type: &str,
    timeout: Duration,
) -> Result<HttpReply, TransportError> {
    let bytes = serde_json::to_vec(body).map_err(|source| TransportError::Decode {
        url: url.to_string(),
        source,
    })?;
    let response = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, content_type)
        .header(
            reqwest::header::ACCEPT,
            "application/mrp+json, application/json",
        )
        .body(bytes)
        .timeout(timeout)
        .send()
        .await
        .map_err(|source| TransportError::Request {
            url: url.to_string(),
            source,
        })?;
    finish(url, response).await
}

/// Local path named by a `file://` URL.
///
/// Windows file URLs of the form `file:///C:/...` resolve to `C:/...`.
pub fn file_url_path(location: &str) -> Result<PathBuf, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidUrl {
        url: location.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(location).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "file" {
        return Err(invalid("not a file:// URL"));
    }
    url.to_file_path()
        .map_err(|_| invalid("cannot be converted to a local path"))
}

/// Read JSON from a `file://` URL or GET it from an `http(s)://` URL.
pub async fn load_json(
    client: &Client,
    location: &str,
    accept: &str,
    timeout: Duration,
) -> Result<Value, TransportError> {
    if location.starts_with("file://") {
        let path = file_url_path(location)?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| TransportError::File {
                path: path.clone(),
                source,
            })?;
        return serde_json::from_str(&text).map_err(|source| TransportError::Decode {
            url: location.to_string(),
            source,
        });
    }

    if !(location.starts_with("http://") || location.starts_with("https://")) {
        return Err(TransportError::InvalidUrl {
            url: location.to_string(),
            reason: "expected file://, http:// or https://".to_string(),
        });
    }

    get(client, location, &[], accept, timeout)
        .await?
        .ensure_success()?
        .json()
}
