use std::{
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{header::ACCEPT, StatusCode};
use parking_lot::Mutex;
use reqwest::Client;
use tower::{
    buffer::Buffer, limit::RateLimitLayer, util::BoxCloneService, BoxError, Layer, Service,
    ServiceExt,
};
use tracing::debug;
use url::Url;

use crate::KeySetError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP capability used to fetch remote key material.
///
/// Any cloneable `tower` service turning a bodiless request into a buffered response fits, which makes it easy to
/// inject a stub in tests (e.g. via [`tower::service_fn`]) or to stack further `tower` layers on top of
/// [`HttpTransport`].
pub type Transport = BoxCloneService<http::Request<()>, http::Response<Bytes>, BoxError>;

/// Default [`Transport`], wrapping a `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http_client: Client,
}

impl HttpTransport {
    pub fn new(http_client: Client) -> Self {
        Self { http_client }
    }

    pub fn into_transport(self) -> Transport {
        BoxCloneService::new(self)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self::new(http_client)
    }
}

impl Service<http::Request<()>> for HttpTransport {
    type Response = http::Response<Bytes>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<()>) -> Self::Future {
        let http_client = self.http_client.clone();
        Box::pin(async move {
            let (parts, ()) = request.into_parts();
            let response = http_client
                .request(parts.method, parts.uri.to_string())
                .headers(parts.headers)
                .send()
                .await?;

            let status = response.status();
            let body = response.bytes().await?;
            let mut converted = http::Response::new(body);
            *converted.status_mut() = status;
            Ok(converted)
        })
    }
}

/// Limits `transport` to `num` requests per `per`.
///
/// Must be called from within a Tokio runtime, since the buffer spawns a worker task.
pub fn rate_limited(transport: Transport, num: u64, per: Duration) -> Transport {
    let rate_limited_service = RateLimitLayer::new(num, per).layer(transport);

    // Wrap the rate limited service in a buffer service to make it `Clone`.
    let buffered_service = Buffer::new(rate_limited_service, 1024);
    BoxCloneService::new(buffered_service)
}

/// Key material hosted at a remote URL.
pub struct RemoteJwkSet {
    url: Url,
    transport: Mutex<Transport>,
}

impl RemoteJwkSet {
    pub fn new(url: Url, transport: Transport) -> Self {
        Self {
            url,
            transport: Mutex::new(transport),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fetches the raw key material. Anything but `200 OK` is an error.
    pub async fn fetch(&self) -> Result<Bytes, KeySetError> {
        let request = http::Request::get(self.url.as_str())
            .header(ACCEPT, "application/json")
            .body(())
            .map_err(KeySetError::transport)?;

        // Only the clone is driven, so the lock is never held across an await point.
        let transport = self.transport.lock().clone();
        debug!(url = %self.url, "fetching key material");
        let response = transport
            .oneshot(request)
            .await
            .map_err(KeySetError::transport)?;

        if response.status() != StatusCode::OK {
            return Err(KeySetError::Status {
                status_code: response.status(),
            });
        }
        Ok(response.into_body())
    }
}
