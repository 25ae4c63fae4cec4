use crate::response::{ErrorResponse, SuccessTokenResponse, TokenResponse};
use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use url::Url;

/// A request issued by the runtime. Either a plain GET or a POST with a form-encoded body.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub form: Option<Vec<(String, String)>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("TransportError: Could not send request"))]
    Send { source: reqwest::Error },

    #[snafu(display("TransportError: Could not read response body"))]
    Body { source: reqwest::Error },

    #[snafu(display("TransportError: {message}"))]
    Other { message: String },
}

/// Carries requests to the identity provider.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(form) = &request.form {
            builder = builder.form(form);
        }
        let response = builder.send().await.context(SendSnafu {})?;
        let status = response.status();
        let body = response.text().await.context(BodySnafu {})?;
        Ok(HttpResponse { status, body })
    }
}

#[derive(Debug, Snafu)]
pub enum RequestError {
    #[snafu(display("RequestError: Could not send request"))]
    Transport { source: TransportError },

    #[snafu(display("RequestError: Received unexpected status {status} from {url}"))]
    Status { status: StatusCode, url: Url },

    #[snafu(display("RequestError: Could not decode payload"))]
    Decode { source: serde_json::Error },

    #[snafu(display("RequestError: Received an error response"))]
    ErrResponse { error_response: ErrorResponse },

    #[snafu(display("RequestError: Access token is not usable as a header value"))]
    BearerHeader { source: header::InvalidHeaderValue },
}

impl RequestError {
    pub fn error_response(&self) -> Option<&ErrorResponse> {
        match self {
            RequestError::ErrResponse { error_response } => Some(error_response),
            _ => None,
        }
    }
}

fn accept_json() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

/// GETs `url` and returns the body of a successful response.
pub(crate) async fn retrieve_text(transport: &dyn Transport, url: Url) -> Result<String, RequestError> {
    let response = transport
        .execute(HttpRequest {
            method: Method::GET,
            url: url.clone(),
            headers: accept_json(),
            form: None,
        })
        .await
        .context(TransportSnafu {})?;
    snafu::ensure!(
        response.status.is_success(),
        StatusSnafu {
            status: response.status,
            url
        }
    );
    Ok(response.body)
}

pub(crate) async fn retrieve_jwk_set(
    transport: &dyn Transport,
    jwk_set_endpoint: Url,
) -> Result<jsonwebtoken::jwk::JwkSet, RequestError> {
    #[derive(Deserialize)]
    pub struct RawJwkSet {
        pub keys: Vec<serde_json::Value>,
    }
    let body = retrieve_text(transport, jwk_set_endpoint).await?;
    let raw_set = serde_json::from_str::<RawJwkSet>(&body).context(DecodeSnafu {})?;
    let mut set = jsonwebtoken::jwk::JwkSet { keys: Vec::new() };
    for key in raw_set.keys {
        match serde_json::from_value::<jsonwebtoken::jwk::Jwk>(key) {
            Ok(parsed) => set.keys.push(parsed),
            Err(err) => tracing::warn!(?err, "Found non-decodable JWK"),
        }
    }
    Ok(set)
}

/// POSTs `params` to the token endpoint.
pub(crate) async fn request_token(
    transport: &dyn Transport,
    token_endpoint: Url,
    params: Vec<(String, String)>,
    extra_headers: HeaderMap,
) -> Result<SuccessTokenResponse, RequestError> {
    let mut headers = accept_json();
    headers.extend(extra_headers);
    let response = transport
        .execute(HttpRequest {
            method: Method::POST,
            url: token_endpoint.clone(),
            headers,
            form: Some(params),
        })
        .await
        .context(TransportSnafu {})?;

    match serde_json::from_str::<TokenResponse>(&response.body) {
        Ok(TokenResponse::Error(error)) => Err(ErrResponseSnafu {
            error_response: error,
        }
        .build()),
        Ok(TokenResponse::Success(_)) | Err(_) if !response.status.is_success() => {
            Err(StatusSnafu {
                status: response.status,
                url: token_endpoint,
            }
            .build())
        }
        Ok(TokenResponse::Success(success)) => Ok(success),
        Err(err) => Err(err).context(DecodeSnafu {}),
    }
}

/// GETs the userinfo endpoint using `access_token` as bearer credential.
pub(crate) async fn retrieve_user_info(
    transport: &dyn Transport,
    userinfo_endpoint: Url,
    access_token: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, RequestError> {
    let mut headers = accept_json();
    let bearer =
        HeaderValue::from_str(&format!("Bearer {access_token}")).context(BearerHeaderSnafu {})?;
    headers.insert(header::AUTHORIZATION, bearer);
    let response = transport
        .execute(HttpRequest {
            method: Method::GET,
            url: userinfo_endpoint.clone(),
            headers,
            form: None,
        })
        .await
        .context(TransportSnafu {})?;
    snafu::ensure!(
        response.status.is_success(),
        StatusSnafu {
            status: response.status,
            url: userinfo_endpoint
        }
    );
    serde_json::from_str(&response.body).context(DecodeSnafu {})
}
