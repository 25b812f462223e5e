//! Axum integration utilities.

use std::future::poll_fn;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::Error;
use crate::model::Actor;
use crate::store::Store;
use crate::token::ShareTokenService;
use crate::types::AccountId;

use ::axum::body::Body;
use ::axum::http::{Request, StatusCode};
use ::axum::response::{IntoResponse, Response};
use ::tower::{Layer, Service};

/// Query parameter carrying a share token.
pub const TOKEN_PARAM: &str = "token";

fn token_param(query: Option<&str>) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == TOKEN_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Middleware layer that builds the request [`Actor`].
///
/// Combines an [`AccountId`] extension set by upstream authentication with
/// the share token from the `token` query parameter.
pub struct ActorLayer<S> {
    tokens: ShareTokenService<S>,
}

impl<S> Clone for ActorLayer<S> {
    fn clone(&self) -> Self {
        Self {
            tokens: self.tokens.clone(),
        }
    }
}

impl<S> ActorLayer<S> {
    /// Layer resolving `?token=` through `tokens`.
    pub fn new(tokens: ShareTokenService<S>) -> Self {
        Self { tokens }
    }
}

impl<S, Inner> Layer<Inner> for ActorLayer<S> {
    type Service = ActorService<Inner, S>;

    fn layer(&self, inner: Inner) -> Self::Service {
        ActorService {
            inner,
            tokens: self.tokens.clone(),
        }
    }
}

/// Middleware service inserting the resolved [`Actor`] into extensions.
pub struct ActorService<Inner, S> {
    inner: Inner,
    tokens: ShareTokenService<S>,
}

impl<Inner: Clone, S> Clone for ActorService<Inner, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            tokens: self.tokens.clone(),
        }
    }
}

impl<Inner, S> Service<Request<Body>> for ActorService<Inner, S>
where
    Inner: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    Inner::Future: Send + 'static,
    S: Store + 'static,
{
    type Response = Response;
    type Error = Inner::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let tokens = self.tokens.clone();

        Box::pin(async move {
            let account = req.extensions().get::<AccountId>().cloned();
            let raw = token_param(req.uri().query());
            match tokens.resolve_actor(account, raw.as_deref()).await {
                Ok(actor) => {
                    req.extensions_mut().insert(actor);
                    poll_fn(|cx| inner.poll_ready(cx)).await?;
                    inner.call(req).await
                }
                Err(error) => Ok(error.into_response()),
            }
        })
    }
}

impl Error {
    /// HTTP status matching the error class.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Denied { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::NotReady(_) => StatusCode::ACCEPTED,
            Error::InvalidId(_) | Error::InvalidOperation(_) | Error::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::ArchiveFailed { .. }
            | Error::PartialFailure { .. }
            | Error::Compression(_)
            | Error::Store(_)
            | Error::Io(_)
            | Error::Archive(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            return (status, "internal error").into_response();
        }
        (status, self.to_string()).into_response()
    }
}

/// Returns the actor inserted by [`ActorLayer`], or an anonymous one.
pub fn request_actor<B>(req: &Request<B>) -> Actor {
    req.extensions().get::<Actor>().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_param_is_extracted() {
        assert_eq!(token_param(Some("a=1&token=abc_-9")).as_deref(), Some("abc_-9"));
        assert_eq!(token_param(Some("token=")), None);
        assert_eq!(token_param(Some("other=x")), None);
        assert_eq!(token_param(None), None);
    }

    #[test]
    fn token_param_is_percent_decoded() {
        assert_eq!(token_param(Some("token=a%2Db%5F")).as_deref(), Some("a-b_"));
        assert_eq!(token_param(Some("t%6Fken=xyz")).as_deref(), Some("xyz"));
        assert_eq!(token_param(Some("token=%20")).as_deref(), Some(" "));
    }

    #[test]
    fn errors_map_to_statuses() {
        let missing = Error::not_found("album", "a1");
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        let response = Error::Validation("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
