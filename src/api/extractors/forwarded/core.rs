use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, Method, Uri, header, request::Parts};
use cookie::Cookie;
use tracing::debug;

use crate::error::AppError;
use crate::services::auth::RequestContext;

const X_FORWARDED_METHOD: &str = "x-forwarded-method";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_URI: &str = "x-forwarded-uri";
const X_REQUESTED_WITH: &str = "x-requested-with";

/// The proxied request, rebuilt from `X-Forwarded-*` headers.
///
/// Missing forwarded headers fall back to the request's own method, `Host`
/// and URI, so `/signin` works whether or not it is reached through the proxy.
#[derive(Debug)]
pub struct ForwardedRequest(pub RequestContext);

impl<S> FromRequestParts<S> for ForwardedRequest
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        build_context(&parts.method, &parts.uri, &parts.headers).map(ForwardedRequest)
    }
}

fn build_context(method: &Method, uri: &Uri, headers: &HeaderMap) -> Result<RequestContext, AppError> {
    let method = forwarded(headers, X_FORWARDED_METHOD)?.unwrap_or_else(|| method.as_str());
    let scheme = forwarded(headers, X_FORWARDED_PROTO)?
        .or_else(|| uri.scheme_str())
        .unwrap_or("http");
    let host = forwarded(headers, X_FORWARDED_HOST)?
        .or_else(|| header_str(headers, header::HOST.as_str()))
        .or_else(|| uri.host())
        .ok_or_else(|| AppError::InvalidRequest("missing host".to_string()))?;
    let path = match headers.get(X_FORWARDED_URI) {
        Some(value) => value
            .to_str()
            .map_err(|_| AppError::InvalidRequest("invalid x-forwarded-uri".to_string()))?,
        None => uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/"),
    };

    let mut ctx = RequestContext::new(method, scheme, host, path);

    // first occurrence wins when a name repeats
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for cookie in Cookie::split_parse(value) {
            let cookie = match cookie {
                Ok(cookie) => cookie,
                Err(e) => {
                    debug!("ignoring malformed cookie: {e}");
                    continue;
                }
            };
            if ctx.cookie(cookie.name()).is_none() {
                ctx = ctx.with_cookie(cookie.name(), cookie.value_trimmed());
            }
        }
    }

    for name in [header::ACCEPT.as_str(), X_REQUESTED_WITH, header::AUTHORIZATION.as_str()] {
        if let Some(value) = header_str(headers, name) {
            ctx = ctx.with_header(name, value);
        }
    }

    Ok(ctx)
}

/// First comma-separated entry of a forwarded header. Proxies chained in
/// front of each other append their own value.
fn forwarded<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AppError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::InvalidRequest(format!("invalid {name}")))?;
    let first = value.split(',').next().unwrap_or_default().trim();
    Ok((!first.is_empty()).then_some(first))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
