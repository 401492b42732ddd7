/*
 * Responsibility
 * - Turn an engine Decision into the HTTP response the proxy understands
 *   - Allow: 200 + X-Forwardauth-* identity headers
 *   - redirects: 302 + Location + Set-Cookie
 *   - Deny: AppError (JSON body, 401/403/400/5xx)
 */
use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header, header::Entry},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::debug;

use crate::error::AppError;
use crate::services::auth::{CookieSettings, Decision, SetCookie};
use crate::services::claims::Identity;

pub const IDENTITY_HEADER_PREFIX: &str = "x-forwardauth-";

pub fn decision_response(decision: Decision, cookies: &CookieSettings) -> Result<Response, AppError> {
    let set_cookies = decision.cookies(cookies);

    match decision {
        Decision::Allow { identity } => {
            let mut headers = HeaderMap::new();
            if let Some(identity) = &identity {
                identity_headers(identity, &mut headers);
            }
            Ok((StatusCode::OK, headers).into_response())
        }
        Decision::RedirectToProvider {
            authorization_url, ..
        } => redirect(&authorization_url, &set_cookies),
        Decision::SetSessionCookie { redirect_to, .. } => redirect(&redirect_to, &set_cookies),
        Decision::RedirectToLogin {
            target: Some(target),
            ..
        } => redirect(&target, &set_cookies),
        Decision::RedirectToLogin { target: None, .. } => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            append_cookies(response.headers_mut(), &set_cookies)?;
            Ok(response)
        }
        Decision::Deny(reason) => Err(AppError::Denied(reason)),
    }
}

fn redirect(location: &str, cookies: &[SetCookie]) -> Result<Response, AppError> {
    let location = HeaderValue::from_str(location).map_err(|_| AppError::Internal)?;

    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert(header::LOCATION, location);
    append_cookies(response.headers_mut(), cookies)?;
    Ok(response)
}

fn append_cookies(headers: &mut HeaderMap, cookies: &[SetCookie]) -> Result<(), AppError> {
    for cookie in cookies {
        let value = HeaderValue::from_str(&cookie.header_value()).map_err(|_| AppError::Internal)?;
        headers.append(header::SET_COOKIE, value);
    }
    Ok(())
}

/// `X-Forwardauth-Sub` plus one header per scalar claim; string arrays are
/// joined with `,`. Claims that cannot form a header are skipped, as are
/// claims whose header name is already taken: `sub` always comes from the
/// subject, and among colliding claims the first one seen wins.
pub fn identity_headers(identity: &Identity, headers: &mut HeaderMap) {
    insert_claim(headers, "sub", &identity.sub);

    for (name, value) in &identity.claims {
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Array(items) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Null | Value::Object(_) => continue,
        };
        insert_claim(headers, name, &rendered);
    }
}

fn insert_claim(headers: &mut HeaderMap, claim: &str, value: &str) {
    let suffix: String = claim
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '-',
        })
        .collect();
    let suffix = suffix.trim_matches('-');
    if suffix.is_empty() {
        return;
    }

    let name = HeaderName::from_bytes(format!("{IDENTITY_HEADER_PREFIX}{suffix}").as_bytes());
    let value = HeaderValue::from_str(value);
    match (name, value) {
        (Ok(name), Ok(value)) => match headers.entry(name) {
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
            Entry::Occupied(entry) => {
                debug!(claim, header = %entry.key(), "claim collides with an identity header");
            }
        },
        _ => debug!(claim, "claim not representable as a header"),
    }
}
