use std::{collections::HashMap, fmt};

/// The proxied request a decision is made for.
///
/// Built by the HTTP layer from `X-Forwarded-*` headers; the engine never
/// sees the raw request.
#[derive(Clone, Default)]
pub struct RequestContext {
    method: String,
    scheme: String,
    host: String,
    uri: String,
    canonical_path: Option<String>,
    cookies: HashMap<String, String>,
    accept: Option<String>,
    requested_with: Option<String>,
    authorization: Option<String>,
}

impl RequestContext {
    /// `uri` is the path including any query string.
    pub fn new(
        method: impl Into<String>,
        scheme: impl Into<String>,
        host: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        let uri = uri.into();
        let uri = if uri.starts_with('/') {
            uri
        } else {
            format!("/{uri}")
        };
        Self {
            method: method.into().to_ascii_uppercase(),
            scheme: scheme.into().to_ascii_lowercase(),
            host: host.into(),
            canonical_path: canonical_path(strip_query(&uri)),
            uri,
            ..Self::default()
        }
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Only `Accept`, `X-Requested-With` and `Authorization` are kept.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        if name.eq_ignore_ascii_case("accept") {
            self.accept = value;
        } else if name.eq_ignore_ascii_case("x-requested-with") {
            self.requested_with = value;
        } else if name.eq_ignore_ascii_case("authorization") {
            self.authorization = value;
        }
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Path with query.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Raw path as forwarded.
    pub fn path(&self) -> &str {
        strip_query(&self.uri)
    }

    /// The path rules are matched against. `None` when the forwarded path
    /// cannot be reduced to one unambiguous form.
    pub fn policy_path(&self) -> Option<&str> {
        self.canonical_path.as_deref()
    }

    pub fn original_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.uri)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.authorization.as_deref()?.trim();
        let (scheme, token) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    }

    /// Clients that cannot follow a login redirect.
    pub fn is_api(&self) -> bool {
        let accepts_api = self.accept.as_deref().is_some_and(|accept| {
            let accept = accept.to_ascii_lowercase();
            accept.contains("application/json") || accept.contains("text/event-stream")
        });
        let xhr = self
            .requested_with
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));
        accepts_api || xhr
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("uri", &self.uri)
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("has_authorization", &self.authorization.is_some())
            .finish_non_exhaustive()
    }
}

fn strip_query(uri: &str) -> &str {
    let end = uri.find(['?', '#']).unwrap_or(uri.len());
    &uri[..end]
}

/// Reduce a request path to the form upstream routers resolve it to.
///
/// Percent escapes are decoded, `.` and `..` segments are resolved, empty
/// segments are dropped and the result is lower-cased. Encoded separators
/// (`%2F`, `%5C`), backslashes, NUL bytes, broken escapes and non UTF-8
/// sequences have no single reading and yield `None`.
pub fn canonical_path(path: &str) -> Option<String> {
    let bytes = path.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3)?;
                let hex = std::str::from_utf8(hex).ok()?;
                let byte = u8::from_str_radix(hex, 16).ok()?;
                if byte == b'/' {
                    return None;
                }
                i += 3;
                byte
            }
            other => {
                i += 1;
                other
            }
        };
        if byte == b'\\' || byte == 0 {
            return None;
        }
        decoded.push(byte);
    }
    let decoded = String::from_utf8(decoded).ok()?;

    let mut segments: Vec<&str> = Vec::new();
    let mut trailing_slash = false;
    for segment in decoded.split('/') {
        trailing_slash = false;
        match segment {
            "" => trailing_slash = true,
            "." => trailing_slash = true,
            ".." => {
                segments.pop();
                trailing_slash = true;
            }
            segment => segments.push(segment),
        }
    }

    let mut canonical = String::with_capacity(decoded.len() + 1);
    for segment in &segments {
        canonical.push('/');
        canonical.push_str(segment);
    }
    if canonical.is_empty() || trailing_slash {
        canonical.push('/');
    }
    Some(canonical.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn original_url_and_path() {
        let ctx = RequestContext::new("get", "HTTPS", "app.example.com", "/a/b?x=1");
        assert_eq!(ctx.method(), "GET");
        assert_eq!(ctx.path(), "/a/b");
        assert_eq!(ctx.original_url(), "https://app.example.com/a/b?x=1");
    }

    #[test]
    fn api_detection() {
        let base = RequestContext::new("GET", "https", "h", "/");
        assert!(!base.clone().with_header("Accept", "text/html,*/*").is_api());
        assert!(base.clone().with_header("accept", "application/json").is_api());
        assert!(base.clone().with_header("Accept", "text/event-stream").is_api());
        assert!(base.with_header("X-Requested-With", "XMLHttpRequest").is_api());
    }

    #[test]
    fn bearer_token_parsing() {
        let base = RequestContext::new("GET", "https", "h", "/");
        assert_eq!(
            base.clone().with_header("Authorization", "Bearer abc").bearer_token(),
            Some("abc")
        );
        assert_eq!(
            base.clone().with_header("Authorization", "bearer  abc ").bearer_token(),
            Some("abc")
        );
        assert_eq!(base.clone().with_header("Authorization", "Basic abc").bearer_token(), None);
        assert_eq!(base.with_header("Authorization", "Bearer ").bearer_token(), None);
    }

    #[test]
    fn policy_path_resolves_dot_segments() {
        let ctx = |uri: &str| RequestContext::new("GET", "https", "h", uri);
        assert_eq!(ctx("/public/../admin/users").policy_path(), Some("/admin/users"));
        assert_eq!(ctx("/public/./css/../app.css?v=1").policy_path(), Some("/public/app.css"));
        assert_eq!(ctx("/../../admin").policy_path(), Some("/admin"));
        assert_eq!(ctx("/admin/..").policy_path(), Some("/"));
        assert_eq!(ctx("/").policy_path(), Some("/"));
    }

    #[test]
    fn policy_path_collapses_slashes_and_folds_case() {
        assert_eq!(canonical_path("//admin").as_deref(), Some("/admin"));
        assert_eq!(canonical_path("/public//x/").as_deref(), Some("/public/x/"));
        assert_eq!(canonical_path("/Admin/Users").as_deref(), Some("/admin/users"));
    }

    #[test]
    fn policy_path_decodes_escapes() {
        assert_eq!(canonical_path("/%61dmin").as_deref(), Some("/admin"));
        assert_eq!(canonical_path("/public/%2e%2e/admin").as_deref(), Some("/admin"));
        assert_eq!(canonical_path("/caf%C3%A9").as_deref(), Some("/café"));
        assert_eq!(canonical_path("/a%252e").as_deref(), Some("/a%2e"));
    }

    #[test]
    fn ambiguous_paths_have_no_policy_path() {
        for path in [
            "/public/..%2Fadmin",
            "/public%2f..%2fadmin",
            "/public\\..\\admin",
            "/public/%5C../admin",
            "/a%00",
            "/a%zz",
            "/a%4",
            "/%ff",
        ] {
            assert_eq!(canonical_path(path), None, "{path}");
        }
        let ctx = RequestContext::new("GET", "https", "h", "/public/..%2Fadmin?x=1");
        assert_eq!(ctx.path(), "/public/..%2Fadmin");
        assert_eq!(ctx.policy_path(), None);
    }
}
