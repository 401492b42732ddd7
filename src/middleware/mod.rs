pub mod http;
pub mod security_headers;
