//! Socket URL derivation from the HTTP API origin.

use crate::errors::{AppError, Result};
use url::Url;

/// Well-known path of the monitor push endpoint.
pub const MONITOR_PATH: &str = "/ws/monitor";

/// Rewrite an HTTP(S) origin to its socket equivalent and append the monitor
/// path. `http` maps to `ws`, `https` to `wss`, socket schemes pass through,
/// and anything else (including no scheme at all) becomes `ws`. A query on the
/// origin is kept; a fragment is dropped.
pub fn socket_url(base_url: &str) -> Result<Url> {
    let origin = base_url.trim();
    let (scheme, rest) = match origin.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => (String::new(), origin),
    };
    if rest.is_empty() || rest.starts_with('/') {
        return Err(AppError::Config(format!("base url `{base_url}` has no host")));
    }
    let socket_scheme = match scheme.as_str() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    let mut url = Url::parse(&format!("{socket_scheme}://{rest}"))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(AppError::Config(format!("base url `{base_url}` has no host")));
    }
    let path = format!("{}{MONITOR_PATH}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_fragment(None);
    Ok(url)
}
