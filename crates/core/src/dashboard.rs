//! Dashboard URL construction.
//!
//! Produces `protocol://host:port[/prefix]/d/<id>/?orgId=1&kiosk[&variables]`.
//! Every component goes through the `url` crate so that a prefix or id
//! cannot break out of its own path segment and variables cannot end the
//! query.

use url::Url;

use crate::config::CaptureConfig;
use crate::error::{Error, Result};

pub fn dashboard_url(config: &CaptureConfig) -> Result<Url> {
    let mut url = Url::parse(&format!("{}://localhost/", config.protocol.as_str()))
        .map_err(|e| Error::Config(format!("invalid protocol: {}", e)))?;
    url.set_host(Some(&config.host))
        .map_err(|e| Error::Config(format!("invalid host '{}': {}", config.host, e)))?;
    url.set_port(Some(config.port))
        .map_err(|_| Error::Config(format!("cannot set port {}", config.port)))?;

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| Error::Config("dashboard URL cannot carry a path".into()))?;
        segments.pop_if_empty();
        for part in config
            .prefix
            .split('/')
            .filter(|p| !p.is_empty() && *p != "." && *p != "..")
        {
            segments.push(part);
        }
        segments.push("d").push(&config.dashboard_id).push("");
    }

    // Variables arrive pre-encoded and are kept as written; `set_query` only
    // escapes what would end the query (`#`) or is never valid in it.
    let mut query = String::from("orgId=1&kiosk");
    for piece in config.variables.split('&').filter(|p| !p.is_empty()) {
        query.push('&');
        query.push_str(piece);
    }
    url.set_query(Some(&query));

    Ok(url)
}
