//! Shared HTTP client construction.
//!
//! One pooled `reqwest::Client` is shared by every worker; the pool
//! is capped per host so high upload concurrency does not translate
//! into unbounded connections.

use std::time::Duration;

use crate::ApiError;

/// Idle connections kept per host.
const MAX_IDLE_PER_HOST: usize = 10;

/// How long an idle pooled connection is kept alive.
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Builds the pooled HTTP client used for all remote calls.
///
/// No global request timeout is set: large uploads can legitimately
/// run for a long time, and cancellation bounds their duration
/// instead. When a proxy is configured, certificate validation is
/// relaxed so intercepting proxies can be used for debugging.
pub fn build_http_client(proxy: Option<&str>) -> Result<reqwest::Client, ApiError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
        .pool_idle_timeout(IDLE_TIMEOUT);

    if let Some(url) = proxy {
        builder = builder
            .proxy(reqwest::Proxy::all(url)?)
            .danger_accept_invalid_certs(true);
    }

    Ok(builder.build()?)
}
