use std::time::Duration;

use driftwatch_core::GatewayError;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Hard ceiling for one request. Callers layer tighter budgets on top.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Shared client builder.
pub(crate) fn client() -> Client {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Send a request and decode a JSON body, classifying failures.
pub(crate) async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, GatewayError> {
    let resp = req.send().await.map_err(|e| {
        if e.is_timeout() {
            GatewayError::NetworkError(format!("request timed out: {e}"))
        } else {
            GatewayError::NetworkError(e.to_string())
        }
    })?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.unwrap_or_default();
        return Err(
            GatewayError::from_status(status, body).with_retry_after(retry_after.as_deref()),
        );
    }

    resp.json::<T>()
        .await
        .map_err(|e| GatewayError::MalformedResponse(e.to_string()))
}

/// Join base URL and path without doubling slashes.
pub(crate) fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
