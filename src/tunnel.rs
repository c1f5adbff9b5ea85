use std::time::Duration;

use reqwest::Client;

use crate::error::{AppError, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Check that the public URL actually reaches this process by hitting `/health`
/// through the tunnel.
pub async fn probe(public_url: &str) -> Result<()> {
    let url = format!("{}/health", public_url.trim_end_matches('/'));

    let client = Client::builder().timeout(PROBE_TIMEOUT).build()?;
    let response = client.get(&url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::Tunnel(format!("{url} returned {status}")));
    }

    let body = response.text().await?;
    if body.trim() != "ok" {
        return Err(AppError::Tunnel(format!(
            "{url} answered, but not from this server"
        )));
    }

    Ok(())
}
