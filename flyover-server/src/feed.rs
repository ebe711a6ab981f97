//! Aircraft feed client for the adsb.fi open data API (v2).

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use flyover_core::feed::{parse_records, RawAircraft};
use flyover_core::types::{FlyoverError, Result};

/// Largest query radius the API accepts.
pub const MAX_RADIUS_NM: f64 = 250.0;

/// Source of live aircraft around a point.
#[async_trait]
pub trait AircraftFeed: Send + Sync {
    async fn fetch(&self, lat: f64, lon: f64, radius_nm: f64) -> Result<Vec<RawAircraft>>;
}

/// HTTP client for `{base}/lat/{lat}/lon/{lon}/dist/{nm}`.
#[derive(Clone)]
pub struct AdsbFiFeed {
    base_url: String,
    client: reqwest::Client,
}

impl AdsbFiFeed {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("flyover/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FlyoverError::Feed(e.to_string()))?;
        Ok(AdsbFiFeed {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, lat: f64, lon: f64, radius_nm: f64) -> String {
        let radius = radius_nm.clamp(0.0, MAX_RADIUS_NM);
        format!(
            "{}/lat/{lat:.6}/lon/{lon:.6}/dist/{radius:.1}",
            self.base_url
        )
    }
}

#[async_trait]
impl AircraftFeed for AdsbFiFeed {
    async fn fetch(&self, lat: f64, lon: f64, radius_nm: f64) -> Result<Vec<RawAircraft>> {
        let url = self.url(lat, lon, radius_nm);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FlyoverError::Feed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlyoverError::Feed(format!("{url} returned {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| FlyoverError::Feed(e.to_string()))?;

        let (records, failed) = parse_records(&body)?;
        if failed > 0 {
            debug!(failed, "dropped undecodable feed records");
        }
        Ok(records)
    }
}
