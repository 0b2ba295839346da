//! RIPE Atlas over HTTP.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rootscape_core::{
    parse_latest, AtlasApi, Config, FeedSample, FetchError, ProbeId, ProbeMeta, Source,
    LATEST_FIELDS,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

const USER_AGENT: &str = concat!("rootscape/", env!("CARGO_PKG_VERSION"));

pub struct AtlasClient {
    http: reqwest::Client,
    api_base: Url,
    freshness_seconds: u64,
}

impl AtlasClient {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let mut base = cfg.api_base.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            api_base: Url::parse(&base)?,
            freshness_seconds: cfg.freshness_seconds,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.api_base.join(path).map_err(FetchError::transport)
    }

    pub fn latest_url(&self, source: Source) -> Result<Url, FetchError> {
        let mut url = self.endpoint(&format!(
            "measurements/{}/latest/",
            source.measurement_id()
        ))?;
        url.query_pairs_mut()
            .append_pair("fields", LATEST_FIELDS)
            .append_pair("freshness", &self.freshness_seconds.to_string());
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<Vec<u8>, FetchError> {
        debug!(%url, "GET");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(FetchError::transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.bytes().await.map_err(FetchError::transport)?;
        Ok(body.to_vec())
    }

    /// Probe positions from the cartography endpoint, keyed by probe id.
    pub async fn locations(&self) -> Result<HashMap<ProbeId, (f64, f64)>, FetchError> {
        let body = self.get(self.endpoint("cartography/locations")?).await?;
        parse_locations(&body)
    }
}

#[async_trait]
impl AtlasApi for AtlasClient {
    async fn latest(&self, source: Source) -> Result<Vec<FeedSample>, FetchError> {
        let body = self.get(self.latest_url(source)?).await?;
        parse_latest(&body)
    }

    async fn probe(&self, probe: ProbeId) -> Result<ProbeMeta, FetchError> {
        let body = self.get(self.endpoint(&format!("probes/{probe}/"))?).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(default)]
    coordinates: Vec<Value>,
}

/// Reads point features; features without a numeric id or a (lon, lat)
/// pair are dropped.
pub fn parse_locations(body: &[u8]) -> Result<HashMap<ProbeId, (f64, f64)>, FetchError> {
    let collection: FeatureCollection = serde_json::from_slice(body)?;
    let mut out = HashMap::with_capacity(collection.features.len());
    for feature in collection.features {
        let id = match &feature.id {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        };
        let Some(id) = id.and_then(|id| ProbeId::try_from(id).ok()) else {
            continue;
        };
        let Some(geometry) = feature.geometry else {
            continue;
        };
        if let [lon, lat, ..] = geometry.coordinates.as_slice() {
            if let (Some(lon), Some(lat)) = (lon.as_f64(), lat.as_f64()) {
                out.insert(id, (lon, lat));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_url_carries_fields_and_freshness() {
        let client = AtlasClient::new(&Config::default()).unwrap();
        let url = client.latest_url(Source::K).unwrap();
        assert_eq!(url.path(), "/api/v2/measurements/10301/latest/");
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["fields"], LATEST_FIELDS);
        assert_eq!(query["freshness"], "1800");
    }

    #[test]
    fn locations_skip_unusable_features() {
        let body = br#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "id": 100, "geometry": {"type": "Point", "coordinates": [4.9, 52.4]}},
                {"type": "Feature", "id": "7", "geometry": {"type": "Point", "coordinates": [-0.1, 51.5]}},
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1, 2]}},
                {"type": "Feature", "id": 9, "geometry": null},
                {"type": "Feature", "id": 10, "geometry": {"type": "Point", "coordinates": []}}
            ]
        }"#;
        let locations = parse_locations(body).unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[&100], (4.9, 52.4));
        assert_eq!(locations[&7], (-0.1, 51.5));
    }
}
