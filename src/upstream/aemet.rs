//! Client for the AEMET OpenData Antarctic observation endpoint.
//!
//! AEMET answers a data request in two steps: the first response is a small
//! envelope (`estado`, `descripcion`, `datos`) whose `datos` field is a
//! one-time URL, and fetching that URL yields the JSON array of ten-minute
//! records.

use crate::types::observation::Observation;
use crate::types::station::Station;
use crate::upstream::{UpstreamClient, UpstreamError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://opendata.aemet.es/opendata";

const URL_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SUTC";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_KEY_HEADER: &str = "api_key";

#[derive(Debug, Clone)]
pub struct AemetClient {
    http: Client,
    base_url: String,
    api_key: String,
}

/// First-step response. `estado` mirrors an HTTP status and may report an
/// error even when the transport status was 200.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    descripcion: String,
    estado: Option<u16>,
    datos: Option<String>,
}

/// One ten-minute record. Numeric values arrive as numbers, as strings, or as
/// the string `"NaN"` when the sensor reported nothing.
#[derive(Debug, Deserialize)]
struct AemetRecord {
    fhora: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    temp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pres: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    vel: Option<f64>,
}

impl AemetClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, api_key)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn data_url(&self, station_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "{}/api/antartida/datos/fechaini/{}/fechafin/{}/estacion/{}",
            self.base_url,
            start.format(URL_TIMESTAMP_FORMAT),
            end.format(URL_TIMESTAMP_FORMAT),
            station_id
        )
    }

    async fn get_text(&self, url: &str, with_key: bool) -> Result<String, UpstreamError> {
        let mut request = self.http.get(url).timeout(REQUEST_TIMEOUT);
        if with_key {
            request = request.header(API_KEY_HEADER, &self.api_key);
        }
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        // Payloads are occasionally Latin-1; decode leniently.
        let bytes = response.bytes().await.map_err(classify_transport)?;
        let body = String::from_utf8_lossy(&bytes).into_owned();

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope>(&body)
                .map(|e| e.descripcion)
                .unwrap_or_else(|_| truncate_body(&body));
            warn!("AEMET request {} failed with status {}: {}", url, status, message);
            return Err(classify_status(status.as_u16(), message));
        }
        Ok(body)
    }

    async fn fetch_datos_url(&self, url: &str) -> Result<String, UpstreamError> {
        let body = self.get_text(url, true).await?;
        let envelope: Envelope = serde_json::from_str(&body).map_err(|e| UpstreamError::Permanent {
            status: None,
            message: format!("Malformed AEMET envelope: {}", e),
        })?;
        if let Some(estado) = envelope.estado.filter(|s| *s != StatusCode::OK.as_u16()) {
            return Err(classify_status(estado, envelope.descripcion));
        }
        envelope
            .datos
            .ok_or_else(|| UpstreamError::permanent("AEMET envelope carries no data URL"))
    }
}

#[async_trait]
impl UpstreamClient for AemetClient {
    async fn fetch_raw(
        &self,
        station: &Station,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, UpstreamError> {
        let url = self.data_url(&station.id, start, end);
        info!("Requesting AEMET data for station {} from {} to {}", station.id, start, end);
        let datos_url = self.fetch_datos_url(&url).await?;
        debug!("AEMET data URL for station {}: {}", station.id, datos_url);

        let body = self.get_text(&datos_url, false).await?;
        let records: Vec<AemetRecord> = serde_json::from_str(&body).map_err(|e| UpstreamError::Permanent {
            status: None,
            message: format!("Malformed AEMET data payload: {}", e),
        })?;
        Ok(records_to_observations(records, &station.id))
    }
}

fn records_to_observations(records: Vec<AemetRecord>, station_id: &str) -> Vec<Observation> {
    let total = records.len();
    let observations: Vec<Observation> = records
        .into_iter()
        .filter_map(|record| {
            let Some(instant) = parse_fhora(&record.fhora) else {
                warn!("Skipping AEMET record with unreadable timestamp '{}'", record.fhora);
                return None;
            };
            Some(Observation {
                station_id: station_id.to_string(),
                instant,
                temperature: record.temp,
                pressure: record.pres,
                wind_speed: record.vel,
            })
        })
        .collect();
    if observations.len() < total {
        warn!(
            "Dropped {} of {} AEMET records for station {}",
            total - observations.len(),
            total,
            station_id
        );
    }
    observations
}

/// Timestamps without an offset are UTC.
fn parse_fhora(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    [URL_TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
            _ => None,
        })
        .filter(|v| v.is_finite()))
}

fn classify_status(status: u16, message: String) -> UpstreamError {
    if status == 408 || status == 429 || (500..600).contains(&status) {
        UpstreamError::Transient {
            status: Some(status),
            message,
        }
    } else {
        UpstreamError::Permanent {
            status: Some(status),
            message,
        }
    }
}

fn classify_transport(e: reqwest::Error) -> UpstreamError {
    if e.is_decode() || e.is_builder() {
        UpstreamError::Permanent {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    } else {
        UpstreamError::Transient {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
