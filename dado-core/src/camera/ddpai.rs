//! HTTP client for DDPAI dashcams
//!
//! The device exposes a small command API under `/vcam/cmd.cgi?cmd=<ACTION>`
//! and serves recordings and thumbnails by file name from its root. Every
//! command response is an envelope whose `data` field holds a JSON document
//! encoded as a string.
//!
//! Timestamps in listings are advanced by the device's UTC offset, so they
//! are shifted back before use.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use reqwest::header::DATE;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::CameraConfig;
use crate::error::{Error, Result};
use crate::types::FrameItem;

use super::Camera;

const SESSION_ACTION: &str = "API_RequestSessionID";
const CERTIFICATE_ACTION: &str = "API_RequestCertificate";
const SYNC_DATE_ACTION: &str = "API_SyncDate";
const PLAYBACK_LIST_ACTION: &str = "APP_PlaybackListReq";
const EVENT_LIST_ACTION: &str = "APP_EventListReq";

// ============================================
// Wire types
// ============================================

/// Outer envelope of every command response
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SessionData {
    #[serde(rename = "acSessionId", default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaybackList {
    #[serde(default)]
    num: usize,
    #[serde(default)]
    file: Vec<PlaybackFile>,
}

#[derive(Debug, Deserialize)]
struct PlaybackFile {
    name: String,
    starttime: DeviceTimestamp,
    #[serde(default)]
    endtime: Option<DeviceTimestamp>,
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    num: usize,
    #[serde(default)]
    event: Vec<EventEntry>,
}

#[derive(Debug, Deserialize)]
struct EventEntry {
    #[serde(default)]
    bvideoname: Option<String>,
    #[serde(default)]
    bstarttime: Option<DeviceTimestamp>,
    #[serde(default)]
    bendtime: Option<DeviceTimestamp>,
    #[serde(default)]
    imgname: Option<String>,
}

/// Epoch seconds, sent as either a number or a string depending on firmware
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DeviceTimestamp {
    Number(i64),
    Text(String),
}

impl DeviceTimestamp {
    fn seconds(&self) -> Option<i64> {
        match self {
            DeviceTimestamp::Number(n) => Some(*n),
            DeviceTimestamp::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Unwrap the envelope and decode its `data` payload.
fn decode_data<T: DeserializeOwned>(body: &str) -> Result<T> {
    let envelope: Envelope = serde_json::from_str(body)?;
    match envelope.data {
        Some(serde_json::Value::String(inner)) => Ok(serde_json::from_str(&inner)?),
        Some(other) => Ok(serde_json::from_value(other)?),
        None => Err(Error::Camera(format!(
            "response has no data (errcode {})",
            envelope.errcode
        ))),
    }
}

// ============================================
// Device time
// ============================================

/// Converts between device-reported and real time.
#[derive(Debug, Clone, Copy)]
struct DeviceClock {
    utc_offset_secs: i64,
}

impl DeviceClock {
    fn new(config: &CameraConfig) -> Self {
        let utc_offset_secs = config
            .utc_offset_secs
            .unwrap_or_else(|| i64::from(Local::now().offset().local_minus_utc()));
        Self { utc_offset_secs }
    }

    fn device_to_utc(&self, timestamp: &DeviceTimestamp) -> Option<DateTime<Utc>> {
        let secs = timestamp.seconds()?;
        Utc.timestamp_opt(secs - self.utc_offset_secs, 0).single()
    }

    /// Parse the digits of a device file name as wall-clock time.
    fn name_to_utc(&self, name: &str, format: &str) -> Option<DateTime<Utc>> {
        let digits: String = name.chars().filter(char::is_ascii_digit).collect();
        let local = NaiveDateTime::parse_from_str(&digits, format).ok()?;
        let utc = local - chrono::Duration::seconds(self.utc_offset_secs);
        Some(Utc.from_utc_datetime(&utc))
    }
}

fn thumbnail_name(recording: &str, extension: &str) -> String {
    recording.replace(".mp4", extension)
}

fn recordings_from_listing(
    files: Vec<PlaybackFile>,
    clock: &DeviceClock,
    thumbnail_extension: &str,
) -> Vec<FrameItem> {
    let mut recordings: Vec<FrameItem> = files
        .into_iter()
        .filter_map(|file| {
            let Some(start) = clock.device_to_utc(&file.starttime) else {
                tracing::warn!(name = %file.name, "Recording has an unreadable start time");
                return None;
            };
            let end = file
                .endtime
                .as_ref()
                .and_then(|t| clock.device_to_utc(t))
                .unwrap_or(start);

            let mut item = FrameItem::new(file.name, start, end);
            item.thumbnail = Some(thumbnail_name(&item.name, thumbnail_extension));
            Some(item)
        })
        .collect();

    recordings.sort_by_key(|r| r.start_time);
    recordings
}

fn events_from_listing(entries: Vec<EventEntry>, clock: &DeviceClock, date_format: &str) -> Vec<FrameItem> {
    let mut events = Vec::new();

    for entry in entries {
        let video = entry.bvideoname.filter(|n| !n.is_empty());
        let image = entry.imgname.filter(|n| !n.is_empty());

        if let Some(name) = video {
            let Some(start) = entry.bstarttime.as_ref().and_then(|t| clock.device_to_utc(t)) else {
                tracing::warn!(%name, "Event video has an unreadable start time");
                continue;
            };
            let end = entry
                .bendtime
                .as_ref()
                .and_then(|t| clock.device_to_utc(t))
                .unwrap_or(start);
            events.push(FrameItem::new(name, start, end));
        } else if let Some(name) = image {
            match clock.name_to_utc(&name, date_format) {
                Some(at) => events.push(FrameItem::instant(name, at)),
                None => tracing::warn!(%name, "Event image name does not contain a timestamp"),
            }
        }
    }

    events.sort_by_key(|e| e.start_time);
    events
}

// ============================================
// Async client
// ============================================

/// One completed HTTP exchange
struct Exchange {
    response: reqwest::Response,
    elapsed: Duration,
    device_time: Option<DateTime<Utc>>,
}

/// Async DDPAI API client
pub struct DdpaiClient {
    config: CameraConfig,
    http_client: reqwest::Client,
    endpoint: String,
    session_id: Option<String>,
    clock: DeviceClock,
}

impl DdpaiClient {
    pub fn new(config: CameraConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint(),
            clock: DeviceClock::new(&config),
            config,
            http_client,
            session_id: None,
        })
    }

    fn api_url(&self, action: &str) -> String {
        format!("{}/{}{}", self.endpoint, self.config.api_path, action)
    }

    fn download_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.endpoint, urlencoding::encode(file_name))
    }

    /// Request a session, a certificate, and optionally fix the device clock.
    ///
    /// Returns false when the device cannot be reached.
    pub async fn initiate(&mut self) -> Result<bool> {
        let url = self.api_url(SESSION_ACTION);
        let exchange = match self.send(Method::GET, &url, None).await {
            Ok(exchange) => exchange,
            Err(e) if e.is_connect() || e.is_timeout() => {
                tracing::info!("Camera not available");
                tracing::debug!(error = %e, "Session request failed");
                return Ok(false);
            }
            Err(e) => return Err(request_error(e)),
        };

        let body = exchange.response.text().await.map_err(request_error)?;
        let session: SessionData = decode_data(&body)?;
        self.session_id = session.session_id;
        tracing::debug!(has_session = self.session_id.is_some(), "Camera session opened");

        if let Err(e) = self.request_certificate().await {
            tracing::warn!(error = %e, "Certificate request failed");
        }

        if self.config.time_set {
            if let Err(e) = self.sync_clock().await {
                tracing::warn!(error = %e, "Failed to synchronise camera clock");
            }
        }

        Ok(true)
    }

    async fn request_certificate(&self) -> Result<()> {
        let body = serde_json::json!({
            "user": self.config.user,
            "password": self.config.password,
            "level": 0,
            "uid": self.config.uid,
        });
        self.send_with_retry(Method::POST, &self.api_url(CERTIFICATE_ACTION), Some(body.to_string()))
            .await?;
        Ok(())
    }

    /// Set the device clock when it drifted further than allowed.
    async fn sync_clock(&self) -> Result<()> {
        let Some(max_drift) = self.config.time_set_max_drift.filter(|d| *d > 0) else {
            return Ok(());
        };

        let url = self.api_url(SYNC_DATE_ACTION);
        let exchange = self.send_with_retry(Method::POST, &url, None).await?;
        let Some(device_time) = exchange.device_time else {
            tracing::warn!("Camera response carried no Date header");
            return Ok(());
        };

        let drift_ms = (device_time - Utc::now()).num_milliseconds().abs();
        let allowed_ms = (max_drift * 1000) as i64 + exchange.elapsed.as_millis() as i64;
        tracing::info!(device_time = %device_time.format("%H:%M:%S"), "Time on the device");
        tracing::debug!(elapsed = ?exchange.elapsed, drift_ms, "Calculated clock drift");

        if drift_ms <= allowed_ms {
            return Ok(());
        }

        tracing::info!(drift_ms, "Setting camera time");
        let body = serde_json::json!({
            "date": Local::now().format(&self.config.date_format).to_string(),
            "imei": "0000000000000000",
            "time_zone": self.clock.utc_offset_secs,
            "format": self.config.internal_date_format,
            "lang": self.config.internal_language,
        });
        self.send_with_retry(Method::POST, &url, Some(body.to_string()))
            .await?;
        Ok(())
    }

    /// List recordings, sorted by start time
    pub async fn list_recordings(&self) -> Result<Vec<FrameItem>> {
        tracing::info!("Querying camera for list of recordings");

        let url = self.api_url(PLAYBACK_LIST_ACTION);
        let exchange = self
            .send_with_retry(Method::POST, &url, Some("{}".to_string()))
            .await?;
        let elapsed = exchange.elapsed;
        let body = exchange.response.text().await.map_err(request_error)?;
        let listing: PlaybackList = decode_data(&body)?;

        tracing::info!(count = listing.num, elapsed = ?elapsed, "Recordings found");
        Ok(recordings_from_listing(
            listing.file,
            &self.clock,
            &self.config.thumbnail_extension,
        ))
    }

    /// List event videos and snapshots
    pub async fn list_events(&self) -> Result<Vec<FrameItem>> {
        tracing::info!("Querying camera for list of events");

        let url = self.api_url(EVENT_LIST_ACTION);
        let exchange = self
            .send_with_retry(Method::POST, &url, Some("{}".to_string()))
            .await?;
        let elapsed = exchange.elapsed;
        let body = exchange.response.text().await.map_err(request_error)?;
        let listing: EventList = decode_data(&body)?;

        tracing::info!(count = listing.num, elapsed = ?elapsed, "Events found");
        Ok(events_from_listing(
            listing.event,
            &self.clock,
            &self.config.date_format,
        ))
    }

    /// Download a file from the device root into `dest`.
    ///
    /// Data lands in a `.part` file first so an interrupted transfer never
    /// looks like a finished one.
    pub async fn download(&self, remote_name: &str, dest: &Path) -> Result<u64> {
        let url = self.download_url(remote_name);
        let exchange = self.send_with_retry(Method::GET, &url, None).await?;
        let elapsed = exchange.elapsed;
        let bytes = exchange.response.bytes().await.map_err(request_error)?;

        let mut partial = dest.as_os_str().to_owned();
        partial.push(".part");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, dest).await?;

        tracing::debug!(file = remote_name, size = bytes.len(), elapsed = ?elapsed, "Downloaded");
        Ok(bytes.len() as u64)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<String>,
    ) -> std::result::Result<Exchange, reqwest::Error> {
        tracing::debug!(%method, url, "Camera request");

        let mut request = self.http_client.request(method, url);
        if let Some(session_id) = &self.session_id {
            request = request.header("sessionid", session_id);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let start = Instant::now();
        let response = request.send().await?.error_for_status()?;
        let elapsed = start.elapsed();

        let device_time = response
            .headers()
            .get(DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(Exchange {
            response,
            elapsed,
            device_time,
        })
    }

    /// Send with retry logic
    ///
    /// Retries transient failures (connection, timeouts, 5xx) with exponential
    /// backoff, up to `http_retries` extra attempts.
    async fn send_with_retry(&self, method: Method, url: &str, body: Option<String>) -> Result<Exchange> {
        let mut delay = Duration::from_millis(500);
        let mut attempt = 0;

        loop {
            match self.send(method.clone(), url, body.clone()).await {
                Ok(exchange) => return Ok(exchange),
                Err(e) if is_retryable(&e) && attempt < self.config.http_retries => {
                    attempt += 1;
                    tracing::warn!(
                        url,
                        error = %e,
                        "Transient camera error, retrying (attempt {}/{}) in {:?}",
                        attempt + 1,
                        self.config.http_retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(request_error(e)),
            }
        }
    }
}

/// Check if a request error is worth retrying
fn is_retryable(error: &reqwest::Error) -> bool {
    error.is_timeout()
        || error.is_connect()
        || error.is_request()
        || error.status().is_some_and(|s| s.is_server_error())
}

fn request_error(error: reqwest::Error) -> Error {
    match error.status() {
        Some(status) => Error::Camera(format!("API error ({}): {}", status, error)),
        None => Error::Camera(format!("HTTP request failed: {}", error)),
    }
}

// ============================================
// Blocking wrapper
// ============================================

/// Synchronous wrapper for [`DdpaiClient`]
///
/// Owns a current-thread runtime so the polling loop can stay blocking.
pub struct DdpaiCamera {
    inner: DdpaiClient,
    runtime: tokio::runtime::Runtime,
}

impl DdpaiCamera {
    pub fn new(config: CameraConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Camera(format!("failed to create runtime: {}", e)))?;

        Ok(Self {
            inner: DdpaiClient::new(config)?,
            runtime,
        })
    }
}

impl Camera for DdpaiCamera {
    fn initiate(&mut self) -> Result<bool> {
        self.runtime.block_on(self.inner.initiate())
    }

    fn list_recordings(&mut self) -> Result<Vec<FrameItem>> {
        self.runtime.block_on(self.inner.list_recordings())
    }

    fn list_events(&mut self) -> Result<Vec<FrameItem>> {
        self.runtime.block_on(self.inner.list_events())
    }

    fn download(&mut self, remote_name: &str, dest: &Path) -> Result<u64> {
        self.runtime.block_on(self.inner.download(remote_name, dest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(offset: i64) -> DeviceClock {
        DeviceClock {
            utc_offset_secs: offset,
        }
    }

    #[test]
    fn test_decode_string_payload() {
        let body = r#"{"errcode":0,"data":"{\"acSessionId\":\"abc123\"}"}"#;
        let session: SessionData = decode_data(body).unwrap();
        assert_eq!(session.session_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_decode_object_payload() {
        let body = r#"{"errcode":0,"data":{"num":1,"file":[{"name":"a.mp4","starttime":"100","endtime":160}]}}"#;
        let listing: PlaybackList = decode_data(body).unwrap();
        assert_eq!(listing.num, 1);
        assert_eq!(listing.file[0].starttime.seconds(), Some(100));
        assert_eq!(listing.file[0].endtime.as_ref().unwrap().seconds(), Some(160));
    }

    #[test]
    fn test_decode_missing_data() {
        let err = decode_data::<SessionData>(r#"{"errcode":-3}"#).unwrap_err();
        assert!(err.to_string().contains("errcode -3"));
    }

    #[test]
    fn test_recordings_shifted_sorted_and_named() {
        let body = r#"{"data":{"num":2,"file":[
            {"name":"20200514120100_0060.mp4","starttime":1589464860,"endtime":1589464920},
            {"name":"20200514120000_0060.mp4","starttime":1589464800,"endtime":1589464860}
        ]}}"#;
        let listing: PlaybackList = decode_data(body).unwrap();

        let recordings = recordings_from_listing(listing.file, &clock(3600), "_T.jpg");

        assert_eq!(recordings[0].name, "20200514120000_0060.mp4");
        assert_eq!(
            recordings[0].thumbnail.as_deref(),
            Some("20200514120000_0060_T.jpg")
        );
        assert_eq!(recordings[0].start_time.timestamp(), 1_589_464_800 - 3600);
        assert_eq!(recordings[1].end_time.timestamp(), 1_589_464_920 - 3600);
    }

    #[test]
    fn test_recording_without_end_is_instant() {
        let files = vec![PlaybackFile {
            name: "a.mp4".to_string(),
            starttime: DeviceTimestamp::Number(1000),
            endtime: None,
        }];
        let recordings = recordings_from_listing(files, &clock(0), "_T.jpg");
        assert_eq!(recordings[0].start_time, recordings[0].end_time);
    }

    #[test]
    fn test_unreadable_start_is_skipped() {
        let files = vec![PlaybackFile {
            name: "a.mp4".to_string(),
            starttime: DeviceTimestamp::Text("soon".to_string()),
            endtime: None,
        }];
        assert!(recordings_from_listing(files, &clock(0), "_T.jpg").is_empty());
    }

    #[test]
    fn test_events_from_video_and_image() {
        let entries = vec![
            EventEntry {
                bvideoname: Some(String::new()),
                bstarttime: None,
                bendtime: None,
                imgname: Some("20200514120500_F.jpg".to_string()),
            },
            EventEntry {
                bvideoname: Some("20200514120000_0030_event.mp4".to_string()),
                bstarttime: Some(DeviceTimestamp::Number(1_589_457_600)),
                bendtime: Some(DeviceTimestamp::Text("1589457630".to_string())),
                imgname: None,
            },
            EventEntry {
                bvideoname: None,
                bstarttime: None,
                bendtime: None,
                imgname: None,
            },
        ];

        let events = events_from_listing(entries, &clock(0), "%Y%m%d%H%M%S");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name, "20200514120000_0030_event.mp4");
        assert_eq!(events[0].duration(), chrono::Duration::seconds(30));
        assert_eq!(events[1].name, "20200514120500_F.jpg");
        assert_eq!(
            events[1].start_time,
            Utc.with_ymd_and_hms(2020, 5, 14, 12, 5, 0).unwrap()
        );
    }

    #[test]
    fn test_urls() {
        let config = CameraConfig {
            address: "10.0.0.2".to_string(),
            ..Default::default()
        };
        let client = DdpaiClient::new(config).unwrap();
        assert_eq!(
            client.api_url(PLAYBACK_LIST_ACTION),
            "http://10.0.0.2:80/vcam/cmd.cgi?cmd=APP_PlaybackListReq"
        );
        assert_eq!(client.download_url("a b.mp4"), "http://10.0.0.2:80/a%20b.mp4");
    }

    #[test]
    fn test_unreachable_camera_is_not_available() {
        let config = CameraConfig {
            address: "127.0.0.1".to_string(),
            port: 9,
            http_retries: 0,
            timeout_secs: 2,
            ..Default::default()
        };
        let mut camera = DdpaiCamera::new(config).unwrap();
        assert!(!camera.initiate().unwrap());
    }
}
