// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The poll loop: owns the device session and the log watermark, and turns each scrape cycle
//! into gauge updates and forwarded log lines.
//!
//! A cycle never overlaps the next one and never ends the process. The only error [`Scraper::run`]
//! returns is a failed login before the first cycle.

use fritzbox::model::{DeviceDetails, DeviceKind, LanDevice, LanDevices, Logs, WlanDetails};
use fritzbox::{AuthError, Authenticator, Credentials, Device, Session, SessionId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{FetchError, ScrapeError};
use crate::log_file::LogFile;
use crate::metrics::{Labels, MetricsSink, Series};
use crate::sink::LogSink;
use crate::watermark::LogWatermark;

pub const SCRAPE_INTERVAL: Duration = Duration::from_secs(15);

/// Re-logins allowed per cycle when the device rejects the session.
pub const RELOGIN_RETRIES: u32 = 1;

/// `dev_type` label of devices whose details could not be read.
pub const UNKNOWN_DEV_TYPE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unauthenticated,
    Authenticated,
    CycleInProgress,
    AwaitingRelogin,
}

/// How a single scrape cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    Completed {
        devices: usize,
        forwarded_logs: usize,
    },
    /// No session could be established; nothing was fetched.
    AuthFailed(AuthError),
    /// The device list could not be fetched, even after a re-login where one applied.
    Abandoned(FetchError),
}

pub struct Scraper {
    device: Arc<dyn Device>,
    authenticator: Authenticator,
    session: Option<Session>,
    phase: Phase,
    watermark: LogWatermark,
    // Every series and label combination published last cycle, per device name.
    published: HashMap<String, Vec<(Series, Labels)>>,
    metrics: Arc<dyn MetricsSink>,
    log_sink: Option<Arc<dyn LogSink>>,
    log_file: Option<LogFile>,
}

impl Scraper {
    pub fn new(
        device: Arc<dyn Device>,
        credentials: Credentials,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Scraper {
            authenticator: Authenticator::new(device.clone(), credentials),
            device,
            session: None,
            phase: Phase::Unauthenticated,
            watermark: LogWatermark::new(),
            published: HashMap::new(),
            metrics,
            log_sink: None,
            log_file: None,
        }
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn with_log_file(mut self, file: LogFile) -> Self {
        self.log_file = Some(file);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn watermark(&self) -> &LogWatermark {
        &self.watermark
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    fn log_forwarding_enabled(&self) -> bool {
        self.log_sink.is_some() || self.log_file.is_some()
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("Scraper phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Logs in before the first cycle. A failure here points at a broken configuration.
    pub async fn authenticate_initial(&mut self) -> Result<(), ScrapeError> {
        info!("Logging in to the device");
        self.login().await.map(drop).map_err(ScrapeError::Startup)
    }

    /// Runs scrape cycles until `cancel` fires. The token is checked between cycles only.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), ScrapeError> {
        if self.session.is_none() {
            self.authenticate_initial().await?;
        }

        while !cancel.is_cancelled() {
            if let CycleOutcome::Completed {
                devices,
                forwarded_logs,
            } = self.scrape_once().await
            {
                debug!("Scraped {devices} devices, forwarded {forwarded_logs} log lines");
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(SCRAPE_INTERVAL) => {}
            }
        }

        info!("Scraper stopped");
        Ok(())
    }

    pub async fn scrape_once(&mut self) -> CycleOutcome {
        let sid = match self.ensure_session().await {
            Ok(sid) => sid,
            Err(e) => {
                warn!("Login failed, skipping scrape cycle: {e}");
                return CycleOutcome::AuthFailed(e);
            }
        };
        self.set_phase(Phase::CycleInProgress);

        let (list, sid) = match self.with_relogin(sid, fetch_lan_devices).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Abandoning scrape cycle: {e}");
                let phase = if self.session.is_some() {
                    Phase::Authenticated
                } else {
                    Phase::Unauthenticated
                };
                self.set_phase(phase);
                return CycleOutcome::Abandoned(e);
            }
        };

        for rejected in &list.rejected {
            warn!("Skipping device list entry: {rejected}");
        }
        for device in &list.devices {
            self.publish_device(&sid, device).await;
        }

        let forwarded_logs = if self.log_forwarding_enabled() {
            self.forward_logs(&sid).await
        } else {
            0
        };

        self.set_phase(Phase::Authenticated);
        CycleOutcome::Completed {
            devices: list.devices.len(),
            forwarded_logs,
        }
    }

    async fn login(&mut self) -> Result<SessionId, AuthError> {
        match self.authenticator.authenticate().await {
            Ok(session) => {
                debug!(
                    "Logged in, device block time was {}s",
                    session.block_time.as_secs()
                );
                let id = session.id.clone();
                self.session = Some(session);
                self.set_phase(Phase::Authenticated);
                Ok(id)
            }
            Err(e) => {
                self.session = None;
                self.set_phase(Phase::Unauthenticated);
                Err(e)
            }
        }
    }

    async fn ensure_session(&mut self) -> Result<SessionId, AuthError> {
        if let Some(session) = &self.session {
            return Ok(session.id.clone());
        }
        self.login().await
    }

    /// Runs `op`, logging in again and retrying when the device rejected the session.
    ///
    /// Returns the session the successful attempt used. On failure after a re-login, or on a
    /// session rejection, the session is dropped so the next cycle starts with a login.
    async fn with_relogin<T, F, Fut>(
        &mut self,
        mut sid: SessionId,
        op: F,
    ) -> Result<(T, SessionId), FetchError>
    where
        F: Fn(Arc<dyn Device>, SessionId) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut relogins = 0;
        loop {
            let error = match op(self.device.clone(), sid.clone()).await {
                Ok(value) => return Ok((value, sid)),
                Err(e) => e,
            };

            if relogins >= RELOGIN_RETRIES || !error.is_session_expiry() {
                if relogins > 0 || error.is_session_expiry() {
                    self.session = None;
                }
                return Err(error);
            }

            relogins += 1;
            warn!("Device rejected the session ({error}), logging in again");
            self.session = None;
            self.set_phase(Phase::AwaitingRelogin);
            sid = self.login().await.map_err(FetchError::Relogin)?;
            self.set_phase(Phase::CycleInProgress);
        }
    }

    async fn publish_device(&mut self, sid: &SessionId, device: &LanDevice) {
        let details = if device.online {
            match fetch_device_details(self.device.as_ref(), sid, &device.uid).await {
                Ok(details) => Some(details),
                Err(e) => {
                    warn!("Cannot read details of {}: {e}", device.name);
                    None
                }
            }
        } else {
            None
        };

        let dev_type = details
            .as_ref()
            .map_or(UNKNOWN_DEV_TYPE, |details| details.dev_type());
        let identity = Labels::identity(&device.name, &device.ip, &device.mac, dev_type);

        let mut values = vec![
            (Series::LanDeviceOnline, identity.clone(), flag(device.online)),
            (Series::LanDeviceActive, identity.clone(), flag(device.active)),
        ];
        if let Some(speed) = device.speed {
            values.push((Series::LanDeviceSpeed, identity.clone(), speed));
        }

        if let Some(details) = details {
            if let Some(shown) = details.name.as_deref().filter(|shown| *shown != device.name) {
                debug!("{} is shown as {shown} on the device", device.name);
            }
            match details.kind {
                DeviceKind::Wlan(wlan) => values.extend(wlan_values(&identity, &wlan)),
                DeviceKind::Lan(lan) => {
                    debug!("{} is wired to port {}", device.name, lan.port);
                    values.push((Series::LanDeviceEthernetSpeed, identity, lan.speed));
                }
                DeviceKind::Other(_) => {}
            }
        }

        self.publish(&device.name, values);
    }

    /// Sets `values` for one device and retracts the label combinations it published last
    /// cycle that are not part of them anymore.
    fn publish(&mut self, name: &str, values: Vec<(Series, Labels, f64)>) {
        let current: Vec<(Series, Labels)> = values
            .iter()
            .map(|(series, labels, _)| (*series, labels.clone()))
            .collect();

        if let Some(previous) = self.published.remove(name) {
            for (series, labels) in previous {
                if current.iter().any(|(s, l)| *s == series && *l == labels) {
                    continue;
                }
                debug!("Retracting {} of {name}", series.name());
                if let Err(e) = self.metrics.delete_gauge(series, &labels) {
                    warn!("Cannot retract old labels of {name}: {e}");
                }
            }
        }

        for (series, labels, value) in &values {
            self.set(*series, labels, *value);
        }
        self.published.insert(name.to_string(), current);
    }

    fn set(&self, series: Series, labels: &Labels, value: f64) {
        if let Err(e) = self.metrics.set_gauge(series, labels, value) {
            warn!("Cannot set {}: {e}", series.name());
        }
    }

    /// Forwards log lines newer than the watermark and returns how many there were.
    ///
    /// The watermark advances to the newest fetched line even when forwarding fails, so a
    /// line is never sent twice. Missed lines stay in the device's own log.
    async fn forward_logs(&mut self, sid: &SessionId) -> usize {
        let logs = match fetch_logs(self.device.as_ref(), sid).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!("Cannot read device log: {e}");
                return 0;
            }
        };
        for rejected in &logs.rejected {
            warn!("Skipping log line: {rejected}");
        }

        let unseen = self.watermark.filter_new(&logs.lines);
        if !unseen.is_empty() {
            if let Some(sink) = &self.log_sink {
                if let Err(e) = sink.push(&unseen).await {
                    warn!("Cannot forward {} log lines: {e}", unseen.len());
                }
            }
            if let Some(file) = &self.log_file {
                if let Err(e) = file.append(&unseen) {
                    warn!("Cannot append to {}: {e}", file.path().display());
                }
            }
        }

        self.watermark.advance(&logs.lines);
        debug!(
            "{} new log lines, watermark at {}",
            unseen.len(),
            self.watermark.last_forwarded()
        );
        unseen.len()
    }
}

fn wlan_values(identity: &Labels, wlan: &WlanDetails) -> Vec<(Series, Labels, f64)> {
    let tx = identity.with(&["tx"]);
    let rx = identity.with(&["rx"]);
    let info = identity.with(&[
        wlan.band.as_str(),
        wlan.standard.as_str(),
        wlan.encryption.as_str(),
    ]);
    vec![
        (Series::WlanDeviceSignal, identity.clone(), wlan.rssi),
        (Series::WlanDeviceSpeed, tx.clone(), wlan.speed_tx),
        (Series::WlanDeviceSpeedMax, tx, wlan.speed_tx_max),
        (Series::WlanDeviceSpeed, rx.clone(), wlan.speed_rx),
        (Series::WlanDeviceSpeedMax, rx, wlan.speed_rx_max),
        (Series::WlanDeviceInfo, info, 1.0),
    ]
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

async fn fetch_lan_devices(
    device: Arc<dyn Device>,
    sid: SessionId,
) -> Result<LanDevices, FetchError> {
    let body = device.lan_devices(&sid).await?;
    Ok(LanDevices::decode(&body)?)
}

async fn fetch_device_details(
    device: &dyn Device,
    sid: &SessionId,
    uid: &str,
) -> Result<DeviceDetails, FetchError> {
    let body = device.device_details(sid, uid).await?;
    Ok(DeviceDetails::decode(&body)?)
}

async fn fetch_logs(device: &dyn Device, sid: &SessionId) -> Result<Logs, FetchError> {
    let body = device.event_log(sid).await?;
    Ok(Logs::decode(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{LogSinkError, MetricsError};
    use async_trait::async_trait;
    use fritzbox::model::LogLine;
    use fritzbox::{ChallengeAnswer, ClientError};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;
    use tracing_test::traced_test;

    const LAN_LIST: &str = r#"{"network": [
        {"name": "phone", "ip": "192.168.178.20", "mac": "AA:BB:CC:00:11:22", "UID": "landevice1", "active": "1", "online": "1", "speed": "866"},
        {"name": "printer", "ip": "192.168.178.30", "mac": "AA:BB:CC:00:11:33", "UID": "landevice2", "active": "0", "online": "0", "speed": ""}
    ]}"#;

    const LAN_LIST_PHONE_GONE: &str = r#"{"network": [
        {"name": "phone", "ip": "192.168.178.20", "mac": "AA:BB:CC:00:11:22", "UID": "landevice1", "active": "0", "online": "0", "speed": ""},
        {"name": "printer", "ip": "192.168.178.30", "mac": "AA:BB:CC:00:11:33", "UID": "landevice2", "active": "0", "online": "0", "speed": ""}
    ]}"#;

    const LOGIN_PAGE: &str = r#"<!DOCTYPE html><html><body>Anmeldung</body></html>"#;

    fn wlan_details(band: &str) -> String {
        format!(
            r#"{{"data": {{"vars": {{"dev": {{
                "devType": "wlan",
                "wlan": {{
                    "show": [{{"rssi": "-58", "speed": "866", "speed_rx": "780", "speed_tx_max": "1200", "speed_rx_max": "1100"}}],
                    "devs": [{{"band": "{band}", "wlanStandard": "ax", "encryption": "WPA2"}}]
                }}
            }}}}}}}}"#
        )
    }

    const LOG_V1: &str = r#"{"data": {"log": [
        ["19.10.26", "12:10:00", "Anmeldung an der FRITZ!Box", "16", "1", "/help/help.lua?sid=1111111111111111&helppage=x"],
        ["19.10.26", "12:00:00", "WLAN-Gerät angemeldet", "701", "4", ""]
    ]}}"#;

    const LOG_V2: &str = r#"{"data": {"log": [
        ["19.10.26", "12:20:00", "WLAN-Gerät abgemeldet", "702", "4", ""],
        ["19.10.26", "12:10:00", "Anmeldung an der FRITZ!Box", "16", "1", "/help/help.lua?sid=1111111111111111&helppage=x"],
        ["19.10.26", "12:00:00", "WLAN-Gerät angemeldet", "701", "4", ""]
    ]}}"#;

    fn server_error(path: &'static str) -> ClientError {
        ClientError::Status {
            path,
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn session_info(sid: &str) -> String {
        format!(
            "<SessionInfo><SID>{sid}</SID><Challenge>abc123</Challenge><BlockTime>0</BlockTime></SessionInfo>"
        )
    }

    /// Device that hands out a fresh session on every login and replays scripted answers.
    ///
    /// Scripted queues keep replaying their last entry once drained.
    #[derive(Default)]
    struct FakeDevice {
        logins: Mutex<u32>,
        refuse_logins: Mutex<u32>,
        lan: Mutex<VecDeque<Result<String, u16>>>,
        lan_sids: Mutex<Vec<String>>,
        details: Mutex<HashMap<String, VecDeque<String>>>,
        log: Mutex<VecDeque<String>>,
    }

    impl FakeDevice {
        fn new() -> Self {
            let device = FakeDevice::default();
            device.lan.lock().unwrap().push_back(Ok(LAN_LIST.to_string()));
            device.script_details("landevice1", &[wlan_details("5 GHz").as_str()]);
            device
        }

        fn script_lan(&self, replies: Vec<Result<&str, u16>>) {
            *self.lan.lock().unwrap() = replies
                .into_iter()
                .map(|r| r.map(str::to_string))
                .collect();
        }

        fn script_details(&self, uid: &str, bodies: &[&str]) {
            self.details.lock().unwrap().insert(
                uid.to_string(),
                bodies.iter().map(|b| b.to_string()).collect(),
            );
        }

        fn script_log(&self, bodies: &[&str]) {
            *self.log.lock().unwrap() = bodies.iter().map(|b| b.to_string()).collect();
        }

        fn refuse_next_logins(&self, count: u32) {
            *self.refuse_logins.lock().unwrap() = count;
        }

        fn logins(&self) -> u32 {
            *self.logins.lock().unwrap()
        }

        fn lan_sids(&self) -> Vec<String> {
            self.lan_sids.lock().unwrap().clone()
        }
    }

    fn next_or_last<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    #[async_trait]
    impl Device for FakeDevice {
        async fn login(&self, answer: Option<&ChallengeAnswer>) -> Result<String, ClientError> {
            let mut refuse = self.refuse_logins.lock().unwrap();
            if *refuse > 0 {
                if answer.is_some() {
                    *refuse -= 1;
                }
                return Ok(session_info(SessionId::SENTINEL));
            }
            let mut logins = self.logins.lock().unwrap();
            *logins += 1;
            Ok(session_info(&format!("{:016x}", *logins)))
        }

        async fn lan_devices(&self, sid: &SessionId) -> Result<String, ClientError> {
            self.lan_sids.lock().unwrap().push(sid.as_str().to_string());
            match next_or_last(&mut self.lan.lock().unwrap()) {
                Some(Ok(body)) => Ok(body),
                Some(Err(status)) => Err(ClientError::Status {
                    path: "query.lua",
                    status: reqwest::StatusCode::from_u16(status).unwrap(),
                }),
                None => Err(server_error("query.lua")),
            }
        }

        async fn device_details(&self, _sid: &SessionId, uid: &str) -> Result<String, ClientError> {
            self.details
                .lock()
                .unwrap()
                .get_mut(uid)
                .and_then(next_or_last)
                .ok_or_else(|| server_error("data.lua"))
        }

        async fn event_log(&self, _sid: &SessionId) -> Result<String, ClientError> {
            next_or_last(&mut self.log.lock().unwrap()).ok_or_else(|| server_error("data.lua"))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Set(Series, Labels, f64),
        Delete(Series, Labels),
    }

    #[derive(Default)]
    struct RecordingMetrics {
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingMetrics {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }

        fn value(&self, series: Series, labels: &Labels) -> Option<f64> {
            self.calls().into_iter().rev().find_map(|call| match call {
                Call::Set(s, l, v) if s == series && l == *labels => Some(v),
                _ => None,
            })
        }
    }

    impl MetricsSink for RecordingMetrics {
        fn set_gauge(&self, series: Series, labels: &Labels, value: f64) -> Result<(), MetricsError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Set(series, labels.clone(), value));
            Ok(())
        }

        fn delete_gauge(&self, series: Series, labels: &Labels) -> Result<(), MetricsError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Delete(series, labels.clone()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingLogSink {
        fail: bool,
        batches: Mutex<Vec<Vec<LogLine>>>,
    }

    impl RecordingLogSink {
        fn failing() -> Self {
            RecordingLogSink {
                fail: true,
                ..Default::default()
            }
        }

        fn batches(&self) -> Vec<Vec<LogLine>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LogSink for RecordingLogSink {
        async fn push(&self, lines: &[LogLine]) -> Result<(), LogSinkError> {
            self.batches.lock().unwrap().push(lines.to_vec());
            if self.fail {
                return Err(LogSinkError::Push(loki::PushError::Destination {
                    attempts: 3,
                    message: "503 Service Unavailable".to_string(),
                }));
            }
            Ok(())
        }
    }

    struct Harness {
        device: Arc<FakeDevice>,
        metrics: Arc<RecordingMetrics>,
        scraper: Scraper,
    }

    fn harness(device: FakeDevice) -> Harness {
        let device = Arc::new(device);
        let metrics = Arc::new(RecordingMetrics::default());
        let scraper = Scraper::new(
            device.clone(),
            Credentials::new("admin", "secret"),
            metrics.clone(),
        );
        Harness {
            device,
            metrics,
            scraper,
        }
    }

    fn phone(dev_type: &str) -> Labels {
        Labels::identity("phone", "192.168.178.20", "AA:BB:CC:00:11:22", dev_type)
    }

    fn printer() -> Labels {
        Labels::identity(
            "printer",
            "192.168.178.30",
            "AA:BB:CC:00:11:33",
            UNKNOWN_DEV_TYPE,
        )
    }

    #[tokio::test]
    async fn test_cycle_publishes_device_gauges() {
        let mut h = harness(FakeDevice::new());

        let outcome = h.scraper.scrape_once().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Completed {
                devices: 2,
                forwarded_logs: 0
            }
        ));
        assert_eq!(h.scraper.phase(), Phase::Authenticated);

        let wlan = phone("wlan");
        assert_eq!(h.metrics.value(Series::LanDeviceOnline, &wlan), Some(1.0));
        assert_eq!(h.metrics.value(Series::LanDeviceSpeed, &wlan), Some(866.0));
        assert_eq!(h.metrics.value(Series::WlanDeviceSignal, &wlan), Some(-58.0));
        assert_eq!(
            h.metrics.value(Series::WlanDeviceSpeed, &wlan.with(&["rx"])),
            Some(780.0)
        );
        assert_eq!(
            h.metrics.value(Series::WlanDeviceSpeedMax, &wlan.with(&["tx"])),
            Some(1200.0)
        );
        assert_eq!(
            h.metrics.value(
                Series::WlanDeviceInfo,
                &wlan.with(&["5 GHz", "ax", "WPA2"])
            ),
            Some(1.0)
        );

        // Offline devices are not queried for details and carry no speed.
        assert_eq!(h.metrics.value(Series::LanDeviceOnline, &printer()), Some(0.0));
        assert_eq!(h.metrics.value(Series::LanDeviceActive, &printer()), Some(0.0));
        assert_eq!(h.metrics.value(Series::LanDeviceSpeed, &printer()), None);
    }

    #[tokio::test]
    async fn test_session_is_reused_across_cycles() {
        let mut h = harness(FakeDevice::new());
        h.scraper.scrape_once().await;
        h.scraper.scrape_once().await;

        assert_eq!(h.device.logins(), 1);
        assert_eq!(
            h.device.lan_sids(),
            vec!["0000000000000001", "0000000000000001"]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_detail_failure_keeps_baseline_gauges() {
        let device = FakeDevice::new();
        device.details.lock().unwrap().clear();
        let mut h = harness(device);

        let outcome = h.scraper.scrape_once().await;
        assert!(matches!(outcome, CycleOutcome::Completed { devices: 2, .. }));

        let unknown = phone(UNKNOWN_DEV_TYPE);
        assert_eq!(h.metrics.value(Series::LanDeviceOnline, &unknown), Some(1.0));
        assert_eq!(h.metrics.value(Series::LanDeviceActive, &unknown), Some(1.0));
        assert_eq!(h.metrics.value(Series::LanDeviceSpeed, &unknown), Some(866.0));
        assert!(!h
            .metrics
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Set(Series::WlanDeviceSignal, ..))));
        assert!(logs_contain("Cannot read details of phone"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_wired_device_publishes_link_speed() {
        let device = FakeDevice::new();
        device.script_details(
            "landevice1",
            &[r#"{"data": {"vars": {"dev": {
                "devType": "lan",
                "name": {"displayName": "living room phone"},
                "topology": {"path": {"path": [
                    {"device": {"name": "fritz.box"}},
                    {"device": {"ethernetport": "LAN 2", "speed": "1000"}}
                ]}}
            }}}}"#],
        );
        let mut h = harness(device);

        h.scraper.scrape_once().await;

        assert_eq!(
            h.metrics.value(Series::LanDeviceEthernetSpeed, &phone("lan")),
            Some(1000.0)
        );
        assert!(logs_contain("phone is wired to port LAN 2"));
        assert!(logs_contain("phone is shown as living room phone on the device"));
        assert!(logs_contain("Logged in, device block time was 0s"));
    }

    #[tokio::test]
    async fn test_relogin_once_then_complete() {
        let device = FakeDevice::new();
        device.script_lan(vec![Ok(LOGIN_PAGE), Ok(LAN_LIST)]);
        let mut h = harness(device);

        let outcome = h.scraper.scrape_once().await;

        assert!(matches!(outcome, CycleOutcome::Completed { devices: 2, .. }));
        assert_eq!(h.device.logins(), 2);
        // The retry and every later request use the refreshed session.
        assert_eq!(
            h.device.lan_sids(),
            vec!["0000000000000001", "0000000000000002"]
        );
        assert_eq!(h.scraper.phase(), Phase::Authenticated);
        assert!(h.scraper.has_session());
    }

    #[tokio::test]
    async fn test_forbidden_status_triggers_relogin() {
        let device = FakeDevice::new();
        device.script_lan(vec![Err(403), Ok(LAN_LIST)]);
        let mut h = harness(device);

        let outcome = h.scraper.scrape_once().await;

        assert!(matches!(outcome, CycleOutcome::Completed { .. }));
        assert_eq!(h.device.logins(), 2);
    }

    #[tokio::test]
    async fn test_relogin_is_attempted_only_once() {
        let device = FakeDevice::new();
        device.script_lan(vec![Ok(LOGIN_PAGE)]);
        let mut h = harness(device);

        let outcome = h.scraper.scrape_once().await;

        assert!(matches!(
            outcome,
            CycleOutcome::Abandoned(FetchError::Decode(_))
        ));
        assert_eq!(h.device.logins(), 2);
        assert_eq!(h.device.lan_sids().len(), 2);
        assert_eq!(h.scraper.phase(), Phase::Unauthenticated);
        assert!(!h.scraper.has_session());

        // The next cycle starts with a fresh login.
        h.device.script_lan(vec![Ok(LAN_LIST)]);
        let outcome = h.scraper.scrape_once().await;
        assert!(matches!(outcome, CycleOutcome::Completed { .. }));
        assert_eq!(h.device.logins(), 3);
    }

    #[tokio::test]
    async fn test_failed_relogin_abandons_cycle() {
        let device = FakeDevice::new();
        device.script_lan(vec![Ok(LOGIN_PAGE), Ok(LAN_LIST)]);
        let mut h = harness(device);
        h.scraper.authenticate_initial().await.unwrap();
        h.device.refuse_next_logins(1);

        let outcome = h.scraper.scrape_once().await;

        assert!(matches!(
            outcome,
            CycleOutcome::Abandoned(FetchError::Relogin(AuthError::InvalidCredentials))
        ));
        assert_eq!(h.device.lan_sids().len(), 1);
        assert_eq!(h.scraper.phase(), Phase::Unauthenticated);
        assert!(h.metrics.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_device_keeps_session() {
        let device = FakeDevice::new();
        device.script_lan(vec![Err(502), Ok(LAN_LIST)]);
        let mut h = harness(device);

        let outcome = h.scraper.scrape_once().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Abandoned(FetchError::Client(_))
        ));
        assert_eq!(h.device.logins(), 1);
        assert!(h.scraper.has_session());
        assert_eq!(h.scraper.phase(), Phase::Authenticated);

        let outcome = h.scraper.scrape_once().await;
        assert!(matches!(outcome, CycleOutcome::Completed { .. }));
        assert_eq!(h.device.logins(), 1);
    }

    #[tokio::test]
    async fn test_login_failure_skips_queries() {
        let device = FakeDevice::new();
        device.refuse_next_logins(1);
        let mut h = harness(device);

        let outcome = h.scraper.scrape_once().await;

        assert!(matches!(
            outcome,
            CycleOutcome::AuthFailed(AuthError::InvalidCredentials)
        ));
        assert!(h.device.lan_sids().is_empty());
        assert_eq!(h.scraper.phase(), Phase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_changed_band_retracts_previous_labels_once() {
        let device = FakeDevice::new();
        let (slow, fast) = (wlan_details("2.4 GHz"), wlan_details("5 GHz"));
        device.script_details("landevice1", &[slow.as_str(), fast.as_str()]);
        let mut h = harness(device);
        let old = phone("wlan").with(&["2.4 GHz", "ax", "WPA2"]);
        let new = phone("wlan").with(&["5 GHz", "ax", "WPA2"]);

        h.scraper.scrape_once().await;
        assert!(!h
            .metrics
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Delete(..))));
        h.metrics.clear();

        h.scraper.scrape_once().await;
        let info_calls: Vec<Call> = h
            .metrics
            .calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    Call::Set(Series::WlanDeviceInfo, ..) | Call::Delete(Series::WlanDeviceInfo, _)
                )
            })
            .collect();
        assert_eq!(
            info_calls,
            vec![
                Call::Delete(Series::WlanDeviceInfo, old),
                Call::Set(Series::WlanDeviceInfo, new.clone(), 1.0),
            ]
        );

        // Unchanged labels are not retracted.
        h.metrics.clear();
        h.scraper.scrape_once().await;
        assert!(!h
            .metrics
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Delete(..))));
        assert_eq!(h.metrics.value(Series::WlanDeviceInfo, &new), Some(1.0));
    }

    #[tokio::test]
    async fn test_device_going_offline_retracts_its_online_series() {
        let mut h = harness(FakeDevice::new());
        h.scraper.scrape_once().await;
        h.metrics.clear();

        h.device.script_lan(vec![Ok(LAN_LIST_PHONE_GONE)]);
        h.scraper.scrape_once().await;

        let wlan = phone("wlan");
        let deleted: Vec<(Series, Labels)> = h
            .metrics
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete(series, labels) => Some((series, labels)),
                Call::Set(..) => None,
            })
            .collect();
        assert_eq!(
            deleted,
            vec![
                (Series::LanDeviceOnline, wlan.clone()),
                (Series::LanDeviceActive, wlan.clone()),
                (Series::LanDeviceSpeed, wlan.clone()),
                (Series::WlanDeviceSignal, wlan.clone()),
                (Series::WlanDeviceSpeed, wlan.with(&["tx"])),
                (Series::WlanDeviceSpeedMax, wlan.with(&["tx"])),
                (Series::WlanDeviceSpeed, wlan.with(&["rx"])),
                (Series::WlanDeviceSpeedMax, wlan.with(&["rx"])),
                (Series::WlanDeviceInfo, wlan.with(&["5 GHz", "ax", "WPA2"])),
            ]
        );
        let unknown = phone(UNKNOWN_DEV_TYPE);
        assert_eq!(h.metrics.value(Series::LanDeviceOnline, &unknown), Some(0.0));
        assert_eq!(h.metrics.value(Series::LanDeviceSpeed, &unknown), None);

        // Coming back online retracts the offline combination in turn.
        h.metrics.clear();
        h.device.script_lan(vec![Ok(LAN_LIST)]);
        h.scraper.scrape_once().await;
        assert!(h
            .metrics
            .calls()
            .contains(&Call::Delete(Series::LanDeviceOnline, unknown)));
        assert_eq!(h.metrics.value(Series::LanDeviceOnline, &wlan), Some(1.0));
    }

    #[tokio::test]
    async fn test_offline_device_leaves_no_stale_exposition() {
        let device = Arc::new(FakeDevice::new());
        let metrics = Arc::new(crate::metrics::PrometheusSink::new().unwrap());
        let mut scraper = Scraper::new(
            device.clone(),
            Credentials::new("admin", "secret"),
            metrics.clone(),
        );

        scraper.scrape_once().await;
        assert!(metrics.render().unwrap().contains(r#"dev_type="wlan""#));

        device.script_lan(vec![Ok(LAN_LIST_PHONE_GONE)]);
        scraper.scrape_once().await;

        let text = metrics.render().unwrap();
        assert!(!text.contains(r#"dev_type="wlan""#), "{text}");
        assert!(text.contains(
            r#"fritzbox_lan_devices_online{dev_type="unknown",ip="192.168.178.20",mac="AA:BB:CC:00:11:22",name="phone"} 0"#
        ));
    }

    #[tokio::test]
    async fn test_logs_are_not_fetched_without_destination() {
        let device = FakeDevice::new();
        device.script_log(&[LOG_V1]);
        let mut h = harness(device);

        h.scraper.scrape_once().await;
        assert_eq!(
            h.scraper.watermark().last_forwarded(),
            LogWatermark::new().last_forwarded()
        );
    }

    #[tokio::test]
    async fn test_first_run_backlog_then_only_new_lines() {
        let device = FakeDevice::new();
        device.script_log(&[LOG_V1, LOG_V1, LOG_V2]);
        let sink = Arc::new(RecordingLogSink::default());
        let mut h = harness(device);
        h.scraper = h.scraper.with_log_sink(sink.clone());

        let outcome = h.scraper.scrape_once().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Completed {
                forwarded_logs: 2,
                ..
            }
        ));
        let newest = Logs::decode(LOG_V1).unwrap().lines[0].timestamp;
        assert_eq!(h.scraper.watermark().last_forwarded(), newest);

        // Same batch again: nothing new.
        let outcome = h.scraper.scrape_once().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Completed {
                forwarded_logs: 0,
                ..
            }
        ));

        h.scraper.scrape_once().await;
        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        let first: Vec<&str> = batches[0].iter().map(|l| l.message.as_str()).collect();
        assert_eq!(
            first,
            vec!["WLAN-Gerät angemeldet", "Anmeldung an der FRITZ!Box"]
        );
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1][0].message, "WLAN-Gerät abgemeldet");

        for line in batches.iter().flatten() {
            assert!(!line.help_url.contains("1111111111111111"));
        }
    }

    #[tokio::test]
    async fn test_failed_forward_still_advances_watermark() {
        let device = FakeDevice::new();
        device.script_log(&[LOG_V1]);
        let sink = Arc::new(RecordingLogSink::failing());
        let mut h = harness(device);
        h.scraper = h.scraper.with_log_sink(sink.clone());

        h.scraper.scrape_once().await;
        h.scraper.scrape_once().await;

        assert_eq!(sink.batches().len(), 1);
        assert_eq!(
            h.scraper.watermark().last_forwarded(),
            Logs::decode(LOG_V1).unwrap().lines[0].timestamp
        );
    }

    #[tokio::test]
    async fn test_log_failure_does_not_abort_cycle() {
        let device = FakeDevice::new();
        device.script_log(&[r#"{"data": {}}"#]);
        let sink = Arc::new(RecordingLogSink::default());
        let mut h = harness(device);
        h.scraper = h.scraper.with_log_sink(sink.clone());

        let outcome = h.scraper.scrape_once().await;

        assert!(matches!(
            outcome,
            CycleOutcome::Completed {
                devices: 2,
                forwarded_logs: 0
            }
        ));
        assert_eq!(h.device.logins(), 1);
        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn test_log_file_receives_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fritz.log");
        let device = FakeDevice::new();
        device.script_log(&[LOG_V1, LOG_V2]);
        let mut h = harness(device);
        h.scraper = h.scraper.with_log_file(LogFile::new(&path));

        h.scraper.scrape_once().await;
        h.scraper.scrape_once().await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.lines().last().unwrap().contains("WLAN-Gerät abgemeldet"));
    }

    #[tokio::test]
    async fn test_initial_login_failure_stops_run() {
        let device = FakeDevice::new();
        device.refuse_next_logins(1);
        let mut h = harness(device);

        let result = h.scraper.run(CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(ScrapeError::Startup(AuthError::InvalidCredentials))
        ));
        assert!(h.device.lan_sids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_paces_cycles_until_cancelled() {
        let mut h = harness(FakeDevice::new());
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let start = Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(SCRAPE_INTERVAL * 2 + Duration::from_secs(1)).await;
            stopper.cancel();
        });
        h.scraper.run(cancel).await.unwrap();

        // Cycles at 0s, 15s and 30s; cancellation at 31s ends the third sleep.
        assert_eq!(h.device.lan_sids().len(), 3);
        assert_eq!(start.elapsed().as_secs(), 31);
    }

    #[tokio::test]
    async fn test_cancelled_run_does_not_scrape() {
        let mut h = harness(FakeDevice::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        h.scraper.run(cancel).await.unwrap();
        assert_eq!(h.device.logins(), 1);
        assert!(h.device.lan_sids().is_empty());
    }
}
