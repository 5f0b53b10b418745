//! RDS rotation engine.
//!
//! PS and RadioText rotate on independent cadences in two tasks spawned by
//! [`RotationEngine::spawn`]. The chip holds a single PS slot (message
//! count 1), so PS rotation happens here: each step renders the current
//! entry and loads slot 0 only when the rendered text differs from what the
//! chip already holds.
//!
//! RadioText follows these A/B rules:
//!
//! - `auto`: the bank flips when the *template* changes. Macros are
//!   expanded afterwards, so `{time}` refreshing the text does not flip it.
//! - `legacy`: the bank flips on every scheduled transmission.
//! - `bank`: the configured bank is used; switching it flips.
//!
//! A flip (or a template change in `bank` mode) is sent as a burst of
//! `repeats` loads spaced `gap_ms` apart. Unchanged text is not re-sent.
//!
//! A failed write is logged and retried on the next tick without advancing,
//! so a stalled bus delays rotation but never skips an entry.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use tokio::io::AsyncReadExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use picast_core::config::RtConfig;
use picast_core::error::Result;
use picast_core::events::TxEvent;
use picast_core::helpers::{center_fixed, collapse_whitespace, pad_fixed};
use picast_core::limits::{PS_LEN, RT_LEN};
use picast_core::transmitter::Transmitter;
use picast_core::types::{AbMode, RtBank, RtSource};

/// How often the RT override file's mtime is checked.
pub const FILE_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Bytes read from the RT override file.
const FILE_READ_LIMIT: u64 = 8 * 1024;

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

/// Values the text macros draw from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StationInfo {
    /// Name the active configuration was applied under (often a path).
    pub config_name: String,
    pub frequency_khz: u32,
    pub power: u8,
}

/// Expand `{time}`, `{date}`, `{datetime}`, `{config}`, `{freq}` and
/// `{power}` (case-insensitive). Unknown tokens are left as they are.
///
/// # Example
///
/// ```
/// use chrono::{Local, TimeZone};
/// use picast_manager::rotation::{expand_macros, StationInfo};
///
/// let station = StationInfo {
///     config_name: "/etc/picast/morning.json".into(),
///     frequency_khz: 98_700,
///     power: 115,
/// };
/// let now = Local.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
/// assert_eq!(
///     expand_macros("{config} {FREQ} at {time}", &station, &now),
///     "morning 98.70 at 07:08"
/// );
/// ```
pub fn expand_macros(template: &str, station: &StationInfo, now: &DateTime<Local>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let token = &after[..close];
        match token.to_ascii_lowercase().as_str() {
            "time" => out.push_str(&now.format("%H:%M").to_string()),
            "date" => out.push_str(&now.format("%Y-%m-%d").to_string()),
            "datetime" => out.push_str(&now.format("%Y-%m-%d %H:%M:%S").to_string()),
            "config" => out.push_str(&config_label(&station.config_name)),
            "freq" => out.push_str(&format!("{:.2}", f64::from(station.frequency_khz) / 1_000.0)),
            "power" => out.push_str(&station.power.to_string()),
            _ => {
                out.push('{');
                out.push_str(token);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn config_label(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

/// Remove every case-insensitive occurrence of each skip word, then
/// collapse the whitespace left behind.
pub fn strip_skip_words(text: &str, skip_words: &[String]) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    for word in skip_words {
        let needle: Vec<char> = word.chars().map(fold).collect();
        if needle.is_empty() {
            continue;
        }
        let mut i = 0;
        while i + needle.len() <= chars.len() {
            let hit = chars[i..i + needle.len()]
                .iter()
                .zip(&needle)
                .all(|(c, n)| fold(*c) == *n);
            if hit {
                chars.drain(i..i + needle.len());
            } else {
                i += 1;
            }
        }
    }
    collapse_whitespace(&chars.into_iter().collect::<String>())
}

fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

// ---------------------------------------------------------------------------
// PS rotation
// ---------------------------------------------------------------------------

/// PS rotation settings as the engine consumes them.
#[derive(Debug, Clone, PartialEq)]
pub struct PsSettings {
    pub entries: Vec<String>,
    pub center: bool,
    pub interval: Duration,
}

/// PS slot rotation over a fixed list.
#[derive(Debug)]
pub struct PsRotation {
    entries: Vec<String>,
    center: bool,
    index: usize,
    /// Text currently held in chip slot 0, if known.
    latched: Option<String>,
}

impl PsRotation {
    pub fn new(entries: Vec<String>, center: bool) -> Self {
        PsRotation {
            entries,
            center,
            index: 0,
            latched: None,
        }
    }

    /// Replace the list. Returns `true` and restarts at entry 0 when
    /// anything changed.
    pub fn reconfigure(&mut self, entries: Vec<String>, center: bool) -> bool {
        if entries == self.entries && center == self.center {
            return false;
        }
        self.entries = entries;
        self.center = center;
        self.index = 0;
        true
    }

    /// Step to the next entry, wrapping at the end.
    pub fn advance(&mut self) {
        if !self.entries.is_empty() {
            self.index = (self.index + 1) % self.entries.len();
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Render the current entry to exactly 8 characters.
    pub fn render_current(&self, station: &StationInfo, now: &DateTime<Local>) -> Option<String> {
        let template = self.entries.get(self.index)?;
        let text: String = expand_macros(template, station, now)
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        Some(if self.center {
            center_fixed(&text, PS_LEN)
        } else {
            pad_fixed(&text, PS_LEN)
        })
    }

    /// Load the current entry if the chip holds something else. Returns the
    /// text written, if any.
    pub async fn tick(
        &mut self,
        tx: &dyn Transmitter,
        station: &StationInfo,
        now: &DateTime<Local>,
    ) -> Result<Option<String>> {
        let Some(text) = self.render_current(station, now) else {
            return Ok(None);
        };
        if self.latched.as_ref() == Some(&text) {
            return Ok(None);
        }
        tx.rds_set_ps(0, &text).await?;
        self.latched = Some(text.clone());
        Ok(Some(text))
    }

    /// Forget what the chip holds; the next tick writes unconditionally.
    pub fn invalidate(&mut self) {
        self.latched = None;
    }
}

// ---------------------------------------------------------------------------
// RT rotation
// ---------------------------------------------------------------------------

/// One RadioText transmission decided by [`RtRotation::plan`].
#[derive(Debug, Clone, PartialEq)]
pub struct RtPlan {
    /// Expanded, filtered text, at most 32 characters.
    pub text: String,
    pub bank: RtBank,
    pub source: RtSource,
    /// Number of loads: `repeats` for a burst, 1 for a same-bank refresh.
    pub sends: u32,
    pub cr_terminate: bool,
    template: String,
}

impl RtPlan {
    pub fn is_burst(&self) -> bool {
        self.sends > 1
    }
}

#[derive(Debug, Default)]
struct FileOverride {
    mtime: Option<SystemTime>,
    /// First non-empty line, whitespace collapsed.
    line: Option<String>,
}

/// RadioText rotation with file override and A/B banking.
#[derive(Debug)]
pub struct RtRotation {
    cfg: RtConfig,
    index: usize,
    file: FileOverride,
    bank: RtBank,
    last_template: Option<String>,
    last_sent: Option<String>,
}

impl RtRotation {
    pub fn new(cfg: RtConfig) -> Self {
        // Auto and legacy flip before the first send, so the first message
        // goes out on A.
        let bank = match cfg.ab_mode {
            AbMode::Bank => cfg.bank.map(RtBank::from_bit).unwrap_or(RtBank::A),
            AbMode::Auto | AbMode::Legacy => RtBank::B,
        };
        RtRotation {
            cfg,
            index: 0,
            file: FileOverride::default(),
            bank,
            last_template: None,
            last_sent: None,
        }
    }

    /// Adopt new settings. The list index restarts when the list changes;
    /// the file is re-read when its path changes.
    pub fn reconfigure(&mut self, cfg: RtConfig) {
        if cfg.texts != self.cfg.texts {
            self.index = 0;
        }
        if cfg.file_path != self.cfg.file_path {
            self.file = FileOverride::default();
        }
        self.cfg = cfg;
    }

    /// Step to the next list entry. No-op while the file override is active.
    pub fn advance(&mut self) {
        if self.file.line.is_none() && !self.cfg.texts.is_empty() {
            self.index = (self.index + 1) % self.cfg.texts.len();
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn bank(&self) -> RtBank {
        self.bank
    }

    pub fn config(&self) -> &RtConfig {
        &self.cfg
    }

    /// Re-read the override file if its mtime changed. Returns `true` when
    /// the effective file text changed. A missing or unreadable file hands
    /// control back to the list.
    pub async fn poll_file(&mut self) -> bool {
        let Some(path) = self.cfg.file_path.clone() else {
            return false;
        };
        let mtime = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|m| m.modified().ok());

        let Some(mtime) = mtime else {
            self.file.mtime = None;
            if self.file.line.take().is_some() {
                tracing::info!(path = %path.display(), "RT file gone, falling back to list");
                return true;
            }
            return false;
        };
        if self.file.mtime == Some(mtime) {
            return false;
        }
        self.file.mtime = Some(mtime);

        let line = read_first_line(&path).await;
        if line == self.file.line {
            return false;
        }
        match &line {
            Some(text) => tracing::info!(path = %path.display(), text = %text, "RT file updated"),
            None => tracing::info!(path = %path.display(), "RT file empty, falling back to list"),
        }
        self.file.line = line;
        true
    }

    fn current(&self) -> (&str, RtSource) {
        if let Some(line) = &self.file.line {
            return (line, RtSource::File);
        }
        match self.cfg.texts.get(self.index) {
            Some(entry) => (entry, RtSource::List(self.index)),
            None => (&self.cfg.text, RtSource::Text),
        }
    }

    /// Decide what, if anything, to send now. `scheduled` marks a rotation
    /// step, which is when `legacy` mode retransmits.
    pub fn plan(&self, station: &StationInfo, now: &DateTime<Local>, scheduled: bool) -> Option<RtPlan> {
        let (template, source) = self.current();
        let expanded = expand_macros(template, station, now);
        let text: String = strip_skip_words(&expanded, &self.cfg.skip_words)
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .take(RT_LEN)
            .collect();

        let template_changed = self.last_template.as_deref() != Some(template);
        let (bank, burst) = match self.cfg.ab_mode {
            AbMode::Auto if template_changed => (self.bank.flip(), true),
            AbMode::Auto => (self.bank, false),
            AbMode::Legacy if template_changed || scheduled => (self.bank.flip(), true),
            AbMode::Legacy => (self.bank, false),
            AbMode::Bank => {
                let want = self.cfg.bank.map(RtBank::from_bit).unwrap_or(self.bank);
                (want, template_changed || want != self.bank)
            }
        };

        let sends = if burst {
            self.cfg.repeats.max(1)
        } else if self.last_sent.as_deref() != Some(text.as_str()) {
            1
        } else {
            return None;
        };

        Some(RtPlan {
            text,
            bank,
            source,
            sends,
            cr_terminate: self.cfg.center,
            template: template.to_string(),
        })
    }

    /// Record a plan as on air.
    pub fn commit(&mut self, plan: &RtPlan) {
        self.bank = plan.bank;
        self.last_template = Some(plan.template.clone());
        self.last_sent = Some(plan.text.clone());
    }

    /// Plan, transmit and commit. Burst loads are spaced by `gap_ms`.
    /// Nothing is committed when a load fails, so the next tick retries
    /// with the same bank.
    pub async fn tick(
        &mut self,
        tx: &dyn Transmitter,
        station: &StationInfo,
        scheduled: bool,
    ) -> Result<Option<RtPlan>> {
        let Some(plan) = self.plan(station, &Local::now(), scheduled) else {
            return Ok(None);
        };
        for n in 0..plan.sends {
            if n > 0 {
                tokio::time::sleep(self.cfg.gap()).await;
            }
            tx.rds_set_rt(&plan.text, plan.bank, plan.cr_terminate).await?;
        }
        self.commit(&plan);
        Ok(Some(plan))
    }

    /// Forget what is on air; the next tick sends a fresh burst.
    pub fn invalidate(&mut self) {
        self.last_template = None;
        self.last_sent = None;
    }
}

async fn read_first_line(path: &Path) -> Option<String> {
    let file = tokio::fs::File::open(path).await.ok()?;
    let mut raw = Vec::new();
    if let Err(e) = file.take(FILE_READ_LIMIT).read_to_end(&mut raw).await {
        tracing::warn!(path = %path.display(), error = %e, "RT file read failed");
        return None;
    }
    let text = String::from_utf8_lossy(&raw);
    text.lines()
        .map(collapse_whitespace)
        .find(|line| !line.is_empty())
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Spawns the PS and RT rotation tasks.
pub struct RotationEngine;

impl RotationEngine {
    /// Start rotating. With `paused`, nothing is written until
    /// [`RotationHandle::set_paused`] releases it.
    pub fn spawn(
        tx: Arc<dyn Transmitter>,
        ps: PsSettings,
        rt: RtConfig,
        station: StationInfo,
        events: broadcast::Sender<TxEvent>,
        paused: bool,
    ) -> RotationHandle {
        let (ps_tx, ps_rx) = watch::channel(ps);
        let (rt_tx, rt_rx) = watch::channel(rt);
        let (station_tx, station_rx) = watch::channel(station);
        let (paused_tx, paused_rx) = watch::channel(paused);
        let (resync_tx, resync_rx) = watch::channel(0u64);
        let cancel = CancellationToken::new();

        let ps_task = tokio::spawn(ps_loop(
            Arc::clone(&tx),
            ps_rx,
            paused_rx.clone(),
            station_rx.clone(),
            resync_rx.clone(),
            events.clone(),
            cancel.clone(),
        ));
        let rt_task = tokio::spawn(rt_loop(
            tx,
            rt_rx,
            paused_rx,
            station_rx,
            resync_rx,
            events,
            cancel.clone(),
        ));

        RotationHandle {
            ps: ps_tx,
            rt: rt_tx,
            station: station_tx,
            paused: paused_tx,
            resync: resync_tx,
            cancel,
            tasks: vec![ps_task, rt_task],
        }
    }
}

/// Control handle for a running [`RotationEngine`].
pub struct RotationHandle {
    ps: watch::Sender<PsSettings>,
    rt: watch::Sender<RtConfig>,
    station: watch::Sender<StationInfo>,
    paused: watch::Sender<bool>,
    resync: watch::Sender<u64>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RotationHandle {
    /// Replace the PS rotation. Takes effect at once if the list changed.
    pub fn set_ps(&self, settings: PsSettings) {
        self.ps.send_replace(settings);
    }

    /// Replace the RT settings. An unchanged template is not re-sent.
    pub fn set_rt(&self, cfg: RtConfig) {
        self.rt.send_replace(cfg);
    }

    /// Update the values used by macros.
    pub fn set_station(&self, station: StationInfo) {
        self.station.send_if_modified(|current| {
            let changed = *current != station;
            *current = station;
            changed
        });
    }

    /// Forget what the chip holds (after a reset) so both rotations write
    /// again on their next step, which is scheduled immediately.
    pub fn clear(&self) {
        self.resync.send_modify(|generation| *generation += 1);
    }

    /// Suspend or resume RDS writes. Resuming re-sends the configured PS
    /// and RT from the current rotation position.
    pub fn set_paused(&self, paused: bool) {
        let changed = self.paused.send_if_modified(|current| {
            let changed = *current != paused;
            *current = paused;
            changed
        });
        if changed {
            tracing::debug!(paused, "RDS rotation pause state changed");
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Stop both tasks, letting an in-flight write finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }
}

impl Drop for RotationHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn ps_loop(
    tx: Arc<dyn Transmitter>,
    mut settings: watch::Receiver<PsSettings>,
    mut paused: watch::Receiver<bool>,
    station: watch::Receiver<StationInfo>,
    mut resync: watch::Receiver<u64>,
    events: broadcast::Sender<TxEvent>,
    cancel: CancellationToken,
) {
    let initial = settings.borrow_and_update().clone();
    let mut interval = initial.interval;
    let mut rotation = PsRotation::new(initial.entries, initial.center);
    let mut due = Instant::now();
    let mut advance = false;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Ok(()) = settings.changed() => {
                let s = settings.borrow_and_update().clone();
                interval = s.interval;
                if rotation.reconfigure(s.entries, s.center) {
                    tracing::debug!(interval_ms = interval.as_millis(), "PS rotation reconfigured");
                    advance = false;
                    due = Instant::now();
                }
                continue;
            }

            Ok(()) = paused.changed() => {
                if !*paused.borrow_and_update() {
                    rotation.invalidate();
                    advance = false;
                    due = Instant::now();
                }
                continue;
            }

            Ok(()) = resync.changed() => {
                resync.borrow_and_update();
                rotation.invalidate();
                advance = false;
                due = Instant::now();
                continue;
            }

            _ = tokio::time::sleep_until(due) => {}
        }

        due = Instant::now() + interval;
        if *paused.borrow() {
            continue;
        }
        if advance {
            rotation.advance();
        }

        let info = station.borrow().clone();
        match rotation.tick(&*tx, &info, &Local::now()).await {
            Ok(written) => {
                advance = true;
                if let Some(text) = written {
                    tracing::debug!(index = rotation.index(), text = %text, "PS on air");
                    let _ = events.send(TxEvent::PsChanged {
                        text,
                        index: Some(rotation.index()),
                    });
                }
            }
            Err(e) => {
                if e.is_transport() {
                    tracing::warn!(index = rotation.index(), error = %e, "PS write failed, retrying next tick");
                    advance = false;
                } else {
                    tracing::error!(index = rotation.index(), error = %e, "PS entry rejected, skipping");
                    advance = true;
                }
            }
        }
    }
}

async fn rt_loop(
    tx: Arc<dyn Transmitter>,
    mut settings: watch::Receiver<RtConfig>,
    mut paused: watch::Receiver<bool>,
    station: watch::Receiver<StationInfo>,
    mut resync: watch::Receiver<u64>,
    events: broadcast::Sender<TxEvent>,
    cancel: CancellationToken,
) {
    let mut rotation = RtRotation::new(settings.borrow_and_update().clone());
    let mut interval = rotation.config().interval();
    let mut rotate_due = Instant::now() + interval;
    let mut poll_due = Instant::now();
    let mut advance_ok = true;

    loop {
        let scheduled = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Ok(()) = settings.changed() => {
                let cfg = settings.borrow_and_update().clone();
                interval = cfg.interval();
                rotation.reconfigure(cfg);
                rotate_due = Instant::now() + interval;
                false
            }

            Ok(()) = paused.changed() => {
                if *paused.borrow_and_update() {
                    continue;
                }
                rotation.invalidate();
                false
            }

            Ok(()) = resync.changed() => {
                resync.borrow_and_update();
                rotation.invalidate();
                false
            }

            _ = tokio::time::sleep_until(rotate_due) => {
                rotate_due = Instant::now() + interval;
                if *paused.borrow() {
                    continue;
                }
                if advance_ok {
                    rotation.advance();
                }
                true
            }

            _ = tokio::time::sleep_until(poll_due) => {
                poll_due = Instant::now() + FILE_POLL_INTERVAL;
                rotation.poll_file().await;
                false
            }
        };

        if *paused.borrow() {
            continue;
        }

        let info = station.borrow().clone();
        match rotation.tick(&*tx, &info, scheduled).await {
            Ok(Some(plan)) => {
                advance_ok = true;
                tracing::info!(
                    source = %plan.source,
                    bank = %plan.bank,
                    sends = plan.sends,
                    text = %plan.text,
                    "RT sent"
                );
                let _ = events.send(TxEvent::RtChanged {
                    text: plan.text,
                    bank: plan.bank,
                    source: plan.source,
                });
            }
            Ok(None) => advance_ok = true,
            Err(e) => {
                if e.is_transport() {
                    tracing::warn!(index = rotation.index(), error = %e, "RT write failed, retrying next tick");
                    advance_ok = false;
                } else {
                    tracing::error!(index = rotation.index(), error = %e, "RT entry rejected, skipping");
                    advance_ok = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use picast_test_harness::{RecordingTransmitter, TxCall};

    fn station() -> StationInfo {
        StationInfo {
            config_name: "/etc/picast/morning.json".into(),
            frequency_khz: 98_700,
            power: 115,
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 6, h, m, 9).unwrap()
    }

    fn rt_cfg(texts: &[&str]) -> RtConfig {
        RtConfig {
            texts: texts.iter().map(|s| s.to_string()).collect(),
            ..RtConfig::default()
        }
    }

    fn ps_settings(entries: &[&str], secs: u64) -> PsSettings {
        PsSettings {
            entries: entries.iter().map(|s| s.to_string()).collect(),
            center: true,
            interval: Duration::from_secs(secs),
        }
    }

    // -----------------------------------------------------------------
    // Macros and filters
    // -----------------------------------------------------------------

    #[test]
    fn macros_expand_case_insensitively() {
        let now = at(7, 8);
        let s = station();
        assert_eq!(expand_macros("{TIME}|{Date}", &s, &now), "07:08|2024-05-06");
        assert_eq!(expand_macros("{datetime}", &s, &now), "2024-05-06 07:08:09");
        assert_eq!(expand_macros("{power} dBuV", &s, &now), "115 dBuV");
        assert_eq!(expand_macros("{freq}", &s, &now), "98.70");
        assert_eq!(expand_macros("{config}", &s, &now), "morning");
    }

    #[test]
    fn unknown_and_unclosed_tokens_stay() {
        let now = at(7, 8);
        let s = station();
        assert_eq!(expand_macros("{nope} {time", &s, &now), "{nope} {time");
        assert_eq!(expand_macros("", &s, &now), "");
    }

    #[test]
    fn skip_words_removed_case_insensitively() {
        let skip = vec!["advert".to_string(), "".to_string()];
        assert_eq!(
            strip_skip_words("Now: ADVERT Song  by Band", &skip),
            "Now: Song by Band"
        );
        assert_eq!(strip_skip_words("advertadvert", &skip), "");
    }

    // -----------------------------------------------------------------
    // PS
    // -----------------------------------------------------------------

    #[test]
    fn ps_advance_wraps() {
        let mut ps = PsRotation::new(vec!["STATION".into(), "NEWS-FM".into()], true);
        assert_eq!(ps.index(), 0);
        ps.advance();
        assert_eq!(ps.index(), 1);
        ps.advance();
        assert_eq!(ps.index(), 0);
        assert_eq!(
            ps.render_current(&station(), &at(7, 8)).unwrap(),
            " STATION"
        );
    }

    #[test]
    fn ps_render_left_aligned() {
        let ps = PsRotation::new(vec!["FM".into()], false);
        assert_eq!(ps.render_current(&station(), &at(7, 8)).unwrap(), "FM      ");
    }

    #[tokio::test]
    async fn ps_tick_writes_only_on_change() {
        let rec = RecordingTransmitter::new();
        let mut ps = PsRotation::new(vec!["ROCK".into(), "ROCK".into(), "{time}".into()], true);
        let s = station();

        assert_eq!(ps.tick(&rec, &s, &at(7, 8)).await.unwrap(), Some("  ROCK  ".into()));
        ps.advance();
        assert_eq!(ps.tick(&rec, &s, &at(7, 8)).await.unwrap(), None);
        ps.advance();
        assert_eq!(ps.tick(&rec, &s, &at(7, 8)).await.unwrap(), Some("  07:08 ".into()));
        assert_eq!(ps.tick(&rec, &s, &at(7, 9)).await.unwrap(), Some("  07:09 ".into()));

        ps.invalidate();
        assert!(ps.tick(&rec, &s, &at(7, 9)).await.unwrap().is_some());
        assert_eq!(rec.ps_sends().len(), 4);
    }

    #[test]
    fn ps_render_blanks_control_characters() {
        let ps = PsRotation::new(vec!["A\tB".into()], true);
        assert_eq!(ps.render_current(&station(), &at(7, 8)).unwrap(), "   A B  ");
    }

    #[test]
    fn ps_reconfigure_restarts() {
        let mut ps = PsRotation::new(vec!["A".into(), "B".into()], true);
        ps.advance();
        assert!(!ps.reconfigure(vec!["A".into(), "B".into()], true));
        assert_eq!(ps.index(), 1);
        assert!(ps.reconfigure(vec!["C".into()], true));
        assert_eq!(ps.index(), 0);
    }

    // -----------------------------------------------------------------
    // RT planning
    // -----------------------------------------------------------------

    #[test]
    fn auto_mode_flips_on_template_change_only() {
        let s = station();
        let mut rt = RtRotation::new(rt_cfg(&["Hello"]));

        let first = rt.plan(&s, &at(7, 8), false).unwrap();
        assert_eq!(first.bank, RtBank::A);
        assert_eq!(first.sends, 3);
        assert_eq!(first.source, RtSource::List(0));
        rt.commit(&first);

        assert!(rt.plan(&s, &at(7, 8), false).is_none());
        assert!(rt.plan(&s, &at(7, 8), true).is_none());

        rt.reconfigure(rt_cfg(&["World"]));
        let next = rt.plan(&s, &at(7, 8), false).unwrap();
        assert_eq!(next.bank, RtBank::B);
        assert!(next.is_burst());
    }

    #[test]
    fn macro_refresh_keeps_bank() {
        let s = station();
        let mut rt = RtRotation::new(rt_cfg(&["Time {time}"]));
        let first = rt.plan(&s, &at(7, 8), false).unwrap();
        rt.commit(&first);

        let refresh = rt.plan(&s, &at(7, 9), false).unwrap();
        assert_eq!(refresh.text, "Time 07:09");
        assert_eq!(refresh.bank, first.bank);
        assert_eq!(refresh.sends, 1);
    }

    #[test]
    fn legacy_mode_flips_every_scheduled_send() {
        let s = station();
        let cfg = RtConfig {
            ab_mode: AbMode::Legacy,
            ..rt_cfg(&["Same"])
        };
        let mut rt = RtRotation::new(cfg);
        let mut banks = Vec::new();
        for _ in 0..3 {
            let plan = rt.plan(&s, &at(7, 8), true).unwrap();
            banks.push(plan.bank);
            rt.commit(&plan);
        }
        assert_eq!(banks, vec![RtBank::A, RtBank::B, RtBank::A]);
        assert!(rt.plan(&s, &at(7, 8), false).is_none());
    }

    #[test]
    fn bank_mode_follows_configured_bank() {
        let s = station();
        let cfg = RtConfig {
            ab_mode: AbMode::Bank,
            bank: Some(1),
            ..rt_cfg(&["Same"])
        };
        let mut rt = RtRotation::new(cfg.clone());
        let plan = rt.plan(&s, &at(7, 8), false).unwrap();
        assert_eq!(plan.bank, RtBank::B);
        rt.commit(&plan);
        assert!(rt.plan(&s, &at(7, 8), true).is_none());

        rt.reconfigure(RtConfig {
            bank: Some(0),
            ..cfg
        });
        let plan = rt.plan(&s, &at(7, 8), false).unwrap();
        assert_eq!(plan.bank, RtBank::A);
        assert!(plan.is_burst());
    }

    #[test]
    fn rt_text_is_filtered_and_truncated() {
        let s = station();
        let cfg = RtConfig {
            skip_words: vec!["[ad]".into()],
            ..rt_cfg(&["[AD] 0123456789 0123456789 0123456789"])
        };
        let rt = RtRotation::new(cfg);
        let plan = rt.plan(&s, &at(7, 8), false).unwrap();
        assert_eq!(plan.text, "0123456789 0123456789 0123456789");
        assert_eq!(plan.text.chars().count(), 32);
    }

    #[test]
    fn fallback_text_when_list_empty() {
        let s = station();
        let cfg = RtConfig {
            text: "On {config}".into(),
            ..RtConfig::default()
        };
        let plan = RtRotation::new(cfg).plan(&s, &at(7, 8), false).unwrap();
        assert_eq!(plan.text, "On morning");
        assert_eq!(plan.source, RtSource::Text);
        assert!(plan.cr_terminate);
    }

    #[test]
    fn rt_advance_cycles_list() {
        let mut rt = RtRotation::new(rt_cfg(&["a", "b"]));
        rt.advance();
        assert_eq!(rt.index(), 1);
        rt.advance();
        assert_eq!(rt.index(), 0);
    }

    #[tokio::test]
    async fn failed_burst_retries_with_same_bank() {
        let rec = RecordingTransmitter::new();
        let s = station();
        let cfg = RtConfig {
            repeats: 1,
            ..rt_cfg(&["Hello"])
        };
        let mut rt = RtRotation::new(cfg);

        rec.fail_next_writes(1);
        assert!(rt.tick(&rec, &s, false).await.is_err());
        let plan = rt.tick(&rec, &s, false).await.unwrap().unwrap();
        assert_eq!(plan.bank, RtBank::A);
        assert_eq!(rec.rt_sends().len(), 1);
    }

    #[tokio::test]
    async fn file_override_and_fallback() {
        let path = std::env::temp_dir().join(format!("picast-rt-{}.txt", std::process::id()));
        tokio::fs::write(&path, "\n   \n  Live   from\tthe studio \nsecond line\n")
            .await
            .unwrap();

        let cfg = RtConfig {
            file_path: Some(path.clone()),
            ..rt_cfg(&["List entry"])
        };
        let mut rt = RtRotation::new(cfg);
        let s = station();

        assert!(rt.poll_file().await);
        let plan = rt.plan(&s, &at(7, 8), false).unwrap();
        assert_eq!(plan.text, "Live from the studio");
        assert_eq!(plan.source, RtSource::File);
        rt.commit(&plan);
        assert!(!rt.poll_file().await);

        // The list does not rotate under an active file.
        rt.advance();
        assert_eq!(rt.index(), 0);

        tokio::fs::remove_file(&path).await.unwrap();
        assert!(rt.poll_file().await);
        let plan = rt.plan(&s, &at(7, 8), false).unwrap();
        assert_eq!(plan.text, "List entry");
        assert_eq!(plan.source, RtSource::List(0));
    }

    // -----------------------------------------------------------------
    // Engine
    // -----------------------------------------------------------------

    fn spawn(
        rec: &Arc<RecordingTransmitter>,
        ps: PsSettings,
        rt: RtConfig,
        paused: bool,
    ) -> (RotationHandle, broadcast::Receiver<TxEvent>) {
        let (events, rx) = broadcast::channel(256);
        let tx: Arc<dyn Transmitter> = rec.clone();
        (
            RotationEngine::spawn(tx, ps, rt, station(), events, paused),
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn ps_rotates_every_interval() {
        let rec = Arc::new(RecordingTransmitter::new());
        let start = Instant::now();
        let (handle, _rx) = spawn(&rec, ps_settings(&["STATION", "NEWS-FM"], 10), rt_cfg(&["x"]), false);

        tokio::time::sleep(Duration::from_secs(25)).await;
        let sends = rec.ps_sends();
        let texts: Vec<&str> = sends.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec![" STATION", " NEWS-FM", " STATION"]);
        let offsets: Vec<u64> = sends
            .iter()
            .map(|(t, _)| (*t - start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 10, 20]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn identical_rt_is_not_resent_and_change_bursts() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (handle, _rx) = spawn(&rec, ps_settings(&["PICAST"], 10), rt_cfg(&["Hello"]), false);

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.set_rt(rt_cfg(&["Hello"]));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let hello = rec.rt_sends();
        assert_eq!(hello.len(), 3);
        assert!(hello.iter().all(|(_, t, b)| t == "Hello" && *b == RtBank::A));

        handle.set_rt(rt_cfg(&["World"]));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let all = rec.rt_sends();
        let world: Vec<_> = all[3..].to_vec();
        assert_eq!(world.len(), 3);
        assert!(world.iter().all(|(_, t, b)| t == "World" && *b == RtBank::B));
        for pair in world.windows(2) {
            let gap = pair[1].0 - pair[0].0;
            assert!(gap >= Duration::from_millis(60) && gap < Duration::from_millis(70));
        }

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn paused_engine_writes_nothing_and_resumes() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (handle, _rx) = spawn(&rec, ps_settings(&["A", "B"], 1), rt_cfg(&["Text"]), true);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rec.writes().is_empty());
        assert!(handle.is_paused());

        handle.set_paused(false);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(rec.ps_sends().len(), 1);
        assert_eq!(rec.rt_sends().len(), 3);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn clear_resends_after_reset() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (handle, _rx) = spawn(&rec, ps_settings(&["PICAST"], 10), rt_cfg(&["Hello"]), false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        rec.clear();

        handle.clear();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(rec.ps_sends().len(), 1);
        let rt = rec.rt_sends();
        assert_eq!(rt.len(), 3);
        assert_eq!(rt[0].2, RtBank::B);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ps_write_retries_same_slot() {
        let rec = Arc::new(RecordingTransmitter::new());
        let start = Instant::now();
        let (handle, _rx) = spawn(&rec, ps_settings(&["ONE", "TWO"], 10), rt_cfg(&["x"]), false);
        tokio::time::sleep(Duration::from_secs(1)).await;

        // The load of TWO at t=10 fails and is retried at t=20, not skipped.
        rec.fail_next_writes(1);
        tokio::time::sleep(Duration::from_secs(24)).await;

        let sends = rec.ps_sends();
        let texts: Vec<&str> = sends.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["   ONE  ", "   TWO  "]);
        assert_eq!((sends[1].0 - start).as_secs(), 20);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn control_character_entry_does_not_stall_rotation() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (handle, _rx) = spawn(
            &rec,
            ps_settings(&["ONE", "A\tB", "THREE"], 10),
            rt_cfg(&["x"]),
            false,
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        let sends = rec.ps_sends();
        let texts: Vec<&str> = sends.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["   ONE  ", "   A B  ", "  THREE ", "   ONE  "]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn events_carry_rotation_index_and_source() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (handle, mut rx) = spawn(&rec, ps_settings(&["PICAST"], 10), rt_cfg(&["Hi"]), false);
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            seen.push(ev);
        }
        assert!(seen.contains(&TxEvent::PsChanged {
            text: " PICAST ".into(),
            index: Some(0)
        }));
        assert!(seen.contains(&TxEvent::RtChanged {
            text: "Hi".into(),
            bank: RtBank::A,
            source: RtSource::List(0)
        }));
        assert!(rec.count(|c| matches!(c, TxCall::RdsSetRt { cr_terminate: true, .. })) > 0);

        handle.shutdown().await;
    }
}
