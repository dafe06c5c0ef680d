//! Monitoring read model.
//!
//! Independent of [`crate::SyncStore`]: the monitor does its own full-table
//! fetch, keeps its own change subscription and publishes derived
//! statistics on a `watch` channel. There is no write path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use anonchat_net::{ChangeFeed, Gateway};
use anonchat_shared::constants::TOP_TAGS_LIMIT;
use anonchat_shared::Message;

use crate::clock::Clock;
use crate::error::SyncError;
use crate::tags::{compute_top_tags, TagCount};

const RECENT_LIMIT: usize = 5;
const COMMAND_BUFFER: usize = 16;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Trailing window for rate-style metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum TimeWindow {
    #[serde(rename = "1h")]
    Hour,
    #[default]
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl TimeWindow {
    pub fn hours(self) -> i64 {
        match self {
            TimeWindow::Hour => 1,
            TimeWindow::Day => 24,
            TimeWindow::Week => 24 * 7,
            TimeWindow::Month => 24 * 30,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeWindow::Hour => "1h",
            TimeWindow::Day => "24h",
            TimeWindow::Week => "7d",
            TimeWindow::Month => "30d",
        }
    }
}

/// Polling period on top of change-driven refreshes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum RefreshInterval {
    Manual,
    #[default]
    Secs30,
    Secs60,
    Secs300,
}

impl RefreshInterval {
    pub fn period(self) -> Option<Duration> {
        match self {
            RefreshInterval::Manual => None,
            RefreshInterval::Secs30 => Some(Duration::from_secs(30)),
            RefreshInterval::Secs60 => Some(Duration::from_secs(60)),
            RefreshInterval::Secs300 => Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorConfig {
    pub window: TimeWindow,
    pub interval: RefreshInterval,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Row counts per time-of-day band (UTC).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimeOfDay {
    /// 00:00 to 06:00
    pub night: usize,
    /// 06:00 to 12:00
    pub morning: usize,
    /// 12:00 to 18:00
    pub afternoon: usize,
    /// 18:00 to 24:00
    pub evening: usize,
}

impl TimeOfDay {
    fn count(&mut self, hour: u32) {
        match hour {
            0..=5 => self.night += 1,
            6..=11 => self.morning += 1,
            12..=17 => self.afternoon += 1,
            _ => self.evening += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub computed_at: DateTime<Utc>,
    pub window: TimeWindow,
    pub total_messages: usize,
    pub distinct_authors: usize,
    pub distinct_tags: usize,
    /// Rows inside the window divided by its length in hours.
    pub messages_per_hour: f64,
    /// Busiest hour of day inside the window, earliest on ties.
    pub peak_hour: Option<u32>,
    pub mean_content_length: f64,
    pub top_tags: Vec<TagCount>,
    /// Authors with two or more rows over distinct authors.
    pub returning_author_ratio: f64,
    pub time_of_day: TimeOfDay,
    pub recent: Vec<Message>,
}

impl MonitorSnapshot {
    /// Derive every metric from a full table fetch.
    pub fn compute(rows: &[Message], window: TimeWindow, now: DateTime<Utc>) -> Self {
        let mut per_author: HashMap<&str, usize> = HashMap::new();
        let mut tags: HashSet<&str> = HashSet::new();
        let mut content_chars = 0usize;
        for row in rows {
            *per_author.entry(row.author.as_str()).or_default() += 1;
            tags.extend(row.tags.iter().map(String::as_str).filter(|t| !t.is_empty()));
            content_chars += row.content.chars().count();
        }

        let since = now - chrono::Duration::hours(window.hours());
        let mut by_hour = [0usize; 24];
        let mut time_of_day = TimeOfDay::default();
        let mut in_window = 0usize;
        for row in rows.iter().filter(|r| r.created_at > since && r.created_at <= now) {
            let hour = row.created_at.hour();
            by_hour[hour as usize] += 1;
            time_of_day.count(hour);
            in_window += 1;
        }

        let peak_hour = by_hour
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            // max_by_key keeps the last maximum; reverse to prefer the earliest hour.
            .rev()
            .max_by_key(|(_, n)| **n)
            .map(|(hour, _)| hour as u32);

        let distinct_authors = per_author.len();
        let returning = per_author.values().filter(|&&n| n >= 2).count();

        let mut recent = rows.to_vec();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(RECENT_LIMIT);

        Self {
            computed_at: now,
            window,
            total_messages: rows.len(),
            distinct_authors,
            distinct_tags: tags.len(),
            messages_per_hour: in_window as f64 / window.hours() as f64,
            peak_hour,
            mean_content_length: ratio(content_chars, rows.len()),
            top_tags: compute_top_tags(rows, TOP_TAGS_LIMIT),
            returning_author_ratio: ratio(returning, distinct_authors),
            time_of_day,
            recent,
        }
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorCommand {
    Refresh,
    SetWindow(TimeWindow),
    SetInterval(RefreshInterval),
    Shutdown,
}

/// Handle to a running monitor task.
pub struct Monitor {
    commands: mpsc::Sender<MonitorCommand>,
    snapshots: watch::Receiver<Option<MonitorSnapshot>>,
    task: JoinHandle<()>,
}

impl Monitor {
    /// Subscribe to changes, compute the first snapshot and start the
    /// refresh loop.
    pub async fn spawn(
        gateway: Arc<dyn Gateway>,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
    ) -> Result<Self, SyncError> {
        let feed = gateway.subscribe().await?;
        let (snapshot_tx, snapshots) = watch::channel(None);
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);

        let worker = Worker {
            gateway,
            clock,
            config,
            snapshots: snapshot_tx,
        };
        worker.refresh().await;
        let task = tokio::spawn(worker.run(feed, command_rx));

        info!(window = config.window.label(), interval = ?config.interval, "monitor started");
        Ok(Self {
            commands,
            snapshots,
            task,
        })
    }

    pub fn snapshots(&self) -> watch::Receiver<Option<MonitorSnapshot>> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Option<MonitorSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.send(MonitorCommand::Refresh).await
    }

    pub async fn set_window(&self, window: TimeWindow) -> Result<(), SyncError> {
        self.send(MonitorCommand::SetWindow(window)).await
    }

    pub async fn set_interval(&self, interval: RefreshInterval) -> Result<(), SyncError> {
        self.send(MonitorCommand::SetInterval(interval)).await
    }

    /// Stop the task and wait for it.
    pub async fn shutdown(self) {
        // The task may already be gone.
        let _ = self.commands.send(MonitorCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "monitor task ended abnormally");
        }
    }

    async fn send(&self, command: MonitorCommand) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::Closed)
    }
}

struct Worker {
    gateway: Arc<dyn Gateway>,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    snapshots: watch::Sender<Option<MonitorSnapshot>>,
}

impl Worker {
    async fn run(mut self, mut feed: ChangeFeed, mut commands: mpsc::Receiver<MonitorCommand>) {
        let mut next_tick = self.next_tick();
        let mut feed_open = true;

        loop {
            let tick = async move {
                match next_tick {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(MonitorCommand::Refresh) => self.refresh().await,
                    Some(MonitorCommand::SetWindow(window)) => {
                        self.config.window = window;
                        self.refresh().await;
                    }
                    Some(MonitorCommand::SetInterval(interval)) => {
                        self.config.interval = interval;
                        next_tick = self.next_tick();
                    }
                    Some(MonitorCommand::Shutdown) | None => break,
                },
                event = feed.next(), if feed_open => match event {
                    Some(event) => {
                        debug!(kind = ?event.kind(), "monitor refresh on change");
                        self.refresh().await;
                    }
                    None => {
                        warn!("monitor change feed ended, polling only");
                        feed_open = false;
                    }
                },
                _ = tick => {
                    self.refresh().await;
                    next_tick = self.next_tick();
                }
            }
        }
        feed.close();
        debug!("monitor stopped");
    }

    fn next_tick(&self) -> Option<Instant> {
        self.config
            .interval
            .period()
            .map(|period| Instant::now() + period)
    }

    /// Fetch and publish. A failed fetch keeps the previous snapshot.
    async fn refresh(&self) {
        match self.gateway.fetch_all().await {
            Ok(rows) => {
                let snapshot = MonitorSnapshot::compute(&rows, self.config.window, self.clock.now());
                self.snapshots.send_replace(Some(snapshot));
            }
            Err(e) => warn!(error = %e, "monitor refresh failed"),
        }
    }
}
