//! Turns detector transitions into one outbound report per cycle.
//!
//! Pools that changed since the last report (new issue or recovery) come
//! first and page their watchers. Pools whose issue was already announced
//! are listed after them without paging anyone again.
//!
//! Composing never mutates the pools. The caller marks the pools listed in
//! [`AlertReport::announced`] once the report was actually delivered, so a
//! failed send is retried on the next cycle.

use crate::models::{PoolRecord, PoolStatus};
use std::{
    collections::BTreeSet,
    fmt::Write,
    time::{Duration, SystemTime},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertReport {
    pub changed: Vec<String>,
    pub ongoing: Vec<String>,
    /// Deduplicated watcher identities to page.
    pub mentions: Vec<String>,
    /// Pool ids whose new state this report announces.
    pub announced: Vec<String>,
}

impl AlertReport {
    pub fn body(&self) -> String {
        let mut body = String::new();
        if !self.changed.is_empty() {
            body.push_str("Pool status changed:\n");
            for line in &self.changed {
                let _ = writeln!(body, "{line}");
            }
        }
        if !self.ongoing.is_empty() {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str("Still ongoing:\n");
            for line in &self.ongoing {
                let _ = writeln!(body, "{line}");
            }
        }
        body
    }
}

struct Row {
    name: String,
    height: String,
    status: PoolStatus,
    last_found: String,
    issue: String,
}

/// Builds the report from the pools' current flags. Returns `None` when no
/// pool is in a bad state or freshly recovered.
pub fn compose_report<'a>(
    pools: impl IntoIterator<Item = &'a PoolRecord>,
    now: SystemTime,
) -> Option<AlertReport> {
    let mut changed = Vec::new();
    let mut ongoing = Vec::new();
    let mut mentions = BTreeSet::new();
    let mut announced = Vec::new();

    for pool in pools {
        if !pool.in_bad_state() && !pool.just_recovered {
            continue;
        }

        let row = render_row(pool, now);
        if pool.awaiting_announcement() {
            mentions.extend(pool.watchers.iter().cloned());
            announced.push(pool.url.clone());
            changed.push(row);
        } else {
            ongoing.push(row);
        }
    }

    if changed.is_empty() && ongoing.is_empty() {
        return None;
    }

    let name_width = changed
        .iter()
        .chain(ongoing.iter())
        .map(|row| row.name.len())
        .max()
        .unwrap_or(0);

    Some(AlertReport {
        changed: changed.iter().map(|row| format_row(row, name_width)).collect(),
        ongoing: ongoing.iter().map(|row| format_row(row, name_width)).collect(),
        mentions: mentions.into_iter().collect(),
        announced,
    })
}

fn render_row(pool: &PoolRecord, now: SystemTime) -> Row {
    let status = pool.status();
    let issue = match (status, pool.issue_started_at) {
        (PoolStatus::Recovered, Some(started)) => format!("after {}", format_elapsed(started, now)),
        (_, Some(started)) => format!("for {}", format_elapsed(started, now)),
        (_, None) => String::new(),
    };

    Row {
        name: pool.url.clone(),
        height: pool.last_height.to_string(),
        status,
        last_found: describe_last_found(pool.last_block_found_at, now),
        issue,
    }
}

fn format_row(row: &Row, name_width: usize) -> String {
    let line = format!(
        "{:<name_width$}  {:>9}  {:<9}  {:<18}  {}",
        row.name,
        row.height,
        row.status.to_string(),
        row.last_found,
        row.issue,
    );
    line.trim_end().to_owned()
}

/// "3h 12m", "45s", "2d 4h". Only the two most significant units are kept.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

pub fn format_elapsed(since: SystemTime, now: SystemTime) -> String {
    format_duration(now.duration_since(since).unwrap_or(Duration::ZERO))
}

pub fn describe_last_found(at: Option<SystemTime>, now: SystemTime) -> String {
    match at {
        Some(at) => format!("block {} ago", format_elapsed(at, now)),
        None => "no block found".to_owned(),
    }
}
