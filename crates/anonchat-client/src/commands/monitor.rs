use anonchat_sync::{MonitorConfig, MonitorSnapshot};

use super::print_json;
use crate::state::AppState;

pub async fn monitor(
    state: &AppState,
    config: MonitorConfig,
    follow: bool,
    json: bool,
) -> anyhow::Result<()> {
    let monitor = state.start_monitor(config).await?;
    let mut snapshots = monitor.snapshots();

    if let Some(snapshot) = snapshots.borrow_and_update().clone() {
        print_snapshot(&snapshot, json)?;
    }

    if follow {
        while snapshots.changed().await.is_ok() {
            let latest = snapshots.borrow_and_update().clone();
            if let Some(snapshot) = latest {
                print_snapshot(&snapshot, json)?;
            }
        }
    }

    monitor.shutdown().await;
    Ok(())
}

fn print_snapshot(snapshot: &MonitorSnapshot, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(snapshot);
    }
    print!("{}", render_snapshot(snapshot));
    Ok(())
}

fn render_snapshot(s: &MonitorSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "--- {} (window {}) ---\n",
        s.computed_at.format("%Y-%m-%d %H:%M:%S"),
        s.window.label()
    ));
    out.push_str(&format!(
        "messages {}  authors {}  tags {}\n",
        s.total_messages, s.distinct_authors, s.distinct_tags
    ));
    out.push_str(&format!(
        "rate {:.2}/h  peak hour {}  mean length {:.1}  returning {:.0}%\n",
        s.messages_per_hour,
        s.peak_hour
            .map(|h| format!("{h:02}:00"))
            .unwrap_or_else(|| "-".to_string()),
        s.mean_content_length,
        s.returning_author_ratio * 100.0
    ));
    let t = &s.time_of_day;
    out.push_str(&format!(
        "night {}  morning {}  afternoon {}  evening {}\n",
        t.night, t.morning, t.afternoon, t.evening
    ));
    if !s.top_tags.is_empty() {
        let tags: Vec<String> = s
            .top_tags
            .iter()
            .map(|t| format!("#{} ({})", t.tag, t.count))
            .collect();
        out.push_str(&format!("top tags {}\n", tags.join(", ")));
    }
    for message in &s.recent {
        out.push_str(&format!("  {} {}: {}\n", message.id.short(), message.author, message.content));
    }
    out
}
