//! Subcommand handlers.
//!
//! Each sub-module groups related commands. Handlers take the shared
//! [`AppState`](crate::state::AppState), start what they need and print
//! either plain text or JSON.

pub mod feed;
pub mod identity;
pub mod monitor;
pub mod post;
pub mod tags;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};

use anonchat_shared::Message;
use anonchat_sync::{Notice, Severity, StoreEvent, SyncError};

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn render_message(message: &Message, liked: bool) -> String {
    let heart = if liked { "♥" } else { "♡" };
    let mut line = format!(
        "[{}] {} · {}\n  {}\n  {} {}  ↳ {}",
        message.id.short(),
        message.author,
        message.created_at.format("%Y-%m-%d %H:%M"),
        message.content,
        heart,
        message.like_count,
        message.reply_count,
    );
    if !message.tags.is_empty() {
        let tags: Vec<String> = message.tags.iter().map(|t| format!("#{t}")).collect();
        line.push_str("  ");
        line.push_str(&tags.join(" "));
    }
    line
}

pub(crate) fn render_notice(notice: &Notice) -> String {
    let label = match notice.severity {
        Severity::Info => "info",
        Severity::Success => "ok",
        Severity::Warning => "warning",
        Severity::Error => "error",
    };
    format!("[{label}] {}", notice.text)
}

/// Notices already queued on `events`. When the command failed, error
/// notices are left out since the returned error reports the same thing.
pub(crate) fn pending_notices(
    events: &mut broadcast::Receiver<StoreEvent>,
    failed: bool,
) -> Vec<Notice> {
    let mut notices = Vec::new();
    loop {
        match events.try_recv() {
            Ok(StoreEvent::Notice(notice)) => {
                if !(failed && notice.severity == Severity::Error) {
                    notices.push(notice);
                }
            }
            Ok(StoreEvent::Changed) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    notices
}

/// Print pending notices to stderr, then hand back the command's result.
pub(crate) fn settle<T>(
    events: &mut broadcast::Receiver<StoreEvent>,
    result: Result<T, SyncError>,
) -> anyhow::Result<T> {
    for notice in pending_notices(events, result.is_err()) {
        eprintln!("{}", render_notice(&notice));
    }
    Ok(result?)
}
