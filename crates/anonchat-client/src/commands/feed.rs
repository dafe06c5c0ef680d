use anyhow::bail;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use anonchat_shared::MessageId;
use anonchat_sync::{FeedPage, FeedQuery, StoreEvent, SyncStore};

use super::{print_json, render_message, render_notice};
use crate::state::AppState;

pub async fn list(state: &AppState, query: FeedQuery, json: bool) -> anyhow::Result<()> {
    let (store, handle) = state.start_store().await?;
    let page = store.feed(&query).await;
    print_page(&store, &page, json).await?;
    handle.shutdown().await;
    Ok(())
}

/// Print the page, then print it again after every change. Runs until
/// interrupted.
pub async fn watch(state: &AppState, query: FeedQuery, json: bool) -> anyhow::Result<()> {
    let (store, handle) = state.start_store().await?;
    let mut events = store.subscribe();

    print_page(&store, &store.feed(&query).await, json).await?;
    loop {
        match events.recv().await {
            Ok(StoreEvent::Changed) | Err(RecvError::Lagged(_)) => {
                print_page(&store, &store.feed(&query).await, json).await?;
            }
            Ok(StoreEvent::Notice(notice)) => eprintln!("{}", render_notice(&notice)),
            Err(RecvError::Closed) => break,
        }
    }

    handle.shutdown().await;
    Ok(())
}

pub async fn thread(state: &AppState, id: &str, json: bool) -> anyhow::Result<()> {
    let id = MessageId::new(id);
    let (store, handle) = state.start_store().await?;

    let Some(message) = store.message(&id).await else {
        handle.shutdown().await;
        bail!("No message with id {id}");
    };
    let replies = store.replies(&id).await;

    if json {
        print_json(&json!({ "message": message, "replies": replies }))?;
    } else {
        println!("{}", render_message(&message, store.is_liked(&id).await));
        for reply in &replies {
            let body = render_message(reply, store.is_liked(&reply.id).await);
            for line in body.lines() {
                println!("    {line}");
            }
        }
        if replies.is_empty() {
            println!("    (no replies)");
        }
    }

    handle.shutdown().await;
    Ok(())
}

async fn print_page(store: &SyncStore, page: &FeedPage, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(page);
    }

    if page.items.is_empty() {
        println!("No messages.");
        return Ok(());
    }

    let liked = store.liked().await;
    for message in &page.items {
        println!("{}\n", render_message(message, liked.contains(&message.id)));
    }
    println!(
        "Page {}/{} ({} messages)",
        page.page,
        page.total_pages.max(1),
        page.total_matches
    );
    Ok(())
}
