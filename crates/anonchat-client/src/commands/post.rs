use serde_json::json;
use tracing::info;

use anonchat_shared::MessageId;

use super::{print_json, render_message, settle};
use crate::state::AppState;

pub async fn post(state: &AppState, content: &str, tags: &str, json: bool) -> anyhow::Result<()> {
    let (store, handle) = state.start_store().await?;
    let mut events = store.subscribe();

    let result = match store.prepare_draft(content, tags) {
        Ok(draft) => store.post(draft).await,
        Err(e) => Err(e),
    };
    handle.shutdown().await;
    state.remember_cooldown(&store).await?;
    let message = settle(&mut events, result)?;

    if json {
        print_json(&message)?;
    } else {
        println!("{}", render_message(&message, false));
    }
    Ok(())
}

pub async fn reply(state: &AppState, parent: &str, content: &str, json: bool) -> anyhow::Result<()> {
    let parent = MessageId::new(parent);
    let (store, handle) = state.start_store().await?;
    let mut events = store.subscribe();

    // Replies carry no tags.
    let result = match store.prepare_draft(content, "") {
        Ok(draft) => store.reply(&parent, draft).await,
        Err(e) => Err(e),
    };
    handle.shutdown().await;
    state.remember_cooldown(&store).await?;
    let message = settle(&mut events, result)?;

    if json {
        print_json(&message)?;
    } else {
        println!("{}", render_message(&message, false));
    }
    Ok(())
}

pub async fn like(state: &AppState, id: &str, json: bool) -> anyhow::Result<()> {
    let id = MessageId::new(id);
    let (store, handle) = state.start_store().await?;
    let mut events = store.subscribe();

    let result = store.toggle_like(&id).await;
    let count = store.message(&id).await.map(|m| m.like_count);
    handle.shutdown().await;
    let liked = settle(&mut events, result)?;

    info!(%id, liked, "like toggled");
    if json {
        print_json(&json!({ "id": id, "liked": liked, "likes": count }))?;
    } else if liked {
        println!("Liked {}", id.short());
    } else {
        println!("Removed like from {}", id.short());
    }
    Ok(())
}
