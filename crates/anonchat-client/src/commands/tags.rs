use super::print_json;
use crate::state::AppState;

pub async fn top_tags(state: &AppState, json: bool) -> anyhow::Result<()> {
    let (store, handle) = state.start_store().await?;
    let tags = store.top_tags().await;
    handle.shutdown().await;

    if json {
        return print_json(&tags);
    }
    if tags.is_empty() {
        println!("No tags yet.");
    }
    for (rank, entry) in tags.iter().enumerate() {
        println!("{:>2}. #{} ({})", rank + 1, entry.tag, entry.count);
    }
    Ok(())
}
