use serde_json::json;

use super::print_json;
use crate::state::AppState;

pub fn whoami(state: &AppState, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(&json!({ "identity": state.identity }))
    } else {
        println!("{}", state.identity);
        Ok(())
    }
}
