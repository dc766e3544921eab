use serde_json::{json, Value};
use stockbot_discord::manifest::default_manifest;

use crate::commands::{CommandResult, EXIT_FAILURE};

/// Prints the registration payload of every command plus its local response mode.
pub fn run() -> CommandResult {
    let manifest = match default_manifest() {
        Ok(manifest) => manifest,
        Err(error) => {
            return CommandResult::failure("manifest", "manifest", error.to_string(), EXIT_FAILURE);
        }
    };

    let commands: Vec<Value> = manifest
        .commands()
        .iter()
        .map(|command| {
            let mut payload = serde_json::to_value(command.payload()).unwrap_or(Value::Null);
            if let Value::Object(fields) = &mut payload {
                fields.insert("response_mode".to_owned(), json!(command.mode));
            }
            payload
        })
        .collect();

    CommandResult::success_with_details(
        "manifest",
        format!("{} command(s) declared", manifest.len()),
        Some(Value::Array(commands)),
    )
}
