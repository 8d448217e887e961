//! Post-hoc resolution of `chat_manager` recipients.
//!
//! Group-chat frameworks record the recipient of a message as the chat
//! manager when the next speaker is not yet known at send time. These helpers
//! rewrite such records by forward-scanning for the next distinct speaker,
//! both on typed message lists and recursively over any `messages` array
//! embedded in a report. Resolution is idempotent.

use serde_json::{Map, Value};

use crate::logging::MessageLog;

/// The recipient literal denoting "next speaker not yet known at send time".
pub const CHAT_MANAGER: &str = "chat_manager";

/// Resolve `chat_manager` recipients in a typed message list.
///
/// Rewritten entries get `to_agent_resolved = true` and
/// `to_agent_original = "chat_manager"` in their metadata. The last message
/// of a trace has no successor and is left as-is.
#[must_use]
pub fn resolve_chat_manager_recipients(messages: &[MessageLog]) -> Vec<MessageLog> {
    messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            let mut resolved = message.clone();
            if message.to_agent == CHAT_MANAGER
                && let Some(next_speaker) = find_next_speaker(messages, index)
            {
                resolved.to_agent = next_speaker;
                resolved
                    .metadata
                    .insert("to_agent_resolved".to_owned(), Value::Bool(true));
                resolved.metadata.insert(
                    "to_agent_original".to_owned(),
                    Value::String(CHAT_MANAGER.to_owned()),
                );
            }
            resolved
        })
        .collect()
}

fn find_next_speaker(messages: &[MessageLog], current: usize) -> Option<String> {
    let current_from = &messages[current].from_agent;
    messages[current + 1..]
        .iter()
        .map(|m| &m.from_agent)
        .find(|from| !from.is_empty() && *from != current_from)
        .cloned()
}

/// Recursively resolve `chat_manager` recipients in any `messages` array
/// found at any depth inside a report value.
#[must_use]
pub fn resolve_nested_messages(data: &Value) -> Value {
    match data {
        Value::Object(map) => {
            let mut result = Map::new();
            for (key, value) in map {
                let resolved = if key == "messages" && value.is_array() {
                    resolve_value_messages(value.as_array().map_or(&[][..], Vec::as_slice))
                } else {
                    resolve_nested_messages(value)
                };
                result.insert(key.clone(), resolved);
            }
            Value::Object(result)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(resolve_nested_messages).collect())
        }
        other => other.clone(),
    }
}

fn resolve_value_messages(messages: &[Value]) -> Value {
    let resolved = messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            let Value::Object(map) = message else {
                return message.clone();
            };
            let to_agent = recipient_of(map);
            if to_agent != Some(CHAT_MANAGER) {
                return message.clone();
            }
            let Some(next_speaker) = find_next_value_speaker(messages, index) else {
                return message.clone();
            };

            let mut rewritten = map.clone();
            if rewritten.contains_key("to_agent") {
                rewritten.insert("to_agent".to_owned(), Value::String(next_speaker.clone()));
            }
            if rewritten.contains_key("to") {
                rewritten.insert("to".to_owned(), Value::String(next_speaker));
            }
            rewritten.insert("to_agent_resolved".to_owned(), Value::Bool(true));
            rewritten.insert(
                "to_agent_original".to_owned(),
                Value::String(CHAT_MANAGER.to_owned()),
            );
            Value::Object(rewritten)
        })
        .collect();
    Value::Array(resolved)
}

fn recipient_of(map: &Map<String, Value>) -> Option<&str> {
    map.get("to_agent")
        .or_else(|| map.get("to"))
        .and_then(Value::as_str)
}

fn sender_of(map: &Map<String, Value>) -> Option<&str> {
    map.get("from_agent")
        .or_else(|| map.get("from"))
        .and_then(Value::as_str)
}

fn find_next_value_speaker(messages: &[Value], current: usize) -> Option<String> {
    let current_from = messages[current]
        .as_object()
        .and_then(sender_of)
        .unwrap_or_default();
    messages[current + 1..]
        .iter()
        .filter_map(|m| m.as_object().and_then(sender_of))
        .find(|from| !from.is_empty() && *from != current_from)
        .map(str::to_owned)
}

/// Statistics about resolution over a value-form message list.
///
/// Returns `{total_messages, chat_manager_count, resolved_count,
/// resolution_rate}`.
#[must_use]
pub fn get_resolution_stats(messages: &[Value]) -> Value {
    let total = messages.len();
    let mut chat_manager_count = 0u64;
    let mut resolved_count = 0u64;

    for message in messages {
        let Some(map) = message.as_object() else {
            continue;
        };
        if recipient_of(map) == Some(CHAT_MANAGER) {
            chat_manager_count += 1;
        }
        if map.get("to_agent_resolved").and_then(Value::as_bool) == Some(true) {
            resolved_count += 1;
        }
    }

    let rate = if chat_manager_count > 0 {
        resolved_count as f64 / chat_manager_count as f64
    } else {
        0.0
    };

    serde_json::json!({
        "total_messages": total,
        "chat_manager_count": chat_manager_count,
        "resolved_count": resolved_count,
        "resolution_rate": rate,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::logging::{MessageType, now_ts};

    fn message(from: &str, to: &str) -> MessageLog {
        MessageLog {
            timestamp: now_ts(),
            from_agent: from.to_owned(),
            to_agent: to.to_owned(),
            content: "content".to_owned(),
            message_id: format!("{from}-{to}"),
            message_type: MessageType::Text,
            tool_calls: None,
            metadata: Map::new(),
        }
    }

    mod typed {
        use super::*;

        #[test]
        fn resolves_to_next_distinct_speaker() {
            let messages = vec![
                message("A", CHAT_MANAGER),
                message("B", CHAT_MANAGER),
                message("C", CHAT_MANAGER),
            ];
            let resolved = resolve_chat_manager_recipients(&messages);

            assert_eq!(resolved[0].to_agent, "B");
            assert_eq!(resolved[1].to_agent, "C");
            // Last message has no successor.
            assert_eq!(resolved[2].to_agent, CHAT_MANAGER);

            assert_eq!(
                resolved[0].metadata.get("to_agent_resolved"),
                Some(&Value::Bool(true))
            );
            assert_eq!(
                resolved[0].metadata.get("to_agent_original").and_then(Value::as_str),
                Some(CHAT_MANAGER)
            );
            assert!(resolved[2].metadata.get("to_agent_resolved").is_none());
        }

        #[test]
        fn skips_same_speaker_runs() {
            let messages = vec![
                message("A", CHAT_MANAGER),
                message("A", CHAT_MANAGER),
                message("B", CHAT_MANAGER),
            ];
            let resolved = resolve_chat_manager_recipients(&messages);
            assert_eq!(resolved[0].to_agent, "B");
        }

        #[test]
        fn concrete_recipients_untouched() {
            let messages = vec![message("A", "B"), message("B", "C")];
            let resolved = resolve_chat_manager_recipients(&messages);
            assert_eq!(resolved[0].to_agent, "B");
            assert!(resolved[0].metadata.is_empty());
        }

        #[test]
        fn empty_list_yields_empty_output() {
            assert!(resolve_chat_manager_recipients(&[]).is_empty());
        }
    }

    mod nested {
        use super::*;

        fn report() -> Value {
            serde_json::json!({
                "summary": {"total": 2},
                "workflow_details": {
                    "messages": [
                        {"from_agent": "A", "to_agent": CHAT_MANAGER, "content": "one"},
                        {"from_agent": "B", "to_agent": CHAT_MANAGER, "content": "two"},
                    ]
                },
                "results": [
                    {"messages": [
                        {"from": "X", "to": CHAT_MANAGER, "content": "deep"},
                        {"from": "Y", "to": "X", "content": "reply"},
                    ]}
                ]
            })
        }

        #[test]
        fn resolves_at_any_depth() {
            let resolved = resolve_nested_messages(&report());

            let nested = &resolved["workflow_details"]["messages"];
            assert_eq!(nested[0]["to_agent"], "B");
            assert_eq!(nested[0]["to_agent_resolved"], true);
            assert_eq!(nested[1]["to_agent"], CHAT_MANAGER);

            let deep = &resolved["results"][0]["messages"];
            assert_eq!(deep[0]["to"], "Y");
        }

        #[test]
        fn resolution_is_idempotent() {
            let once = resolve_nested_messages(&report());
            let twice = resolve_nested_messages(&once);
            assert_eq!(once, twice);
        }

        #[test]
        fn scalars_pass_through() {
            let value = serde_json::json!(42);
            assert_eq!(resolve_nested_messages(&value), value);
        }
    }

    mod stats {
        use super::*;

        #[test]
        fn counts_and_rate() {
            let messages = vec![
                serde_json::json!({"from_agent": "A", "to_agent": CHAT_MANAGER}),
                serde_json::json!({
                    "from_agent": "B", "to_agent": "C", "to_agent_resolved": true
                }),
            ];
            let stats = get_resolution_stats(&messages);
            assert_eq!(stats["total_messages"], 2);
            assert_eq!(stats["chat_manager_count"], 1);
            assert_eq!(stats["resolved_count"], 1);
            assert!((stats["resolution_rate"].as_f64().unwrap() - 1.0).abs() < 1e-9);
        }

        #[test]
        fn zero_chat_manager_has_zero_rate() {
            let stats = get_resolution_stats(&[]);
            assert!((stats["resolution_rate"].as_f64().unwrap()).abs() < 1e-9);
        }
    }
}
