//! Turn raw model text into typed results.
//!
//! Nothing here fails: unparsable output degrades to `None` or an empty list.

use serde_json::Value;
use tracing::debug;

use crate::mail::model::{Category, Priority, TaskItem};

/// Map a categorization answer onto a category.
///
/// Returns the first known category whose label appears in the text
/// (case-insensitive). Unmatched non-empty text is kept verbatim as
/// `Category::Unlisted`. Empty text yields `None`.
pub fn extract_category(raw: &str) -> Option<Category> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lower = trimmed.to_lowercase();
    for category in Category::KNOWN {
        if lower.contains(&category.label().to_lowercase()) {
            return Some(category);
        }
    }

    debug!(raw = trimmed, "Category outside the known set, keeping verbatim");
    Some(Category::Unlisted(trimmed.to_string()))
}

/// Slice from the first `[` to the last `]`, inclusive.
fn bracketed(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

/// Pull a task list out of an extraction answer.
pub fn extract_tasks(raw: &str) -> Vec<TaskItem> {
    let Some(slice) = bracketed(raw.trim()) else {
        debug!("No JSON array in extraction output");
        return Vec::new();
    };

    let items = match serde_json::from_str::<Value>(slice) {
        Ok(Value::Array(items)) => items,
        Ok(_) => return Vec::new(),
        Err(e) => {
            debug!(error = %e, "Extraction output is not valid JSON");
            return Vec::new();
        }
    };

    items.iter().filter_map(task_from_value).collect()
}

fn task_from_value(value: &Value) -> Option<TaskItem> {
    match value {
        Value::String(s) => non_empty(s).map(TaskItem::new),
        Value::Object(map) => {
            let task = ["task", "description", "action"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str).and_then(non_empty))?;
            let deadline = map
                .get("deadline")
                .or_else(|| map.get("due"))
                .and_then(scalar_text);
            let priority = map
                .get("priority")
                .and_then(Value::as_str)
                .and_then(Priority::parse_lenient);
            Some(TaskItem {
                task: task.to_string(),
                deadline,
                priority,
            })
        }
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_found_inside_sentence() {
        assert_eq!(
            extract_category("This looks Important to me"),
            Some(Category::Important)
        );
    }

    #[test]
    fn category_match_is_case_insensitive() {
        assert_eq!(extract_category("  to-do\n"), Some(Category::ToDo));
        assert_eq!(extract_category("SPAM"), Some(Category::Spam));
    }

    #[test]
    fn category_follows_fixed_order() {
        assert_eq!(
            extract_category("Newsletter, but Important"),
            Some(Category::Important)
        );
    }

    #[test]
    fn unknown_category_kept_verbatim() {
        assert_eq!(
            extract_category("  Finance  "),
            Some(Category::Unlisted("Finance".into()))
        );
    }

    #[test]
    fn empty_category_is_none() {
        assert_eq!(extract_category("   \n"), None);
    }

    #[test]
    fn tasks_extracted_from_chatty_output() {
        let tasks = extract_tasks(r#"Sure, here you go: [{"task": "Reply"}] thanks!"#);
        assert_eq!(tasks, vec![TaskItem::new("Reply")]);
    }

    #[test]
    fn tasks_keep_deadline_and_priority() {
        let tasks = extract_tasks(
            r#"```json
[{"task": "Send report", "deadline": "Friday", "priority": "HIGH"},
 {"task": "Book room", "priority": "urgent"}]
```"#,
        );
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].deadline.as_deref(), Some("Friday"));
        assert_eq!(tasks[0].priority, Some(Priority::High));
        assert_eq!(tasks[1].priority, None);
    }

    #[test]
    fn tasks_accept_strings_and_skip_junk() {
        let tasks =
            extract_tasks(r#"["Call Bob", 42, {"note": "x"}, {"description": "File taxes"}]"#);
        let names: Vec<&str> = tasks.iter().map(|t| t.task.as_str()).collect();
        assert_eq!(names, vec!["Call Bob", "File taxes"]);
    }

    #[test]
    fn no_brackets_means_no_tasks() {
        assert!(extract_tasks("No action items in this email.").is_empty());
        assert!(extract_tasks("] backwards [").is_empty());
        assert!(extract_tasks("").is_empty());
    }

    #[test]
    fn invalid_json_means_no_tasks() {
        assert!(extract_tasks("[{task: Reply}]").is_empty());
    }

    #[test]
    fn empty_array_means_no_tasks() {
        assert!(extract_tasks("[]").is_empty());
    }
}
