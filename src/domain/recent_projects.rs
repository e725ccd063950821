pub const DEFAULT_RECENT_PROJECTS_LIMIT: usize = 5;

/// Moves `label` to the front, dropping duplicates and anything past `limit`.
pub fn remember(recent: &mut Vec<String>, label: &str, limit: usize) {
    let label = label.trim();
    if label.is_empty() {
        return;
    }
    recent.retain(|existing| existing != label);
    recent.insert(0, label.to_string());
    recent.truncate(limit.max(1));
}

/// Deduplicated, trimmed copy of a stored list, preserving first-seen order.
pub fn sanitize(recent: &[String], limit: usize) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(recent.len().min(limit));
    for label in recent {
        let label = label.trim();
        if label.is_empty() || cleaned.iter().any(|existing| existing == label) {
            continue;
        }
        cleaned.push(label.to_string());
        if cleaned.len() == limit {
            break;
        }
    }
    cleaned
}
