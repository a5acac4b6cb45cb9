use std::collections::HashSet;

/// Configured admins followed by directory-resolved owners, deduplicated in
/// first-seen order. Blank entries are dropped.
pub fn recipient_set(admins: &[String], owners: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    admins
        .iter()
        .chain(owners)
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .filter(|e| seen.insert(e.to_string()))
        .map(str::to_string)
        .collect()
}
