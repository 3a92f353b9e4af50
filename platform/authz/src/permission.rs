/// Grant that covers every permission key.
pub const WILDCARD: &str = "*";

/// Split a permission key into `(resource, action)` at the first `.` or `:`.
pub fn split_name(name: &str) -> Option<(&str, &str)> {
    let idx = name.find(['.', ':'])?;
    let (resource, rest) = name.split_at(idx);
    let action = &rest[1..];
    if resource.is_empty() || action.is_empty() {
        return None;
    }
    Some((resource, action))
}

/// Whether holding `grant` allows `key`.
///
/// A grant covers a key when it is equal to it, when it is the global
/// wildcard, or when it is a prefix wildcard such as `content.*` (which also
/// covers nested keys like `content.review.final`).
pub fn covers(grant: &str, key: &str) -> bool {
    if key.is_empty() {
        return false;
    }
    if grant == WILDCARD || grant == key {
        return true;
    }
    let Some(prefix) = grant.strip_suffix('*') else {
        return false;
    };
    if !(prefix.ends_with('.') || prefix.ends_with(':')) {
        return false;
    }
    key.len() > prefix.len() && key.starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_first_separator() {
        assert_eq!(split_name("content.publish"), Some(("content", "publish")));
        assert_eq!(split_name("files:media.view"), Some(("files", "media.view")));
        assert_eq!(split_name("system.dashboard.view"), Some(("system", "dashboard.view")));
        assert_eq!(split_name("content"), None);
        assert_eq!(split_name(".publish"), None);
        assert_eq!(split_name("*"), None);
    }

    #[test]
    fn wildcard_grants() {
        assert!(covers("*", "anything.at_all"));
        assert!(covers("content.*", "content.publish"));
        assert!(covers("content.*", "content.review.final"));
        assert!(covers("social:*", "social:post"));
        assert!(!covers("content.*", "content."));
        assert!(!covers("content.*", "contentious.edit"));
        assert!(!covers("content*", "content.publish"));
        assert!(!covers("content.publish", "content.unpublish"));
        assert!(!covers("*", ""));
    }
}
