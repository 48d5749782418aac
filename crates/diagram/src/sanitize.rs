use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static QUOTES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"["'`]"#).unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static NON_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").unwrap());

const ELLIPSIS: &str = "...";

/// Display label: quotes stripped, whitespace collapsed, cut to `max_len`
/// characters including a trailing ellipsis.
pub fn sanitize_label(label: &str, max_len: usize) -> String {
    let unquoted = QUOTES.replace_all(label, "");
    let collapsed = WHITESPACE.replace_all(unquoted.trim(), " ");

    if collapsed.chars().count() <= max_len {
        return collapsed.to_string();
    }

    let keep = max_len.saturating_sub(ELLIPSIS.len());
    let cut: String = collapsed.chars().take(keep).collect();
    format!("{}{}", cut.trim_end(), ELLIPSIS)
}

/// Node identifier restricted to `[A-Za-z0-9_]`, independent of the label.
pub fn sanitize_id(id: &str) -> String {
    let cleaned = NON_ID.replace_all(id.trim(), "_");
    if cleaned.is_empty() {
        "n_node".to_string()
    } else {
        format!("n_{}", cleaned)
    }
}

/// Assigns sanitized node ids, suffixing any that collide after sanitizing.
#[derive(Debug, Default)]
pub struct NodeIds {
    used: HashSet<String>,
}

impl NodeIds {
    pub fn assign(&mut self, entity_id: &str) -> String {
        let base = sanitize_id(entity_id);
        if self.used.insert(base.clone()) {
            return base;
        }

        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
