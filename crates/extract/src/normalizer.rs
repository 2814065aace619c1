use regex::Regex;
use std::sync::LazyLock;

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.,!?;:'"`]"#).expect("punctuation pattern is valid"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Normalize entity name: lowercase, strip punctuation, collapse whitespace.
/// No aliasing or fuzzy matching happens here.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let stripped = PUNCTUATION.replace_all(&lowered, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

/// Entity type tags are an open vocabulary, compared lowercase.
pub fn normalize_type(entity_type: &str) -> String {
    let tag = WHITESPACE
        .replace_all(entity_type.trim(), "_")
        .to_lowercase();
    if tag.is_empty() {
        crate::schema::DEFAULT_ENTITY_TYPE.to_string()
    } else {
        tag
    }
}

/// Relationship labels are upper snake case: "passes on" -> "PASSES_ON".
pub fn normalize_relation(relation: &str) -> String {
    let label = WHITESPACE
        .replace_all(relation.trim(), "_")
        .replace('-', "_")
        .to_uppercase();
    if label.is_empty() {
        crate::schema::DEFAULT_RELATION.to_string()
    } else {
        label
    }
}
