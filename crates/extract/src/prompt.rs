pub fn build_extraction_prompt(chunk_text: &str) -> String {
    format!(
        r#"Extract entities and relationships from the following text.

INSTRUCTIONS:
1. Identify key entities (organizations, concepts, products, people, locations)
2. Extract directed relationships between entities
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "entities": [
    {{"name": "Entity Name", "type": "organization|concept|product|person|location|other", "properties": {{"key": "value"}}}}
  ],
  "relationships": [
    {{"source": "Entity Name", "target": "Other Entity", "relation": "RELATION_TYPE", "properties": {{"key": "value"}}}}
  ]
}}

RULES:
- Relationship source and target must repeat an entity name exactly
- Relation types are short upper-case verbs: CONTROLS, AFFECTS, OFFERS, PART_OF, etc.
- Use other types when none of the suggested ones fit
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{}

JSON OUTPUT:"#,
        chunk_text
    )
}

pub fn build_mention_prompt(question: &str) -> String {
    format!(
        r#"Extract the main entities mentioned in this question.
Return ONLY a JSON list of entity names, for example ["Entity One", "Entity Two"].

Question: {}

JSON list:"#,
        question
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}

/// Strip markdown code fences some models wrap around JSON.
pub fn strip_code_fences(response: &str) -> &str {
    let mut text = response.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[\"RBI\"]\n```"), "[\"RBI\"]");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {}  "), "{}");
    }
}
