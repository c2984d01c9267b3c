//! Prompt templates for extraction, evaluation and repair.
//!
//! Each builder returns `(system, user)`. Every prompt asks for exactly one
//! JSON object; surrounding prose is tolerated by the JSON locator.

/// Node types the extractor is told to choose from.
pub fn node_type_list(node_types: &[String]) -> String {
    node_types
        .iter()
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn extraction(text: &str, node_types: &[String]) -> (String, String) {
    let system = "You are an expert data scientist who builds knowledge graphs from text. \
Reason step by step before answering, then return only the final JSON."
        .to_string();

    let types = node_type_list(node_types);
    let user = format!(
        r#"Extract the key topics of the document below and the relationships between them.

Work through these steps:
1. Understand the document: subject, structure, core concepts.
2. Identify the key topics, using only these node types: {types}.
3. Assign each topic exactly one of those types.
4. For each topic, copy the document content that best describes it.
5. Decide which relationship types the document supports.
6. Link topics with directed relationships (source -> target). Only record substantive links, not co-occurrence.
7. Check that every relationship's source and target is a node id you produced.

Return one JSON object with this shape:
{{
  "thinking": {{"summary": "your reasoning, briefly"}},
  "nodes": [
    {{"id": "unique short topic name", "type": "one of: {types}", "content": "relevant text from the document"}}
  ],
  "relationships": [
    {{"source": "node id", "target": "node id", "type": "UPPER_SNAKE_CASE relationship type"}}
  ]
}}

Every node needs id, type and content. Every relationship needs source, target and type.

Document:
{text}"#
    );

    (system, user)
}

pub fn evaluation(text: &str, graph_json: &str) -> (String, String) {
    let system = "You are an expert knowledge-graph auditor. Compare a graph against its source \
document and report every problem you find. Return only JSON."
        .to_string();

    let user = format!(
        r#"Audit the knowledge graph against the source document.

Check for:
- missing_nodes: topics the document covers that have no node
- incomplete_nodes: nodes whose content leaves out important facts (give the text to add)
- incorrect_relationships: relationships the document contradicts (suggest a replacement or null)
- missing_relationships: relationships the document states that the graph lacks

Return one JSON object:
{{
  "has_issues": true or false,
  "issues": {{
    "missing_nodes": [{{"id": "...", "type": "...", "content": "..."}}],
    "incomplete_nodes": [{{"node_id": "...", "suggested_addition": "..."}}],
    "incorrect_relationships": [{{"source": "...", "target": "...", "type": "...", "reason": "...", "suggestion": null}}],
    "missing_relationships": [{{"source": "...", "target": "...", "type": "..."}}]
  }},
  "summary": "one paragraph"
}}

Set has_issues to false only if all four lists are empty.

Source document:
{text}

Current graph:
{graph_json}"#
    );

    (system, user)
}

pub fn repair(text: &str, graph_json: &str, evaluation_json: &str) -> (String, String) {
    let system = "You are an expert knowledge-graph editor. Given an audit report, output only \
the modifications needed, never the whole graph. Return only JSON."
        .to_string();

    let user = format!(
        r#"Plan the modifications that fix the problems in the audit report.

Rules:
- Add a node for each missing node, with id, type and content taken from the document.
- For each incomplete node, give the text to append to its content.
- Delete relationships the audit marks as incorrect with no suggestion; modify those with a suggestion.
- Add missing relationships. Every new node must be connected to the graph by at least one added relationship.
- Keep everything the audit did not flag.

Return one JSON object with all five lists present (use [] when empty):
{{
  "nodes_to_add": [{{"id": "...", "type": "...", "content": "..."}}],
  "nodes_to_update": [{{"node_id": "existing node id", "content_to_add": "text to append"}}],
  "relationships_to_delete": [{{"source": "...", "target": "...", "type": "..."}}],
  "relationships_to_modify": [
    {{"old_relationship": {{"source": "...", "target": "...", "type": "..."}},
      "new_relationship": {{"source": "...", "target": "...", "type": "..."}}}}
  ],
  "relationships_to_add": [{{"source": "...", "target": "...", "type": "..."}}],
  "modification_summary": "what was changed and why"
}}

Source document:
{text}

Current graph:
{graph_json}

Audit report:
{evaluation_json}"#
    );

    (system, user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_lists_node_types() {
        let types = vec!["人物信息".to_string(), "能力设定".to_string()];
        let (_, user) = extraction("doc body", &types);
        assert!(user.contains("\"人物信息\", \"能力设定\""));
        assert!(user.ends_with("doc body"));
    }

    #[test]
    fn test_repair_embeds_all_inputs() {
        let (system, user) = repair("DOC", "{\"nodes\":[]}", "{\"has_issues\":true}");
        assert!(system.contains("modifications"));
        for part in ["DOC", "{\"nodes\":[]}", "{\"has_issues\":true}", "relationships_to_modify"] {
            assert!(user.contains(part), "missing {}", part);
        }
    }
}
