//! Flow specification parser.
//!
//! Agent responses are untrusted free text that may embed one structured
//! flow description as a fenced JSON block. The parser locates and decodes
//! that block, then validates it into a strict `FlowSpec`. Absence of a
//! block is `ParseError::NoStructuredFlow`; shape violations are
//! `ParseError::MalformedFlow` naming the offending field. Neither is fatal
//! to the plan pass: both signal the synthesizer to fall back to a linear
//! prompt/response chain.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use agentflow_core::{ParseError, Verdict};

/// Normalized flow specification extracted from a response.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSpec {
    pub nodes: Vec<SpecNode>,
    pub edges: Vec<SpecEdge>,
}

/// One declared node descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecNode {
    pub id: String,
    pub label: String,
    pub node_type: SpecNodeType,
    /// Branch successors (both required when `node_type` is `Branch`).
    pub on_true: Option<String>,
    pub on_false: Option<String>,
    /// Loop body entry; `None` means the loop node itself.
    pub target: Option<String>,
    /// Loop exit successor.
    pub on_exit: Option<String>,
    /// Declared loop bound, before clamping.
    pub max_iterations: Option<i64>,
    /// Pre-declared evaluation outcome.
    pub verdict: Option<Verdict>,
    pub score: Option<Value>,
    /// Descriptor fields beyond the recognized schema, carried through to
    /// the synthesized node's metadata.
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpecNodeType {
    Prompt,
    Response,
    Branch,
    Loop,
    Evaluation,
    /// Agent-invented kind, accepted and tagged rather than rejected.
    Other(String),
}

impl SpecNodeType {
    fn from_declared(declared: &str) -> Self {
        match declared {
            "prompt" => SpecNodeType::Prompt,
            "response" => SpecNodeType::Response,
            "branch" => SpecNodeType::Branch,
            "loop" => SpecNodeType::Loop,
            "evaluation" => SpecNodeType::Evaluation,
            other => SpecNodeType::Other(other.to_string()),
        }
    }
}

/// One declared edge descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecEdge {
    pub from: String,
    pub to: String,
}

/// Fields consumed by the recognized descriptor schema; everything else
/// lands in the node's metadata.
const KNOWN_NODE_FIELDS: [&str; 10] = [
    "id",
    "label",
    "type",
    "on_true",
    "on_false",
    "target",
    "on_exit",
    "max_iterations",
    "verdict",
    "score",
];

/// Parse raw response text into a normalized flow specification.
pub fn parse(raw: &str) -> Result<FlowSpec, ParseError> {
    let value = extract_structured_block(raw).ok_or(ParseError::NoStructuredFlow)?;
    spec_from_value(&value)
}

/// Locate the first decodable structured block: a fenced JSON object, or
/// the whole response when it is itself a JSON object.
fn extract_structured_block(text: &str) -> Option<Value> {
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let Some(end) = after.find("```") else {
            break;
        };
        let block = &after[..end];
        // Strip an optional language tag line (```json, ```flow, ...).
        let body = match block.trim_start().starts_with(['{', '[']) {
            true => block,
            false => block.split_once('\n').map(|(_, b)| b).unwrap_or(""),
        };
        if let Ok(value) = serde_json::from_str::<Value>(body.trim()) {
            if value.is_object() {
                return Some(value);
            }
        }
        rest = &after[end + 3..];
    }

    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            if value.is_object() {
                return Some(value);
            }
        }
    }
    None
}

fn spec_from_value(value: &Value) -> Result<FlowSpec, ParseError> {
    let map = value
        .as_object()
        .ok_or_else(|| ParseError::malformed("flow block must be a mapping"))?;

    let nodes_value = map
        .get("nodes")
        .ok_or_else(|| ParseError::malformed("missing 'nodes' sequence"))?
        .as_array()
        .ok_or_else(|| ParseError::malformed("'nodes' must be a sequence"))?;
    if nodes_value.is_empty() {
        return Err(ParseError::malformed("'nodes' must be a non-empty sequence"));
    }

    let edges_value = map
        .get("edges")
        .ok_or_else(|| ParseError::malformed("missing 'edges' sequence"))?
        .as_array()
        .ok_or_else(|| ParseError::malformed("'edges' must be a sequence"))?;

    let mut nodes = Vec::with_capacity(nodes_value.len());
    let mut seen = HashSet::new();
    for (index, descriptor) in nodes_value.iter().enumerate() {
        let node = node_from_value(index, descriptor)?;
        if !seen.insert(node.id.clone()) {
            return Err(ParseError::malformed(format!(
                "duplicate node id '{}'",
                node.id
            )));
        }
        nodes.push(node);
    }

    let mut edges = Vec::with_capacity(edges_value.len());
    for (index, descriptor) in edges_value.iter().enumerate() {
        edges.push(edge_from_value(index, descriptor)?);
    }

    check_references(&nodes, &edges)?;
    Ok(FlowSpec { nodes, edges })
}

fn node_from_value(index: usize, value: &Value) -> Result<SpecNode, ParseError> {
    let map = value
        .as_object()
        .ok_or_else(|| ParseError::malformed(format!("node {} must be a mapping", index)))?;

    let id = required_str(map, "id", index)?;
    let label = required_str(map, "label", index)?;
    let declared = required_str(map, "type", index)?;
    let node_type = SpecNodeType::from_declared(&declared);

    let on_true = optional_str(map, &id, "on_true")?;
    let on_false = optional_str(map, &id, "on_false")?;
    let target = optional_str(map, &id, "target")?;
    let on_exit = optional_str(map, &id, "on_exit")?;

    if node_type == SpecNodeType::Branch {
        if on_true.is_none() {
            return Err(ParseError::malformed(format!(
                "branch node '{}' missing 'on_true'",
                id
            )));
        }
        if on_false.is_none() {
            return Err(ParseError::malformed(format!(
                "branch node '{}' missing 'on_false'",
                id
            )));
        }
    }

    let max_iterations = match map.get("max_iterations") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_i64().ok_or_else(|| {
            ParseError::malformed(format!(
                "node '{}' field 'max_iterations' must be an integer",
                id
            ))
        })?),
    };

    let verdict = match map.get("verdict") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s == "pass" => Some(Verdict::Pass),
        Some(Value::String(s)) if s == "fail" => Some(Verdict::Fail),
        Some(_) => {
            return Err(ParseError::malformed(format!(
                "node '{}' field 'verdict' must be 'pass' or 'fail'",
                id
            )));
        }
    };

    let score = map.get("score").filter(|v| !v.is_null()).cloned();

    let metadata = map
        .iter()
        .filter(|(key, _)| !KNOWN_NODE_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(SpecNode {
        id,
        label,
        node_type,
        on_true,
        on_false,
        target,
        on_exit,
        max_iterations,
        verdict,
        score,
        metadata,
    })
}

fn edge_from_value(index: usize, value: &Value) -> Result<SpecEdge, ParseError> {
    let map = value
        .as_object()
        .ok_or_else(|| ParseError::malformed(format!("edge {} must be a mapping", index)))?;
    let from = map
        .get("from")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::malformed(format!("edge {} missing 'from'", index)))?;
    let to = map
        .get("to")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::malformed(format!("edge {} missing 'to'", index)))?;
    Ok(SpecEdge {
        from: from.to_string(),
        to: to.to_string(),
    })
}

/// Every id referenced by an edge or a node's successor fields must be
/// declared among the nodes.
fn check_references(nodes: &[SpecNode], edges: &[SpecEdge]) -> Result<(), ParseError> {
    let declared: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

    for edge in edges {
        for id in [&edge.from, &edge.to] {
            if !declared.contains(id.as_str()) {
                return Err(ParseError::malformed(format!(
                    "edge references unknown node '{}'",
                    id
                )));
            }
        }
    }

    for node in nodes {
        for (field, reference) in [
            ("on_true", &node.on_true),
            ("on_false", &node.on_false),
            ("target", &node.target),
            ("on_exit", &node.on_exit),
        ] {
            if let Some(id) = reference {
                if !declared.contains(id.as_str()) {
                    return Err(ParseError::malformed(format!(
                        "node '{}' field '{}' references unknown node '{}'",
                        node.id, field, id
                    )));
                }
            }
        }
    }
    Ok(())
}

fn required_str(
    map: &serde_json::Map<String, Value>,
    field: &str,
    index: usize,
) -> Result<String, ParseError> {
    map.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ParseError::malformed(format!("node {} missing '{}'", index, field)))
}

fn optional_str(
    map: &serde_json::Map<String, Value>,
    id: &str,
    field: &str,
) -> Result<Option<String>, ParseError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.is_empty() => Ok(Some(s.clone())),
        Some(_) => Err(ParseError::malformed(format!(
            "node '{}' field '{}' must be a non-empty string",
            id, field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_FLOW: &str = r#"Here is my plan:

```json
{
  "nodes": [
    {"id": "ask", "label": "Ask the model", "type": "prompt"},
    {"id": "answer", "label": "Collect the answer", "type": "response"}
  ],
  "edges": [
    {"from": "ask", "to": "answer"}
  ]
}
```

That should do it."#;

    #[test]
    fn test_parse_fenced_flow() {
        let spec = parse(SIMPLE_FLOW).unwrap();
        assert_eq!(spec.nodes.len(), 2);
        assert_eq!(spec.nodes[0].id, "ask");
        assert_eq!(spec.nodes[0].node_type, SpecNodeType::Prompt);
        assert_eq!(spec.edges.len(), 1);
    }

    #[test]
    fn test_parse_bare_json_object() {
        let raw = r#"{"nodes": [{"id": "a", "label": "A", "type": "prompt"}], "edges": []}"#;
        let spec = parse(raw).unwrap();
        assert_eq!(spec.nodes.len(), 1);
    }

    #[test]
    fn test_no_structured_flow() {
        let err = parse("Just prose, no structure at all.").unwrap_err();
        assert_eq!(err, ParseError::NoStructuredFlow);
    }

    #[test]
    fn test_non_flow_fence_is_skipped() {
        let raw = "```python\nprint('hi')\n```\nno flow here";
        assert_eq!(parse(raw).unwrap_err(), ParseError::NoStructuredFlow);
    }

    #[test]
    fn test_missing_id_named_in_detail() {
        let raw = r#"```json
{"nodes": [{"label": "A", "type": "prompt"}], "edges": []}
```"#;
        match parse(raw).unwrap_err() {
            ParseError::MalformedFlow { detail } => assert!(detail.contains("'id'")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let raw = r#"```json
{"nodes": [
  {"id": "a", "label": "A", "type": "prompt"},
  {"id": "a", "label": "A again", "type": "response"}
], "edges": []}
```"#;
        match parse(raw).unwrap_err() {
            ParseError::MalformedFlow { detail } => assert!(detail.contains("duplicate")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_edge_to_unknown_node_rejected() {
        let raw = r#"```json
{"nodes": [{"id": "a", "label": "A", "type": "prompt"}],
 "edges": [{"from": "a", "to": "ghost"}]}
```"#;
        match parse(raw).unwrap_err() {
            ParseError::MalformedFlow { detail } => assert!(detail.contains("ghost")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_branch_requires_both_arms() {
        let raw = r#"```json
{"nodes": [
  {"id": "b", "label": "Decide", "type": "branch", "on_true": "t"},
  {"id": "t", "label": "T", "type": "prompt"}
], "edges": []}
```"#;
        match parse(raw).unwrap_err() {
            ParseError::MalformedFlow { detail } => assert!(detail.contains("on_false")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_max_iterations_must_be_integer() {
        let raw = r#"```json
{"nodes": [
  {"id": "l", "label": "Repeat", "type": "loop", "max_iterations": "three"}
], "edges": []}
```"#;
        match parse(raw).unwrap_err() {
            ParseError::MalformedFlow { detail } => assert!(detail.contains("max_iterations")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_tagged_not_rejected() {
        let raw = r#"```json
{"nodes": [{"id": "x", "label": "X", "type": "quantum_leap"}], "edges": []}
```"#;
        let spec = parse(raw).unwrap();
        assert_eq!(
            spec.nodes[0].node_type,
            SpecNodeType::Other("quantum_leap".to_string())
        );
    }

    #[test]
    fn test_extra_fields_become_metadata() {
        let raw = r#"```json
{"nodes": [
  {"id": "e", "label": "Self-check", "type": "evaluation",
   "verdict": "fail", "score": 0.4, "justification": "missing branch coverage"}
], "edges": []}
```"#;
        let spec = parse(raw).unwrap();
        assert_eq!(spec.nodes[0].verdict, Some(Verdict::Fail));
        assert_eq!(
            spec.nodes[0].metadata.get("justification"),
            Some(&serde_json::json!("missing branch coverage"))
        );
    }

    #[test]
    fn test_parse_is_idempotent() {
        let first = parse(SIMPLE_FLOW).unwrap();
        let second = parse(SIMPLE_FLOW).unwrap();
        assert_eq!(first, second);
    }
}
