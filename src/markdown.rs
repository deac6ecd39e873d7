//! Parses a fixture document from Markdown.
//!
//! Grounded on the teacher's `schema.rs` idiom of normalizing a raw, loosely-typed
//! representation into the canonical internal model (there: legacy single-step tests folded
//! into the multi-step `Test` shape via a custom `Deserialize`; here: a raw section/heading tree
//! folded into [`crate::model::Document`]). Section and fence extraction itself is grounded on
//! `pulldown-cmark`, the document-parsing crate the wider example pack reaches for.

use crate::model::{
    Document, ExpectedResultSpec, ExpectedResultStrategy, FixtureStrategy, ParametersType,
    TableFixture, TestCase,
};
use crate::value::{normalize, Value};
use indexmap::IndexMap;
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use std::ops::Range;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid front matter: {0}")]
    InvalidFrontMatter(String),
    #[error("missing required section: {0}")]
    MissingRequiredSection(String),
    #[error("test case '{0}' has more than one Parameters block")]
    DuplicateParameters(String),
    #[error("test case '{0}' has more than one unnamed Expected Results block")]
    DuplicateExpectedResults(String),
    #[error("test case '{0}' has an invalid Expected Error value: {1}")]
    InvalidErrorType(String, String),
    #[error("test case '{0}' must have exactly one of Expected Error or Expected Results")]
    ExclusivityViolation(String),
    #[error("invalid data block: {0}")]
    InvalidDataBlock(String),
}

struct Heading {
    level: u8,
    text: String,
    end: usize,
}

struct CodeBlock {
    lang: String,
    content: String,
    start: usize,
}

struct Paragraph {
    text: String,
    start: usize,
}

fn heading_level_num(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Reconstructs a flattened inline string for a span of events, re-inserting `**`/`*`/backtick
/// markup so label patterns like `**Fixtures: users**` can be matched by plain text comparison.
fn flatten_inline(events: &[(Event<'_>, Range<usize>)], start: usize, end: usize) -> String {
    let mut out = String::new();
    let mut i = start;
    while i < end {
        match &events[i].0 {
            Event::Text(t) => out.push_str(t),
            Event::Code(t) => {
                out.push('`');
                out.push_str(t);
                out.push('`');
            }
            Event::SoftBreak | Event::HardBreak => out.push(' '),
            Event::Start(Tag::Strong) => out.push_str("**"),
            Event::End(TagEnd::Strong) => out.push_str("**"),
            Event::Start(Tag::Emphasis) => out.push('*'),
            Event::End(TagEnd::Emphasis) => out.push('*'),
            _ => {}
        }
        i += 1;
    }
    out
}

/// Computes 1-based line numbers from byte offsets.
struct LineIndex {
    newline_offsets: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let newline_offsets = text
            .char_indices()
            .filter(|(_, c)| *c == '\n')
            .map(|(i, _)| i)
            .collect();
        Self { newline_offsets }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.newline_offsets.partition_point(|&n| n < offset) + 1
    }
}

/// Strips a leading `---`-delimited YAML front-matter block, returning `(metadata, body,
/// body_offset)` where `body_offset` is the byte offset of `body` within the original text.
fn split_front_matter(text: &str) -> Result<(IndexMap<String, Value>, &str, usize), ParseError> {
    let trimmed_start = text.trim_start_matches('\u{feff}');
    let leading_ws = text.len() - trimmed_start.len();
    if !trimmed_start.starts_with("---") {
        return Ok((IndexMap::new(), text, 0));
    }
    let after_first = &trimmed_start[3..];
    let rest_start = after_first.find('\n').map(|i| i + 1).unwrap_or(0);
    let after_first_line = &after_first[rest_start..];
    let Some(end_rel) = after_first_line.find("\n---") else {
        return Err(ParseError::InvalidFrontMatter(
            "unterminated front matter block".to_string(),
        ));
    };
    let yaml_text = &after_first_line[..end_rel];
    let meta: serde_yaml::Value = serde_yaml::from_str(yaml_text)
        .map_err(|e| ParseError::InvalidFrontMatter(e.to_string()))?;
    let meta = match Value::from(meta) {
        Value::Map(m) => m,
        Value::Null => IndexMap::new(),
        _ => {
            return Err(ParseError::InvalidFrontMatter(
                "front matter must be a mapping".to_string(),
            ));
        }
    };

    let closing_line_end = after_first_line[end_rel + 1..]
        .find('\n')
        .map(|i| end_rel + 1 + i + 1)
        .unwrap_or(after_first_line.len());
    let body_offset_rel = rest_start + closing_line_end;
    let body_offset = leading_ws + 3 + body_offset_rel;
    Ok((meta, &text[body_offset..], body_offset))
}

struct Scanned {
    headings: Vec<Heading>,
    code_blocks: Vec<CodeBlock>,
    paragraphs: Vec<Paragraph>,
}

fn scan(body: &str) -> Scanned {
    let parser = Parser::new_ext(body, Options::empty());
    let events: Vec<(Event<'_>, Range<usize>)> = parser.into_offset_iter().collect();

    let mut headings = Vec::new();
    let mut code_blocks = Vec::new();
    let mut paragraphs = Vec::new();

    let mut i = 0;
    while i < events.len() {
        match &events[i].0 {
            Event::Start(Tag::Heading { level, .. }) => {
                let lvl = heading_level_num(*level);
                let content_start = i + 1;
                let mut j = content_start;
                while j < events.len() && !matches!(events[j].0, Event::End(TagEnd::Heading(_))) {
                    j += 1;
                }
                let text = flatten_inline(&events, content_start, j).trim().to_string();
                let end = events.get(j).map(|(_, r)| r.end).unwrap_or(body.len());
                headings.push(Heading { level: lvl, text, end });
                i = j + 1;
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().unwrap_or("").to_lowercase()
                    }
                    CodeBlockKind::Indented => String::new(),
                };
                let content_start = i + 1;
                let mut j = content_start;
                let mut content = String::new();
                while j < events.len() && !matches!(events[j].0, Event::End(TagEnd::CodeBlock)) {
                    if let Event::Text(t) = &events[j].0 {
                        content.push_str(t);
                    }
                    j += 1;
                }
                let start = events[i].1.start;
                code_blocks.push(CodeBlock { lang, content, start });
                i = j + 1;
            }
            Event::Start(Tag::Paragraph) => {
                let content_start = i + 1;
                let mut j = content_start;
                while j < events.len() && !matches!(events[j].0, Event::End(TagEnd::Paragraph)) {
                    j += 1;
                }
                let text = flatten_inline(&events, content_start, j).trim().to_string();
                let start = events[i].1.start;
                paragraphs.push(Paragraph { text, start });
                i = j + 1;
            }
            _ => i += 1,
        }
    }

    Scanned { headings, code_blocks, paragraphs }
}

fn section_name_matches(name: &str, aliases: &[&str]) -> bool {
    let lower = name.to_lowercase();
    aliases.iter().any(|a| lower == *a)
}

/// Byte range covered by an H2 section identified by its heading index.
fn section_range(headings: &[&Heading], idx: usize, doc_len: usize) -> (usize, usize) {
    let start = headings[idx].end;
    let end = headings.get(idx + 1).map(|h| h.end).unwrap_or(doc_len);
    // end above is the end of the *next* heading's own text; we actually want where the next
    // heading *starts*, which for our purposes (finding blocks strictly before it) is fine since
    // blocks are compared by start offset being within [start, next_heading_start).
    (start, end)
}

/// Parses fixture/expected-result body text (YAML, JSON, or CSV) into row maps.
fn parse_rows_block(lang: &str, content: &str) -> Result<Vec<IndexMap<String, Value>>, ParseError> {
    match lang {
        "csv" => crate::formats::decode_csv_rows(content)
            .map_err(|e| ParseError::InvalidDataBlock(e.to_string())),
        "xml" => crate::formats::decode_xml_dataset(content)
            .map_err(|e| ParseError::InvalidDataBlock(e.to_string()))
            .map(|tables| tables.into_values().flatten().collect()),
        "json" => {
            let v: serde_json::Value = serde_json::from_str(content)
                .map_err(|e| ParseError::InvalidDataBlock(e.to_string()))?;
            rows_from_value(Value::from(v))
        }
        _ => {
            let v: serde_yaml::Value = serde_yaml::from_str(content)
                .map_err(|e| ParseError::InvalidDataBlock(e.to_string()))?;
            rows_from_value(Value::from(v))
        }
    }
}

fn rows_from_value(v: Value) -> Result<Vec<IndexMap<String, Value>>, ParseError> {
    match normalize(v) {
        Value::Seq(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Map(m) => Ok(m),
                other => Err(ParseError::InvalidDataBlock(format!(
                    "expected a row mapping, got {}",
                    other.display()
                ))),
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(ParseError::InvalidDataBlock(format!(
            "expected a sequence of rows, got {}",
            other.display()
        ))),
    }
}

/// Parses `tableName[strategyTag]` into `(table, strategy)`.
fn parse_fixture_spec(spec: &str) -> (String, FixtureStrategy) {
    let spec = spec.trim();
    if let Some(open) = spec.find('[') {
        if let Some(close) = spec.find(']') {
            if close > open {
                let table = spec[..open].trim().to_string();
                let tag = &spec[open + 1..close];
                return (table, FixtureStrategy::parse(tag));
            }
        }
    }
    (spec.to_string(), FixtureStrategy::ClearInsert)
}

fn parse_expected_result_spec(spec: &str) -> (String, ExpectedResultStrategy) {
    let spec = spec.trim();
    if let Some(open) = spec.find('[') {
        if let Some(close) = spec.find(']') {
            if close > open {
                let table = spec[..open].trim().to_string();
                let tag = &spec[open + 1..close];
                return (table, ExpectedResultStrategy::parse(tag));
            }
        }
    }
    (spec.to_string(), ExpectedResultStrategy::All)
}

/// Matches a flattened label line: `**Label**` or `**Label: rest**` or `**Label:** rest`.
fn match_label(text: &str) -> Option<(String, String)> {
    let text = text.trim();
    if !text.starts_with("**") {
        return None;
    }
    let rest = &text[2..];
    let close = rest.find("**")?;
    let inside = &rest[..close];
    let after = rest[close + 2..].trim_start_matches(':').trim();

    let (label, inline) = match inside.split_once(':') {
        Some((l, r)) => (l.trim().to_string(), r.trim().to_string()),
        None => (inside.trim().to_string(), String::new()),
    };
    let inline = if inline.is_empty() { after.to_string() } else { inline };
    Some((label, inline))
}

/// Parses a single test case from the events scanned within its H3 range.
fn parse_test_case(
    name: &str,
    source_file: &str,
    line: usize,
    headings: &[&Heading],
    paragraphs: &[&Paragraph],
    code_blocks: &[&CodeBlock],
    range_start: usize,
    range_end: usize,
) -> Result<TestCase, ParseError> {
    let mut tc = TestCase::new(name, source_file, line);

    let mut items: Vec<(usize, bool, usize)> = Vec::new(); // (start, is_paragraph, idx)
    for (idx, p) in paragraphs.iter().enumerate() {
        if p.start >= range_start && p.start < range_end {
            items.push((p.start, true, idx));
        }
    }
    for (idx, c) in code_blocks.iter().enumerate() {
        if c.start >= range_start && c.start < range_end {
            items.push((c.start, false, idx));
        }
    }
    items.sort_by_key(|(start, ..)| *start);

    let mut has_unnamed_expected = false;

    let mut i = 0;
    while i < items.len() {
        let (_, is_paragraph, idx) = items[i];
        if !is_paragraph {
            i += 1;
            continue;
        }
        let p = paragraphs[idx];
        let Some((label, inline)) = match_label(&p.text) else {
            i += 1;
            continue;
        };
        let label_lower = label.to_lowercase();

        let next_code = items
            .get(i + 1)
            .filter(|(_, is_para, _)| !is_para)
            .map(|(_, _, ci)| code_blocks[*ci]);

        if label_lower == "parameters" {
            if !tc.parameters.is_empty() {
                return Err(ParseError::DuplicateParameters(tc.name.clone()));
            }
            if let Some(cb) = next_code {
                let v = if cb.lang == "json" {
                    Value::from(
                        serde_json::from_str::<serde_json::Value>(&cb.content)
                            .map_err(|e| ParseError::InvalidDataBlock(e.to_string()))?,
                    )
                } else {
                    Value::from(
                        serde_yaml::from_str::<serde_yaml::Value>(&cb.content)
                            .map_err(|e| ParseError::InvalidDataBlock(e.to_string()))?,
                    )
                };
                if let Value::Map(m) = normalize(v) {
                    tc.parameters = m;
                }
                i += 2;
                continue;
            }
        } else if label_lower == "fixtures" {
            let (table, strategy) = parse_fixture_spec(&inline);
            if let Some(cb) = next_code {
                let data = parse_rows_block(&cb.lang, &cb.content)?;
                tc.fixtures.push(TableFixture {
                    table_name: table,
                    strategy,
                    data,
                    external_file: None,
                });
                i += 2;
                continue;
            } else if !inline.is_empty() {
                tc.fixtures.push(TableFixture {
                    table_name: table,
                    strategy,
                    data: Vec::new(),
                    external_file: Some(inline),
                });
            }
        } else if label_lower == "expected results" {
            let (table, strategy) = parse_expected_result_spec(&inline);
            if let Some(cb) = next_code {
                let data = parse_rows_block(&cb.lang, &cb.content)?;
                if table.is_empty() {
                    if has_unnamed_expected {
                        return Err(ParseError::DuplicateExpectedResults(tc.name.clone()));
                    }
                    has_unnamed_expected = true;
                    tc.expected_result = Some(data);
                } else {
                    tc.expected_results.push(ExpectedResultSpec {
                        table_name: table,
                        strategy,
                        data,
                        external_file: None,
                    });
                }
                i += 2;
                continue;
            } else if !inline.is_empty() {
                tc.expected_results.push(ExpectedResultSpec {
                    table_name: table,
                    strategy,
                    data: Vec::new(),
                    external_file: Some(inline),
                });
            }
        } else if label_lower == "expected error" {
            let text = inline.trim().to_string();
            if crate::error_classifier::parse_error_kind(&text).is_none() {
                return Err(ParseError::InvalidErrorType(tc.name.clone(), text));
            }
            tc.expected_error = Some(crate::error_classifier::normalize_error_text(&text));
        } else if label_lower == "verify query" {
            if let Some(cb) = next_code {
                tc.verify_query = Some(cb.content.trim().to_string());
                i += 2;
                continue;
            }
        } else if label_lower == "result order" {
            tc.result_ordered = inline.trim().eq_ignore_ascii_case("ordered");
        }
        i += 1;
    }

    if !tc.has_expectation() {
        return Err(ParseError::ExclusivityViolation(tc.name.clone()));
    }
    if !tc.is_error_expectation_exclusive() {
        return Err(ParseError::ExclusivityViolation(tc.name.clone()));
    }

    let _ = headings;
    Ok(tc)
}

/// Decodes a document's declared-parameters block into a value map. `List` blocks only declare
/// parameter names with no defaults, so they contribute nothing to the merge in the runner's
/// preparation stage.
pub(crate) fn decode_param_map(text: &str, ptype: ParametersType) -> IndexMap<String, Value> {
    let parsed = match ptype {
        ParametersType::List => None,
        ParametersType::Json => serde_json::from_str::<serde_json::Value>(text).ok().map(Value::from),
        ParametersType::Yaml => serde_yaml::from_str::<serde_yaml::Value>(text).ok().map(Value::from),
    };
    match parsed.map(normalize) {
        Some(Value::Map(m)) => m,
        _ => IndexMap::new(),
    }
}

/// Parses a whole fixture Markdown document.
pub fn parse(source_file: &str, text: &str) -> Result<Document, ParseError> {
    let (metadata, body, body_offset) = split_front_matter(text)?;
    let line_index = LineIndex::new(text);
    let scanned = scan(body);

    let h2s: Vec<&Heading> = scanned.headings.iter().filter(|h| h.level == 2).collect();
    if h2s.is_empty() {
        return Err(ParseError::MissingRequiredSection("sql".to_string()));
    }

    let mut description_found = false;
    let mut sql_section: Option<(usize, usize)> = None;
    let mut parameters_section: Option<(usize, usize)> = None;
    let mut test_cases_section: Option<(usize, usize)> = None;

    for (i, h) in h2s.iter().enumerate() {
        let (start, end) = section_range(&h2s, i, body.len());
        if section_name_matches(&h.text, &["description", "overview"]) {
            description_found = true;
        } else if section_name_matches(&h.text, &["sql"]) {
            sql_section = Some((start, end));
        } else if section_name_matches(&h.text, &["parameters", "params", "parameter"]) {
            parameters_section = Some((start, end));
        } else if section_name_matches(&h.text, &["test cases"]) {
            test_cases_section = Some((start, end));
        }
    }

    if !description_found {
        return Err(ParseError::MissingRequiredSection(
            "description|overview".to_string(),
        ));
    }
    let Some((sql_start, sql_end)) = sql_section else {
        return Err(ParseError::MissingRequiredSection("sql".to_string()));
    };

    let sql_block = scanned
        .code_blocks
        .iter()
        .find(|cb| cb.lang == "sql" && cb.start >= sql_start && cb.start < sql_end)
        .ok_or_else(|| ParseError::MissingRequiredSection("sql".to_string()))?;
    let sql = sql_block.content.clone();
    let sql_start_line = line_index.line_of(body_offset + sql_block.start);

    let mut parameters_text = None;
    let mut parameters_type = None;
    if let Some((pstart, pend)) = parameters_section {
        if let Some(cb) = scanned
            .code_blocks
            .iter()
            .find(|cb| cb.start >= pstart && cb.start < pend && matches!(cb.lang.as_str(), "yaml" | "yml" | "json"))
        {
            parameters_text = Some(cb.content.clone());
            parameters_type = Some(if cb.lang == "json" {
                ParametersType::Json
            } else {
                ParametersType::Yaml
            });
        } else {
            let list_items: Vec<&str> = body[pstart..pend.min(body.len())]
                .lines()
                .filter(|l| l.trim_start().starts_with('-'))
                .collect();
            if !list_items.is_empty() {
                parameters_text = Some(list_items.join("\n"));
                parameters_type = Some(ParametersType::List);
            }
        }
    }

    let mut test_cases = Vec::new();
    if let Some((tc_start, tc_end)) = test_cases_section {
        let h3s: Vec<&Heading> = scanned
            .headings
            .iter()
            .filter(|h| h.level == 3 && h.end >= tc_start && h.end <= tc_end)
            .collect();
        let paragraphs: Vec<&Paragraph> = scanned.paragraphs.iter().collect();
        let code_blocks: Vec<&CodeBlock> = scanned.code_blocks.iter().collect();

        for (i, h) in h3s.iter().enumerate() {
            let case_start = h.end;
            let case_end = h3s.get(i + 1).map(|n| n.end).unwrap_or(tc_end);
            let line = line_index.line_of(body_offset + h.end);
            let tc = parse_test_case(
                &h.text,
                source_file,
                line,
                &h3s,
                &paragraphs,
                &code_blocks,
                case_start,
                case_end,
            )?;
            test_cases.push(tc);
        }
    }

    Ok(Document {
        metadata,
        sql,
        sql_start_line,
        parameters_text,
        parameters_type,
        test_cases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"# Find user by email

## Description

Finds a user row by email address.

## SQL

```sql
SELECT id, name FROM users WHERE email = {{email}}
```

## Parameters

```yaml
email: string
```

## Test Cases

### finds an existing user

**Parameters:**
```yaml
email: alice@example.com
```

**Fixtures: users**
```yaml
- id: 1
  email: alice@example.com
  name: Alice
```

**Expected Results:**
```yaml
- id: 1
  name: Alice
```

### rejects a duplicate email

**Fixtures: users**
```yaml
- id: 1
  email: existing@example.com
  name: Alice
```

**Expected Error:** unique_violation
"#;

    #[test]
    fn parses_minimal_document() {
        let doc = parse("queries/find_user.md", DOC).unwrap();
        assert!(doc.sql.contains("SELECT id, name FROM users"));
        assert_eq!(doc.test_cases.len(), 2);
        assert_eq!(doc.test_cases[0].name, "finds an existing user");
        assert_eq!(doc.test_cases[0].fixtures.len(), 1);
        assert_eq!(doc.test_cases[0].fixtures[0].table_name, "users");
        assert_eq!(
            doc.test_cases[0].parameters.get("email"),
            Some(&Value::String("alice@example.com".to_string()))
        );
        assert!(doc.test_cases[0].expected_result.is_some());
        assert_eq!(doc.test_cases[1].expected_error.as_deref(), Some("unique violation"));
    }

    #[test]
    fn rejects_case_with_neither_expectation() {
        let text = r#"## Description
x
## SQL
```sql
SELECT 1
```
## Test Cases
### broken case
no expectations here
"#;
        let err = parse("x.md", text).unwrap_err();
        assert!(matches!(err, ParseError::ExclusivityViolation(_)));
    }
}
