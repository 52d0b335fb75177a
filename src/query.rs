//! Extraction expressions for document-style backends.
//!
//! An [`Extraction`] is compiled once, when the reference is parsed, and
//! evaluated against a JSON document after it has been fetched. The language
//! is a small XPath-like path syntax:
//!
//! | Expression               | Selects                                       |
//! |--------------------------|-----------------------------------------------|
//! | `a/b`                    | field `b` of field `a` of the document root   |
//! | `/a/b`                   | same as `a/b`                                 |
//! | `//ip`                   | every field named `ip`, at any depth          |
//! | `items/*`                | every element (or value) of `items`           |
//! | `items/*[2]/id`          | field `id` of the second element of `items`   |
//! | `items/*[last()]`        | the last element of `items`                   |
//! | `//servers/*[name='a']`  | elements of `servers` whose `name` is `a`     |
//! | `ports/*[port=8080]`     | elements whose `port` is numerically 8080     |
//!
//! Objects expose their fields as named children in document order; arrays
//! expose their elements as anonymous children that only `*` matches.
//! Predicates apply left to right, so `*[role='db'][1]` is the first element
//! whose `role` is `db`.

use crate::{Result, SecretRefError};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// A compiled extraction expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    source: String,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Name(String),
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    /// `[n]`, 1-based.
    Position(usize),
    /// `[last()]`
    Last,
    /// `[field='text']` or `[field=123]`
    Equals { field: String, literal: Literal },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Literal {
    Text(String),
    /// Kept as written; validated as a finite number at compile time.
    Number(String),
}

impl Extraction {
    /// Compiles an expression.
    ///
    /// # Errors
    ///
    /// Returns [`SecretRefError::MalformedReference`] for empty steps,
    /// trailing separators, unbalanced or unsupported predicates, unquoted
    /// non-numeric literals and zero positions.
    ///
    /// # Example
    ///
    /// ```
    /// use secretref::query::Extraction;
    /// use serde_json::json;
    ///
    /// let doc = json!({"servers": [{"host": "a"}, {"host": "b"}]});
    ///
    /// let second = Extraction::compile("servers/*[2]/host").unwrap();
    /// assert_eq!(second.first(&doc), Some(&json!("b")));
    ///
    /// let by_value = Extraction::compile("//servers/*[host='a']/host").unwrap();
    /// assert_eq!(by_value.first(&doc), Some(&json!("a")));
    ///
    /// assert!(Extraction::compile("servers//").is_err());
    /// ```
    pub fn compile(expression: &str) -> Result<Self> {
        let fail = |reason: &str| SecretRefError::malformed(expression, reason);

        let (mut descendant, body) = if let Some(rest) = expression.strip_prefix("//") {
            (true, rest)
        } else if let Some(rest) = expression.strip_prefix('/') {
            (false, rest)
        } else {
            (false, expression)
        };

        if body.is_empty() {
            return Err(fail("extraction expression is empty"));
        }

        let mut steps = Vec::new();
        for segment in split_steps(body) {
            if segment.is_empty() {
                if descendant {
                    return Err(fail("extraction expression has an empty step"));
                }
                descendant = true;
                continue;
            }

            let axis = if descendant {
                Axis::Descendant
            } else {
                Axis::Child
            };
            steps.push(parse_step(segment, axis).map_err(|reason| fail(&reason))?);
            descendant = false;
        }

        if descendant {
            return Err(fail("extraction expression ends with '/'"));
        }

        Ok(Self {
            source: expression.to_string(),
            steps,
        })
    }

    /// The expression text as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluates the expression and returns every match in document order.
    pub fn select<'a>(&self, document: &'a Value) -> Vec<&'a Value> {
        in_document_order(document, &self.matches(document), usize::MAX)
    }

    /// Evaluates the expression and returns the first match in document
    /// order.
    pub fn first<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        in_document_order(document, &self.matches(document), 1)
            .into_iter()
            .next()
    }

    /// Identities of the matched nodes.
    ///
    /// Every step visits each node at most once, so evaluation is linear in
    /// the size of the document. Context nodes stay unique: children of
    /// distinct nodes are distinct, and descendant walks skip subtrees they
    /// have already covered.
    fn matches(&self, document: &Value) -> HashSet<*const Value> {
        let mut current = vec![document];

        for step in &self.steps {
            let mut next = Vec::new();
            match step.axis {
                Axis::Child => {
                    for node in current {
                        let candidates = children(node);
                        next.extend(step.select(&candidates).into_iter().map(|i| candidates[i].1));
                    }
                }
                Axis::Descendant => {
                    let mut visited = HashSet::new();
                    for node in current {
                        step.walk(node, &mut visited, &mut next);
                    }
                }
            }
            current = next;
            if current.is_empty() {
                break;
            }
        }

        current.into_iter().map(|node| node as *const Value).collect()
    }
}

impl fmt::Display for Extraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Step {
    /// Indices of the children that pass the node test and every predicate.
    fn select(&self, children: &[(Option<&str>, &Value)]) -> Vec<usize> {
        let mut picked: Vec<usize> = children
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| match &self.test {
                NodeTest::Any => true,
                NodeTest::Name(wanted) => *name == Some(wanted.as_str()),
            })
            .map(|(i, _)| i)
            .collect();

        for predicate in &self.predicates {
            picked = match predicate {
                Predicate::Position(n) => picked.get(n - 1).copied().into_iter().collect(),
                Predicate::Last => picked.last().copied().into_iter().collect(),
                Predicate::Equals { field, literal } => picked
                    .into_iter()
                    .filter(|&i| literal.matches_field(children[i].1, field))
                    .collect(),
            };
        }

        picked
    }

    /// Applies the step below `node` and every node under it.
    fn walk<'a>(
        &self,
        node: &'a Value,
        visited: &mut HashSet<*const Value>,
        out: &mut Vec<&'a Value>,
    ) {
        // A visited node had its whole subtree walked already.
        if !visited.insert(node as *const Value) {
            return;
        }

        let candidates = children(node);
        out.extend(self.select(&candidates).into_iter().map(|i| candidates[i].1));
        for (_, child) in candidates {
            self.walk(child, visited, out);
        }
    }
}

impl Literal {
    /// True when `node` is an object whose `field` equals the literal.
    ///
    /// Text literals compare with the field's scalar text; numeric literals
    /// compare numerically with numbers and numeric strings.
    fn matches_field(&self, node: &Value, field: &str) -> bool {
        let Some(value) = node.as_object().and_then(|map| map.get(field)) else {
            return false;
        };

        match self {
            Literal::Text(text) => match value {
                Value::String(s) => s == text,
                Value::Number(n) => n.to_string() == *text,
                Value::Bool(b) => b.to_string() == *text,
                _ => false,
            },
            Literal::Number(number) => {
                let Ok(wanted) = number.parse::<f64>() else {
                    return false;
                };
                match value {
                    Value::Number(n) => n.as_f64() == Some(wanted),
                    Value::String(s) => s.trim().parse::<f64>().ok() == Some(wanted),
                    _ => false,
                }
            }
        }
    }
}

fn children(node: &Value) -> Vec<(Option<&str>, &Value)> {
    match node {
        Value::Object(map) => map.iter().map(|(k, v)| (Some(k.as_str()), v)).collect(),
        Value::Array(items) => items.iter().map(|v| (None, v)).collect(),
        _ => Vec::new(),
    }
}

/// Pre-order pass over `document` collecting up to `limit` matched nodes.
fn in_document_order<'a>(
    document: &'a Value,
    matches: &HashSet<*const Value>,
    limit: usize,
) -> Vec<&'a Value> {
    let wanted = limit.min(matches.len());
    let mut out = Vec::with_capacity(wanted);
    let mut stack = vec![document];

    while out.len() < wanted {
        let Some(node) = stack.pop() else { break };
        if matches.contains(&(node as *const Value)) {
            out.push(node);
        }
        match node {
            Value::Object(map) => stack.extend(map.values().rev()),
            Value::Array(items) => stack.extend(items.iter().rev()),
            _ => {}
        }
    }

    out
}

/// Splits on `/` outside predicates.
fn split_steps(body: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in body.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' if depth > 0 => quote = Some(c),
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                '/' if depth == 0 => {
                    segments.push(&body[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }

    segments.push(&body[start..]);
    segments
}

/// Byte offset of the first `]` outside quotes.
fn closing_bracket(text: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == ']' => return Some(i),
            None => {}
        }
    }
    None
}

fn parse_step(segment: &str, axis: Axis) -> std::result::Result<Step, String> {
    let open = segment.find('[').unwrap_or(segment.len());
    let name = &segment[..open];

    if name.is_empty() {
        return Err(format!("step {segment:?} has no name"));
    }
    if name.contains(']') {
        return Err(format!("unexpected ']' in step {segment:?}"));
    }

    let mut predicates = Vec::new();
    let mut rest = &segment[open..];
    while let Some(body) = rest.strip_prefix('[') {
        let close = closing_bracket(body)
            .ok_or_else(|| format!("unterminated predicate in step {segment:?}"))?;
        let predicate = parse_predicate(&body[..close])
            .map_err(|reason| format!("{reason} in step {segment:?}"))?;
        predicates.push(predicate);
        rest = &body[close + 1..];
    }
    if !rest.is_empty() {
        return Err(format!("unexpected {rest:?} after predicate in step {segment:?}"));
    }

    let test = if name == "*" {
        NodeTest::Any
    } else {
        NodeTest::Name(name.to_string())
    };

    Ok(Step {
        axis,
        test,
        predicates,
    })
}

fn parse_predicate(text: &str) -> std::result::Result<Predicate, String> {
    let text = text.trim();

    if text == "last()" {
        return Ok(Predicate::Last);
    }

    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        let position: usize = text
            .parse()
            .map_err(|_| format!("position {text} is out of range"))?;
        if position == 0 {
            return Err("positions start at 1".to_string());
        }
        return Ok(Predicate::Position(position));
    }

    let (field, literal) = text
        .split_once('=')
        .ok_or_else(|| format!("unsupported predicate [{text}]"))?;
    let field = field.trim();
    if field.is_empty()
        || !field
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(format!("predicate [{text}] needs a field name before '='"));
    }

    Ok(Predicate::Equals {
        field: field.to_string(),
        literal: parse_literal(literal.trim())?,
    })
}

fn parse_literal(text: &str) -> std::result::Result<Literal, String> {
    for quote in ['\'', '"'] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|t| t.strip_suffix(quote))
        {
            if !inner.contains(quote) {
                return Ok(Literal::Text(inner.to_string()));
            }
        }
    }

    match text.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(Literal::Number(text.to_string())),
        _ => Err(format!("literal {text:?} must be quoted or a number")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn doc() -> Value {
        json!({
            "database": {"host": "db.internal", "port": 5432},
            "servers": [
                {"name": "a", "ip": "10.0.0.1", "port": 8080},
                {"name": "b", "ip": "10.0.0.2", "port": "8081"}
            ],
            "tags": ["x", "y"],
            "ip": "192.168.1.1"
        })
    }

    #[test]
    fn test_child_path() {
        let expr = Extraction::compile("database/host").unwrap();
        assert_eq!(expr.first(&doc()), Some(&json!("db.internal")));

        let absolute = Extraction::compile("/database/port").unwrap();
        assert_eq!(absolute.first(&doc()), Some(&json!(5432)));
    }

    #[test]
    fn test_wildcard_and_position() {
        let expr = Extraction::compile("servers/*[2]/ip").unwrap();
        assert_eq!(expr.first(&doc()), Some(&json!("10.0.0.2")));

        let all = Extraction::compile("servers/*/name").unwrap();
        let document = doc();
        let names: Vec<_> = all.select(&document);
        assert_eq!(names, vec![&json!("a"), &json!("b")]);
    }

    #[test]
    fn test_descendant_search_in_document_order() {
        let expr = Extraction::compile("//ip").unwrap();
        let document = doc();
        let found = expr.select(&document);

        assert_eq!(found.len(), 3);
        assert_eq!(found[0], &json!("10.0.0.1"));
        assert_eq!(found[2], &json!("192.168.1.1"));
    }

    #[test]
    fn test_nested_contexts_keep_document_order() {
        let document = json!({
            "outer": {"inner": {"ip": "1"}, "ip": "2"}
        });
        let expr = Extraction::compile("//*/ip").unwrap();

        assert_eq!(expr.select(&document), vec![&json!("1"), &json!("2")]);
        assert_eq!(expr.first(&document), Some(&json!("1")));

        let twice = Extraction::compile("//*//ip").unwrap();
        assert_eq!(twice.select(&document).len(), 2);
    }

    #[test]
    fn test_descendant_positional_first_child() {
        let expr = Extraction::compile("//*[1]/ip").unwrap();
        let document = json!([{"ip": "1.2.3.4"}]);

        assert_eq!(expr.first(&document), Some(&json!("1.2.3.4")));
    }

    #[test]
    fn test_last_predicate() {
        let expr = Extraction::compile("servers/*[last()]/name").unwrap();
        assert_eq!(expr.first(&doc()), Some(&json!("b")));

        let tags = Extraction::compile("/tags/*[ last() ]").unwrap();
        assert_eq!(tags.first(&doc()), Some(&json!("y")));
    }

    #[test]
    fn test_field_equality_predicate() {
        let document = doc();

        let by_name = Extraction::compile("//servers/*[name='b']/ip").unwrap();
        assert_eq!(by_name.select(&document), vec![&json!("10.0.0.2")]);

        let double_quoted = Extraction::compile(r#"servers/*[name="a"]/ip"#).unwrap();
        assert_eq!(double_quoted.first(&document), Some(&json!("10.0.0.1")));

        // Numbers match numbers and numeric strings; text matches rendered numbers.
        let numeric = Extraction::compile("servers/*[port=8081]/name").unwrap();
        assert_eq!(numeric.first(&document), Some(&json!("b")));
        let text = Extraction::compile("servers/*[port='8080']/name").unwrap();
        assert_eq!(text.first(&document), Some(&json!("a")));

        let none = Extraction::compile("servers/*[name='c']/ip").unwrap();
        assert!(none.select(&document).is_empty());
    }

    #[test]
    fn test_predicates_apply_in_order() {
        let document = json!({"nodes": [
            {"role": "web", "id": 1},
            {"role": "db", "id": 2},
            {"role": "db", "id": 3}
        ]});

        let first_db = Extraction::compile("nodes/*[role='db'][1]/id").unwrap();
        assert_eq!(first_db.first(&document), Some(&json!(2)));

        let last_db = Extraction::compile("nodes/*[role='db'][last()]/id").unwrap();
        assert_eq!(last_db.first(&document), Some(&json!(3)));

        let first_is_not_db = Extraction::compile("nodes/*[1][role='db']").unwrap();
        assert!(first_is_not_db.select(&document).is_empty());
    }

    #[test]
    fn test_literal_may_contain_separators() {
        let document = json!({"links": [
            {"url": "https://a.example/x", "name": "a"},
            {"url": "https://b.example/[y]", "name": "b"}
        ]});

        let expr = Extraction::compile("links/*[url='https://b.example/[y]']/name").unwrap();
        assert_eq!(expr.first(&document), Some(&json!("b")));
    }

    #[test]
    fn test_named_step_does_not_match_array_elements() {
        let expr = Extraction::compile("servers/name").unwrap();
        assert_eq!(expr.first(&doc()), None);
    }

    #[test]
    fn test_no_match() {
        let expr = Extraction::compile("database/user").unwrap();
        assert!(expr.select(&doc()).is_empty());
    }

    #[test]
    fn test_large_document_evaluates_in_linear_time() {
        let items: Vec<Value> = (0..20_000)
            .map(|i| json!({"ip": format!("10.0.{}.{}", i / 256, i % 256)}))
            .collect();
        let document = Value::Array(items);

        let start = Instant::now();
        let everything = Extraction::compile("//*").unwrap().select(&document);
        let last = Extraction::compile("//*[last()]/ip").unwrap().first(&document);
        let elapsed = start.elapsed();

        assert_eq!(everything.len(), 40_000);
        assert_eq!(everything[0], &json!({"ip": "10.0.0.0"}));
        assert_eq!(last, Some(&json!("10.0.78.31")));
        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    }

    #[test]
    fn test_compile_errors() {
        for bad in [
            "",
            "/",
            "//",
            "a//",
            "a///b",
            "a/",
            "a[",
            "a[x]",
            "a[0]",
            "[1]",
            "a]b",
            "a[1]]",
            "a[1]x",
            "a[last]",
            "a[name=]",
            "a[name='x]",
            "a[=x]",
            "a[name!='x']",
            "a[name=x]",
        ] {
            let err = Extraction::compile(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedReference, "{bad:?}");
        }
    }

    #[test]
    fn test_display_keeps_source() {
        let expr = Extraction::compile("//*[1]/ip").unwrap();
        assert_eq!(expr.to_string(), "//*[1]/ip");
        assert_eq!(expr.as_str(), "//*[1]/ip");
    }
}
