//! `{placeholder}` templates for step paths and JSON bodies

use crate::error::{PlanError, Result};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Placeholder filled with the credential username of the iteration
pub const USERNAME: &str = "username";
/// Placeholder filled with the display name returned at login
pub const DISPLAY_NAME: &str = "display_name";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A string with `{name}` placeholders, parsed once at plan build time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template. Only `{identifier}` forms are placeholders; any
    /// other brace is literal text, so source-code bodies pass through.
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if is_placeholder_name(&after[..close]) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(after[..close].to_string()));
                    rest = &after[close + 1..];
                }
                _ => {
                    literal.push('{');
                    rest = after;
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self {
            source: source.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Render with the iteration's variables. Unknown names render empty;
    /// plans are checked with [`Template::check`] before a run starts.
    pub fn render(&self, vars: &HashMap<String, String>) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    if let Some(value) = vars.get(name) {
                        out.push_str(value);
                    }
                }
            }
        }
        out
    }

    /// Fail if any placeholder is not in `known`
    pub fn check(&self, known: &dyn Fn(&str) -> bool, location: &str) -> Result<()> {
        for name in self.placeholders() {
            if !known(name) {
                return Err(PlanError::UnknownPlaceholder {
                    placeholder: name.to_string(),
                    location: location.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

/// JSON body template; string leaves are rendered, everything else is kept
#[derive(Debug, Clone, PartialEq)]
pub struct BodyTemplate {
    raw: JsonValue,
}

impl BodyTemplate {
    pub fn new(raw: JsonValue) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &JsonValue {
        &self.raw
    }

    pub fn check(&self, known: &dyn Fn(&str) -> bool, location: &str) -> Result<()> {
        visit_strings(&self.raw, &mut |s| Template::parse(s).check(known, location))
    }

    pub fn render(&self, vars: &HashMap<String, String>) -> JsonValue {
        render_value(&self.raw, vars)
    }
}

fn visit_strings(value: &JsonValue, f: &mut dyn FnMut(&str) -> Result<()>) -> Result<()> {
    match value {
        JsonValue::String(s) => f(s),
        JsonValue::Array(items) => items.iter().try_for_each(|v| visit_strings(v, f)),
        JsonValue::Object(map) => map.values().try_for_each(|v| visit_strings(v, f)),
        _ => Ok(()),
    }
}

fn render_value(value: &JsonValue, vars: &HashMap<String, String>) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(Template::parse(s).render(vars)),
        JsonValue::Array(items) => {
            JsonValue::Array(items.iter().map(|v| render_value(v, vars)).collect())
        }
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("problem_codes".to_string(), "S00000050".to_string());
        vars.insert(USERNAME.to_string(), "fulano4".to_string());
        vars
    }

    #[test]
    fn test_render_path() {
        let template = Template::parse("/problems/{problem_codes}/details");
        assert_eq!(template.render(&vars()), "/problems/S00000050/details");
        assert_eq!(template.placeholders().collect::<Vec<_>>(), vec!["problem_codes"]);
    }

    #[test]
    fn test_literal_only() {
        let template = Template::parse("/problems/key/S");
        assert_eq!(template.placeholders().count(), 0);
        assert_eq!(template.render(&HashMap::new()), "/problems/key/S");
    }

    #[test]
    fn test_non_identifier_braces_are_literal() {
        let template = Template::parse("/problems/{code");
        assert_eq!(template.placeholders().count(), 0);
        assert_eq!(template.render(&HashMap::new()), "/problems/{code");

        let source = "int main() {\n    printf(\"Hello World!\");\n    return 0;\n}";
        let template = Template::parse(source);
        assert_eq!(template.placeholders().count(), 0);
        assert_eq!(template.render(&vars()), source);
    }

    #[test]
    fn test_check_unknown_placeholder() {
        let template = Template::parse("/solutions/{solution_codes}");
        let err = template
            .check(&|name| name == USERNAME, "step 'solution'")
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::UnknownPlaceholder {
                placeholder: "solution_codes".to_string(),
                location: "step 'solution'".to_string(),
            }
        );
    }

    #[test]
    fn test_body_template_renders_nested_strings() {
        let body = BodyTemplate::new(json!({
            "problemCode": "{problem_codes}",
            "language": "C",
            "meta": { "owner": "{username}", "attempt": 1 }
        }));

        assert_eq!(
            body.render(&vars()),
            json!({
                "problemCode": "S00000050",
                "language": "C",
                "meta": { "owner": "fulano4", "attempt": 1 }
            })
        );
    }
}
