//! The SQL generator contract (spec §1/§6, external collaborator).
//!
//! Out of scope for this crate's core: the real templating/rendering engine that turns a
//! templated SQL string and a parameter map into a fully bound `(sql, args)` pair is expected to
//! be supplied by the caller. A minimal `{{name}}`-substitution generator is provided so the
//! crate is runnable standalone.

use crate::value::Value;
use indexmap::IndexMap;
use std::fmt;

#[derive(Debug)]
pub struct GeneratorError(pub String);

impl fmt::Display for GeneratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for GeneratorError {}

/// Renders a templated SQL string into a prepared statement and its positional arguments.
pub trait SqlGenerator {
    fn generate(
        &self,
        template: &str,
        params: &IndexMap<String, Value>,
    ) -> Result<(String, Vec<Value>), GeneratorError>;
}

/// A minimal built-in generator: replaces each `{{name}}` occurrence with a dialect placeholder
/// (`$1`, `?`, ...) in first-seen order, collecting the corresponding argument list.
pub struct TemplateGenerator {
    pub dialect: crate::dialect::Dialect,
}

impl SqlGenerator for TemplateGenerator {
    fn generate(
        &self,
        template: &str,
        params: &IndexMap<String, Value>,
    ) -> Result<(String, Vec<Value>), GeneratorError> {
        let mut out = String::with_capacity(template.len());
        let mut args = Vec::new();
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                return Err(GeneratorError(format!(
                    "unterminated template placeholder in '{template}'"
                )));
            };
            let name = after[..end].trim();
            let value = params
                .get(name)
                .ok_or_else(|| GeneratorError(format!("missing parameter '{name}'")))?;
            args.push(value.clone());
            out.push_str(&self.dialect.placeholder(args.len()));
            rest = &after[end + 2..];
        }
        out.push_str(rest);

        Ok((out, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;

    #[test]
    fn substitutes_named_placeholders() {
        let gen = TemplateGenerator { dialect: Dialect::Postgres };
        let mut params = IndexMap::new();
        params.insert("email".to_string(), Value::String("a@example.com".into()));
        let (sql, args) = gen
            .generate("SELECT * FROM users WHERE email = {{email}}", &params)
            .unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE email = $1");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn errors_on_missing_parameter() {
        let gen = TemplateGenerator { dialect: Dialect::Sqlite };
        let params = IndexMap::new();
        let err = gen.generate("SELECT {{missing}}", &params).unwrap_err();
        assert!(err.0.contains("missing"));
    }
}
