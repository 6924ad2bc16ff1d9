//! Script text and variable substitution.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};

/// Variables substituted into script text as `$name$`.
pub type ScriptVariables = BTreeMap<String, String>;

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z_][A-Za-z0-9_\-]*)\$").expect("variable pattern is valid")
});

/// A named script, as handed to an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlScript {
    /// Logical name.
    pub name: String,
    /// Script body.
    pub contents: String,
}

impl SqlScript {
    /// Create a script.
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }

    /// Script body with `$name$` tokens replaced.
    pub fn render(&self, variables: &ScriptVariables) -> MigrateResult<String> {
        substitute_variables(&self.contents, variables)
            .map_err(|missing| {
                MigrationError::execution(
                    &self.name,
                    format!("variable ${}$ has no value", missing),
                )
            })
    }
}

/// Replace `$name$` tokens, returning the first undefined name on failure.
pub fn substitute_variables(text: &str, variables: &ScriptVariables) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in VARIABLE.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = variables
            .get(name.as_str())
            .ok_or_else(|| name.as_str().to_string())?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }

    out.push_str(&text[last..]);
    Ok(out)
}
