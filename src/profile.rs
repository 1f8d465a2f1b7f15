use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

/// Opaque key-value resolver over the applicant's profile document.
/// The core asks it for field values by descriptor and treats an empty
/// answer as "skip this field"; it never inspects the document shape
/// itself. Credentials are resolved here too (environment overrides
/// first), so the core never stores secrets.
#[derive(Debug, Default, Clone)]
pub struct Profile {
    flat: HashMap<String, String>,
    overrides: HashMap<String, String>,
}

impl Profile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("opening profile {}", path.display()))?;
        let doc: Value = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing profile {}", path.display()))?;
        Ok(Self::from_value(doc))
    }

    pub fn from_value(doc: Value) -> Self {
        let mut flat = HashMap::new();
        flatten("", &doc, &mut flat);
        debug!(keys = flat.len(), "profile flattened");
        Self {
            flat,
            overrides: HashMap::new(),
        }
    }

    /// Layer credential values from the environment on top of the
    /// document. Keeps passwords out of the profile file entirely.
    pub fn with_env_credentials(mut self) -> Self {
        for (env, key) in [
            ("AUTOAPPLY_EMAIL", "email"),
            ("AUTOAPPLY_PASSWORD", "password"),
        ] {
            if let Ok(v) = std::env::var(env) {
                if !v.is_empty() {
                    self.overrides.insert(key.into(), v);
                }
            }
        }
        self
    }

    /// Resolve a field descriptor (a label, name, or placeholder seen on
    /// the page) to a value. Empty string means "nothing known".
    pub fn value_for(&self, descriptor: &str) -> String {
        let wanted = normalize(descriptor);
        if wanted.is_empty() {
            return String::new();
        }
        if let Some(v) = self.overrides.get(&wanted) {
            return v.clone();
        }
        // exact leaf match first, then substring either way
        if let Some(v) = self.flat.get(&wanted) {
            return v.clone();
        }
        for (key, value) in &self.flat {
            if key.contains(&wanted) || wanted.contains(key.as_str()) {
                return value.clone();
            }
        }
        String::new()
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Flatten the JSON document into normalized-leaf-key → string. Arrays
/// join into comma-separated values; nested objects keep only the leaf
/// key name, which is what page labels tend to match.
fn flatten(prefix: &str, value: &Value, out: &mut HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten(k, v, out);
            }
        }
        Value::Array(items) => {
            let joined: Vec<String> = items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect();
            if !joined.is_empty() {
                out.insert(normalize(prefix), joined.join(", "));
            }
        }
        Value::String(s) => {
            out.insert(normalize(prefix), s.clone());
        }
        Value::Number(n) => {
            out.insert(normalize(prefix), n.to_string());
        }
        Value::Bool(b) => {
            out.insert(normalize(prefix), b.to_string());
        }
        Value::Null => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile() -> Profile {
        Profile::from_value(json!({
            "personal_info": {
                "name": "Dana Example",
                "email": "dana@example.com",
                "phone": "+1 555 0100"
            },
            "skills": ["Rust", "SQL"],
            "years_of_experience": 7
        }))
    }

    #[test]
    fn resolves_leaf_keys() {
        assert_eq!(profile().value_for("email"), "dana@example.com");
        assert_eq!(profile().value_for("Phone"), "+1 555 0100");
    }

    #[test]
    fn resolves_fuzzy_labels() {
        assert_eq!(profile().value_for("Email address"), "dana@example.com");
        assert_eq!(profile().value_for("Full name"), "Dana Example");
    }

    #[test]
    fn arrays_join() {
        assert_eq!(profile().value_for("skills"), "Rust, SQL");
    }

    #[test]
    fn unknown_descriptor_is_empty() {
        assert_eq!(profile().value_for("favourite colour"), "");
    }
}
