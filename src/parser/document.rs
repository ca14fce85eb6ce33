use serde_json::Value;

/// One openFDA drug label record. Sections are free-text fields whose values
/// are either a single string or a list of paragraph strings; the `openfda`
/// sub-object carries the harmonized product metadata arrays.
#[derive(Debug, Clone)]
pub struct LabelDocument {
    raw: Value,
}

impl LabelDocument {
    pub fn new(raw: Value) -> Self {
        LabelDocument { raw }
    }

    pub fn parse(json: &str) -> serde_json::Result<Self> {
        Ok(LabelDocument::new(serde_json::from_str(json)?))
    }

    /// Named free-text section, with list-valued sections flattened
    /// newline-joined. Missing, null, or non-text sections yield None.
    pub fn section_text(&self, name: &str) -> Option<String> {
        match self.raw.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => {
                let parts: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n"))
                }
            }
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.raw.get("id").and_then(|v| v.as_str())
    }

    pub fn set_id(&self) -> Option<&str> {
        self.raw.get("set_id").and_then(|v| v.as_str())
    }

    pub fn effective_time(&self) -> Option<&str> {
        self.raw.get("effective_time").and_then(|v| v.as_str())
    }

    /// First element of a top-level array field.
    pub fn first_of(&self, key: &str) -> Option<&str> {
        self.raw
            .get(key)
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
    }

    /// First element of an array field under the `openfda` sub-object.
    pub fn openfda_first(&self, key: &str) -> Option<&str> {
        self.raw
            .get("openfda")
            .and_then(|o| o.get(key))
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
    }
}

// ── Tests ──
