//! Categorization request text

use std::path::Path;

use serde_json::Value;

const INSTRUCTIONS: &str = "\
Now categorize the following data according to the above rules.

Additional constraints for grouping:
- Avoid creating categories (folders) with only one link, unless it is truly unique or cannot logically belong elsewhere.
- Avoid creating categories with more than 20 links. If a category exceeds this, split it into smaller, coherent subgroups.
- Prefer balanced, meaningful grouping across categories.

Return the result as valid JSON.";

/// Rules text plus fixed grouping instructions, applied to each input.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    rules: String,
}

impl PromptTemplate {
    pub fn new(rules: impl Into<String>) -> Self {
        Self {
            rules: rules.into(),
        }
    }

    pub fn load(path: &Path) -> common::Result<Self> {
        let rules = std::fs::read_to_string(path).map_err(|e| common::Error::io_at(path, e))?;
        if rules.trim().is_empty() {
            return Err(common::Error::Config(format!(
                "rules file {} is empty",
                path.display()
            )));
        }
        Ok(Self::new(rules.trim_end()))
    }

    /// Full prompt for one input document (pretty-printed, non-ASCII kept).
    pub fn render(&self, input: &Value) -> String {
        let body = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
        format!("{}\n\n{INSTRUCTIONS}\n\n{body}", self.rules)
    }
}
