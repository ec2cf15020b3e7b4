//! Tab-separated rule file: `from<TAB>lowercase_name<TAB>name` per line
//!
//! Blank lines, `#` comments and rows with an empty `from` are ignored.
//! Missing trailing columns are empty, so a row with only a `from` address
//! is a placeholder that names no label.

use std::path::Path;

use crate::error::{GmailError, Result};
use crate::models::RuleRow;

pub fn parse_rules(content: &str) -> Result<Vec<RuleRow>> {
    let mut rows = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let mut columns = line.split('\t').map(str::trim);
        let from = columns.next().unwrap_or_default();
        let lowercase_name = columns.next().unwrap_or_default();
        let name = columns.next().unwrap_or_default();

        if from.is_empty() {
            if !name.is_empty() {
                tracing::debug!("Line {}: label '{}' has no from address, skipping", index + 1, name);
            }
            continue;
        }
        if from.chars().any(char::is_whitespace) {
            return Err(GmailError::RuleFile {
                line: index + 1,
                message: format!("from address '{}' contains whitespace", from),
            });
        }

        rows.push(RuleRow {
            from: from.to_string(),
            lowercase_name: lowercase_name.to_string(),
            name: name.to_string(),
        });
    }

    tracing::debug!("Parsed {} rule rows", rows.len());
    Ok(rows)
}

pub async fn read_rule_file(path: &Path) -> Result<Vec<RuleRow>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        GmailError::ConfigError(format!("Failed to read rule file {:?}: {}", path, e))
    })?;
    let rows = parse_rules(&content)?;
    tracing::info!("Read {} rule rows from {:?}", rows.len(), path);
    Ok(rows)
}
