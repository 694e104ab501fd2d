use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ensure_exists;
use crate::StoreError;

/// One entry of `portfolios.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioEntry {
    pub name: String,
    /// Output file name; derived from the name when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl PortfolioEntry {
    pub fn output_file(&self) -> String {
        match &self.file {
            Some(file) if !file.trim().is_empty() => file.trim().to_string(),
            _ => slugify_portfolio_name(&self.name),
        }
    }
}

pub fn load_registry(path: &Path) -> Result<Vec<PortfolioEntry>, StoreError> {
    ensure_exists(path)?;
    let text = std::fs::read_to_string(path)?;
    let mut entries: Vec<PortfolioEntry> = serde_json::from_str(&text)?;
    for entry in &mut entries {
        entry.name = entry.name.trim().to_string();
    }
    entries.retain(|e| !e.name.is_empty());
    tracing::info!("{} portfolio(s) listed in {}", entries.len(), path.display());
    Ok(entries)
}

/// "Tech & Growth" → "portefeuille_tech___growth_v2.csv"
pub fn slugify_portfolio_name(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '&' { '_' } else { c })
        .collect();
    format!("portefeuille_{}_v2.csv", slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_slugify() {
        assert_eq!(
            slugify_portfolio_name("Tech & Growth"),
            "portefeuille_tech___growth_v2.csv"
        );
        assert_eq!(slugify_portfolio_name("Income"), "portefeuille_income_v2.csv");
    }

    #[test]
    fn test_load_registry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("portfolios.json");
        std::fs::write(
            &path,
            r#"[{"name": " Income ", "file": "income.csv"}, {"name": "Tech & Growth"}, {"name": ""}]"#,
        )
        .unwrap();

        let entries = load_registry(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Income");
        assert_eq!(entries[0].output_file(), "income.csv");
        assert_eq!(entries[1].output_file(), "portefeuille_tech___growth_v2.csv");
    }

    #[test]
    fn test_invalid_registry_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("portfolios.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_registry(&path), Err(StoreError::Json(_))));
        assert!(matches!(
            load_registry(&dir.path().join("missing.json")),
            Err(StoreError::MissingFile(_))
        ));
    }
}
