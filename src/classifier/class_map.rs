//! Class index to label mapping, loaded from a CSV with a `display_name` column.

use std::path::Path;

use super::ClassifierError;
use crate::domain::UNKNOWN_LABEL;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassMap {
    labels: Vec<String>,
}

impl ClassMap {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::ClassMap(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| ClassifierError::ClassMap(format!("{}: {}", path.display(), e)))
    }

    /// Parse CSV text. The header must contain `display_name`.
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());

        let header = lines.next().ok_or("empty class map")?;
        let column = split_csv_line(header)
            .iter()
            .position(|h| h.trim() == "display_name")
            .ok_or("missing 'display_name' column")?;

        let mut labels = Vec::new();
        for (idx, line) in lines.enumerate() {
            let fields = split_csv_line(line);
            let name = fields
                .get(column)
                .ok_or_else(|| format!("row {} has no display_name", idx + 2))?;
            labels.push(name.trim().to_string());
        }

        if labels.is_empty() {
            return Err("class map has no rows".to_string());
        }

        Ok(Self { labels })
    }

    /// Label for a class index; indices past the end map to `Unknown`
    pub fn label(&self, index: usize) -> &str {
        self.labels
            .get(index)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Split one CSV line, honouring double-quoted fields
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quoted_names() {
        let csv = "index,mid,display_name\n\
                   0,/m/09x0r,Speech\n\
                   1,/m/0ytgt,\"Child speech, kid speaking\"\n\
                   2,/m/05tny_,Bark\n";
        let map = ClassMap::parse(csv).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.label(1), "Child speech, kid speaking");
        assert_eq!(map.label(2), "Bark");
        assert_eq!(map.label(99), "Unknown");
    }

    #[test]
    fn test_missing_column_is_error() {
        assert!(ClassMap::parse("index,name\n0,Speech\n").is_err());
        assert!(ClassMap::parse("").is_err());
        assert!(ClassMap::parse("index,display_name\n").is_err());
    }
}
