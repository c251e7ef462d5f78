//! Name filters selecting which notebooks, sections and pages are mirrored.

use glob::{MatchOptions, Pattern};

use notemirror_common::{Error, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Case-insensitive glob over display names; an empty filter accepts all.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    pattern: Option<Pattern>,
}

impl NameFilter {
    /// Filter accepting every name.
    pub fn any() -> Self {
        Self::default()
    }

    /// Parse an optional glob; `None` or a blank pattern accepts all.
    pub fn new(pattern: Option<&str>) -> Result<Self> {
        let pattern = match pattern.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => Some(
                Pattern::new(p)
                    .map_err(|e| Error::InvalidInput(format!("Invalid filter '{}': {}", p, e)))?,
            ),
            None => None,
        };
        Ok(Self { pattern })
    }

    /// Whether `name` passes the filter.
    pub fn matches(&self, name: &str) -> bool {
        self.pattern
            .as_ref()
            .map_or(true, |p| p.matches_with(name, MATCH_OPTIONS))
    }

    /// Whether the filter accepts everything.
    pub fn is_any(&self) -> bool {
        self.pattern.is_none()
    }
}

/// Filters for each level of the hierarchy.
///
/// The section filter applies to sections only; section groups are always
/// traversed so their sections can be matched.
#[derive(Debug, Clone, Default)]
pub struct SyncFilters {
    pub notebook: NameFilter,
    pub section: NameFilter,
    pub page: NameFilter,
}

impl SyncFilters {
    /// Build all three filters, failing on the first invalid pattern.
    pub fn new(notebook: Option<&str>, section: Option<&str>, page: Option<&str>) -> Result<Self> {
        Ok(Self {
            notebook: NameFilter::new(notebook)?,
            section: NameFilter::new(section)?,
            page: NameFilter::new(page)?,
        })
    }

    /// Whether any level excludes something.
    pub fn is_restrictive(&self) -> bool {
        !(self.notebook.is_any() && self.section.is_any() && self.page.is_any())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_accepts_all() {
        assert!(NameFilter::any().matches("Anything"));
        assert!(NameFilter::new(None).unwrap().matches(""));
        assert!(NameFilter::new(Some("  ")).unwrap().is_any());
    }

    #[test]
    fn test_glob_is_case_insensitive() {
        let filter = NameFilter::new(Some("work*")).unwrap();
        assert!(filter.matches("Work Notes"));
        assert!(filter.matches("WORKSHOP"));
        assert!(!filter.matches("Personal"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = NameFilter::new(Some("[unclosed")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_sync_filters() {
        let filters = SyncFilters::new(Some("Recipes"), None, Some("*cake*")).unwrap();
        assert!(filters.is_restrictive());
        assert!(filters.notebook.matches("recipes"));
        assert!(filters.section.matches("Desserts"));
        assert!(filters.page.matches("Carrot Cake"));
        assert!(!filters.page.matches("Soup"));

        assert!(!SyncFilters::default().is_restrictive());
    }
}
