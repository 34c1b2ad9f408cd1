//! Header alias table and per-import column resolution

use std::collections::HashMap;
use std::str::FromStr;

/// Logical fields the normalizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogicalField {
    Date,
    Hour,
    RoutingConfigId,
    CreativeSize,
    Country,
    Platform,
    Environment,
    AppId,
    AppName,
    ReachedQueries,
    Impressions,
    Clicks,
    Spend,
    VideoStarts,
    VideoCompletions,
    ErrorCount,
}

impl LogicalField {
    pub fn all() -> [LogicalField; 16] {
        [
            LogicalField::Date,
            LogicalField::Hour,
            LogicalField::RoutingConfigId,
            LogicalField::CreativeSize,
            LogicalField::Country,
            LogicalField::Platform,
            LogicalField::Environment,
            LogicalField::AppId,
            LogicalField::AppName,
            LogicalField::ReachedQueries,
            LogicalField::Impressions,
            LogicalField::Clicks,
            LogicalField::Spend,
            LogicalField::VideoStarts,
            LogicalField::VideoCompletions,
            LogicalField::ErrorCount,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalField::Date => "date",
            LogicalField::Hour => "hour",
            LogicalField::RoutingConfigId => "routing_config_id",
            LogicalField::CreativeSize => "creative_size",
            LogicalField::Country => "country",
            LogicalField::Platform => "platform",
            LogicalField::Environment => "environment",
            LogicalField::AppId => "app_id",
            LogicalField::AppName => "app_name",
            LogicalField::ReachedQueries => "reached_queries",
            LogicalField::Impressions => "impressions",
            LogicalField::Clicks => "clicks",
            LogicalField::Spend => "spend",
            LogicalField::VideoStarts => "video_starts",
            LogicalField::VideoCompletions => "video_completions",
            LogicalField::ErrorCount => "error_count",
        }
    }

    fn builtin_aliases(&self) -> &'static [&'static str] {
        match self {
            LogicalField::Date => &["Day", "Date", "Metric date", "Report date"],
            LogicalField::Hour => &["Hour", "Hour of day"],
            LogicalField::RoutingConfigId => &[
                "Billing ID",
                "Pretargeting config ID",
                "Config ID",
                "Routing config ID",
            ],
            LogicalField::CreativeSize => &["Creative size", "Size", "Creative dimensions"],
            LogicalField::Country => &["Country", "Geo", "Country code"],
            LogicalField::Platform => &["Platform", "Device type"],
            LogicalField::Environment => &["Environment", "Inventory type"],
            LogicalField::AppId => &["Mobile app ID", "App ID", "Publisher ID", "Bundle ID"],
            LogicalField::AppName => &["Mobile app name", "App name", "Publisher name"],
            LogicalField::ReachedQueries => &["Reached queries", "Bid requests", "Queries"],
            LogicalField::Impressions => &["Impressions", "Imps"],
            LogicalField::Clicks => &["Clicks"],
            LogicalField::Spend => &[
                "Spend (bidder currency)",
                "Spend (buyer currency)",
                "Spend _buyer currency_",
                "Spend",
                "Cost",
            ],
            LogicalField::VideoStarts => &["Video starts"],
            LogicalField::VideoCompletions => &["Video completions"],
            LogicalField::ErrorCount => &["VAST error count", "Error count", "Errors"],
        }
    }
}

impl FromStr for LogicalField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown field '{}'", s))
    }
}

/// Canonical header form: leading symbols dropped, lowercase, alphanumerics only.
///
/// `"#Day"`, `" day "` and `"DAY"` all become `"day"`.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches(|c: char| !c.is_alphanumeric())
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Logical field → ordered accepted raw names (stored normalized).
#[derive(Debug, Clone)]
pub struct ColumnAliases {
    table: Vec<(LogicalField, Vec<String>)>,
}

impl Default for ColumnAliases {
    fn default() -> Self {
        let table = LogicalField::all()
            .into_iter()
            .map(|field| {
                let names = field.builtin_aliases().iter().map(|a| normalize_header(a)).collect();
                (field, names)
            })
            .collect();
        Self { table }
    }
}

impl ColumnAliases {
    /// Built-in table with extra names prepended per field.
    ///
    /// Overrides naming an unknown logical field are logged and skipped.
    pub fn with_overrides(overrides: &HashMap<String, Vec<String>>) -> Self {
        let mut aliases = Self::default();
        for (field_name, names) in overrides {
            match field_name.parse::<LogicalField>() {
                Ok(field) => aliases.prepend(field, names),
                Err(_) => log::warn!("⚠️  Ignoring aliases for unknown field '{}'", field_name),
            }
        }
        aliases
    }

    pub fn prepend(&mut self, field: LogicalField, names: &[String]) {
        if let Some((_, existing)) = self.table.iter_mut().find(|(f, _)| *f == field) {
            let mut merged: Vec<String> = names.iter().map(|n| normalize_header(n)).collect();
            merged.extend(existing.drain(..));
            merged.dedup();
            *existing = merged;
        }
    }

    /// Resolve a header row once per import.
    pub fn resolve(&self, headers: &[String]) -> ColumnMap {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let mut index = HashMap::new();

        for (field, names) in &self.table {
            let hit = names
                .iter()
                .find_map(|name| normalized.iter().position(|h| h == name));
            if let Some(col) = hit {
                index.insert(*field, col);
            }
        }

        let unresolved = headers
            .iter()
            .enumerate()
            .filter(|(col, _)| !index.values().any(|c| c == col))
            .map(|(_, h)| h.clone())
            .collect();

        ColumnMap { index, unresolved }
    }
}

/// Column positions for the logical fields found in one export.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    index: HashMap<LogicalField, usize>,
    unresolved: Vec<String>,
}

impl ColumnMap {
    pub fn position(&self, field: LogicalField) -> Option<usize> {
        self.index.get(&field).copied()
    }

    pub fn has(&self, field: LogicalField) -> bool {
        self.index.contains_key(&field)
    }

    /// Raw value of `field` in `row`; `None` when the column is absent or blank.
    pub fn get<'a>(&self, row: &'a [String], field: LogicalField) -> Option<&'a str> {
        self.position(field)
            .and_then(|col| row.get(col))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn resolved_fields(&self) -> Vec<LogicalField> {
        let mut fields: Vec<_> = self.index.keys().copied().collect();
        fields.sort();
        fields
    }

    /// Headers that matched no logical field; ignored during import.
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("#Day"), "day");
        assert_eq!(normalize_header("  Reached Queries "), "reachedqueries");
        assert_eq!(normalize_header("Spend _buyer currency_"), "spendbuyercurrency");
        assert_eq!(normalize_header("Spend (buyer currency)"), "spendbuyercurrency");
        assert_eq!(normalize_header("MOBILE-APP-ID"), "mobileappid");
    }

    #[test]
    fn test_resolve_google_export_headers() {
        let map = ColumnAliases::default().resolve(&headers(&[
            "#Day",
            "Billing ID",
            "Creative size",
            "Country",
            "Reached queries",
            "Impressions",
            "Spend _buyer currency_",
            "Something else",
        ]));

        assert_eq!(map.position(LogicalField::Date), Some(0));
        assert_eq!(map.position(LogicalField::RoutingConfigId), Some(1));
        assert_eq!(map.position(LogicalField::CreativeSize), Some(2));
        assert_eq!(map.position(LogicalField::ReachedQueries), Some(4));
        assert_eq!(map.position(LogicalField::Spend), Some(6));
        assert!(!map.has(LogicalField::Clicks));
        assert_eq!(map.unresolved(), &["Something else".to_string()]);
    }

    #[test]
    fn test_earlier_alias_wins() {
        // Both spend columns present: bidder currency is listed first.
        let map = ColumnAliases::default().resolve(&headers(&[
            "Spend (buyer currency)",
            "Spend (bidder currency)",
        ]));
        assert_eq!(map.position(LogicalField::Spend), Some(1));
    }

    #[test]
    fn test_overrides_prepend() {
        let mut overrides = HashMap::new();
        overrides.insert("impressions".to_string(), vec!["Served".to_string()]);
        overrides.insert("bogus".to_string(), vec!["X".to_string()]);

        let map = ColumnAliases::with_overrides(&overrides)
            .resolve(&headers(&["Impressions", "served"]));
        assert_eq!(map.position(LogicalField::Impressions), Some(1));
    }

    #[test]
    fn test_logical_field_parses_by_name() {
        for field in LogicalField::all() {
            assert_eq!(field.as_str().parse::<LogicalField>(), Ok(field));
        }
        assert!("bid_price".parse::<LogicalField>().is_err());
    }

    #[test]
    fn test_get_blank_is_none() {
        let map = ColumnAliases::default().resolve(&headers(&["Day", "Country"]));
        let row = headers(&["2025-11-01", "   "]);
        assert_eq!(map.get(&row, LogicalField::Date), Some("2025-11-01"));
        assert_eq!(map.get(&row, LogicalField::Country), None);
        assert_eq!(map.get(&row, LogicalField::Platform), None);
    }
}
