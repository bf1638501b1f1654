//! Facet declarations and the view models built from search results.
//!
//! Each facet item carries the filter strings that would switch it on or off,
//! so a client can drive faceted navigation without knowing the filter grammar:
//!
//! ```text
//! skills__name__in=rust,go        (terms)
//! yrs_experience__ranges=0:2,3:5  (ranges)
//! ```

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Default number of terms requested for a terms facet.
pub const DEFAULT_TERMS_SIZE: usize = 10;

/// A declared facet.
#[derive(Debug, Clone)]
pub enum Facet {
    /// Top terms of a field.
    Terms(TermsFacet),
    /// Counts over fixed ranges of a numeric or date field.
    Range(RangeFacet),
}

impl Facet {
    /// Facet name, also its key in the search response.
    pub fn name(&self) -> &str {
        match self {
            Facet::Terms(f) => &f.name,
            Facet::Range(f) => &f.name,
        }
    }

    /// Human-readable title.
    pub fn title(&self) -> &str {
        match self {
            Facet::Terms(f) => &f.title,
            Facet::Range(f) => &f.title,
        }
    }

    /// Filter path the facet toggles (e.g. `skills__name`).
    pub fn field(&self) -> &str {
        match self {
            Facet::Terms(f) => &f.field,
            Facet::Range(f) => &f.field,
        }
    }

    /// Filter key prefix whose operands are the facet's enabled items.
    pub fn filter_prefix(&self) -> String {
        match self {
            Facet::Terms(f) => format!("{}__in", f.field),
            Facet::Range(f) => format!("{}__ranges", f.field),
        }
    }
}

impl From<TermsFacet> for Facet {
    fn from(facet: TermsFacet) -> Self {
        Facet::Terms(facet)
    }
}

impl From<RangeFacet> for Facet {
    fn from(facet: RangeFacet) -> Self {
        Facet::Range(facet)
    }
}

/// Top terms of a field.
#[derive(Debug, Clone)]
pub struct TermsFacet {
    name: String,
    title: String,
    field: String,
    search_field: Option<String>,
    size_option: Option<String>,
    size: usize,
}

impl TermsFacet {
    /// Declares a terms facet over the filter path `field`.
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            field: field.into(),
            search_field: None,
            size_option: None,
            size: DEFAULT_TERMS_SIZE,
        }
    }

    /// Sets the title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Search index field to aggregate on, when it differs from the filter path.
    pub fn search_field(mut self, field: impl Into<String>) -> Self {
        self.search_field = Some(field.into());
        self
    }

    /// Query option that overrides the number of terms.
    pub fn size_option(mut self, option: impl Into<String>) -> Self {
        self.size_option = Some(option.into());
        self
    }

    /// Default number of terms.
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Explicit search field, if any.
    pub fn explicit_search_field(&self) -> Option<&str> {
        self.search_field.as_deref()
    }

    /// Number of terms to request given the option lookup.
    pub fn size_for<'a>(&self, option: impl Fn(&str) -> Option<&'a Value>) -> usize {
        self.size_option
            .as_deref()
            .and_then(option)
            .and_then(Value::as_i64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(self.size)
    }

    /// Builds the view from `(term, count)` buckets and the currently enabled terms.
    pub fn view(&self, current: &[String], buckets: &[(String, u64)]) -> FacetView {
        let prefix = format!("{}__in", self.field);
        let items = buckets
            .iter()
            .map(|(term, count)| toggle_item(&prefix, current, term.clone(), term, *count))
            .collect();
        FacetView {
            name: self.name.clone(),
            title: self.title.clone(),
            filter: filter_string(&prefix, current),
            items,
        }
    }
}

/// One bucket of a range facet. Open bounds are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct FacetRange {
    /// Inclusive lower bound.
    pub start: Option<String>,
    /// Inclusive upper bound.
    pub end: Option<String>,
    /// Display name; derived from the bounds when absent.
    pub name: Option<String>,
}

impl FacetRange {
    /// Display name: explicit, or `a to b`, `a+`, `<= b`.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match (&self.start, &self.end) {
            (Some(s), Some(e)) => format!("{} to {}", s, e),
            (Some(s), None) => format!("{}+", s),
            (None, Some(e)) => format!("<= {}", e),
            (None, None) => "all".to_string(),
        }
    }

    /// Operand token used in `__ranges` filters.
    pub fn token(&self) -> String {
        format!(
            "{}:{}",
            self.start.as_deref().unwrap_or_default(),
            self.end.as_deref().unwrap_or_default()
        )
    }
}

/// Counts over fixed ranges.
#[derive(Debug, Clone)]
pub struct RangeFacet {
    name: String,
    title: String,
    field: String,
    search_field: Option<String>,
    ranges: Vec<FacetRange>,
    dates: bool,
}

impl RangeFacet {
    /// Declares a numeric range facet over the filter path `field`.
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            field: field.into(),
            search_field: None,
            ranges: Vec::new(),
            dates: false,
        }
    }

    /// Declares a date range facet; bounds may be relative (`now-7d`).
    pub fn dates(name: impl Into<String>, field: impl Into<String>) -> Self {
        let mut facet = Self::new(name, field);
        facet.dates = true;
        facet
    }

    /// Sets the title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Search index field to aggregate on, when it differs from the filter path.
    pub fn search_field(mut self, field: impl Into<String>) -> Self {
        self.search_field = Some(field.into());
        self
    }

    /// Adds a bucket with a derived name.
    pub fn add(self, start: Option<impl ToString>, end: Option<impl ToString>) -> Self {
        self.push(start.map(|s| s.to_string()), end.map(|e| e.to_string()), None)
    }

    /// Adds a bucket with an explicit name.
    pub fn add_named(
        self,
        start: Option<impl ToString>,
        end: Option<impl ToString>,
        name: impl Into<String>,
    ) -> Self {
        self.push(
            start.map(|s| s.to_string()),
            end.map(|e| e.to_string()),
            Some(name.into()),
        )
    }

    fn push(mut self, start: Option<String>, end: Option<String>, name: Option<String>) -> Self {
        self.ranges.push(FacetRange { start, end, name });
        self
    }

    /// Explicit search field, if any.
    pub fn explicit_search_field(&self) -> Option<&str> {
        self.search_field.as_deref()
    }

    /// Declared buckets.
    pub fn ranges(&self) -> &[FacetRange] {
        &self.ranges
    }

    /// Whether bounds are dates.
    pub fn is_dates(&self) -> bool {
        self.dates
    }

    /// Builds the view from per-bucket counts (in declaration order) and the
    /// currently enabled range tokens.
    pub fn view(&self, current: &[String], counts: &[u64]) -> FacetView {
        let prefix = format!("{}__ranges", self.field);
        let items = self
            .ranges
            .iter()
            .zip(counts.iter().copied().chain(std::iter::repeat(0)))
            .map(|(range, count)| {
                toggle_item(&prefix, current, range.display_name(), &range.token(), count)
            })
            .collect();
        FacetView {
            name: self.name.clone(),
            title: self.title.clone(),
            filter: filter_string(&prefix, current),
            items,
        }
    }
}

fn filter_string(prefix: &str, operands: &[String]) -> String {
    format!("{}={}", prefix, operands.join(","))
}

fn toggle_item(
    prefix: &str,
    current: &[String],
    name: String,
    token: &str,
    count: u64,
) -> FacetItemView {
    let enabled = current.iter().any(|c| c == token);
    let (enable_filter, disable_filter) = if enabled {
        let without: Vec<String> = current.iter().filter(|c| *c != token).cloned().collect();
        (filter_string(prefix, current), filter_string(prefix, &without))
    } else {
        let mut with = current.to_vec();
        with.push(token.to_string());
        (filter_string(prefix, &with), filter_string(prefix, current))
    };
    FacetItemView {
        name,
        count,
        enabled,
        enable_filter,
        disable_filter,
    }
}

/// A facet as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetView {
    /// Facet name.
    pub name: String,
    /// Facet title.
    pub title: String,
    /// The filter string currently applied for this facet.
    pub filter: String,
    /// One entry per term or range.
    pub items: Vec<FacetItemView>,
}

/// One term or range of a facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetItemView {
    /// Term or range display name.
    pub name: String,
    /// Matching document count.
    pub count: u64,
    /// Whether the item is part of the current filter.
    pub enabled: bool,
    /// Filter string with this item switched on.
    pub enable_filter: String,
    /// Filter string with this item switched off.
    pub disable_filter: String,
}

impl FacetView {
    /// Converts to a dynamic value for serialization in metadata blocks.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self)
            .map(Value::from)
            .unwrap_or(Value::Null)
    }
}
