//! Citation normalization and visibility rules
//!
//! The generation service attaches citations to each answer as loosely
//! shaped JSON records. This module reduces them to a uniform [`Citation`]
//! keyed by citation marker, classifies each record's source, and decides
//! which records are user-facing.
//!
//! Implicit drug citations are attached automatically when a drug name is
//! recognized in the answer. They stay in the map so hover and selection
//! components can resolve them, but they never appear in counts or lists.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Origin of a cited source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Web page or journal article
    #[default]
    Internet,
    /// Clinical practice guideline
    Guideline,
    /// Drug label or monograph
    Drug,
}

impl SourceType {
    /// Classifies a raw source type string
    ///
    /// Unknown or missing values fall back to [`SourceType::Internet`].
    ///
    /// # Examples
    ///
    /// ```
    /// use cliniq::citations::SourceType;
    ///
    /// assert_eq!(SourceType::classify(Some("Guidelines")), SourceType::Guideline);
    /// assert_eq!(SourceType::classify(Some("podcast")), SourceType::Internet);
    /// assert_eq!(SourceType::classify(None), SourceType::Internet);
    /// ```
    pub fn classify(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("guideline") | Some("guidelines") => Self::Guideline,
            Some("drug") | Some("drugs") | Some("drug_label") => Self::Drug,
            _ => Self::Internet,
        }
    }

    /// Human-readable label for previews
    pub fn label(&self) -> &'static str {
        match self {
            Self::Internet => "Article",
            Self::Guideline => "Guideline",
            Self::Drug => "Drug information",
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Internet => "internet",
            Self::Guideline => "guideline",
            Self::Drug => "drug",
        }
    }
}

/// How a drug citation was attached to the answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrugCitationType {
    /// Cited by the answer text itself
    Explicit,
    /// Attached by drug-name recognition only
    Implicit,
}

/// Author list as delivered by the service: a single string or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Authors {
    /// Pre-formatted author string
    One(String),
    /// Individual author names
    Many(Vec<String>),
}

impl Authors {
    /// Formats the author list, abbreviating long lists with "et al."
    pub fn display(&self) -> String {
        match self {
            Self::One(s) => s.clone(),
            Self::Many(names) if names.len() > 3 => format!("{} et al.", names[..3].join(", ")),
            Self::Many(names) => names.join(", "),
        }
    }
}

/// A normalized citation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// Marker key referenced from the answer text
    #[serde(default)]
    pub key: String,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Authors>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,

    #[serde(default)]
    pub source_type: SourceType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drug_citation_type: Option<DrugCitationType>,

    /// Fields this engine does not interpret, carried through unchanged
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Citation {
    /// Creates a citation with only a key, title and source type
    pub fn new(key: impl Into<String>, title: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            url: None,
            authors: None,
            year: None,
            journal: None,
            doi: None,
            source_type,
            drug_citation_type: None,
            extra: Map::new(),
        }
    }

    /// Returns true when this citation must not appear in user-facing lists
    pub fn is_hidden(&self) -> bool {
        self.source_type == SourceType::Drug
            && self.drug_citation_type == Some(DrugCitationType::Implicit)
    }
}

/// Display data for a citation hover card or selection panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationPreview {
    pub key: String,
    pub title: String,
    pub source_label: &'static str,
    /// "Authors (Year). Journal" with absent parts omitted
    pub byline: Option<String>,
    /// URL, or a doi.org link when only a DOI is known
    pub link: Option<String>,
    pub hidden: bool,
}

/// Citations of one answer, keyed by marker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CitationMap(BTreeMap<String, Citation>);

impl CitationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, citation: Citation) {
        self.0.insert(citation.key.clone(), citation);
    }

    /// Looks up a citation by key; unknown keys yield `None`
    pub fn lookup(&self, key: &str) -> Option<&Citation> {
        self.0.get(key)
    }

    /// Number of records, including hidden ones
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates all records, hidden ones included
    pub fn iter(&self) -> impl Iterator<Item = &Citation> {
        self.0.values()
    }

    /// User-facing citations ordered by numeric marker where possible
    pub fn visible(&self) -> Vec<&Citation> {
        let mut visible: Vec<&Citation> = self.0.values().filter(|c| !c.is_hidden()).collect();
        visible.sort_by(|a, b| marker_order(&a.key).cmp(&marker_order(&b.key)));
        visible
    }

    /// Count of user-facing citations
    pub fn visible_count(&self) -> usize {
        visible_count(self)
    }

    /// Builds the declarative preview for a citation marker
    ///
    /// Hidden drug citations still resolve here; drug-name click targets
    /// depend on them.
    pub fn preview(&self, key: &str) -> Option<CitationPreview> {
        let citation = self.lookup(key)?;

        let mut byline = citation.authors.as_ref().map(Authors::display);
        if let Some(year) = &citation.year {
            byline = Some(match byline {
                Some(b) => format!("{} ({})", b, year),
                None => format!("({})", year),
            });
        }
        if let Some(journal) = &citation.journal {
            byline = Some(match byline {
                Some(b) => format!("{}. {}", b, journal),
                None => journal.clone(),
            });
        }

        let link = citation.url.clone().or_else(|| {
            citation
                .doi
                .as_ref()
                .map(|doi| format!("https://doi.org/{}", doi.trim_start_matches("doi:")))
        });

        Some(CitationPreview {
            key: citation.key.clone(),
            title: citation.title.clone(),
            source_label: citation.source_type.label(),
            byline,
            link,
            hidden: citation.is_hidden(),
        })
    }
}

impl FromIterator<Citation> for CitationMap {
    fn from_iter<I: IntoIterator<Item = Citation>>(iter: I) -> Self {
        let mut map = Self::new();
        for citation in iter {
            map.insert(citation);
        }
        map
    }
}

fn marker_order(key: &str) -> (u64, String) {
    (key.parse::<u64>().unwrap_or(u64::MAX), key.to_string())
}

/// Count of citations excluding implicit drug citations
///
/// # Examples
///
/// ```
/// use cliniq::citations::{normalize, visible_count};
/// use serde_json::json;
///
/// let map = normalize(&json!({
///     "1": {"title": "Guideline A", "sourceType": "guideline"},
///     "2": {"title": "Metformin", "sourceType": "drug", "drugCitationType": "implicit"}
/// }));
/// assert_eq!(map.len(), 2);
/// assert_eq!(visible_count(&map), 1);
/// ```
pub fn visible_count(citations: &CitationMap) -> usize {
    citations.iter().filter(|c| !c.is_hidden()).count()
}

/// Normalizes raw citation records into a [`CitationMap`]
///
/// Accepts an object keyed by marker, an array of records, or null. Each
/// record's source type is classified (default `internet`); every other
/// field is preserved. Non-object records are skipped.
pub fn normalize(raw: &Value) -> CitationMap {
    let mut map = CitationMap::new();

    match raw {
        Value::Object(entries) => {
            for (key, record) in entries {
                if let Some(citation) = normalize_record(key, record) {
                    map.insert(citation);
                }
            }
        }
        Value::Array(records) => {
            for (idx, record) in records.iter().enumerate() {
                let key = record
                    .get("key")
                    .or_else(|| record.get("id"))
                    .and_then(scalar_to_string)
                    .unwrap_or_else(|| (idx + 1).to_string());
                if let Some(citation) = normalize_record(&key, record) {
                    map.insert(citation);
                }
            }
        }
        Value::Null => {}
        other => {
            tracing::debug!("Ignoring citations of unexpected shape: {}", other);
        }
    }

    map
}

fn normalize_record(key: &str, record: &Value) -> Option<Citation> {
    let Value::Object(fields) = record else {
        tracing::debug!("Skipping non-object citation record under key {}", key);
        return None;
    };

    let mut fields = fields.clone();

    let raw_source = take_alias(&mut fields, "sourceType", "source_type");
    let source_type = SourceType::classify(raw_source.as_ref().and_then(Value::as_str));
    fields.insert("sourceType".into(), Value::String(source_type.as_str().into()));

    let raw_drug_type = take_alias(&mut fields, "drugCitationType", "drug_citation_type");
    match raw_drug_type
        .as_ref()
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("implicit") => {
            fields.insert("drugCitationType".into(), "implicit".into());
        }
        Some("explicit") => {
            fields.insert("drugCitationType".into(), "explicit".into());
        }
        _ => {}
    }

    for name in ["title", "url", "year", "journal", "doi"] {
        coerce_string(&mut fields, name);
    }
    coerce_authors(&mut fields);

    // Object input is keyed by the map key; array input already derived it.
    fields.insert("key".into(), Value::String(key.to_string()));

    match serde_json::from_value::<Citation>(Value::Object(fields)) {
        Ok(citation) => Some(citation),
        Err(e) => {
            tracing::debug!("Citation {} did not match the expected shape: {}", key, e);
            Some(Citation::new(key, String::new(), source_type))
        }
    }
}

fn take_alias(fields: &mut Map<String, Value>, camel: &str, snake: &str) -> Option<Value> {
    let camel_value = fields.remove(camel);
    let snake_value = fields.remove(snake);
    camel_value.or(snake_value).filter(|v| !v.is_null())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_string(fields: &mut Map<String, Value>, name: &str) {
    if let Some(value) = fields.remove(name) {
        if let Some(s) = scalar_to_string(&value) {
            fields.insert(name.to_string(), Value::String(s));
        }
    }
}

fn coerce_authors(fields: &mut Map<String, Value>) {
    match fields.remove("authors") {
        Some(Value::String(s)) => {
            fields.insert("authors".into(), Value::String(s));
        }
        Some(Value::Array(items)) => {
            let names: Vec<Value> = items
                .iter()
                .filter_map(scalar_to_string)
                .map(Value::String)
                .collect();
            fields.insert("authors".into(), Value::Array(names));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_source_type_defaults_to_internet() {
        let map = normalize(&json!({"1": {"title": "Article"}}));
        assert_eq!(map.lookup("1").unwrap().source_type, SourceType::Internet);
    }

    #[test]
    fn test_unknown_source_type_defaults_to_internet() {
        let map = normalize(&json!({"1": {"title": "Blog", "sourceType": "podcast"}}));
        assert_eq!(map.lookup("1").unwrap().source_type, SourceType::Internet);
    }

    #[test]
    fn test_snake_case_aliases_are_recognized() {
        let map = normalize(&json!({
            "4": {"title": "Lisinopril", "source_type": "drug", "drug_citation_type": "implicit"}
        }));
        let citation = map.lookup("4").unwrap();
        assert_eq!(citation.source_type, SourceType::Drug);
        assert_eq!(citation.drug_citation_type, Some(DrugCitationType::Implicit));
        assert!(citation.is_hidden());
    }

    #[test]
    fn test_other_fields_are_preserved() {
        let map = normalize(&json!({
            "1": {
                "title": "ACC/AHA 2017",
                "sourceType": "guideline",
                "url": "https://example.org/g",
                "year": 2017,
                "journal": "Hypertension",
                "doi": "10.1161/HYP.0000000000000065",
                "authors": ["Whelton PK", "Carey RM"],
                "publisher": "AHA"
            }
        }));
        let citation = map.lookup("1").unwrap();
        assert_eq!(citation.year.as_deref(), Some("2017"));
        assert_eq!(citation.journal.as_deref(), Some("Hypertension"));
        assert_eq!(
            citation.authors,
            Some(Authors::Many(vec!["Whelton PK".into(), "Carey RM".into()]))
        );
        assert_eq!(citation.extra.get("publisher"), Some(&json!("AHA")));
    }

    #[test]
    fn test_visible_count_excludes_only_implicit_drugs() {
        let map = normalize(&json!({
            "1": {"title": "A", "sourceType": "guideline"},
            "2": {"title": "B", "sourceType": "drug", "drugCitationType": "explicit"},
            "3": {"title": "C", "sourceType": "drug", "drugCitationType": "implicit"},
            "4": {"title": "D", "sourceType": "internet", "drugCitationType": "implicit"}
        }));
        let hidden = map.iter().filter(|c| c.is_hidden()).count();
        assert_eq!(hidden, 1);
        assert_eq!(visible_count(&map), map.len() - hidden);
        assert_eq!(map.visible_count(), 3);
    }

    #[test]
    fn test_lookup_unknown_key_is_none() {
        let map = normalize(&json!({"1": {"title": "A"}}));
        assert!(map.lookup("99").is_none());
        assert!(map.preview("99").is_none());
    }

    #[test]
    fn test_object_key_wins_over_record_key() {
        let map = normalize(&json!({
            "1": {"key": "abc", "title": "ACC/AHA 2017", "sourceType": "guideline"}
        }));
        assert_eq!(map.len(), 1);
        let citation = map.lookup("1").unwrap();
        assert_eq!(citation.key, "1");
        assert_eq!(citation.title, "ACC/AHA 2017");
        assert!(map.lookup("abc").is_none());
    }

    #[test]
    fn test_array_input_uses_key_or_position() {
        let map = normalize(&json!([
            {"title": "First"},
            {"id": 7, "title": "Seventh"},
            {"key": "ref-3", "id": 9, "title": "Keyed"},
            "not a record"
        ]));
        assert_eq!(map.len(), 3);
        assert_eq!(map.lookup("ref-3").unwrap().title, "Keyed");
        assert_eq!(map.lookup("1").unwrap().title, "First");
        assert_eq!(map.lookup("7").unwrap().title, "Seventh");
    }

    #[test]
    fn test_null_and_scalar_inputs_are_empty() {
        assert!(normalize(&Value::Null).is_empty());
        assert!(normalize(&json!("citations")).is_empty());
    }

    #[test]
    fn test_visible_orders_numerically() {
        let map = normalize(&json!({
            "10": {"title": "Ten"},
            "2": {"title": "Two"},
            "1": {"title": "One"}
        }));
        let titles: Vec<&str> = map.visible().iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["One", "Two", "Ten"]);
    }

    #[test]
    fn test_preview_builds_byline_and_doi_link() {
        let map = normalize(&json!({
            "1": {
                "title": "SPRINT",
                "authors": "SPRINT Research Group",
                "year": "2015",
                "journal": "NEJM",
                "doi": "10.1056/NEJMoa1511939"
            }
        }));
        let preview = map.preview("1").unwrap();
        assert_eq!(
            preview.byline.as_deref(),
            Some("SPRINT Research Group (2015). NEJM")
        );
        assert_eq!(
            preview.link.as_deref(),
            Some("https://doi.org/10.1056/NEJMoa1511939")
        );
        assert_eq!(preview.source_label, "Article");
        assert!(!preview.hidden);
    }

    #[test]
    fn test_preview_resolves_hidden_drug_citation() {
        let map = normalize(&json!({
            "d1": {"title": "Labetalol", "sourceType": "drug", "drugCitationType": "implicit"}
        }));
        let preview = map.preview("d1").unwrap();
        assert!(preview.hidden);
        assert_eq!(preview.source_label, "Drug information");
        assert_eq!(map.visible_count(), 0);
    }

    #[test]
    fn test_authors_display_abbreviates() {
        let authors = Authors::Many(vec!["A".into(), "B".into(), "C".into(), "D".into()]);
        assert_eq!(authors.display(), "A, B, C et al.");
    }

    #[test]
    fn test_serialized_shape_uses_camel_case() {
        let map = normalize(&json!({
            "1": {"title": "X", "sourceType": "drug", "drugCitationType": "implicit"}
        }));
        let value = serde_json::to_value(&map).unwrap();
        assert_eq!(value["1"]["sourceType"], "drug");
        assert_eq!(value["1"]["drugCitationType"], "implicit");
        let back: CitationMap = serde_json::from_value(value).unwrap();
        assert_eq!(back, map);
    }
}
