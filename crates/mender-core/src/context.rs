//! Context budget management
//!
//! Assembles the bounded bundle of knowledge snippets handed to a single
//! reasoning call. Items are capped per category (so no category can crowd
//! out the others) and the whole bundle is capped by characters. Each call
//! assembles a fresh bundle; nothing accumulates between calls.

use crate::error::KnowledgeError;
use crate::types::Objective;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;

/// Kind of contextual material
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextCategory {
    /// Import conventions
    Imports,
    /// File-structure examples
    FileStructure,
    /// Naming and coding conventions
    Conventions,
    /// Architectural rules
    Architecture,
    /// Code examples
    Examples,
}

impl ContextCategory {
    /// All categories in rendering order
    pub const ALL: [ContextCategory; 5] = [
        ContextCategory::Imports,
        ContextCategory::FileStructure,
        ContextCategory::Conventions,
        ContextCategory::Architecture,
        ContextCategory::Examples,
    ];

    /// Stable name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextCategory::Imports => "imports",
            ContextCategory::FileStructure => "file_structure",
            ContextCategory::Conventions => "conventions",
            ContextCategory::Architecture => "architecture",
            ContextCategory::Examples => "examples",
        }
    }
}

impl std::fmt::Display for ContextCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "imports" => Ok(ContextCategory::Imports),
            "file_structure" => Ok(ContextCategory::FileStructure),
            "conventions" => Ok(ContextCategory::Conventions),
            "architecture" => Ok(ContextCategory::Architecture),
            "examples" => Ok(ContextCategory::Examples),
            other => Err(format!("unknown context category '{other}'")),
        }
    }
}

/// Ranked piece of knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    /// Text injected into the prompt
    pub content: String,
    /// Relevance score, higher is better
    pub score: f64,
    /// Category
    pub category: ContextCategory,
}

impl Snippet {
    /// Create new snippet
    #[inline]
    #[must_use]
    pub fn new(category: ContextCategory, score: f64, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            score,
            category,
        }
    }

    /// Length in characters
    #[inline]
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Source of ranked snippets (knowledge index, local pattern extractors)
///
/// Implementations are read-only and idempotent so one instance can serve
/// concurrent runs.
#[async_trait]
pub trait KnowledgeProvider: Send + Sync + std::fmt::Debug {
    /// Source name (for logs)
    fn name(&self) -> &str;

    /// Up to `k` snippets relevant to `text`, best first
    async fn query(&self, text: &str, k: usize) -> Result<Vec<Snippet>, KnowledgeError>;
}

/// In-memory pattern source
///
/// Holds conventions and examples extracted from the project ahead of time
/// and answers queries by score.
#[derive(Debug, Clone, Default)]
pub struct StaticPatternSource {
    name: String,
    snippets: Vec<Snippet>,
}

impl StaticPatternSource {
    /// Create new source
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            snippets: Vec::new(),
        }
    }

    /// With snippet
    #[inline]
    #[must_use]
    pub fn with_snippet(mut self, snippet: Snippet) -> Self {
        self.snippets.push(snippet);
        self
    }
}

#[async_trait]
impl KnowledgeProvider for StaticPatternSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, _text: &str, k: usize) -> Result<Vec<Snippet>, KnowledgeError> {
        let mut ranked = self.snippets.clone();
        ranked.sort_by(rank_order);
        ranked.truncate(k);
        Ok(ranked)
    }
}

/// Limits applied to one bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextCaps {
    per_category: BTreeMap<ContextCategory, usize>,
    overall_chars: usize,
    snippet_chars: usize,
}

impl ContextCaps {
    /// Same item cap for every category
    #[must_use]
    pub fn uniform(per_category: usize) -> Self {
        Self {
            per_category: ContextCategory::ALL
                .iter()
                .map(|c| (*c, per_category))
                .collect(),
            ..Self::default()
        }
    }

    /// With cap for one category
    #[inline]
    #[must_use]
    pub fn with_cap(mut self, category: ContextCategory, cap: usize) -> Self {
        self.per_category.insert(category, cap);
        self
    }

    /// With overall character ceiling
    #[inline]
    #[must_use]
    pub fn with_overall_chars(mut self, chars: usize) -> Self {
        self.overall_chars = chars;
        self
    }

    /// With per-snippet character limit
    #[inline]
    #[must_use]
    pub fn with_snippet_chars(mut self, chars: usize) -> Self {
        self.snippet_chars = chars;
        self
    }

    /// Item cap for a category
    #[inline]
    #[must_use]
    pub fn cap(&self, category: ContextCategory) -> usize {
        self.per_category.get(&category).copied().unwrap_or(0)
    }

    /// Overall character ceiling
    #[inline]
    #[must_use]
    pub fn overall_chars(&self) -> usize {
        self.overall_chars
    }

    /// Per-snippet character limit
    #[inline]
    #[must_use]
    pub fn snippet_chars(&self) -> usize {
        self.snippet_chars
    }

    /// Upper bound on the number of items in a bundle
    #[must_use]
    pub fn total_items(&self) -> usize {
        self.per_category.values().sum()
    }

    /// Copy with the overall ceiling lowered to `ceiling` if it is smaller
    #[inline]
    #[must_use]
    pub fn clamped_to(&self, ceiling: usize) -> Self {
        let mut caps = self.clone();
        caps.overall_chars = caps.overall_chars.min(ceiling);
        caps
    }
}

impl Default for ContextCaps {
    fn default() -> Self {
        let per_category = [
            (ContextCategory::Imports, 2),
            (ContextCategory::FileStructure, 2),
            (ContextCategory::Conventions, 3),
            (ContextCategory::Architecture, 2),
            (ContextCategory::Examples, 2),
        ]
        .into_iter()
        .collect();

        Self {
            per_category,
            overall_chars: 6_000,
            snippet_chars: 800,
        }
    }
}

/// Bounded context for one reasoning call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    items: Vec<Snippet>,
    total_chars: usize,
}

impl ContextBundle {
    /// Empty bundle
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Items, best first
    #[inline]
    #[must_use]
    pub fn items(&self) -> &[Snippet] {
        &self.items
    }

    /// Items of one category, best first
    pub fn by_category(&self, category: ContextCategory) -> impl Iterator<Item = &Snippet> {
        self.items.iter().filter(move |s| s.category == category)
    }

    /// Number of items
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total characters of content
    #[inline]
    #[must_use]
    pub fn total_chars(&self) -> usize {
        self.total_chars
    }

    /// Prompt section, grouped by category
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for category in ContextCategory::ALL {
            let mut items = self.by_category(category).peekable();
            if items.peek().is_none() {
                continue;
            }
            let _ = writeln!(out, "## {category}");
            for item in items {
                let _ = writeln!(out, "- {}", item.content);
            }
        }
        out
    }
}

/// Builds bounded context bundles from registered knowledge sources
#[derive(Debug, Clone, Default)]
pub struct ContextBudgetManager {
    sources: Vec<Arc<dyn KnowledgeProvider>>,
    caps: ContextCaps,
}

impl ContextBudgetManager {
    /// Create new manager
    #[inline]
    #[must_use]
    pub fn new(caps: ContextCaps) -> Self {
        Self {
            sources: Vec::new(),
            caps,
        }
    }

    /// With knowledge source
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn KnowledgeProvider>) -> Self {
        self.sources.push(source);
        self
    }

    /// Configured caps
    #[inline]
    #[must_use]
    pub fn caps(&self) -> &ContextCaps {
        &self.caps
    }

    /// Number of registered sources
    #[inline]
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Assemble a bundle for `objective` under `caps`
    ///
    /// Sources are queried concurrently. A failing source is logged and
    /// skipped; context is an aid, not a precondition.
    pub async fn assemble(&self, objective: &Objective, caps: &ContextCaps) -> ContextBundle {
        let k = caps.total_items();
        if k == 0 || self.sources.is_empty() {
            return ContextBundle::empty();
        }

        let query = objective.query_text();
        let results = join_all(self.sources.iter().map(|source| {
            let query = query.as_str();
            async move { (source.name().to_string(), source.query(query, k).await) }
        }))
        .await;

        let mut candidates = Vec::new();
        for (name, result) in results {
            match result {
                Ok(snippets) => candidates.extend(snippets),
                Err(e) => tracing::warn!(source = %name, error = %e, "knowledge source failed, skipping"),
            }
        }

        let bundle = select(candidates, caps);
        tracing::debug!(
            items = bundle.len(),
            chars = bundle.total_chars(),
            ceiling = caps.overall_chars(),
            "assembled context bundle"
        );
        bundle
    }

    /// Assemble with the configured caps, further clamped to `ceiling` characters
    pub async fn assemble_within(&self, objective: &Objective, ceiling: usize) -> ContextBundle {
        let caps = self.caps.clamped_to(ceiling);
        self.assemble(objective, &caps).await
    }
}

/// Pick snippets for a bundle
///
/// Ranks candidates, keeps the best `cap(category)` per category, trims each
/// snippet to the per-snippet limit, then drops the lowest-ranked items until
/// the bundle fits the overall ceiling. A single remaining item that is still
/// too large is cut to the ceiling.
#[must_use]
pub fn select(mut candidates: Vec<Snippet>, caps: &ContextCaps) -> ContextBundle {
    candidates.retain(|s| s.score.is_finite() && !s.content.trim().is_empty());
    candidates.sort_by(rank_order);

    let mut seen = HashSet::new();
    let mut per_category: BTreeMap<ContextCategory, usize> = BTreeMap::new();
    let mut items = Vec::new();

    for mut snippet in candidates {
        let taken = per_category.entry(snippet.category).or_insert(0);
        if *taken >= caps.cap(snippet.category) {
            continue;
        }
        if !seen.insert(snippet.content.clone()) {
            continue;
        }
        *taken += 1;
        snippet.content = truncate_chars(&snippet.content, caps.snippet_chars());
        items.push(snippet);
    }

    let mut total_chars: usize = items.iter().map(Snippet::char_len).sum();
    while total_chars > caps.overall_chars() && items.len() > 1 {
        if let Some(dropped) = items.pop() {
            total_chars -= dropped.char_len();
        }
    }
    if total_chars > caps.overall_chars() {
        if let Some(only) = items.first_mut() {
            only.content = truncate_chars(&only.content, caps.overall_chars());
            total_chars = only.char_len();
        }
    }
    items.retain(|s| !s.content.is_empty());
    let total_chars = if items.is_empty() { 0 } else { total_chars };

    ContextBundle { items, total_chars }
}

fn rank_order(a: &Snippet, b: &Snippet) -> std::cmp::Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.category.cmp(&b.category))
        .then_with(|| a.content.cmp(&b.content))
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn snippet(category: ContextCategory, score: f64, content: &str) -> Snippet {
        Snippet::new(category, score, content)
    }

    #[derive(Debug)]
    struct FailingSource;

    #[async_trait]
    impl KnowledgeProvider for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn query(&self, _text: &str, _k: usize) -> Result<Vec<Snippet>, KnowledgeError> {
            Err(KnowledgeError::Unavailable("index offline".into()))
        }
    }

    #[test]
    fn category_parsing() {
        assert_eq!("file-structure".parse::<ContextCategory>(), Ok(ContextCategory::FileStructure));
        assert_eq!("Examples".parse::<ContextCategory>(), Ok(ContextCategory::Examples));
        assert!("weather".parse::<ContextCategory>().is_err());
    }

    #[test]
    fn caps_are_per_category() {
        let caps = ContextCaps::uniform(2);
        let candidates = vec![
            snippet(ContextCategory::Examples, 0.9, "e1"),
            snippet(ContextCategory::Examples, 0.8, "e2"),
            snippet(ContextCategory::Examples, 0.7, "e3"),
            snippet(ContextCategory::Imports, 0.1, "i1"),
        ];

        let bundle = select(candidates, &caps);
        assert_eq!(bundle.by_category(ContextCategory::Examples).count(), 2);
        assert_eq!(bundle.by_category(ContextCategory::Imports).count(), 1);
        assert!(!bundle.items().iter().any(|s| s.content == "e3"));
    }

    #[test]
    fn overall_ceiling_drops_lowest_ranked_first() {
        let caps = ContextCaps::uniform(3).with_overall_chars(25);
        let candidates = vec![
            snippet(ContextCategory::Imports, 0.9, "aaaaaaaaaa"),
            snippet(ContextCategory::Conventions, 0.8, "bbbbbbbbbb"),
            snippet(ContextCategory::Examples, 0.1, "cccccccccc"),
        ];

        let bundle = select(candidates, &caps);
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.total_chars(), 20);
        assert!(bundle.items().iter().all(|s| s.content != "cccccccccc"));
    }

    #[test]
    fn single_oversized_item_is_cut_to_ceiling() {
        let caps = ContextCaps::uniform(1).with_overall_chars(5);
        let bundle = select(vec![snippet(ContextCategory::Examples, 1.0, "0123456789")], &caps);
        assert_eq!(bundle.items()[0].content, "01234");
        assert_eq!(bundle.total_chars(), 5);
    }

    #[test]
    fn snippets_are_trimmed_and_deduplicated() {
        let caps = ContextCaps::uniform(3).with_snippet_chars(4);
        let candidates = vec![
            snippet(ContextCategory::Imports, 0.9, "use std::sync::Arc;"),
            snippet(ContextCategory::Imports, 0.5, "use std::sync::Arc;"),
        ];
        let bundle = select(candidates, &caps);
        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.items()[0].content, "use ");
    }

    #[test]
    fn ranking_is_deterministic_on_ties() {
        let caps = ContextCaps::uniform(1);
        let a = vec![
            snippet(ContextCategory::Examples, 0.5, "zeta"),
            snippet(ContextCategory::Examples, 0.5, "alpha"),
        ];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(select(a, &caps), select(b, &caps));
    }

    #[test]
    fn render_groups_by_category() {
        let caps = ContextCaps::default();
        let bundle = select(
            vec![
                snippet(ContextCategory::Examples, 0.9, "fn demo() {}"),
                snippet(ContextCategory::Imports, 0.2, "use serde::Serialize;"),
            ],
            &caps,
        );
        let rendered = bundle.render();
        let imports = rendered.find("## imports").unwrap();
        let examples = rendered.find("## examples").unwrap();
        assert!(imports < examples);
    }

    #[tokio::test]
    async fn failing_source_is_skipped() {
        let local = StaticPatternSource::new("local")
            .with_snippet(snippet(ContextCategory::Conventions, 0.7, "snake_case functions"));
        let manager = ContextBudgetManager::new(ContextCaps::default())
            .with_source(Arc::new(FailingSource))
            .with_source(Arc::new(local));

        let bundle = manager.assemble_within(&Objective::new("rename"), 1_000).await;
        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.items()[0].category, ContextCategory::Conventions);
    }

    #[tokio::test]
    async fn no_sources_yields_empty_bundle() {
        let manager = ContextBudgetManager::default();
        let bundle = manager.assemble(&Objective::new("x"), &ContextCaps::default()).await;
        assert!(bundle.is_empty());
        assert_eq!(bundle.total_chars(), 0);
    }

    fn category() -> impl Strategy<Value = ContextCategory> {
        prop_oneof![
            Just(ContextCategory::Imports),
            Just(ContextCategory::FileStructure),
            Just(ContextCategory::Conventions),
            Just(ContextCategory::Architecture),
            Just(ContextCategory::Examples),
        ]
    }

    proptest! {
        #[test]
        fn prop_bundle_respects_every_cap(
            raw in proptest::collection::vec((category(), 0.0f64..1.0, ".{0,120}"), 0..40),
            per_category in 0usize..4,
            overall in 1usize..400,
            snippet_chars in 1usize..200,
        ) {
            let caps = ContextCaps::uniform(per_category)
                .with_overall_chars(overall)
                .with_snippet_chars(snippet_chars);
            let candidates = raw
                .into_iter()
                .map(|(c, s, text)| Snippet::new(c, s, text))
                .collect();

            let bundle = select(candidates, &caps);

            prop_assert!(bundle.total_chars() <= overall);
            let actual: usize = bundle.items().iter().map(Snippet::char_len).sum();
            prop_assert_eq!(actual, bundle.total_chars());
            for c in ContextCategory::ALL {
                prop_assert!(bundle.by_category(c).count() <= per_category);
            }
        }
    }
}
