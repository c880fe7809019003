//! Query routing, concurrent strategy execution, and result merging.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use locus_core::{
    Collection, CollectionId, Document, Filters, LocusError, QueryRequest, QueryResponse,
    RetrievalConfig, SearchOutcome, SearchResult, Strategy, StrategyRun, StrategyStatus,
    SymbolRouting, SCHEMA_VERSION,
};
use locus_store::{CollectionStore, Predicate};
use tracing::{debug, warn};

/// Words that carry no meaning for keyword matching.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "by", "code", "do", "does", "file", "files", "find", "for",
    "from", "how", "i", "in", "is", "it", "me", "of", "on", "or", "show", "the", "this", "to",
    "what", "where", "which", "who", "with",
];

/// A document scored by one strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// The matched document.
    pub document: Document,
    /// Relevance in `[0, 1]`.
    pub score: f64,
    /// Strategy that produced `score`.
    pub strategy: Strategy,
}

/// Routes queries across keyword, symbol and semantic search.
///
/// Stateless apart from its configuration; one instance serves every
/// session.
#[derive(Clone)]
pub struct RetrievalOrchestrator {
    store: Arc<dyn CollectionStore>,
    config: RetrievalConfig,
}

impl RetrievalOrchestrator {
    /// Orchestrator over `store`.
    pub fn new(store: Arc<dyn CollectionStore>, config: RetrievalConfig) -> Self {
        Self { store, config }
    }

    /// Answer one query.
    ///
    /// Strategies run concurrently under the configured deadline. A failed
    /// strategy is dropped and the response marked degraded; one that misses
    /// the deadline is also reported as timed out and the response marked
    /// partial. A collection that was never ingested, or was written by
    /// another schema version, yields [`SearchOutcome::NotIngested`].
    ///
    /// # Errors
    ///
    /// Returns a store error only when the collection itself cannot be
    /// looked up.
    pub async fn search(&self, request: &QueryRequest) -> Result<QueryResponse, LocusError> {
        let started = Instant::now();
        let id = &request.collection_id;
        let text = request.text.trim();

        let collection = match self.store.get_collection(id).await? {
            Some(collection) if collection.schema_version == SCHEMA_VERSION => collection,
            Some(collection) => {
                warn!(
                    collection = %id,
                    stored = collection.schema_version,
                    "collection needs re-ingestion"
                );
                return Ok(QueryResponse::not_ingested(id.clone(), text));
            }
            None => return Ok(QueryResponse::not_ingested(id.clone(), text)),
        };

        let limit = self.clamp_limit(request.limit);
        let plan = if text.is_empty() {
            Vec::new()
        } else {
            plan(request.strategy, text, &self.config)
        };
        let deadline = Duration::from_millis(self.config.query_timeout_ms);
        let filters = &request.filters;

        let (keyword, symbol, semantic) = tokio::join!(
            timed(
                Strategy::Keyword,
                plan.contains(&Strategy::Keyword),
                deadline,
                self.keyword(id, text, filters, limit),
            ),
            timed(
                Strategy::Symbol,
                plan.contains(&Strategy::Symbol),
                deadline,
                self.symbol(id, text, filters, limit),
            ),
            timed(
                Strategy::Semantic,
                plan.contains(&Strategy::Semantic),
                deadline,
                self.semantic(id, text, filters, limit),
            ),
        );

        let mut strategies = Vec::with_capacity(plan.len());
        let mut hits = Vec::new();
        for (run, found) in [keyword, symbol, semantic].into_iter().flatten() {
            strategies.push(run);
            hits.extend(found);
        }

        let mut merged = merge(hits);
        merged.truncate(limit);
        let results: Vec<SearchResult> = merged
            .into_iter()
            .map(|hit| to_result(&collection, hit))
            .collect();

        let degraded = strategies
            .iter()
            .any(|run| !matches!(run.status, StrategyStatus::Completed { .. }));
        let partial = strategies
            .iter()
            .any(|run| run.status == StrategyStatus::TimedOut);
        let outcome = if degraded {
            SearchOutcome::Degraded
        } else if results.is_empty() {
            SearchOutcome::NothingFound
        } else {
            SearchOutcome::Found
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            collection = %id,
            query = text,
            results = results.len(),
            ?outcome,
            elapsed_ms,
            "query answered"
        );

        Ok(QueryResponse {
            collection_id: id.clone(),
            query: text.to_string(),
            outcome,
            partial,
            strategies,
            results,
            elapsed_ms,
        })
    }

    fn clamp_limit(&self, requested: Option<usize>) -> usize {
        let max = self.config.max_limit.max(1);
        requested
            .unwrap_or(self.config.default_limit)
            .clamp(1, max)
    }

    /// Fraction of query terms found in the summary, keywords, symbols or path.
    async fn keyword(
        &self,
        id: &CollectionId,
        text: &str,
        filters: &Filters,
        limit: usize,
    ) -> Result<Vec<Hit>, LocusError> {
        let terms = query_terms(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let per_term: Vec<Predicate> = terms.iter().map(|term| term_predicate(term)).collect();
        // Uncapped: candidates arrive in path order, not score order.
        let candidates = self
            .store
            .query_by_predicate(id, &Predicate::Any(per_term.clone()), usize::MAX)
            .await?;

        let total = per_term.len() as f64;
        let mut hits: Vec<Hit> = candidates
            .into_iter()
            .filter(|doc| filters.matches(doc))
            .filter_map(|document| {
                let matched = per_term.iter().filter(|p| p.matches(&document)).count();
                (matched > 0).then(|| Hit {
                    score: matched as f64 / total,
                    strategy: Strategy::Keyword,
                    document,
                })
            })
            .collect();
        rank(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    /// Best exact, prefix, or substring match between query identifiers and
    /// symbol names.
    async fn symbol(
        &self,
        id: &CollectionId,
        text: &str,
        filters: &Filters,
        limit: usize,
    ) -> Result<Vec<Hit>, LocusError> {
        let mut names = identifier_tokens(text);
        if names.is_empty() {
            names = query_terms(text);
        }
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let predicate = Predicate::Any(
            names
                .iter()
                .map(|name| Predicate::SymbolContains {
                    name: name.clone(),
                    kind: None,
                })
                .collect(),
        );
        // Scored below, so every candidate is needed; see `keyword`.
        let candidates = self.store.query_by_predicate(id, &predicate, usize::MAX).await?;

        let names: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
        let mut hits: Vec<Hit> = candidates
            .into_iter()
            .filter(|doc| filters.matches(doc))
            .filter_map(|document| {
                let score = document
                    .symbols
                    .iter()
                    .filter_map(|symbol| {
                        let symbol = symbol.to_lowercase();
                        names
                            .iter()
                            .filter_map(|name| self.symbol_score(name, &symbol))
                            .reduce(f64::max)
                    })
                    .reduce(f64::max)?;
                Some(Hit {
                    score,
                    strategy: Strategy::Symbol,
                    document,
                })
            })
            .collect();
        rank(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    fn symbol_score(&self, name: &str, symbol: &str) -> Option<f64> {
        if symbol == name {
            Some(self.config.symbol_exact_score)
        } else if symbol.starts_with(name) {
            Some(self.config.symbol_prefix_score)
        } else if symbol.contains(name) {
            Some(self.config.symbol_substring_score)
        } else {
            None
        }
    }

    /// Embedding similarity, clamped to `[0, 1]`.
    async fn semantic(
        &self,
        id: &CollectionId,
        text: &str,
        filters: &Filters,
        limit: usize,
    ) -> Result<Vec<Hit>, LocusError> {
        let scored = self.store.query_by_text(id, text, filters, limit).await?;
        let floor = self.config.min_semantic_score;
        Ok(scored
            .into_iter()
            .map(|scored| Hit {
                score: scored.score.clamp(0.0, 1.0),
                strategy: Strategy::Semantic,
                document: scored.document,
            })
            .filter(|hit| hit.score > 0.0 && hit.score >= floor)
            .collect())
    }
}

/// Run `search` under `deadline` when `planned`, recording how it went.
async fn timed<F>(
    strategy: Strategy,
    planned: bool,
    deadline: Duration,
    search: F,
) -> Option<(StrategyRun, Vec<Hit>)>
where
    F: Future<Output = Result<Vec<Hit>, LocusError>>,
{
    if !planned {
        return None;
    }
    let (status, hits) = match tokio::time::timeout(deadline, search).await {
        Ok(Ok(hits)) => (StrategyStatus::Completed { hits: hits.len() }, hits),
        Ok(Err(err)) => {
            warn!(%strategy, error = %err, "search strategy failed");
            (
                StrategyStatus::Failed {
                    reason: err.to_string(),
                },
                Vec::new(),
            )
        }
        Err(_) => {
            warn!(%strategy, timeout_ms = deadline.as_millis() as u64, "search strategy timed out");
            (StrategyStatus::TimedOut, Vec::new())
        }
    };
    Some((StrategyRun { strategy, status }, hits))
}

/// The strategies a query runs, in execution order.
///
/// An explicit non-hybrid strategy runs alone. Hybrid routing always runs
/// keyword and semantic search, and symbol search according to
/// [`SymbolRouting`].
///
/// # Examples
///
/// ```
/// use locus_core::{RetrievalConfig, Strategy};
/// use locus_engine::orchestrator::plan;
///
/// let config = RetrievalConfig::default();
/// assert_eq!(
///     plan(None, "where is authentication handled", &config),
///     vec![Strategy::Keyword, Strategy::Semantic]
/// );
/// assert_eq!(
///     plan(None, "validateToken", &config),
///     vec![Strategy::Keyword, Strategy::Symbol, Strategy::Semantic]
/// );
/// assert_eq!(plan(Some(Strategy::Symbol), "login", &config), vec![Strategy::Symbol]);
/// ```
pub fn plan(requested: Option<Strategy>, text: &str, config: &RetrievalConfig) -> Vec<Strategy> {
    match requested {
        Some(Strategy::Hybrid) | None => {}
        Some(only) => return vec![only],
    }
    let with_symbol = match config.symbol_routing {
        SymbolRouting::Always => true,
        SymbolRouting::Never => false,
        SymbolRouting::Auto => is_identifier_like(text, config.identifier_max_len),
    };
    let mut plan = vec![Strategy::Keyword];
    if with_symbol {
        plan.push(Strategy::Symbol);
    }
    plan.push(Strategy::Semantic);
    plan
}

/// Whether a query reads like a code identifier rather than prose.
///
/// True for a single token, or for text containing a camelCase or
/// snake_case word, as long as it is no longer than `max_len` characters.
///
/// # Examples
///
/// ```
/// use locus_engine::orchestrator::is_identifier_like;
///
/// assert!(is_identifier_like("parse_config", 80));
/// assert!(is_identifier_like("where is validateToken called", 80));
/// assert!(!is_identifier_like("how are sessions stored", 80));
/// ```
pub fn is_identifier_like(text: &str, max_len: usize) -> bool {
    let text = text.trim();
    if text.is_empty() || text.chars().count() > max_len {
        return false;
    }
    !text.contains(char::is_whitespace) || words(text).any(is_compound)
}

/// Lowercase, deduplicated search terms with stopwords removed.
///
/// Falls back to every term when the query consists only of stopwords.
///
/// # Examples
///
/// ```
/// use locus_engine::orchestrator::query_terms;
///
/// assert_eq!(query_terms("Where is authentication handled?"), vec!["authentication", "handled"]);
/// assert_eq!(query_terms("rate_limit rate_limit"), vec!["rate_limit"]);
/// ```
pub fn query_terms(text: &str) -> Vec<String> {
    let mut all: Vec<String> = Vec::new();
    for word in words(text) {
        let word = word.to_lowercase();
        if word.chars().count() > 1 && !all.contains(&word) {
            all.push(word);
        }
    }
    let meaningful: Vec<String> = all
        .iter()
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .cloned()
        .collect();
    if meaningful.is_empty() {
        all
    } else {
        meaningful
    }
}

/// Tokens of `text` that name code: every token of a single-token query,
/// otherwise only camelCase and snake_case words.
fn identifier_tokens(text: &str) -> Vec<String> {
    let single = !text.trim().contains(char::is_whitespace);
    let mut tokens: Vec<String> = Vec::new();
    for word in words(text) {
        if (single || is_compound(word)) && !tokens.iter().any(|t| t == word) {
            tokens.push(word.to_string());
        }
    }
    tokens
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}

fn is_compound(word: &str) -> bool {
    let snake = word.trim_matches('_').contains('_');
    let chars: Vec<char> = word.chars().collect();
    let camel = chars
        .windows(2)
        .any(|pair| pair[0].is_lowercase() && pair[1].is_uppercase());
    snake || camel
}

fn term_predicate(term: &str) -> Predicate {
    Predicate::Any(vec![
        Predicate::SummaryContains(term.to_string()),
        Predicate::KeywordContains(term.to_string()),
        Predicate::SymbolContains {
            name: term.to_string(),
            kind: None,
        },
        Predicate::PathContains(term.to_string()),
    ])
}

/// Merge hits from several strategies into one ranked list.
///
/// Hits are grouped by document id and each group keeps its highest score,
/// tagged with the strategy that produced it; equal scores keep the
/// earlier strategy in [`Strategy`] order. The result is sorted by
/// descending score, then shorter path, then path. The output does not
/// depend on input order.
///
/// # Examples
///
/// ```
/// use locus_core::{Document, Strategy};
/// use locus_engine::orchestrator::{merge, Hit};
///
/// let doc = Document::new("src/auth.rs", "h");
/// let merged = merge(vec![
///     Hit { document: doc.clone(), score: 0.4, strategy: Strategy::Semantic },
///     Hit { document: doc, score: 0.9, strategy: Strategy::Keyword },
/// ]);
/// assert_eq!(merged.len(), 1);
/// assert_eq!(merged[0].score, 0.9);
/// assert_eq!(merged[0].strategy, Strategy::Keyword);
/// ```
pub fn merge(hits: impl IntoIterator<Item = Hit>) -> Vec<Hit> {
    let mut best: HashMap<String, Hit> = HashMap::new();
    for hit in hits {
        match best.entry(hit.document.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(hit);
            }
            Entry::Occupied(mut slot) => {
                if outranks(&hit, slot.get()) {
                    slot.insert(hit);
                }
            }
        }
    }
    let mut merged: Vec<Hit> = best.into_values().collect();
    rank(&mut merged);
    merged
}

fn outranks(candidate: &Hit, current: &Hit) -> bool {
    candidate.score > current.score
        || (candidate.score == current.score && candidate.strategy < current.strategy)
}

fn rank(hits: &mut [Hit]) {
    hits.sort_by(|a, b| {
        let (pa, pb) = (&a.document.relative_path, &b.document.relative_path);
        b.score
            .total_cmp(&a.score)
            .then_with(|| pa.len().cmp(&pb.len()))
            .then_with(|| pa.cmp(pb))
    });
}

fn to_result(collection: &Collection, hit: Hit) -> SearchResult {
    let Hit {
        document,
        score,
        strategy,
    } = hit;
    SearchResult {
        github_url: collection.github_blob_url(&document.relative_path),
        document_id: document.id,
        relative_path: document.relative_path,
        summary: document.summary,
        score,
        matched_by: strategy,
        symbols: document.symbols,
        language: document.language,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, score: f64, strategy: Strategy) -> Hit {
        Hit {
            document: Document::new(path, "h"),
            score,
            strategy,
        }
    }

    fn summary(hits: &[Hit]) -> Vec<(String, f64, Strategy)> {
        hits.iter()
            .map(|h| (h.document.relative_path.clone(), h.score, h.strategy))
            .collect()
    }

    #[test]
    fn max_score_wins_and_keeps_its_strategy() {
        let merged = merge(vec![
            hit("src/auth.rs", 0.9, Strategy::Keyword),
            hit("src/auth.rs", 0.4, Strategy::Semantic),
        ]);
        assert_eq!(summary(&merged), vec![("src/auth.rs".into(), 0.9, Strategy::Keyword)]);
    }

    #[test]
    fn merge_is_order_independent() {
        let hits = vec![
            hit("src/auth.rs", 0.9, Strategy::Keyword),
            hit("src/auth.rs", 0.4, Strategy::Semantic),
            hit("src/session.rs", 0.6, Strategy::Symbol),
            hit("src/session.rs", 0.6, Strategy::Semantic),
            hit("lib/a.rs", 0.6, Strategy::Keyword),
            hit("src/b.rs", 0.6, Strategy::Semantic),
            hit("README.md", 0.2, Strategy::Keyword),
        ];
        let expected = summary(&merge(hits.clone()));

        let mut reversed = hits.clone();
        reversed.reverse();
        assert_eq!(summary(&merge(reversed)), expected);

        for shift in 1..hits.len() {
            let mut rotated = hits.clone();
            rotated.rotate_left(shift);
            assert_eq!(summary(&merge(rotated)), expected, "rotation {shift}");
        }
    }

    #[test]
    fn ties_prefer_shorter_then_lexicographic_paths() {
        let merged = merge(vec![
            hit("src/zeta.rs", 0.5, Strategy::Keyword),
            hit("src/alpha.rs", 0.5, Strategy::Keyword),
            hit("src/b.rs", 0.5, Strategy::Keyword),
            hit("src/a.rs", 0.5, Strategy::Keyword),
            hit("deep/nested/path.rs", 0.7, Strategy::Semantic),
        ]);
        let paths: Vec<&str> = merged.iter().map(|h| h.document.relative_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["deep/nested/path.rs", "src/a.rs", "src/b.rs", "src/zeta.rs", "src/alpha.rs"]
        );
    }

    #[test]
    fn equal_scores_keep_the_earlier_strategy() {
        let a = merge(vec![
            hit("x.rs", 0.6, Strategy::Semantic),
            hit("x.rs", 0.6, Strategy::Symbol),
        ]);
        assert_eq!(a[0].strategy, Strategy::Symbol);
    }

    #[test]
    fn routing_modes() {
        let mut config = RetrievalConfig::default();
        assert_eq!(
            plan(Some(Strategy::Hybrid), "session store", &config),
            vec![Strategy::Keyword, Strategy::Semantic]
        );

        config.symbol_routing = SymbolRouting::Always;
        assert!(plan(None, "session store", &config).contains(&Strategy::Symbol));

        config.symbol_routing = SymbolRouting::Never;
        assert!(!plan(None, "validateToken", &config).contains(&Strategy::Symbol));
        assert_eq!(plan(Some(Strategy::Semantic), "x", &config), vec![Strategy::Semantic]);
    }

    #[test]
    fn identifier_detection() {
        assert!(is_identifier_like("login", 80));
        assert!(is_identifier_like("HttpClient", 80));
        assert!(is_identifier_like("find MAX_RETRIES", 80));
        assert!(!is_identifier_like("user login flow", 80));
        assert!(!is_identifier_like("", 80));
        assert!(!is_identifier_like("averyveryverylongidentifier", 10));
    }

    #[test]
    fn identifier_tokens_pick_code_words() {
        assert_eq!(identifier_tokens("AuthService::login"), vec!["AuthService", "login"]);
        assert_eq!(identifier_tokens("who calls validateToken here"), vec!["validateToken"]);
        assert!(identifier_tokens("plain english words").is_empty());
    }

    #[test]
    fn stopword_only_queries_keep_their_terms() {
        assert_eq!(query_terms("where is it"), vec!["where", "is", "it"]);
        assert!(query_terms("  ?! ").is_empty());
    }
}
