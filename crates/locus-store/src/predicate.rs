use locus_core::{Document, ProcessingStatus};
use serde::{Deserialize, Serialize};

/// Which symbol list a symbol predicate looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Variable,
}

/// Structured filter over documents.
///
/// String comparisons are case-insensitive; "contains" means exact
/// substring.
///
/// # Examples
///
/// ```
/// use locus_core::Document;
/// use locus_store::{Predicate, SymbolKind};
///
/// let mut doc = Document::new("src/auth/login.rs", "h");
/// doc.symbols.functions.push("validateToken".into());
///
/// let p = Predicate::All(vec![
///     Predicate::PathPrefix("SRC/auth".into()),
///     Predicate::SymbolPrefix { name: "validate".into(), kind: Some(SymbolKind::Function) },
/// ]);
/// assert!(p.matches(&doc));
/// assert!(!Predicate::SymbolEquals { name: "validate".into(), kind: None }.matches(&doc));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Relative path contains the text.
    PathContains(String),
    /// Relative path starts with the text.
    PathPrefix(String),
    /// Language equals the text.
    Language(String),
    /// Summary contains the text.
    SummaryContains(String),
    /// Some keyword contains the text.
    KeywordContains(String),
    /// Some symbol equals the name.
    SymbolEquals { name: String, kind: Option<SymbolKind> },
    /// Some symbol starts with the name.
    SymbolPrefix { name: String, kind: Option<SymbolKind> },
    /// Some symbol contains the name.
    SymbolContains { name: String, kind: Option<SymbolKind> },
    /// Processing status equals.
    Status(ProcessingStatus),
    /// Every inner predicate holds. Empty is true.
    All(Vec<Predicate>),
    /// Some inner predicate holds. Empty is false.
    Any(Vec<Predicate>),
}

impl Predicate {
    /// Evaluate against one document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Predicate::PathContains(s) => contains_ci(&doc.relative_path, s),
            Predicate::PathPrefix(s) => lower(&doc.relative_path).starts_with(&lower(s)),
            Predicate::Language(s) => doc
                .language
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(s)),
            Predicate::SummaryContains(s) => contains_ci(&doc.summary, s),
            Predicate::KeywordContains(s) => doc.keywords.iter().any(|k| contains_ci(k, s)),
            Predicate::SymbolEquals { name, kind } => {
                let name = lower(name);
                symbols(doc, *kind).any(|sym| lower(sym) == name)
            }
            Predicate::SymbolPrefix { name, kind } => {
                let name = lower(name);
                symbols(doc, *kind).any(|sym| lower(sym).starts_with(&name))
            }
            Predicate::SymbolContains { name, kind } => {
                let name = lower(name);
                symbols(doc, *kind).any(|sym| lower(sym).contains(&name))
            }
            Predicate::Status(status) => doc.status() == *status,
            Predicate::All(inner) => inner.iter().all(|p| p.matches(doc)),
            Predicate::Any(inner) => inner.iter().any(|p| p.matches(doc)),
        }
    }
}

fn symbols(doc: &Document, kind: Option<SymbolKind>) -> Box<dyn Iterator<Item = &str> + '_> {
    let list = match kind {
        None => return Box::new(doc.symbols.iter()),
        Some(SymbolKind::Function) => &doc.symbols.functions,
        Some(SymbolKind::Class) => &doc.symbols.classes,
        Some(SymbolKind::Variable) => &doc.symbols.variables,
    };
    Box::new(list.iter().map(String::as_str))
}

fn lower(s: &str) -> String {
    s.to_lowercase()
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    lower(haystack).contains(&lower(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        let mut d = Document::new("src/billing/Invoice.ts", "h");
        d.language = Some("typescript".into());
        d.summary = "Creates and sends customer Invoices.".into();
        d.keywords = vec!["billing".into(), "pdf export".into()];
        d.symbols.classes.push("InvoiceBuilder".into());
        d.symbols.functions.push("sendInvoice".into());
        d.symbols.variables.push("MAX_LINES".into());
        d
    }

    #[test]
    fn string_predicates_ignore_case() {
        let d = doc();
        assert!(Predicate::PathContains("invoice".into()).matches(&d));
        assert!(Predicate::PathPrefix("src/Billing".into()).matches(&d));
        assert!(!Predicate::PathPrefix("billing".into()).matches(&d));
        assert!(Predicate::Language("TypeScript".into()).matches(&d));
        assert!(Predicate::SummaryContains("CUSTOMER invoices".into()).matches(&d));
        assert!(Predicate::KeywordContains("PDF".into()).matches(&d));
    }

    #[test]
    fn symbol_predicates_respect_kind() {
        let d = doc();
        let class_only = Some(SymbolKind::Class);
        assert!(Predicate::SymbolEquals { name: "invoicebuilder".into(), kind: class_only }.matches(&d));
        assert!(!Predicate::SymbolEquals { name: "sendInvoice".into(), kind: class_only }.matches(&d));
        assert!(Predicate::SymbolContains { name: "invoice".into(), kind: Some(SymbolKind::Function) }.matches(&d));
        assert!(Predicate::SymbolPrefix { name: "max".into(), kind: Some(SymbolKind::Variable) }.matches(&d));
    }

    #[test]
    fn combinators() {
        let d = doc();
        assert!(Predicate::All(vec![]).matches(&d));
        assert!(!Predicate::Any(vec![]).matches(&d));
        let either = Predicate::Any(vec![
            Predicate::Language("go".into()),
            Predicate::Status(ProcessingStatus::Pending),
        ]);
        assert!(either.matches(&d));
        let both = Predicate::All(vec![either, Predicate::Language("go".into())]);
        assert!(!both.matches(&d));
    }
}
