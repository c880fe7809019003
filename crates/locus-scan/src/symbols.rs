//! Tree-sitter symbol extraction.
//!
//! Each grammar language has a small rule table mapping node kinds to a
//! symbol bucket. Names come from the node's `name` field, falling back to
//! `declarator` chains (C/C++, Java fields) and the first identifier child.

use locus_core::{LocusError, Symbols};
use tree_sitter::{Node, Parser};

use crate::language::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Function,
    Class,
    Variable,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    kind: &'static str,
    bucket: Bucket,
    /// Field holding the name node.
    name_field: &'static str,
    /// Only record at module level (outside functions and classes).
    top_level: bool,
    /// Record only when this field is present (skips forward references).
    requires: Option<&'static str>,
}

const fn rule(kind: &'static str, bucket: Bucket) -> Rule {
    Rule {
        kind,
        bucket,
        name_field: "name",
        top_level: false,
        requires: None,
    }
}

const fn top_level(kind: &'static str, name_field: &'static str) -> Rule {
    Rule {
        kind,
        bucket: Bucket::Variable,
        name_field,
        top_level: true,
        requires: None,
    }
}

const fn with_body(kind: &'static str) -> Rule {
    Rule {
        kind,
        bucket: Bucket::Class,
        name_field: "name",
        top_level: false,
        requires: Some("body"),
    }
}

use Bucket::{Class, Function, Variable};

const RUST: &[Rule] = &[
    rule("function_item", Function),
    rule("function_signature_item", Function),
    rule("struct_item", Class),
    rule("enum_item", Class),
    rule("union_item", Class),
    rule("trait_item", Class),
    top_level("const_item", "name"),
    top_level("static_item", "name"),
];

const PYTHON: &[Rule] = &[
    rule("function_definition", Function),
    rule("class_definition", Class),
    top_level("assignment", "left"),
];

const JAVASCRIPT: &[Rule] = &[
    rule("function_declaration", Function),
    rule("generator_function_declaration", Function),
    rule("method_definition", Function),
    rule("class_declaration", Class),
    top_level("variable_declarator", "name"),
];

const TYPESCRIPT: &[Rule] = &[
    rule("function_declaration", Function),
    rule("generator_function_declaration", Function),
    rule("method_definition", Function),
    rule("class_declaration", Class),
    rule("abstract_class_declaration", Class),
    rule("interface_declaration", Class),
    rule("enum_declaration", Class),
    rule("type_alias_declaration", Class),
    top_level("variable_declarator", "name"),
];

const GO: &[Rule] = &[
    rule("function_declaration", Function),
    rule("method_declaration", Function),
    rule("type_spec", Class),
    top_level("const_spec", "name"),
    top_level("var_spec", "name"),
];

const JAVA: &[Rule] = &[
    rule("method_declaration", Function),
    rule("constructor_declaration", Function),
    rule("class_declaration", Class),
    rule("interface_declaration", Class),
    rule("enum_declaration", Class),
    rule("record_declaration", Class),
    Rule {
        kind: "field_declaration",
        bucket: Variable,
        name_field: "declarator",
        top_level: false,
        requires: None,
    },
];

const C: &[Rule] = &[
    Rule {
        kind: "function_definition",
        bucket: Function,
        name_field: "declarator",
        top_level: false,
        requires: None,
    },
    with_body("struct_specifier"),
    with_body("enum_specifier"),
    with_body("union_specifier"),
];

const CPP: &[Rule] = &[
    Rule {
        kind: "function_definition",
        bucket: Function,
        name_field: "declarator",
        top_level: false,
        requires: None,
    },
    with_body("class_specifier"),
    with_body("struct_specifier"),
    with_body("enum_specifier"),
    with_body("union_specifier"),
];

const RUBY: &[Rule] = &[
    rule("method", Function),
    rule("singleton_method", Function),
    rule("class", Class),
    rule("module", Class),
];

const PHP: &[Rule] = &[
    rule("function_definition", Function),
    rule("method_declaration", Function),
    rule("class_declaration", Class),
    rule("interface_declaration", Class),
    rule("trait_declaration", Class),
    rule("enum_declaration", Class),
];

const KOTLIN: &[Rule] = &[
    rule("function_declaration", Function),
    rule("class_declaration", Class),
    rule("object_declaration", Class),
    rule("interface_declaration", Class),
];

const SWIFT: &[Rule] = &[
    rule("function_declaration", Function),
    rule("protocol_function_declaration", Function),
    rule("class_declaration", Class),
    rule("protocol_declaration", Class),
];

/// Node kinds that open a nested scope without being a symbol themselves.
const EXTRA_SCOPES: &[&str] = &[
    "impl_item",
    "closure_expression",
    "lambda",
    "arrow_function",
    "function_expression",
    "function",
    "class",
    "func_literal",
    "block",
    "statement_block",
];

/// Node kinds that carry a bare name.
const IDENTIFIER_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "field_identifier",
    "property_identifier",
    "simple_identifier",
    "constant",
    "name",
];

/// Values that make a JS/TS variable a function.
const FUNCTION_VALUES: &[&str] = &["arrow_function", "function_expression", "function"];

fn rules_for(language: Language) -> &'static [Rule] {
    match language {
        Language::Rust => RUST,
        Language::Python => PYTHON,
        Language::JavaScript => JAVASCRIPT,
        Language::TypeScript | Language::Tsx => TYPESCRIPT,
        Language::Go => GO,
        Language::Java => JAVA,
        Language::C => C,
        Language::Cpp => CPP,
        Language::Ruby => RUBY,
        Language::Php => PHP,
        Language::Kotlin => KOTLIN,
        Language::Swift => SWIFT,
        _ => &[],
    }
}

/// Result of parsing one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolScan {
    /// Extracted names, de-duplicated, in source order.
    pub symbols: Symbols,
    /// The tree contained syntax errors; names are best-effort.
    pub had_errors: bool,
}

/// Extract function, class and variable names from source text.
///
/// Languages without a grammar yield empty symbols. Syntax errors do not
/// fail extraction: tree-sitter recovers and the scan is flagged.
///
/// # Errors
///
/// Returns [`LocusError::Parse`] if the grammar cannot be loaded or the
/// parser gives up.
///
/// # Examples
///
/// ```
/// use locus_scan::{symbols::extract_symbols, Language};
///
/// let scan = extract_symbols(Language::Rust, "pub fn login() {}\nstruct Session;").unwrap();
/// assert_eq!(scan.symbols.functions, vec!["login"]);
/// assert_eq!(scan.symbols.classes, vec!["Session"]);
/// ```
pub fn extract_symbols(language: Language, source: &str) -> Result<SymbolScan, LocusError> {
    let Some(ts_language) = language.tree_sitter_language() else {
        return Ok(SymbolScan::default());
    };

    let mut parser = Parser::new();
    parser
        .set_language(&ts_language)
        .map_err(|e| LocusError::Parse(format!("failed to set language: {e}")))?;

    let Some(tree) = parser.parse(source, None) else {
        return Err(LocusError::Parse("parser returned no tree".into()));
    };

    let root = tree.root_node();
    let mut collector = Collector {
        rules: rules_for(language),
        source: source.as_bytes(),
        symbols: Symbols::default(),
    };
    collector.visit(root, 0);

    Ok(SymbolScan {
        symbols: collector.symbols,
        had_errors: root.has_error(),
    })
}

struct Collector<'a> {
    rules: &'static [Rule],
    source: &'a [u8],
    symbols: Symbols,
}

impl Collector<'_> {
    fn visit(&mut self, node: Node, depth: usize) {
        let mut child_depth = depth;

        if let Some(rule) = self.rules.iter().find(|r| r.kind == node.kind()) {
            let eligible = (!rule.top_level || depth == 0)
                && rule
                    .requires
                    .map_or(true, |field| node.child_by_field_name(field).is_some());
            if eligible {
                if let Some(name) = self.rule_name(node, rule) {
                    let bucket = self.effective_bucket(node, rule.bucket);
                    self.push(bucket, name);
                }
            }
            if rule.bucket != Variable {
                child_depth += 1;
            }
        } else if EXTRA_SCOPES.contains(&node.kind()) && node.parent().is_some() {
            child_depth += 1;
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child, child_depth);
        }
    }

    fn rule_name(&self, node: Node, rule: &Rule) -> Option<String> {
        let named = node.child_by_field_name(rule.name_field);
        match named {
            Some(n) => self.resolve_name(n, 0),
            None if rule.top_level => None,
            None => first_child_of(node, IDENTIFIER_KINDS).map(|n| self.text(n)),
        }
    }

    /// Follow `name`/`declarator` fields down to an identifier.
    fn resolve_name(&self, node: Node, hops: usize) -> Option<String> {
        if IDENTIFIER_KINDS.contains(&node.kind()) {
            let text = self.text(node);
            return (!text.is_empty()).then_some(text);
        }
        if hops > 6 {
            return None;
        }
        for field in ["name", "declarator"] {
            if let Some(next) = node.child_by_field_name(field) {
                return self.resolve_name(next, hops + 1);
            }
        }
        None
    }

    fn effective_bucket(&self, node: Node, bucket: Bucket) -> Bucket {
        if bucket == Variable
            && node
                .child_by_field_name("value")
                .is_some_and(|v| FUNCTION_VALUES.contains(&v.kind()))
        {
            return Function;
        }
        bucket
    }

    fn push(&mut self, bucket: Bucket, name: String) {
        let list = match bucket {
            Function => &mut self.symbols.functions,
            Class => &mut self.symbols.classes,
            Variable => &mut self.symbols.variables,
        };
        if !list.contains(&name) {
            list.push(name);
        }
    }

    fn text(&self, node: Node) -> String {
        let start = node.start_byte();
        let end = node.end_byte();
        if start >= self.source.len() || end > self.source.len() {
            return String::new();
        }
        String::from_utf8_lossy(&self.source[start..end]).to_string()
    }
}

fn first_child_of<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .find(|child| kinds.contains(&child.kind()));
    found
}
