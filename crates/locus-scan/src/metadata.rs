//! Static metadata for one file: size, lines, hash, symbols, imports,
//! exports and a complexity heuristic.

use std::path::Path;
use std::sync::OnceLock;

use locus_core::{content_hash, Symbols};
use regex::Regex;

use crate::language::Language;
use crate::symbols::extract_symbols;

/// Everything the extractor learns from a file without running a compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticMetadata {
    /// Detected language name.
    pub language: Option<String>,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Number of lines.
    pub line_count: usize,
    /// SHA-256 of the raw bytes.
    pub content_hash: String,
    /// Function, class and variable names.
    pub symbols: Symbols,
    /// Imported modules, in source order.
    pub imports: Vec<String>,
    /// Exported names, in source order.
    pub exports: Vec<String>,
    /// `1 +` the number of decision points.
    pub complexity_score: f64,
    /// Set when symbol extraction failed or hit syntax errors.
    pub degraded: Option<String>,
}

/// Extract static metadata from a file's path and raw bytes.
///
/// Never fails: parse problems degrade to empty symbols and set
/// [`StaticMetadata::degraded`].
///
/// # Examples
///
/// ```
/// use locus_scan::extract;
///
/// let meta = extract("src/auth.py", b"import os\n\ndef login(user):\n    if user:\n        return True\n");
/// assert_eq!(meta.language.as_deref(), Some("python"));
/// assert_eq!(meta.line_count, 5);
/// assert_eq!(meta.imports, vec!["os"]);
/// assert_eq!(meta.symbols.functions, vec!["login"]);
/// assert_eq!(meta.complexity_score, 2.0);
/// ```
pub fn extract(file_path: &str, content: &[u8]) -> StaticMetadata {
    let language = Language::detect(Path::new(file_path));
    let text = String::from_utf8_lossy(content);

    let (symbols, degraded) = match extract_symbols(language, &text) {
        Ok(scan) if scan.had_errors => (
            scan.symbols,
            Some("syntax errors; symbols are partial".to_string()),
        ),
        Ok(scan) => (scan.symbols, None),
        Err(e) => {
            tracing::warn!(path = file_path, error = %e, "symbol extraction degraded");
            (Symbols::default(), Some(e.to_string()))
        }
    };

    StaticMetadata {
        language: language.label(),
        size_bytes: content.len() as u64,
        line_count: count_lines(content),
        content_hash: content_hash(content),
        symbols,
        imports: extract_imports(language, &text),
        exports: extract_exports(language, &text),
        complexity_score: complexity(&text),
        degraded,
    }
}

fn count_lines(content: &[u8]) -> usize {
    if content.is_empty() {
        return 0;
    }
    let newlines = content.iter().filter(|&&b| b == b'\n').count();
    if content.ends_with(b"\n") {
        newlines
    } else {
        newlines + 1
    }
}

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        fn $name() -> &'static Regex {
            static PATTERN: OnceLock<Regex> = OnceLock::new();
            PATTERN.get_or_init(|| {
                Regex::new($re).unwrap_or_else(|e| unreachable!("static pattern: {e}"))
            })
        }
    };
}

pattern!(rust_use, r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+([A-Za-z0-9_]+(?:::[A-Za-z0-9_]+)*)");
pattern!(rust_extern, r"(?m)^\s*extern\s+crate\s+([A-Za-z0-9_]+)");
pattern!(python_import, r"(?m)^\s*import\s+([A-Za-z0-9_.]+)");
pattern!(python_from, r"(?m)^\s*from\s+([A-Za-z0-9_.]+)\s+import\b");
pattern!(js_import, r#"(?m)^\s*import\s+(?:[^'";]*?\s+from\s+)?['"]([^'"]+)['"]"#);
pattern!(js_require, r#"require\(\s*['"]([^'"]+)['"]\s*\)"#);
pattern!(go_single, r#"(?m)^\s*import\s+(?:[A-Za-z_.]+\s+)?"([^"]+)""#);
pattern!(go_block, r"(?s)import\s*\((.*?)\)");
pattern!(quoted, r#""([^"]+)""#);
pattern!(jvm_import, r"(?m)^\s*import\s+(?:static\s+)?([A-Za-z0-9_.*]+)");
pattern!(c_include, r#"(?m)^\s*#\s*include\s*[<"]([^>"]+)[>"]"#);
pattern!(ruby_require, r#"(?m)^\s*require(?:_relative)?\s*\(?\s*['"]([^'"]+)['"]"#);
pattern!(php_use, r"(?m)^\s*use\s+([A-Za-z0-9_\\]+)");
pattern!(swift_import, r"(?m)^\s*import\s+([A-Za-z0-9_.]+)");
pattern!(csharp_using, r"(?m)^\s*using\s+(?:static\s+)?([A-Za-z0-9_.]+)\s*;");

pattern!(
    rust_pub,
    r"(?m)^\s*pub\s+(?:async\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|const|static|type|mod|union)\s+([A-Za-z0-9_]+)"
);
pattern!(python_def, r"(?m)^(?:async\s+)?(?:def|class)\s+([A-Za-z][A-Za-z0-9_]*)");
pattern!(
    js_export,
    r"(?m)^\s*export\s+(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:async\s+)?(?:function\*?|class|const|let|var|interface|type|enum)\s+([A-Za-z0-9_$]+)"
);
pattern!(js_export_list, r"(?m)^\s*export\s*\{([^}]*)\}");
pattern!(commonjs_export, r"(?m)^\s*(?:module\.)?exports\.([A-Za-z0-9_$]+)\s*=");
pattern!(go_exported, r"(?m)^(?:func\s+(?:\([^)]*\)\s*)?|type\s+|var\s+|const\s+)([A-Z][A-Za-z0-9_]*)");
pattern!(
    jvm_public,
    r"(?m)\bpublic\s+(?:(?:static|final|abstract|sealed|partial)\s+)*(?:class|interface|enum|record|struct)\s+([A-Za-z0-9_]+)"
);

pattern!(
    decision_points,
    r"\b(?:if|elif|for|foreach|while|case|catch|except|when|guard|until|unless)\b|&&|\|\|"
);

fn captures(re: &Regex, text: &str, out: &mut Vec<String>) {
    for caps in re.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            let value = m.as_str().trim().to_string();
            if !value.is_empty() && !out.contains(&value) {
                out.push(value);
            }
        }
    }
}

fn extract_imports(language: Language, text: &str) -> Vec<String> {
    let mut out = Vec::new();
    match language {
        Language::Rust => {
            captures(rust_use(), text, &mut out);
            captures(rust_extern(), text, &mut out);
        }
        Language::Python => {
            captures(python_import(), text, &mut out);
            captures(python_from(), text, &mut out);
        }
        Language::JavaScript | Language::TypeScript | Language::Tsx => {
            captures(js_import(), text, &mut out);
            captures(js_require(), text, &mut out);
        }
        Language::Go => {
            captures(go_single(), text, &mut out);
            for block in go_block().captures_iter(text) {
                if let Some(body) = block.get(1) {
                    captures(quoted(), body.as_str(), &mut out);
                }
            }
        }
        Language::Java | Language::Kotlin | Language::Scala => {
            captures(jvm_import(), text, &mut out);
        }
        Language::C | Language::Cpp => captures(c_include(), text, &mut out),
        Language::Ruby => captures(ruby_require(), text, &mut out),
        Language::Php => captures(php_use(), text, &mut out),
        Language::Swift => captures(swift_import(), text, &mut out),
        Language::CSharp => captures(csharp_using(), text, &mut out),
        _ => {}
    }
    out
}

fn extract_exports(language: Language, text: &str) -> Vec<String> {
    let mut out = Vec::new();
    match language {
        Language::Rust => captures(rust_pub(), text, &mut out),
        Language::Python => {
            let mut names = Vec::new();
            captures(python_def(), text, &mut names);
            out.extend(names.into_iter().filter(|n| !n.starts_with('_')));
        }
        Language::JavaScript | Language::TypeScript | Language::Tsx => {
            captures(js_export(), text, &mut out);
            for list in js_export_list().captures_iter(text) {
                let Some(body) = list.get(1) else { continue };
                for item in body.as_str().split(',') {
                    let name = item
                        .rsplit(" as ")
                        .next()
                        .unwrap_or(item)
                        .trim()
                        .to_string();
                    if !name.is_empty() && !out.contains(&name) {
                        out.push(name);
                    }
                }
            }
            captures(commonjs_export(), text, &mut out);
        }
        Language::Go => captures(go_exported(), text, &mut out),
        Language::Java | Language::Kotlin | Language::CSharp | Language::Scala => {
            captures(jvm_public(), text, &mut out);
        }
        _ => {}
    }
    out
}

/// Decision-point count plus one, in the spirit of cyclomatic complexity.
fn complexity(text: &str) -> f64 {
    1.0 + decision_points().find_iter(text).count() as f64
}
