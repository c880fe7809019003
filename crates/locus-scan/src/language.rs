use std::path::Path;

/// Language detected from a file name or extension.
///
/// Languages with a tree-sitter grammar get full symbol extraction; the
/// rest are indexed as text with regex-based imports only.
///
/// # Examples
///
/// ```
/// use locus_scan::Language;
///
/// assert_eq!(Language::from_extension("rs"), Language::Rust);
/// assert_eq!(Language::from_extension("tsx"), Language::Tsx);
/// assert_eq!(Language::from_extension("kt"), Language::Kotlin);
/// assert_eq!(Language::from_extension("md"), Language::Markdown);
/// assert_eq!(Language::from_extension("xyz"), Language::Unknown);
/// assert_eq!(Language::Rust.name(), "rust");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    TypeScript,
    Tsx,
    JavaScript,
    Go,
    Java,
    C,
    Cpp,
    Ruby,
    Php,
    Kotlin,
    Swift,
    CSharp,
    Scala,
    Shell,
    Sql,
    Html,
    Css,
    Markdown,
    Yaml,
    Toml,
    Json,
    Dockerfile,
    Makefile,
    Unknown,
}

impl Language {
    /// Detect language from a file extension string (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "rs" => Language::Rust,
            "py" | "pyi" => Language::Python,
            "ts" | "mts" | "cts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Language::Cpp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "kt" | "kts" => Language::Kotlin,
            "swift" => Language::Swift,
            "cs" => Language::CSharp,
            "scala" | "sc" => Language::Scala,
            "sh" | "bash" | "zsh" => Language::Shell,
            "sql" => Language::Sql,
            "html" | "htm" => Language::Html,
            "css" | "scss" | "sass" | "less" => Language::Css,
            "md" | "markdown" | "rst" => Language::Markdown,
            "yml" | "yaml" => Language::Yaml,
            "toml" => Language::Toml,
            "json" => Language::Json,
            _ => Language::Unknown,
        }
    }

    /// Detect language from a path, checking well-known file names first.
    pub fn detect(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        match file_name {
            "Dockerfile" | "Containerfile" => return Language::Dockerfile,
            "Makefile" | "GNUmakefile" | "makefile" => return Language::Makefile,
            "Rakefile" | "Gemfile" => return Language::Ruby,
            _ => {}
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(Language::from_extension)
            .unwrap_or(Language::Unknown)
    }

    /// Lowercase name stored on documents.
    pub fn name(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::TypeScript | Language::Tsx => "typescript",
            Language::JavaScript => "javascript",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Kotlin => "kotlin",
            Language::Swift => "swift",
            Language::CSharp => "csharp",
            Language::Scala => "scala",
            Language::Shell => "shell",
            Language::Sql => "sql",
            Language::Html => "html",
            Language::Css => "css",
            Language::Markdown => "markdown",
            Language::Yaml => "yaml",
            Language::Toml => "toml",
            Language::Json => "json",
            Language::Dockerfile => "dockerfile",
            Language::Makefile => "makefile",
            Language::Unknown => "unknown",
        }
    }

    /// Name for documents; `None` for unknown files.
    pub fn label(self) -> Option<String> {
        (self != Language::Unknown).then(|| self.name().to_string())
    }

    /// Get the tree-sitter language grammar for this language.
    ///
    /// Returns `None` when no grammar is bundled.
    pub fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        match self {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Language::Java => Some(tree_sitter_java::LANGUAGE.into()),
            Language::C => Some(tree_sitter_c::LANGUAGE.into()),
            Language::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            Language::Ruby => Some(tree_sitter_ruby::LANGUAGE.into()),
            Language::Php => Some(tree_sitter_php::LANGUAGE_PHP.into()),
            Language::Kotlin => Some(tree_sitter_kotlin_ng::LANGUAGE.into()),
            Language::Swift => Some(tree_sitter_swift::LANGUAGE.into()),
            _ => None,
        }
    }
}
