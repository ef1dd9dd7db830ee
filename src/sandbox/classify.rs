//! Interpreter-independent classification rules for the sandbox child.

use std::sync::LazyLock;

use regex::Regex;

use super::protocol::{LoadErrorKind, TestErrorKind};

/// Names whose absence usually means a web framework was not importable.
pub const FRAMEWORK_SYMBOLS: &[&str] = &[
    "app",
    "Depends",
    "Request",
    "Flask",
    "Blueprint",
    "django",
    "Django",
];

static UNDEFINED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"name '([^']+)' is not defined").unwrap());

/// Coarse exception family, as reported by the host interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionClass {
    Syntax,
    Name,
    Import,
    Assertion,
    Other,
}

/// Dotted module name for a source path: suffix dropped, separators to dots.
pub fn module_name_for_path(file_path: &str) -> String {
    let without_suffix = match file_path.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') && !ext.contains('\\') => stem,
        _ => file_path,
    };
    without_suffix
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .map(|part| part.replace(['-', ' ', '.'], "_"))
        .collect::<Vec<_>>()
        .join(".")
}

/// Every proper parent package of a dotted module name, outermost first.
pub fn parent_packages(module_name: &str) -> Vec<String> {
    let parts: Vec<&str> = module_name.split('.').collect();
    (1..parts.len()).map(|n| parts[..n].join(".")).collect()
}

/// The name an unresolved-name message complains about.
pub fn undefined_name(message: &str) -> Option<&str> {
    UNDEFINED_NAME
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn mentions_framework_symbol(message: &str) -> bool {
    match undefined_name(message) {
        Some(name) => FRAMEWORK_SYMBOLS.contains(&name),
        None => FRAMEWORK_SYMBOLS
            .iter()
            .any(|symbol| message.contains(&format!("'{symbol}'"))),
    }
}

pub fn classify_load_failure(class: ExceptionClass, message: &str) -> LoadErrorKind {
    match class {
        ExceptionClass::Syntax => LoadErrorKind::SyntaxError,
        ExceptionClass::Name if mentions_framework_symbol(message) => {
            LoadErrorKind::DecoratorFrameworkError
        }
        ExceptionClass::Name => LoadErrorKind::NameError,
        ExceptionClass::Import => LoadErrorKind::ImportError,
        ExceptionClass::Assertion | ExceptionClass::Other => LoadErrorKind::ExecutionError,
    }
}

pub fn classify_test_failure(class: ExceptionClass) -> TestErrorKind {
    match class {
        ExceptionClass::Assertion => TestErrorKind::AssertionFailure,
        ExceptionClass::Name => TestErrorKind::TestNameError,
        ExceptionClass::Syntax => TestErrorKind::TestSyntaxError,
        ExceptionClass::Import | ExceptionClass::Other => TestErrorKind::TestExecutionError,
    }
}

/// Message recorded for a load failure of the given kind.
pub fn describe_load_failure(kind: LoadErrorKind, message: &str, line: Option<usize>) -> String {
    match (kind, line) {
        (LoadErrorKind::SyntaxError, Some(line)) => format!("Syntax error at line {line}: {message}"),
        (LoadErrorKind::DecoratorFrameworkError, _) => format!(
            "Framework symbol unavailable during load ({message}); stubs cover app, Depends, Request, Flask and Blueprint"
        ),
        _ => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name_for_path() {
        assert_eq!(module_name_for_path("text_utils.py"), "text_utils");
        assert_eq!(module_name_for_path("pkg/sub/analyzer.py"), "pkg.sub.analyzer");
        assert_eq!(module_name_for_path("/abs/app/main.py"), "abs.app.main");
        assert_eq!(module_name_for_path("./pkg\\win.py"), "pkg.win");
        assert_eq!(module_name_for_path("my-app/core.py"), "my_app.core");
    }

    #[test]
    fn test_parent_packages() {
        assert_eq!(parent_packages("pkg.sub.mod"), vec!["pkg", "pkg.sub"]);
        assert!(parent_packages("solo").is_empty());
    }

    #[test]
    fn test_undefined_name_extraction() {
        assert_eq!(undefined_name("name 'Flask' is not defined"), Some("Flask"));
        assert_eq!(undefined_name("division by zero"), None);
    }

    #[test]
    fn test_framework_names_are_distinguished() {
        assert_eq!(
            classify_load_failure(ExceptionClass::Name, "name 'Depends' is not defined"),
            LoadErrorKind::DecoratorFrameworkError
        );
        assert_eq!(
            classify_load_failure(ExceptionClass::Name, "name 'helper' is not defined"),
            LoadErrorKind::NameError
        );
        // `application` contains `app` but is not a framework symbol.
        assert_eq!(
            classify_load_failure(ExceptionClass::Name, "name 'application' is not defined"),
            LoadErrorKind::NameError
        );
    }

    #[test]
    fn test_load_and_test_classification() {
        assert_eq!(
            classify_load_failure(ExceptionClass::Syntax, "invalid syntax"),
            LoadErrorKind::SyntaxError
        );
        assert_eq!(
            classify_load_failure(ExceptionClass::Import, "No module named 'x'"),
            LoadErrorKind::ImportError
        );
        assert_eq!(
            classify_load_failure(ExceptionClass::Other, "boom"),
            LoadErrorKind::ExecutionError
        );
        assert_eq!(
            classify_test_failure(ExceptionClass::Assertion),
            TestErrorKind::AssertionFailure
        );
        assert_eq!(classify_test_failure(ExceptionClass::Name), TestErrorKind::TestNameError);
        assert_eq!(
            classify_test_failure(ExceptionClass::Syntax),
            TestErrorKind::TestSyntaxError
        );
        assert_eq!(
            classify_test_failure(ExceptionClass::Import),
            TestErrorKind::TestExecutionError
        );
    }

    #[test]
    fn test_syntax_message_includes_line() {
        assert_eq!(
            describe_load_failure(LoadErrorKind::SyntaxError, "invalid syntax", Some(3)),
            "Syntax error at line 3: invalid syntax"
        );
        assert_eq!(
            describe_load_failure(LoadErrorKind::ImportError, "No module named 'x'", None),
            "No module named 'x'"
        );
    }
}
