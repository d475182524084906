// src/core/tokenizer.rs

//! Splitting of command lines and column-aligned text.
//!
//! Command lines follow POSIX shell quoting rules (single quotes, double quotes, backslash
//! escapes) through `shlex`; no variable expansion or globbing takes place. Tabular text is
//! split on runs of blanks with `regex`.

use crate::system::errors::RunnerError;
use regex::Regex;
use shlex::Shlex;

/// Splits a shell-like command line into argv tokens.
///
/// Fails with `RunnerError::CommandParse` on an unterminated quote or a dangling escape.
pub fn tokenize(line: &str) -> Result<Vec<String>, RunnerError> {
    shlex::split(line).ok_or_else(|| RunnerError::CommandParse(line.to_string()))
}

/// Like [`tokenize`] but never fails: tokens are collected up to the first quoting error.
pub fn tokenize_lenient(line: &str) -> Vec<String> {
    let mut lexer = Shlex::new(line);
    let tokens: Vec<String> = lexer.by_ref().collect();
    if lexer.had_error {
        log::trace!("Unbalanced quoting in '{}', keeping {} token(s).", line, tokens.len());
    }
    tokens
}

/// Builds the pattern matching a run of at least `min_spaces` blanks (spaces or tabs).
pub fn column_separator(min_spaces: usize) -> Regex {
    let pattern = format!("[ \\t]{{{},}}", min_spaces.max(1));
    Regex::new(&pattern).expect("Column separator pattern is always valid")
}

/// Splits `line` on `separator`, trimming each piece and dropping empty ones.
pub fn split_columns(line: &str, separator: &Regex) -> Vec<String> {
    separator
        .split(line)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Renders argv back into the single display string used in logs and error messages.
pub fn render(argv: &[String]) -> String {
    argv.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_plain_words() {
        assert_eq!(tokenize("ls -la /tmp").unwrap(), vec!["ls", "-la", "/tmp"]);
    }

    #[test]
    fn test_tokenize_quotes() {
        let tokens = tokenize(r#"/bin/sh -c "echo 'a b' 1>&2" 'single "q"'"#).unwrap();
        assert_eq!(
            tokens,
            vec!["/bin/sh", "-c", "echo 'a b' 1>&2", "single \"q\""]
        );
    }

    #[test]
    fn test_tokenize_escapes_and_empty() {
        assert_eq!(tokenize(r"a\ b c").unwrap(), vec!["a b", "c"]);
        assert!(tokenize("   ").unwrap().is_empty());
    }

    #[test]
    fn test_tokenize_unterminated_quote_fails() {
        let err = tokenize("echo 'oops").unwrap_err();
        assert!(matches!(err, RunnerError::CommandParse(ref l) if l == "echo 'oops"));
    }

    #[test]
    fn test_tokenize_lenient_stops_at_error() {
        assert_eq!(tokenize_lenient("a b 'c"), vec!["a", "b"]);
    }

    #[test]
    fn test_split_columns_requires_min_run() {
        let sep = column_separator(2);
        assert_eq!(
            split_columns("CONTAINER ID   IMAGE\tX  Y", &sep),
            vec!["CONTAINER ID", "IMAGE\tX", "Y"]
        );
        let sep = column_separator(1);
        assert_eq!(split_columns(" a b\t\tc ", &sep), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_render_joins_with_spaces() {
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "exit 22".to_string()];
        assert_eq!(render(&argv), "/bin/sh -c exit 22");
    }
}
