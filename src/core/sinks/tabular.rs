// src/core/sinks/tabular.rs

use super::{LineTransform, OutputSink};
use crate::core::lock;
use crate::constants::DEFAULT_MIN_SPLIT_SPACES;
use crate::core::tokenizer;
use anyhow::Result;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

/// How header and free-form rows are cut into columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SplitMode {
    /// Runs of at least `min_split_spaces` blanks separate columns.
    #[default]
    Whitespace,
    /// Shell argument rules: blanks separate, quotes group.
    ShellArgs,
}

/// Named rows handed out by [`TabularCollector::named_rows`].
pub type NamedRows = Arc<Vec<HashMap<String, String>>>;

#[derive(Debug, Default)]
struct Table {
    header: Option<Vec<String>>,
    /// Character offsets at which each located header column starts.
    offsets: Option<Vec<usize>>,
    rows: VecDeque<Vec<String>>,
    named: Option<NamedRows>,
}

/// Parses column-aligned text output into rows.
///
/// With `expect_header`, the first non-blank line is the header. The position of every header
/// token is recorded and later rows are cut at those fixed positions, which keeps cells that
/// contain single spaces (`3 weeks ago`) intact. Without a located header each row is split on
/// its own and rows may differ in width.
pub struct TabularCollector {
    expect_header: bool,
    max_rows: usize,
    min_split_spaces: usize,
    mode: SplitMode,
    transform: Option<LineTransform>,
    separator: Regex,
    table: Mutex<Table>,
}

/// Builder for [`TabularCollector`].
pub struct TabularCollectorBuilder {
    expect_header: bool,
    max_rows: usize,
    min_split_spaces: usize,
    mode: SplitMode,
    transform: Option<LineTransform>,
}

impl TabularCollectorBuilder {
    /// Treat the first non-blank line as the header.
    pub fn expect_header(mut self, yes: bool) -> Self {
        self.expect_header = yes;
        self
    }

    /// Keep at most `max_rows` rows, evicting the oldest; `0` keeps everything.
    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Minimum run of blanks that separates two columns.
    pub fn min_split_spaces(mut self, spaces: usize) -> Self {
        self.min_split_spaces = spaces;
        self
    }

    /// How a line is cut into cells when no column offsets are known.
    pub fn split_mode(mut self, mode: SplitMode) -> Self {
        self.mode = mode;
        self
    }

    /// Rewrites every line before it is parsed.
    pub fn line_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.transform = Some(Box::new(transform));
        self
    }

    /// Builds the collector.
    pub fn build(self) -> TabularCollector {
        TabularCollector {
            expect_header: self.expect_header,
            max_rows: self.max_rows,
            min_split_spaces: self.min_split_spaces,
            mode: self.mode,
            transform: self.transform,
            separator: tokenizer::column_separator(self.min_split_spaces),
            table: Mutex::new(Table::default()),
        }
    }
}

impl TabularCollector {
    /// Starts a collector without header, blank-run splitting, no row cap.
    pub fn builder() -> TabularCollectorBuilder {
        TabularCollectorBuilder {
            expect_header: false,
            max_rows: 0,
            min_split_spaces: DEFAULT_MIN_SPLIT_SPACES,
            mode: SplitMode::Whitespace,
            transform: None,
        }
    }

    /// Whitespace-split collector that treats the first line as header.
    pub fn with_header() -> Self {
        Self::builder().expect_header(true).build()
    }

    /// Header tokens; empty until a header line has been seen.
    pub fn header(&self) -> Vec<String> {
        lock(&self.table).header.clone().unwrap_or_default()
    }

    /// Start offsets (in characters) of the located header columns.
    pub fn header_offsets(&self) -> Option<Vec<usize>> {
        lock(&self.table).offsets.clone()
    }

    /// Snapshot of the data rows, oldest first.
    pub fn rows(&self) -> Vec<Vec<String>> {
        lock(&self.table).rows.iter().cloned().collect()
    }

    /// Number of data rows held.
    pub fn len(&self) -> usize {
        lock(&self.table).rows.len()
    }

    /// Whether no data row has been collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows as header-name to cell maps.
    ///
    /// Cells beyond the header width are dropped and header columns a row does not reach are
    /// absent from its map. The result is cached until the next row arrives.
    pub fn named_rows(&self) -> NamedRows {
        let mut table = lock(&self.table);
        if let Some(named) = &table.named {
            return Arc::clone(named);
        }
        let named: NamedRows = match &table.header {
            Some(header) if !header.is_empty() => Arc::new(
                table
                    .rows
                    .iter()
                    .map(|row| {
                        header
                            .iter()
                            .zip(row.iter())
                            .map(|(name, value)| (name.clone(), value.clone()))
                            .collect()
                    })
                    .collect(),
            ),
            _ => Arc::new(Vec::new()),
        };
        table.named = Some(Arc::clone(&named));
        named
    }

    fn split_free(&self, line: &str) -> Vec<String> {
        match self.mode {
            SplitMode::Whitespace => tokenizer::split_columns(line, &self.separator),
            SplitMode::ShellArgs => tokenizer::tokenize_lenient(line)
                .into_iter()
                .map(|t| t.trim().to_string())
                .collect(),
        }
    }

    fn parse_header(&self, table: &mut Table, line: &str) {
        let tokens = self.split_free(line);
        let mut offsets = Vec::with_capacity(tokens.len());
        let mut from = 0;
        for token in &tokens {
            let found = line.get(from..).and_then(|rest| rest.find(token.as_str()));
            let Some(rel) = found else {
                log::debug!(
                    "Header column '{}' not found in '{}', {} column(s) get fixed positions.",
                    token,
                    line,
                    offsets.len()
                );
                break;
            };
            let start = from + rel;
            offsets.push(char_offset(line, start));
            from = start + token.len();
        }
        table.offsets = (!offsets.is_empty()).then_some(offsets);
        table.header = Some(tokens);
    }

    fn split_row(&self, offsets: Option<&[usize]>, line: &str) -> Vec<String> {
        let Some(offsets) = offsets else {
            return self.split_free(line);
        };
        let chars: Vec<char> = line.chars().collect();
        let len = chars.len();
        offsets
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                let end = offsets.get(i + 1).copied().unwrap_or(len).min(len);
                let start = start.min(end);
                chars
                    .get(start..end)
                    .map(|cell| cell.iter().collect::<String>().trim().to_string())
                    .unwrap_or_default()
            })
            .collect()
    }
}

/// Converts a byte index of `line` into a character index.
fn char_offset(line: &str, byte_index: usize) -> usize {
    line.get(..byte_index).map_or(0, |head| head.chars().count())
}

impl OutputSink for TabularCollector {
    fn consume(&self, line: &str) -> Result<()> {
        let transformed;
        let line = match &self.transform {
            Some(transform) => {
                transformed = transform(line);
                transformed.as_str()
            }
            None => line,
        };
        if line.trim().is_empty() {
            return Ok(());
        }
        // Leading blanks are kept: they are part of the fixed column geometry.
        let line = line.trim_end();

        let mut table = lock(&self.table);
        if self.expect_header && table.header.is_none() && table.rows.is_empty() {
            self.parse_header(&mut table, line);
            return Ok(());
        }
        let row = self.split_row(table.offsets.as_deref(), line);
        table.named = None;
        while self.max_rows > 0 && table.rows.len() >= self.max_rows {
            table.rows.pop_front();
        }
        table.rows.push_back(row);
        Ok(())
    }
}

impl fmt::Debug for TabularCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabularCollector")
            .field("expect_header", &self.expect_header)
            .field("max_rows", &self.max_rows)
            .field("min_split_spaces", &self.min_split_spaces)
            .field("mode", &self.mode)
            .field("rows", &self.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for TabularCollectorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabularCollectorBuilder")
            .field("expect_header", &self.expect_header)
            .field("max_rows", &self.max_rows)
            .field("min_split_spaces", &self.min_split_spaces)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(collector: &TabularCollector, text: &str) {
        for line in text.lines() {
            collector.consume(line).unwrap();
        }
    }

    #[test]
    fn test_header_and_rows() {
        let collector = TabularCollector::with_header();
        feed(&collector, "ID   NAME\n1    alice\n2    bob\n");
        assert_eq!(collector.header(), vec!["ID", "NAME"]);
        assert_eq!(collector.header_offsets(), Some(vec![0, 5]));
        assert_eq!(
            collector.rows(),
            vec![vec!["1", "alice"], vec!["2", "bob"]]
        );
        let named = collector.named_rows();
        let second = named.get(1).unwrap();
        assert_eq!(second.get("ID").map(String::as_str), Some("2"));
        assert_eq!(second.get("NAME").map(String::as_str), Some("bob"));
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_blank_lines_are_ignored_everywhere() {
        let collector = TabularCollector::with_header();
        feed(&collector, "\n   \nID  NAME\n\n1   x\n \t \n");
        assert_eq!(collector.header(), vec!["ID", "NAME"]);
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn test_blank_after_transform_is_ignored() {
        let collector = TabularCollector::builder()
            .line_transform(|l| l.replace('#', ""))
            .build();
        feed(&collector, "###\na  b\n");
        assert_eq!(collector.rows(), vec![vec!["a", "b"]]);
    }

    #[test]
    fn test_fixed_offsets_keep_single_spaces_and_fill_short_rows() {
        let header = format!(
            "{:<20}{:<20}{:<25}{:<20}{:<20}{:<25}{}",
            "CONTAINER ID", "IMAGE", "COMMAND", "CREATED", "STATUS", "PORTS", "NAMES"
        );
        let row1 = format!(
            "{:<20}{:<20}{:<25}{:<20}{:<20}{:<25}{}",
            "f94c2a915b88",
            "registry:2",
            "\"/bin/registry serve \"",
            "3 weeks ago",
            "Up 2 weeks",
            "127.0.0.1:5000->5000/tcp",
            "registry"
        );
        let row2 = format!("{:<20}{}", "f94c2a915b81", "registry:2");
        let collector = TabularCollector::builder()
            .expect_header(true)
            .min_split_spaces(2)
            .line_transform(|l| l.to_lowercase())
            .build();
        feed(&collector, &format!("{}\n{}\n{}\n", header, row1, row2));

        assert_eq!(
            collector.header(),
            vec!["container id", "image", "command", "created", "status", "ports", "names"]
        );
        let rows = collector.rows();
        assert_eq!(rows.len(), 2);
        let first = rows.first().unwrap();
        assert_eq!(first.len(), 7);
        assert_eq!(first.get(2).unwrap(), "\"/bin/registry serve \"");
        assert_eq!(first.get(3).unwrap(), "3 weeks ago");
        assert_eq!(first.get(5).unwrap(), "127.0.0.1:5000->5000/tcp");
        assert_eq!(first.get(6).unwrap(), "registry");

        let second = rows.get(1).unwrap();
        assert_eq!(second.len(), 7);
        assert_eq!(second.get(1).unwrap(), "registry:2");
        assert_eq!(second.get(2).unwrap(), "");
        assert_eq!(second.get(6).unwrap(), "");

        let named = collector.named_rows();
        let nr = named.first().unwrap();
        assert_eq!(nr.get("status").map(String::as_str), Some("up 2 weeks"));
        assert_eq!(nr.get("container id").map(String::as_str), Some("f94c2a915b88"));
    }

    #[test]
    fn test_max_rows_keeps_most_recent() {
        let collector = TabularCollector::builder().max_rows(1).build();
        feed(&collector, "a  1\nb  2\nc  3\n");
        assert_eq!(collector.rows(), vec![vec!["c", "3"]]);
    }

    #[test]
    fn test_max_rows_fifo_eviction_with_header() {
        let collector = TabularCollector::builder()
            .expect_header(true)
            .max_rows(2)
            .build();
        feed(&collector, "K  V\na  1\nb  2\nc  3\n");
        assert_eq!(collector.header(), vec!["K", "V"]);
        assert_eq!(collector.rows(), vec![vec!["b", "2"], vec!["c", "3"]]);
    }

    #[test]
    fn test_without_header_rows_vary_in_width() {
        let collector = TabularCollector::builder().build();
        feed(&collector, "one  two  three\nfour  five\n");
        assert!(collector.header().is_empty());
        assert_eq!(collector.header_offsets(), None);
        assert_eq!(
            collector.rows(),
            vec![vec!["one", "two", "three"], vec!["four", "five"]]
        );
        assert!(collector.named_rows().is_empty());
    }

    #[test]
    fn test_shell_split_header_locates_quoted_tokens() {
        let collector = TabularCollector::builder()
            .expect_header(true)
            .split_mode(SplitMode::ShellArgs)
            .build();
        feed(&collector, "ID 'FULL NAME' AGE\n7 x y\n");
        assert_eq!(collector.header(), vec!["ID", "FULL NAME", "AGE"]);
        assert_eq!(collector.header_offsets(), Some(vec![0, 4, 15]));
    }

    #[test]
    fn test_shell_split_header_missing_token_keeps_found_columns() {
        let collector = TabularCollector::builder()
            .expect_header(true)
            .split_mode(SplitMode::ShellArgs)
            .build();
        feed(&collector, "ID a\\ b C\n1  rest of line\n");
        // `a\ b` tokenizes to "a b", which is not literally present.
        assert_eq!(collector.header(), vec!["ID", "a b", "C"]);
        assert_eq!(collector.header_offsets(), Some(vec![0]));
        assert_eq!(collector.rows(), vec![vec!["1  rest of line"]]);
        let named = collector.named_rows();
        let row = named.first().unwrap();
        assert_eq!(row.get("ID").map(String::as_str), Some("1  rest of line"));
        assert!(row.get("a b").is_none());
    }

    #[test]
    fn test_named_rows_are_cached_until_next_row() {
        let collector = TabularCollector::with_header();
        feed(&collector, "A  B\n1  2\n");
        let first = collector.named_rows();
        let again = collector.named_rows();
        assert!(Arc::ptr_eq(&first, &again));
        collector.consume("3  4").unwrap();
        let fresh = collector.named_rows();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert_eq!(fresh.len(), 2);
    }

    #[test]
    fn test_wider_rows_drop_extra_cells_in_named_rows() {
        let collector = TabularCollector::builder()
            .expect_header(true)
            .split_mode(SplitMode::ShellArgs)
            .build();
        // The first header token is not literally present, so no column gets a fixed position.
        feed(&collector, "a\\ b C\n1 2 3\n");
        assert_eq!(collector.header_offsets(), None);
        assert_eq!(collector.rows(), vec![vec!["1", "2", "3"]]);
        let named = collector.named_rows();
        let row = named.first().unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("a b").map(String::as_str), Some("1"));
        assert_eq!(row.get("C").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_offsets_are_character_based() {
        let collector = TabularCollector::with_header();
        feed(&collector, "ÑAME  CITY\nJosé   Cádiz\n");
        assert_eq!(collector.header_offsets(), Some(vec![0, 6]));
        assert_eq!(collector.rows(), vec![vec!["José", "Cádiz"]]);
    }
}
