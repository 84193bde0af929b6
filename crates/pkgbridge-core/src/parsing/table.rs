/// Tokens that look like package rows but are banners, prompts or wrapped
/// fragments of a manager's own messages.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NoiseFilter {
    pub false_ids: &'static [&'static str],
    pub false_versions: &'static [&'static str],
}

impl NoiseFilter {
    pub const fn new(
        false_ids: &'static [&'static str],
        false_versions: &'static [&'static str],
    ) -> Self {
        Self {
            false_ids,
            false_versions,
        }
    }

    pub fn rejects(&self, id: &str, version: &str) -> bool {
        self.false_ids.contains(&id) || self.false_versions.contains(&version)
    }

    pub fn accepts(&self, id: &str, version: &str) -> bool {
        !self.rejects(id, version)
    }
}

/// Splits on runs of two or more spaces, the layout of padded CLI tables whose
/// cells may themselves contain single spaces.
pub fn split_runs(line: &str) -> Vec<&str> {
    line.split("  ")
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .collect()
}

pub fn split_whitespace(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// Splits on a single delimiter, keeping empty cells so column positions hold.
pub fn split_delimited(line: &str, delimiter: char) -> Vec<&str> {
    line.trim().split(delimiter).map(str::trim).collect()
}

pub fn is_dashes(line: &str) -> bool {
    line.contains("---")
}

enum HeaderColumns {
    Named(&'static [&'static str]),
    Resolved(fn(&str) -> Vec<Option<usize>>),
}

/// Header-then-dashes scanner for column-aligned tables.
///
/// Lines are pushed one at a time so a parser can consume a live stdout
/// stream. The line directly above the first dashes row is taken as the
/// header and column start offsets are resolved from it. Only lines after
/// the dashes are yielded as rows.
pub struct HeaderTable {
    columns: HeaderColumns,
    reset_on_blank: bool,
    previous: String,
    offsets: Option<Vec<Option<usize>>>,
}

impl Default for HeaderTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderTable {
    /// Rows are yielded without column offsets; callers split the text.
    pub fn new() -> Self {
        Self::named(&[])
    }

    /// Offsets are the character positions of each name within the header.
    pub fn named(columns: &'static [&'static str]) -> Self {
        Self {
            columns: HeaderColumns::Named(columns),
            reset_on_blank: false,
            previous: String::new(),
            offsets: None,
        }
    }

    /// Offsets come from a backend-specific function of the header line.
    pub fn resolved_by(resolver: fn(&str) -> Vec<Option<usize>>) -> Self {
        Self {
            columns: HeaderColumns::Resolved(resolver),
            reset_on_blank: false,
            previous: String::new(),
            offsets: None,
        }
    }

    /// A blank line ends the current table; the next dashes row starts another.
    pub fn reset_on_blank(mut self) -> Self {
        self.reset_on_blank = true;
        self
    }

    pub fn in_rows(&self) -> bool {
        self.offsets.is_some()
    }

    pub fn push<'a>(&'a mut self, line: &'a str) -> Option<TableRow<'a>> {
        if line.trim().is_empty() {
            if self.reset_on_blank {
                self.offsets = None;
            }
            self.previous.clear();
            return None;
        }

        if self.offsets.is_none() {
            if is_dashes(line) {
                self.offsets = Some(self.resolve_header());
            }
            self.previous.clear();
            self.previous.push_str(line);
            return None;
        }

        let offsets = self.offsets.as_deref()?;
        Some(TableRow::new(line, offsets))
    }

    fn resolve_header(&self) -> Vec<Option<usize>> {
        match self.columns {
            HeaderColumns::Named(names) => names
                .iter()
                .map(|name| char_offset(&self.previous, name))
                .collect(),
            HeaderColumns::Resolved(resolver) => resolver(&self.previous),
        }
    }
}

/// Character index of `needle` within `haystack`.
pub fn char_offset(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .find(needle)
        .map(|byte_index| haystack[..byte_index].chars().count())
}

/// One data row together with the header's column offsets.
pub struct TableRow<'a> {
    line: &'a str,
    chars: Vec<char>,
    offsets: &'a [Option<usize>],
}

impl<'a> TableRow<'a> {
    fn new(line: &'a str, offsets: &'a [Option<usize>]) -> Self {
        Self {
            line,
            chars: line.chars().collect(),
            offsets,
        }
    }

    pub fn line(&self) -> &'a str {
        self.line
    }

    pub fn char_len(&self) -> usize {
        self.chars.len()
    }

    pub fn offset(&self, column: usize) -> Option<usize> {
        self.offsets.get(column).copied().flatten()
    }

    /// How far the row is shifted left of the header at `column`.
    ///
    /// Wide or non-ASCII glyphs in earlier cells shift the rest of the row;
    /// walking back from the header offset to the nearest space finds the
    /// real start of the cell.
    pub fn walk_back(&self, column: usize) -> usize {
        let Some(start) = self.offset(column) else {
            return 0;
        };
        if start == 0 || start > self.chars.len() {
            return 0;
        }

        let mut shift = 0;
        while shift < start - 1 && self.chars[start - shift - 1] != ' ' {
            shift += 1;
        }
        shift
    }

    /// Trimmed text in `[start, end)` by character index, clamped to the row.
    pub fn slice(&self, start: usize, end: Option<usize>) -> String {
        let len = self.chars.len();
        let start = start.min(len);
        let end = end.unwrap_or(len).clamp(start, len);
        self.chars[start..end]
            .iter()
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// First whitespace-separated token at or after `start`.
    pub fn token_at(&self, start: usize) -> String {
        self.slice(start, None)
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string()
    }
}
