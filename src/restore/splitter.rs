// snapshotinstaller/src/restore/splitter.rs
//! Streaming statement splitter for table dumps.
//!
//! The dump is scanned left to right without parsing SQL. Quoted strings and identifiers,
//! comments and `DELIMITER` directives are recognised only well enough to know whether the
//! active delimiter at a given position ends a statement. After every emitted statement the
//! remaining tail is re-sliced and scanned again from its start.
//!
//! Comments stay inside the statement text; stored routine bodies may depend on them.

const DELIMITER_KEYWORD: &[u8] = b"DELIMITER ";
const DEFAULT_DELIMITER: &str = ";";

/// Lazily yields the executable statements of `buffer`.
pub fn split(buffer: &str) -> SqlSplitter<'_> {
    SqlSplitter::new(buffer)
}

#[derive(Debug, Clone)]
pub struct SqlSplitter<'a> {
    rest: &'a str,
    delimiter: String,
    // Text seen before a DELIMITER directive, carried into the next statement.
    pending: String,
    pending_has_code: bool,
}

enum Scan {
    /// Active delimiter found at `end`; scanning resumes after it.
    Boundary { end: usize, resume: usize },
    /// `DELIMITER <token>` line starting at `start`.
    Directive {
        start: usize,
        token: String,
        resume: usize,
        has_code: bool,
    },
    /// No further delimiter; the tail is the last statement.
    Exhausted { has_code: bool },
}

impl<'a> SqlSplitter<'a> {
    pub fn new(buffer: &'a str) -> Self {
        SqlSplitter {
            rest: buffer,
            delimiter: DEFAULT_DELIMITER.to_string(),
            pending: String::new(),
            pending_has_code: false,
        }
    }

    fn scan_tail(&self) -> Scan {
        let bytes = self.rest.as_bytes();
        let delimiter = self.delimiter.as_bytes();
        let len = bytes.len();
        let mut has_code = self.pending_has_code;
        let mut i = 0;

        while i < len {
            let b = bytes[i];
            match b {
                b'\'' | b'"' | b'`' => {
                    has_code = true;
                    match closing_quote(bytes, i) {
                        Some(close) => {
                            i = close + 1;
                            continue;
                        }
                        // Unterminated quote: the rest of the buffer belongs to this statement.
                        None => return Scan::Exhausted { has_code },
                    }
                }
                b'#' => {
                    i = line_end(bytes, i);
                    continue;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-')
                    && bytes.get(i + 2).is_none_or(|next| *next <= b' ') =>
                {
                    i = line_end(bytes, i);
                    continue;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    // `/*!...*/` is executed by the server.
                    if bytes.get(i + 2) == Some(&b'!') {
                        has_code = true;
                    }
                    i = block_end(bytes, i);
                    continue;
                }
                _ => {}
            }

            if is_delimiter_directive(bytes, i) {
                let token_start = i + DELIMITER_KEYWORD.len();
                let newline = find(bytes, b"\n", token_start).unwrap_or(len);
                return Scan::Directive {
                    start: i,
                    token: self.rest[token_start..newline].trim().to_string(),
                    resume: (newline + 1).min(len),
                    has_code,
                };
            }

            if !delimiter.is_empty() && bytes[i..].starts_with(delimiter) {
                return Scan::Boundary {
                    end: i,
                    resume: i + delimiter.len(),
                };
            }

            if !b.is_ascii_whitespace() {
                has_code = true;
            }
            i += 1;
        }

        Scan::Exhausted { has_code }
    }

    fn finish(&self, statement: String) -> Option<String> {
        let trimmed = statement.trim();
        let blank = trimmed
            .chars()
            .all(|c| c.is_whitespace() || c == ';' || self.delimiter.contains(c));
        if blank {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl Iterator for SqlSplitter<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if self.rest.is_empty() && self.pending.is_empty() {
                return None;
            }
            match self.scan_tail() {
                Scan::Boundary { end, resume } => {
                    let mut statement = std::mem::take(&mut self.pending);
                    statement.push_str(&self.rest[..end]);
                    self.pending_has_code = false;
                    self.rest = &self.rest[resume..];
                    if let Some(statement) = self.finish(statement) {
                        return Some(statement);
                    }
                }
                Scan::Directive {
                    start,
                    token,
                    resume,
                    has_code,
                } => {
                    self.pending.push_str(&self.rest[..start]);
                    self.pending_has_code = has_code;
                    if !token.is_empty() {
                        self.delimiter = token;
                    }
                    self.rest = &self.rest[resume..];
                }
                Scan::Exhausted { has_code } => {
                    let mut statement = std::mem::take(&mut self.pending);
                    statement.push_str(self.rest);
                    self.pending_has_code = false;
                    self.rest = "";
                    // A tail made only of comments (e.g. "-- Dump completed") is not sent.
                    if !has_code {
                        return None;
                    }
                    return self.finish(statement);
                }
            }
        }
    }
}

/// Index of the quote closing the one at `open`; a quote preceded by an odd run of backslashes is escaped.
fn closing_quote(bytes: &[u8], open: usize) -> Option<usize> {
    let quote = bytes[open];
    let mut from = open + 1;
    loop {
        let pos = from + bytes.get(from..)?.iter().position(|&b| b == quote)?;
        let backslashes = bytes[open + 1..pos]
            .iter()
            .rev()
            .take_while(|&&b| b == b'\\')
            .count();
        if backslashes % 2 == 0 {
            return Some(pos);
        }
        from = pos + 1;
    }
}

/// Position just past the newline ending the line that contains `from`.
fn line_end(bytes: &[u8], from: usize) -> usize {
    find(bytes, b"\n", from).map_or(bytes.len(), |nl| nl + 1)
}

/// Position just past the `*/` closing the block comment opened at `from`.
fn block_end(bytes: &[u8], from: usize) -> usize {
    find(bytes, b"*/", from + 2).map_or(bytes.len(), |close| close + 2)
}

fn is_delimiter_directive(bytes: &[u8], at: usize) -> bool {
    let end = at + DELIMITER_KEYWORD.len();
    if end >= bytes.len() {
        return false;
    }
    let preceded_by_ident = at > 0 && {
        let prev = bytes[at - 1];
        prev.is_ascii_alphanumeric() || prev == b'_'
    };
    !preceded_by_ident && bytes[at..end].eq_ignore_ascii_case(DELIMITER_KEYWORD)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
