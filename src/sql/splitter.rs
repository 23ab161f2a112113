use super::SqlDialect;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanState {
    Normal,
    SingleQuote,
    DoubleQuote,
    Backtick,
    LineComment,
    BlockComment,
    DollarQuote(String),
}

/// Dialect-aware statement splitter
///
/// Delimiters inside quotes, comments and dollar-quoted bodies never split.
/// MySQL scripts may switch the delimiter with a `DELIMITER xx` line; Oracle
/// PL/SQL blocks run until a line holding a single `/`.
#[derive(Debug, Clone)]
pub struct SqlSplitter {
    dialect: SqlDialect,
    delimiter: String,
}

impl SqlSplitter {
    pub fn new(dialect: SqlDialect, delimiter: impl Into<String>) -> Self {
        let delimiter = delimiter.into();
        let delimiter = if delimiter.trim().is_empty() {
            ";".to_string()
        } else {
            delimiter.trim().to_string()
        };
        Self { dialect, delimiter }
    }

    pub fn split(&self, sql: &str) -> Vec<String> {
        let chars: Vec<char> = sql.chars().collect();
        let mut statements = Vec::new();
        let mut delimiter: Vec<char> = self.delimiter.chars().collect();
        let mut buf = String::new();
        let mut state = ScanState::Normal;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            match &state {
                ScanState::Normal => {
                    if i == 0 || chars[i - 1] == '\n' {
                        let line_end = chars[i..]
                            .iter()
                            .position(|ch| *ch == '\n')
                            .map(|p| i + p)
                            .unwrap_or(chars.len());
                        let line: String = chars[i..line_end].iter().collect();
                        let trimmed = line.trim();

                        if self.dialect == SqlDialect::MySql && is_blank_sql(&buf) {
                            if let Some(new_delimiter) = parse_delimiter_directive(trimmed) {
                                delimiter = new_delimiter.chars().collect();
                                buf.clear();
                                i = line_end + 1;
                                continue;
                            }
                        }
                        if self.dialect == SqlDialect::Oracle && trimmed == "/" {
                            flush(&mut buf, &mut statements);
                            i = line_end + 1;
                            continue;
                        }
                    }

                    if c == '\'' {
                        state = ScanState::SingleQuote;
                    } else if c == '"' {
                        state = ScanState::DoubleQuote;
                    } else if c == '`' && self.dialect == SqlDialect::MySql {
                        state = ScanState::Backtick;
                    } else if c == '-' && next == Some('-') {
                        state = ScanState::LineComment;
                    } else if c == '#' && self.dialect == SqlDialect::MySql {
                        state = ScanState::LineComment;
                    } else if c == '/' && next == Some('*') {
                        buf.push_str("/*");
                        state = ScanState::BlockComment;
                        i += 2;
                        continue;
                    } else if c == '$' && self.dialect == SqlDialect::PostgreSql {
                        if let Some(tag) = dollar_tag_at(&chars, i) {
                            buf.push_str(&tag);
                            i += tag.chars().count();
                            state = ScanState::DollarQuote(tag);
                            continue;
                        }
                    } else if matches_at(&chars, i, &delimiter) {
                        if self.dialect == SqlDialect::Oracle && is_plsql_block(&buf) {
                            buf.push(c);
                            i += 1;
                            continue;
                        }
                        flush(&mut buf, &mut statements);
                        i += delimiter.len();
                        continue;
                    }
                    buf.push(c);
                }
                ScanState::SingleQuote | ScanState::DoubleQuote | ScanState::Backtick => {
                    let quote = match state {
                        ScanState::SingleQuote => '\'',
                        ScanState::DoubleQuote => '"',
                        _ => '`',
                    };
                    buf.push(c);
                    if c == '\\' && self.dialect == SqlDialect::MySql && quote != '`' {
                        if let Some(escaped) = next {
                            buf.push(escaped);
                            i += 2;
                            continue;
                        }
                    } else if c == quote {
                        if next == Some(quote) {
                            buf.push(quote);
                            i += 2;
                            continue;
                        }
                        state = ScanState::Normal;
                    }
                }
                ScanState::LineComment => {
                    buf.push(c);
                    if c == '\n' {
                        state = ScanState::Normal;
                    }
                }
                ScanState::BlockComment => {
                    if c == '*' && next == Some('/') {
                        buf.push_str("*/");
                        state = ScanState::Normal;
                        i += 2;
                        continue;
                    }
                    buf.push(c);
                }
                ScanState::DollarQuote(tag) => {
                    let tag_chars: Vec<char> = tag.chars().collect();
                    if matches_at(&chars, i, &tag_chars) {
                        buf.push_str(tag);
                        i += tag_chars.len();
                        state = ScanState::Normal;
                        continue;
                    }
                    buf.push(c);
                }
            }
            i += 1;
        }

        flush(&mut buf, &mut statements);
        statements
    }
}

/// Split with the dialect's default handling and an explicit delimiter
pub fn split_sql(dialect: SqlDialect, sql: &str, delimiter: &str) -> Vec<String> {
    SqlSplitter::new(dialect, delimiter).split(sql)
}

fn flush(buf: &mut String, statements: &mut Vec<String>) {
    if !is_blank_sql(buf) {
        statements.push(buf.trim().to_string());
    }
    buf.clear();
}

fn matches_at(chars: &[char], at: usize, pattern: &[char]) -> bool {
    !pattern.is_empty()
        && chars.len() >= at + pattern.len()
        && chars[at..at + pattern.len()] == *pattern
}

fn parse_delimiter_directive(line: &str) -> Option<String> {
    let head = line.get(..10)?;
    if !head.eq_ignore_ascii_case("delimiter ") {
        return None;
    }
    let delimiter = line.get(10..)?.trim();
    (!delimiter.is_empty()).then(|| delimiter.to_string())
}

/// `$tag$` or `$$` starting at `at`
fn dollar_tag_at(chars: &[char], at: usize) -> Option<String> {
    let mut end = at + 1;
    while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
        end += 1;
    }
    if end < chars.len() && chars[end] == '$' {
        Some(chars[at..=end].iter().collect())
    } else {
        None
    }
}

/// Whether the statement holds anything besides whitespace and comments
fn is_blank_sql(sql: &str) -> bool {
    let mut rest = sql.trim_start();
    loop {
        if rest.is_empty() {
            return true;
        }
        if let Some(after) = rest.strip_prefix("--").or_else(|| rest.strip_prefix('#')) {
            match after.find('\n') {
                Some(pos) => rest = after[pos + 1..].trim_start(),
                None => return true,
            }
        } else if let Some(after) = rest.strip_prefix("/*") {
            match after.find("*/") {
                Some(pos) => rest = after[pos + 2..].trim_start(),
                None => return true,
            }
        } else {
            return false;
        }
    }
}

fn is_plsql_block(sql: &str) -> bool {
    let head: Vec<String> = strip_leading_comments(sql)
        .split_whitespace()
        .take(5)
        .map(|w| w.to_ascii_uppercase())
        .collect();
    let words: Vec<&str> = head.iter().map(String::as_str).collect();
    match words.as_slice() {
        ["DECLARE", ..] | ["BEGIN", ..] => true,
        ["CREATE", "OR", "REPLACE", kind, ..] | ["CREATE", kind, ..] => matches!(
            *kind,
            "PROCEDURE" | "FUNCTION" | "PACKAGE" | "TRIGGER" | "TYPE"
        ),
        _ => false,
    }
}

fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.find('\n').map(|p| after[p + 1..].trim_start()).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map(|p| after[p + 2..].trim_start()).unwrap_or("");
        } else {
            return rest;
        }
    }
}
