use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ReadbackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableShape {
    pub rows: u64,
    pub columns: u64,
}

pub trait TableReader: Send + Sync {
    /// File extension payloads of this format are stored under.
    fn extension(&self) -> &str;

    fn read_shape(&self, path: &Path) -> Result<TableShape, ReadbackError>;
}

/// Reads the shape of the first `TABLE` in a VOTable document: the
/// `FIELD` children give the columns, `TABLEDATA/TR` the rows. Binary
/// serializations are reported as unreadable.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoTableReader;

impl TableReader for VoTableReader {
    fn extension(&self) -> &str {
        "xml"
    }

    fn read_shape(&self, path: &Path) -> Result<TableShape, ReadbackError> {
        let file = File::open(path).map_err(|error| {
            ReadbackError::new(format!("failed to open {}: {error}", path.display()))
        })?;
        scan_votable(BufReader::new(file))
    }
}

pub fn scan_votable(reader: impl Read) -> Result<TableShape, ReadbackError> {
    let mut scanner = Scanner::default();
    let mut markup = Vec::new();
    let mut inside = false;
    let mut quote: Option<u8> = None;
    let mut leading = true;

    for byte in reader.bytes() {
        let byte = byte.map_err(|error| ReadbackError::new(format!("read failed: {error}")))?;
        if leading && matches!(byte, 0xEF | 0xBB | 0xBF) {
            continue;
        }
        leading = false;

        if !inside {
            if byte == b'<' {
                markup.clear();
                inside = true;
                quote = None;
            } else if !byte.is_ascii_whitespace() && scanner.stack.is_empty() {
                return Err(ReadbackError::new(
                    "payload is not XML: text outside the root element",
                ));
            }
            continue;
        }

        if let Some(open) = quote {
            if byte == open {
                quote = None;
            }
            markup.push(byte);
            continue;
        }
        if matches!(byte, b'"' | b'\'') && !markup.starts_with(b"!") && !markup.starts_with(b"?") {
            quote = Some(byte);
            markup.push(byte);
            continue;
        }
        if byte == b'>' {
            let open_comment = markup.starts_with(b"!--") && !(markup.len() >= 5 && markup.ends_with(b"--"));
            let open_cdata = markup.starts_with(b"![CDATA[") && !markup.ends_with(b"]]");
            if open_comment || open_cdata {
                markup.push(byte);
                continue;
            }
            scanner.handle_markup(&markup)?;
            inside = false;
            continue;
        }
        markup.push(byte);
    }

    if inside {
        return Err(ReadbackError::new("payload ends inside a tag"));
    }
    scanner.finish()
}

#[derive(Debug, Default)]
struct Scanner {
    stack: Vec<String>,
    root: Option<String>,
    table_depth: Option<usize>,
    table_done: bool,
    columns: u64,
    rows: u64,
    unsupported: Option<String>,
    query_status_error: Option<String>,
}

impl Scanner {
    fn handle_markup(&mut self, markup: &[u8]) -> Result<(), ReadbackError> {
        if markup.starts_with(b"?") || markup.starts_with(b"!") {
            return Ok(());
        }
        let text = String::from_utf8_lossy(markup);

        if let Some(closing) = text.strip_prefix('/') {
            let name = local_name(closing.trim());
            return match self.stack.pop() {
                Some(open) if open == name => {
                    if self.table_depth == Some(self.stack.len()) && !self.table_done {
                        self.table_done = true;
                    }
                    Ok(())
                }
                Some(open) => Err(ReadbackError::new(format!(
                    "malformed XML: </{name}> closes <{open}>"
                ))),
                None => Err(ReadbackError::new(format!(
                    "malformed XML: unexpected </{name}>"
                ))),
            };
        }

        let self_closing = text.ends_with('/');
        let body = text.trim_end_matches('/');
        let raw_name = body.split_whitespace().next().unwrap_or_default();
        if raw_name.is_empty() {
            return Err(ReadbackError::new("malformed XML: empty tag"));
        }
        let name = local_name(raw_name);

        if self.stack.is_empty() {
            if let Some(root) = &self.root {
                return Err(ReadbackError::new(format!(
                    "malformed XML: second root element <{name}> after <{root}>"
                )));
            }
            if name != "VOTABLE" {
                return Err(ReadbackError::new(format!(
                    "root element is <{name}>, not <VOTABLE>"
                )));
            }
            self.root = Some(name.clone());
        }

        let depth = self.stack.len();
        let parent = self.stack.last().map(String::as_str);
        match (self.table_depth, name.as_str()) {
            (None, "TABLE") => self.table_depth = Some(depth),
            (Some(table), "FIELD") if !self.table_done && depth == table + 1 => {
                self.columns += 1;
            }
            (Some(_), "TR") if !self.table_done && parent == Some("TABLEDATA") => self.rows += 1,
            (Some(_), "BINARY" | "BINARY2" | "FITS")
                if !self.table_done && parent == Some("DATA") =>
            {
                self.unsupported = Some(name.clone());
            }
            _ => {}
        }

        if name == "INFO" {
            let attributes = parse_attributes(body);
            if attributes.get("name").map(String::as_str) == Some("QUERY_STATUS")
                && attributes.get("value").map(String::as_str) == Some("ERROR")
            {
                self.query_status_error = Some(
                    attributes
                        .get("content")
                        .cloned()
                        .unwrap_or_else(|| "QUERY_STATUS=ERROR".to_string()),
                );
            }
        }

        if !self_closing {
            self.stack.push(name);
        }
        Ok(())
    }

    fn finish(self) -> Result<TableShape, ReadbackError> {
        if self.root.is_none() {
            return Err(ReadbackError::new("payload is empty or has no root element"));
        }
        if let Some(open) = self.stack.last() {
            return Err(ReadbackError::new(format!(
                "payload ends inside <{open}>"
            )));
        }
        if self.table_depth.is_none() {
            return Err(match self.query_status_error {
                Some(detail) => ReadbackError::new(format!(
                    "service reported an error and returned no TABLE: {detail}"
                )),
                None => ReadbackError::new("VOTable contains no TABLE element"),
            });
        }
        if let Some(serialization) = self.unsupported {
            return Err(ReadbackError::new(format!(
                "unsupported VOTable serialization: {serialization}"
            )));
        }
        Ok(TableShape {
            rows: self.rows,
            columns: self.columns,
        })
    }
}

fn local_name(raw: &str) -> String {
    raw.rsplit(':').next().unwrap_or(raw).to_string()
}

fn parse_attributes(tag_body: &str) -> BTreeMap<String, String> {
    attribute_regex()
        .captures_iter(tag_body)
        .filter_map(|captures| {
            let name = captures.get(1)?.as_str().to_string();
            let value = captures
                .get(2)
                .or_else(|| captures.get(3))
                .map(|value| value.as_str().to_string())
                .unwrap_or_default();
            Some((name, value))
        })
        .collect()
}

fn attribute_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("attribute regex should compile")
    })
}
