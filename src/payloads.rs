//! Named payload lists feeding the mutation strategies.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::requester::Header;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadList {
    Methods,
    Headers,
    EndPaths,
    MidPaths,
}

impl PayloadList {
    pub fn file_name(self) -> &'static str {
        match self {
            PayloadList::Methods => "httpmethods",
            PayloadList::Headers => "headers",
            PayloadList::EndPaths => "endpaths",
            PayloadList::MidPaths => "midpaths",
        }
    }
}

impl fmt::Display for PayloadList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Where payload lists come from: a directory holding one file per list,
/// or lists supplied in memory.
#[derive(Debug, Clone)]
pub enum PayloadSource {
    Directory(PathBuf),
    Inline(HashMap<PayloadList, Vec<String>>),
}

impl PayloadSource {
    /// Load one list, one entry per non-blank line.
    pub fn load(&self, list: PayloadList) -> Result<Vec<String>> {
        let lines = match self {
            PayloadSource::Directory(dir) => {
                let path = dir.join(list.file_name());
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Payload list is unreadable! File: `{}`", path.display()))?;
                parse_lines(&text)
            }
            PayloadSource::Inline(lists) => lists
                .get(&list)
                .with_context(|| format!("No inline payload list named `{list}`"))?
                .iter()
                .flat_map(|entry| parse_lines(entry))
                .collect(),
        };

        debug!("Loaded {} entries from payload list `{list}`", lines.len());
        Ok(lines)
    }

    /// Load the header list, skipping entries that are not a `name value` pair.
    pub fn load_headers(&self) -> Result<Vec<Header>> {
        let headers = self
            .load(PayloadList::Headers)?
            .iter()
            .filter_map(|line| {
                let header = parse_header_line(line);
                if header.is_none() {
                    warn!("Skipping malformed header payload `{line}` (expected `name value`)");
                }
                header
            })
            .collect();
        Ok(headers)
    }
}

fn parse_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// `X-Forwarded-For 127.0.0.1` -> header. Exactly two fields are required.
pub fn parse_header_line(line: &str) -> Option<Header> {
    let mut fields = line.split_whitespace();
    let name = fields.next()?;
    let value = fields.next()?;
    if fields.next().is_some() {
        return None;
    }
    Some(Header::new(name, value))
}
