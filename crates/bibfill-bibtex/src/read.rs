//! Reading BibTeX files into [`Entry`] values.
//!
//! Files are segmented at entry boundaries and each entry is parsed on its
//! own. Real .bib files often carry minor syntax errors, string macros,
//! and comment blocks; segmented parsing salvages every well-formed entry
//! and carries everything else through verbatim.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::entry::Entry;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no BibTeX entries found")]
    NoEntries,
}

/// One syntactic unit of a bibliography file, in source order.
#[derive(Debug, Clone)]
pub enum Item {
    Entry(Entry),
    /// Comment blocks, string macros, preambles, and entries that failed
    /// to parse. Written back byte for byte.
    Verbatim(String),
}

/// A parse problem tied to a file position. The affected text is still
/// carried through as a verbatim item.
#[derive(Debug, Clone)]
pub struct ParseIssue {
    pub file: Option<String>,
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}: {}", file, self.line, self.message),
            None => write!(f, "line {}: {}", self.line, self.message),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bibliography {
    pub path: Option<String>,
    pub items: Vec<Item>,
    pub issues: Vec<ParseIssue>,
}

impl Bibliography {
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.items.iter().filter_map(|item| match item {
            Item::Entry(e) => Some(e),
            Item::Verbatim(_) => None,
        })
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.items.iter_mut().filter_map(|item| match item {
            Item::Entry(e) => Some(e),
            Item::Verbatim(_) => None,
        })
    }
}

static ENTRY_START_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*@[a-zA-Z]").unwrap());

pub fn read_file(path: &Path) -> Result<Bibliography, ReadError> {
    let content = std::fs::read_to_string(path)?;
    Ok(read_str(&content, Some(&path.display().to_string())))
}

/// Parse .bib content. Never fails as a whole; unparseable chunks become
/// verbatim items with an attached issue.
pub fn read_str(content: &str, path: Option<&str>) -> Bibliography {
    let mut bib = Bibliography {
        path: path.map(str::to_string),
        ..Default::default()
    };

    let positions: Vec<usize> = ENTRY_START_RE.find_iter(content).map(|m| m.start()).collect();
    if positions.is_empty() {
        if !content.trim().is_empty() {
            bib.items.push(Item::Verbatim(content.to_string()));
        }
        return bib;
    }

    if positions[0] > 0 {
        let head = &content[..positions[0]];
        if !head.trim().is_empty() {
            bib.items.push(Item::Verbatim(head.trim_end().to_string()));
        }
    }

    let mut entry_index = 0usize;
    for (i, &start) in positions.iter().enumerate() {
        let end = positions.get(i + 1).copied().unwrap_or(content.len());
        let chunk = content[start..end].trim_end();
        if chunk.is_empty() {
            continue;
        }
        let line = 1 + content[..start].matches('\n').count();

        // @string / @preamble / @comment blocks are structural, not
        // entries; keep them byte for byte.
        let head = chunk.trim_start().to_lowercase();
        if head.starts_with("@string")
            || head.starts_with("@preamble")
            || head.starts_with("@comment")
        {
            bib.items.push(Item::Verbatim(chunk.to_string()));
            continue;
        }

        match parse_single_entry(chunk, path, entry_index) {
            Ok(entry) => {
                bib.items.push(Item::Entry(entry));
                entry_index += 1;
            }
            Err(message) => {
                bib.issues.push(ParseIssue {
                    file: path.map(str::to_string),
                    line,
                    message,
                });
                bib.items.push(Item::Verbatim(chunk.to_string()));
            }
        }
    }

    bib
}

fn parse_single_entry(chunk: &str, path: Option<&str>, index: usize) -> Result<Entry, String> {
    let parsed = biblatex::Bibliography::parse(chunk).map_err(|e| e.to_string())?;
    let raw = parsed.iter().next().ok_or_else(|| "empty entry".to_string())?;

    let mut entry = Entry::new(raw.key.clone(), raw.entry_type.to_string())
        .with_source(path, index);
    for (name, chunks) in raw.fields.iter() {
        let value = chunks_to_string(chunks);
        if !value.trim().is_empty() {
            entry.set(name, &value);
        }
    }
    Ok(entry)
}

/// Flatten biblatex chunks into plain text.
fn chunks_to_string(chunks: &[biblatex::Spanned<biblatex::Chunk>]) -> String {
    chunks
        .iter()
        .map(|c| match &c.v {
            biblatex::Chunk::Normal(s) => s.as_str(),
            biblatex::Chunk::Verbatim(s) => s.as_str(),
            biblatex::Chunk::Math(s) => s.as_str(),
        })
        .collect::<Vec<_>>()
        .join("")
}
