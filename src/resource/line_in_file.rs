//! Line resource - one managed line inside a larger file

use anyhow::{Context, Result};
use declarative::{ApplyResult, HostContext, ProbeResult, Resource, ResourceKind};
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::file_content::{existing_mode, write_atomic};

const DEFAULT_MODE: u32 = 0o644;

/// A line that must be present, replacing whatever `pattern` matches
///
/// Lines matching `pattern` are "the same setting": the first one is
/// rewritten to `line` and later ones are dropped. Without a match the line
/// is appended.
#[derive(Debug, Clone)]
pub struct LinePresentInFile {
    pub path: PathBuf,
    pub line: String,
    pattern: Regex,
}

impl LinePresentInFile {
    /// `pattern` defaults to the line itself, matched literally
    pub fn new(path: impl AsRef<Path>, pattern: Option<&str>, line: &str) -> Result<Self> {
        let source = match pattern {
            Some(p) => p.to_string(),
            None => format!("^{}$", regex::escape(line)),
        };
        let pattern =
            Regex::new(&source).with_context(|| format!("Invalid line pattern: {source}"))?;
        if !pattern.is_match(line) {
            anyhow::bail!("Line `{line}` does not match its own pattern `{source}`");
        }
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            line: line.to_string(),
            pattern,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// New file content, and whether a matching line was replaced
    fn render(&self, existing: &str) -> (String, bool) {
        let mut out = String::with_capacity(existing.len() + self.line.len() + 1);
        let mut replaced = false;

        for segment in existing.split_inclusive('\n') {
            let text = segment.strip_suffix('\n').unwrap_or(segment);
            let text = text.strip_suffix('\r').unwrap_or(text);
            if self.pattern.is_match(text) {
                if !replaced {
                    out.push_str(&self.line);
                    out.push('\n');
                    replaced = true;
                }
                continue;
            }
            out.push_str(segment);
        }

        if !replaced {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.line);
            out.push('\n');
        }
        (out, replaced)
    }
}

impl Resource for LinePresentInFile {
    fn key(&self) -> String {
        format!("line:{}:{}", self.path.display(), self.pattern())
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::LinePresentInFile
    }

    fn description(&self) -> String {
        format!("Line `{}` in {}", self.line, self.path.display())
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "path": self.path,
            "pattern": self.pattern(),
            "line": self.line,
        })
    }

    fn probe(&self, _ctx: &HostContext) -> Result<ProbeResult> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(ProbeResult::unsatisfied("file missing"));
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        let mut matches = content
            .lines()
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .filter(|l| self.pattern.is_match(l))
            .peekable();

        if matches.peek().is_none() {
            return Ok(ProbeResult::unsatisfied("no matching line"));
        }
        match matches.find(|l| *l != self.line) {
            Some(other) => Ok(ProbeResult::unsatisfied(format!("found `{other}`"))),
            None => Ok(ProbeResult::satisfied("present")),
        }
    }

    fn apply(&self, _ctx: &HostContext) -> Result<ApplyResult> {
        let existing = match fs::read_to_string(&self.path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        let (content, replaced) = self.render(existing.as_deref().unwrap_or_default());
        let mode = existing_mode(&self.path).unwrap_or(DEFAULT_MODE);
        write_atomic(&self.path, content.as_bytes(), mode)?;

        Ok(match (existing.is_some(), replaced) {
            (false, _) => ApplyResult::created().with_detail("created file"),
            (true, true) => ApplyResult::modified().with_detail("replaced matching line"),
            (true, false) => ApplyResult::modified().with_detail("appended line"),
        })
    }
}
