//! Textual library reference syntax.
//!
//! ```text
//! name[@strategy][(arguments)]
//! strategy  := kind[value] | embedded | <anything else, passed to the default strategy>
//! arguments := argument (, argument)*
//! argument  := [name =] value | [name =] "quoted \"value\""
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::library::reference::{LibraryReference, LibraryRequest, ResolutionStrategy, Variable};

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(?P<name>[^@(]*)(?:@(?P<strategy>[^(]*))?(?:\((?P<args>.*)\))?$")
        .expect("reference regex is valid")
});

static STRATEGY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(?P<kind>[A-Za-z]+)\[(?P<value>.*)\]$").expect("strategy regex is valid")
});

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("name regex is valid"));

static ARGUMENT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("argument regex is valid"));

/// Parse a single reference such as `plots@ref[main](theme=dark)`.
pub fn parse_request(text: &str) -> Result<LibraryRequest> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::InvalidReference("empty library reference".to_string()));
    }

    let caps = REFERENCE_RE
        .captures(text)
        .ok_or_else(|| Error::InvalidReference(text.to_string()))?;

    let strategy = match caps.name("strategy") {
        Some(s) => parse_strategy(s.as_str().trim())?,
        None => ResolutionStrategy::Default(String::new()),
    };

    let mut name = caps.name("name").map_or("", |m| m.as_str()).trim().to_string();
    if name.is_empty() {
        name = implied_name(&strategy).ok_or_else(|| {
            Error::InvalidReference(format!("library name is missing in '{}'", text))
        })?;
    }
    if !NAME_RE.is_match(&name) {
        return Err(Error::InvalidReference(format!(
            "'{}' is not a valid library name",
            name
        )));
    }

    let arguments = match caps.name("args") {
        Some(args) => parse_arguments(args.as_str())?,
        None => Vec::new(),
    };

    Ok(LibraryRequest::new(LibraryReference::new(name, strategy)).with_arguments(arguments))
}

/// Parse a comma separated list of references, as written after `%use`.
pub fn parse_requests(text: &str) -> Result<Vec<LibraryRequest>> {
    split_top_level(text, ',')?
        .iter()
        .filter(|part| !part.trim().is_empty())
        .map(|part| parse_request(part))
        .collect()
}

fn parse_strategy(text: &str) -> Result<ResolutionStrategy> {
    if text == "embedded" {
        return Ok(ResolutionStrategy::ByEmbeddedResource);
    }

    let Some(caps) = STRATEGY_RE.captures(text) else {
        return Ok(ResolutionStrategy::Default(text.to_string()));
    };

    let value = caps["value"].trim();
    let kind = &caps["kind"];
    if value.is_empty() && matches!(kind, "file" | "dir" | "url" | "ref") {
        return Err(Error::InvalidReference(format!(
            "'{}' strategy needs a value",
            kind
        )));
    }

    let strategy = match kind {
        "file" => ResolutionStrategy::ByFile(PathBuf::from(value)),
        "dir" => ResolutionStrategy::ByDirectory(PathBuf::from(value)),
        "url" => ResolutionStrategy::ByUrl(value.to_string()),
        "ref" => ResolutionStrategy::version_ref(value),
        _ => ResolutionStrategy::Default(text.to_string()),
    };
    Ok(strategy)
}

fn implied_name(strategy: &ResolutionStrategy) -> Option<String> {
    let stem = |p: &Path| p.file_stem().map(|s| s.to_string_lossy().into_owned());
    match strategy {
        ResolutionStrategy::ByFile(path) => stem(path),
        ResolutionStrategy::ByDirectory(path) => path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned()),
        ResolutionStrategy::ByUrl(url) => {
            let last = url.trim_end_matches('/').rsplit('/').next()?;
            stem(Path::new(last))
        }
        _ => None,
    }
}

/// Parse call-site arguments: `1, theme = "dark, blue"`.
///
/// Blank arguments are dropped.
pub fn parse_arguments(text: &str) -> Result<Vec<Variable>> {
    let mut arguments = Vec::new();
    for part in split_top_level(text, ',')? {
        if part.trim().is_empty() {
            continue;
        }
        let argument = match find_top_level(&part, '=') {
            Some(index) => {
                let name = part[..index].trim();
                if !ARGUMENT_NAME_RE.is_match(name) {
                    return Err(Error::InvalidReference(format!(
                        "'{}' is not a valid argument name",
                        name
                    )));
                }
                Variable::named(name, unquote(&part[index + 1..])?)
            }
            None => Variable::positional(unquote(&part)?),
        };
        arguments.push(argument);
    }
    Ok(arguments)
}

/// Split on `separator` outside of quotes, parentheses and brackets.
pub(crate) fn split_top_level(text: &str, separator: char) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut scanner = Scanner::default();

    for c in text.chars() {
        if scanner.at_top_level() && c == separator && !scanner.escaped {
            parts.push(std::mem::take(&mut current));
            continue;
        }
        scanner.step(c);
        current.push(c);
    }
    scanner.finish(text)?;
    parts.push(current);
    Ok(parts)
}

fn find_top_level(text: &str, target: char) -> Option<usize> {
    let mut scanner = Scanner::default();
    for (index, c) in text.char_indices() {
        if scanner.at_top_level() && c == target {
            return Some(index);
        }
        scanner.step(c);
    }
    None
}

/// Strip surrounding quotes and process backslash escapes.
fn unquote(text: &str) -> Result<String> {
    let text = text.trim();
    let Some(inner) = text
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|_| text.len() >= 2)
    else {
        return Ok(text.to_string());
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {
                return Err(Error::InvalidReference(format!(
                    "dangling escape in {}",
                    text
                )));
            }
        }
    }
    Ok(out)
}

#[derive(Default)]
struct Scanner {
    depth: i32,
    in_quotes: bool,
    escaped: bool,
}

impl Scanner {
    fn at_top_level(&self) -> bool {
        self.depth == 0 && !self.in_quotes
    }

    fn step(&mut self, c: char) {
        if self.escaped {
            self.escaped = false;
            return;
        }
        match c {
            '\\' if self.in_quotes => self.escaped = true,
            '"' => self.in_quotes = !self.in_quotes,
            '(' | '[' if !self.in_quotes => self.depth += 1,
            ')' | ']' if !self.in_quotes => self.depth -= 1,
            _ => {}
        }
    }

    fn finish(&self, text: &str) -> Result<()> {
        if self.in_quotes {
            return Err(Error::InvalidReference(format!(
                "unterminated quote in '{}'",
                text
            )));
        }
        if self.depth != 0 {
            return Err(Error::InvalidReference(format!(
                "unbalanced brackets in '{}'",
                text
            )));
        }
        Ok(())
    }
}
