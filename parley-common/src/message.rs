//! Header deltas recorded against an unmodified message, and the renderer
//! that applies them.
//!
//! Filters never rewrite the submitted bytes. They record [`Mutation`]s, the
//! queue persists the original payload next to them, and [`render`] produces
//! the wire form when a copy is handed to the transport. A failed entry can
//! therefore always be replayed from exactly what was received.

use mailparse::MailHeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::StructuralError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mutation {
    /// Replace every occurrence of the header (or add it).
    SetHeader { name: String, value: String },
    /// Add the header after the existing block.
    AppendHeader { name: String, value: String },
    RemoveHeader { name: String },
    /// Prefix the subject unless the prefix is already present.
    PrefixSubject { prefix: String },
    /// Emit CRLF line endings in headers and body.
    NormalizeLineEndings,
}

#[derive(PartialEq, Eq)]
enum Target<'a> {
    Header(&'a str),
    Subject,
    LineEndings,
}

impl Mutation {
    fn target(&self) -> Target<'_> {
        match self {
            Self::SetHeader { name, .. }
            | Self::AppendHeader { name, .. }
            | Self::RemoveHeader { name } => Target::Header(name),
            Self::PrefixSubject { .. } => Target::Subject,
            Self::NormalizeLineEndings => Target::LineEndings,
        }
    }

    fn same_target(&self, other: &Self) -> bool {
        match (self.target(), other.target()) {
            (Target::Header(a), Target::Header(b)) => a.eq_ignore_ascii_case(b),
            (a, b) => a == b,
        }
    }
}

/// The ordered set of deltas recorded for one message.
///
/// Recording is idempotent: a mutation aimed at a header that already has a
/// recorded mutation replaces it in place, so re-running a filter leaves the
/// set unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mutations(Vec<Mutation>);

impl Mutations {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn record(&mut self, mutation: Mutation) {
        if let Some(existing) = self.0.iter_mut().find(|m| m.same_target(&mutation)) {
            *existing = mutation;
        } else {
            self.0.push(mutation);
        }
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.record(Mutation::SetHeader {
            name: name.into(),
            value: value.into(),
        });
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Mutation] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mutation> {
        self.0.iter()
    }

    /// The value a `SetHeader`/`AppendHeader` mutation assigns to `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.0.iter().find_map(|m| match m {
            Mutation::SetHeader { name: n, value } | Mutation::AppendHeader { name: n, value }
                if n.eq_ignore_ascii_case(name) =>
            {
                Some(value.as_str())
            }
            _ => None,
        })
    }
}

impl From<Vec<Mutation>> for Mutations {
    fn from(value: Vec<Mutation>) -> Self {
        let mut mutations = Self::new();
        value.into_iter().for_each(|m| mutations.record(m));
        mutations
    }
}

impl<'a> IntoIterator for &'a Mutations {
    type Item = &'a Mutation;
    type IntoIter = std::slice::Iter<'a, Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Lf => b"\n",
            Self::CrLf => b"\r\n",
        }
    }
}

/// A message split at its first blank line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sections<'a> {
    pub headers: &'a [u8],
    pub body: &'a [u8],
    pub line_ending: LineEnding,
}

/// Locates the blank line separating headers from body.
///
/// A message made only of header fields, with no blank line, has an empty
/// body. Anything else without a blank line is
/// [`StructuralError::MissingSeparator`].
pub fn split(raw: &[u8]) -> Result<Sections<'_>, StructuralError> {
    let mut pos = 0;
    while let Some(offset) = raw[pos..].iter().position(|&b| b == b'\n') {
        let newline = pos + offset;
        let line = strip_cr(&raw[pos..newline]);
        if line.is_empty() {
            let line_ending = if newline > 0 && raw[newline - 1] == b'\r' {
                LineEnding::CrLf
            } else {
                LineEnding::Lf
            };
            return Ok(Sections {
                headers: &raw[..pos],
                body: &raw[newline + 1..],
                line_ending,
            });
        }
        pos = newline + 1;
    }

    match parse_fields(raw) {
        Ok(fields) if !fields.is_empty() => {
            let line_ending = match raw.iter().position(|&b| b == b'\n') {
                Some(newline) if newline > 0 && raw[newline - 1] == b'\r' => LineEnding::CrLf,
                _ => LineEnding::Lf,
            };
            Ok(Sections {
                headers: raw,
                body: &raw[raw.len()..],
                line_ending,
            })
        }
        _ => Err(StructuralError::MissingSeparator),
    }
}

/// The first value of `name`, decoded by `mailparse`.
#[must_use]
pub fn header_value(raw: &[u8], name: &str) -> Option<String> {
    let (headers, _) = mailparse::parse_headers(raw).ok()?;
    headers.get_first_value(name)
}

/// Rewrites bare `\n` and bare `\r` as `\r\n`.
#[must_use]
pub fn normalize_line_endings(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    let mut iter = data.iter().copied().peekable();
    while let Some(b) = iter.next() {
        match b {
            b'\r' => {
                out.extend_from_slice(b"\r\n");
                if iter.peek() == Some(&b'\n') {
                    iter.next();
                }
            }
            b'\n' => out.extend_from_slice(b"\r\n"),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone)]
struct Field {
    name: String,
    /// Physical lines without their terminators; the first holds `Name:`.
    lines: Vec<Vec<u8>>,
}

impl Field {
    fn new(name: &str, value: &str) -> Self {
        let value: String = value
            .chars()
            .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
            .collect();
        Self {
            name: name.to_string(),
            lines: vec![format!("{name}: {}", value.trim()).into_bytes()],
        }
    }

    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    fn unfolded_value(&self) -> String {
        let mut value = Vec::new();
        for (idx, line) in self.lines.iter().enumerate() {
            if idx == 0 {
                let colon = line.iter().position(|&b| b == b':').unwrap_or(line.len());
                value.extend_from_slice(line.get(colon + 1..).unwrap_or_default());
            } else {
                value.extend_from_slice(line);
            }
        }
        String::from_utf8_lossy(&value).trim().to_string()
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_fields(block: &[u8]) -> Result<Vec<Field>, StructuralError> {
    let mut fields: Vec<Field> = Vec::new();

    for line in block.split(|&b| b == b'\n') {
        let line = strip_cr(line);
        if line.is_empty() {
            continue;
        }

        if line[0] == b' ' || line[0] == b'\t' {
            let field = fields
                .last_mut()
                .ok_or(StructuralError::OrphanContinuation)?;
            field.lines.push(line.to_vec());
            continue;
        }

        let malformed = || StructuralError::MalformedHeader(String::from_utf8_lossy(line).into_owned());
        let colon = line.iter().position(|&b| b == b':').ok_or_else(malformed)?;
        let name = std::str::from_utf8(&line[..colon]).map_err(|_| malformed())?;
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
            return Err(malformed());
        }

        fields.push(Field {
            name: name.to_string(),
            lines: vec![line.to_vec()],
        });
    }

    Ok(fields)
}

fn apply(fields: &mut Vec<Field>, mutation: &Mutation) {
    match mutation {
        Mutation::SetHeader { name, value } => {
            let position = fields.iter().position(|f| f.is(name));
            fields.retain(|f| !f.is(name));
            let field = Field::new(name, value);
            match position {
                Some(idx) => fields.insert(idx.min(fields.len()), field),
                None => fields.push(field),
            }
        }
        Mutation::AppendHeader { name, value } => fields.push(Field::new(name, value)),
        Mutation::RemoveHeader { name } => fields.retain(|f| !f.is(name)),
        Mutation::PrefixSubject { prefix } => {
            let tag = prefix.trim();
            if tag.is_empty() {
                return;
            }
            match fields.iter_mut().find(|f| f.is("Subject")) {
                Some(subject) => {
                    let current = subject.unfolded_value();
                    if !is_tagged(&current, tag) {
                        *subject = Field::new("Subject", &format!("{tag} {current}"));
                    }
                }
                None => fields.push(Field::new("Subject", tag)),
            }
        }
        Mutation::NormalizeLineEndings => {}
    }
}

/// Markers a reply or forward puts in front of a subject.
const REPLY_MARKERS: &[&str] = &["re:", "fwd:", "fw:"];

/// `true` if `subject` starts with `tag` once any `Re:`/`Fwd:` markers
/// are skipped.
fn is_tagged(subject: &str, tag: &str) -> bool {
    let mut rest = subject.trim_start();
    while let Some(marker) = REPLY_MARKERS.iter().find(|marker| {
        rest.get(..marker.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(marker))
    }) {
        rest = rest[marker.len()..].trim_start();
    }
    rest.get(..tag.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(tag))
}

/// Applies `mutations` to the unmodified `original` and returns wire bytes.
///
/// Folded headers that are not touched keep their original folding. Line
/// endings follow the original unless [`Mutation::NormalizeLineEndings`] is
/// present, in which case both headers and body use CRLF.
pub fn render(original: &[u8], mutations: &[Mutation]) -> Result<Vec<u8>, StructuralError> {
    let sections = split(original)?;
    let mut fields = parse_fields(sections.headers)?;

    let mut crlf = false;
    for mutation in mutations {
        if matches!(mutation, Mutation::NormalizeLineEndings) {
            crlf = true;
        }
        apply(&mut fields, mutation);
    }

    let ending = if crlf {
        LineEnding::CrLf
    } else {
        sections.line_ending
    };

    let mut out = Vec::with_capacity(original.len() + 256);
    for line in fields.iter().flat_map(|f| f.lines.iter()) {
        out.extend_from_slice(line);
        out.extend_from_slice(ending.as_bytes());
    }
    out.extend_from_slice(ending.as_bytes());

    if crlf {
        out.extend_from_slice(&normalize_line_endings(sections.body));
    } else {
        out.extend_from_slice(sections.body);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SIMPLE: &[u8] = b"From: alice@example.org\nSubject: Hello\n\nBody line\n";

    fn text(bytes: &[u8]) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_split_finds_separator() {
        let sections = split(SIMPLE).unwrap();
        assert_eq!(sections.body, b"Body line\n");
        assert_eq!(sections.line_ending, LineEnding::Lf);

        let sections = split(b"A: b\r\n\r\nbody").unwrap();
        assert_eq!(sections.headers, b"A: b\r\n");
        assert_eq!(sections.line_ending, LineEnding::CrLf);
    }

    #[test]
    fn test_split_without_separator() {
        let sections = split(b"From: alice@example.org\nSubject: no body").unwrap();
        assert_eq!(sections.headers, b"From: alice@example.org\nSubject: no body");
        assert!(sections.body.is_empty());
        assert_eq!(sections.line_ending, LineEnding::Lf);

        let sections = split(b"From: alice@example.org\r\nSubject: folded\r\n  further\r\n").unwrap();
        assert!(sections.body.is_empty());
        assert_eq!(sections.line_ending, LineEnding::CrLf);

        assert_eq!(
            split(b"From: alice@example.org\nthis is body text"),
            Err(StructuralError::MissingSeparator)
        );
        assert_eq!(split(b""), Err(StructuralError::MissingSeparator));
    }

    #[test]
    fn test_render_headers_only_message() {
        let out = render(
            b"From: alice@example.org\nSubject: no body",
            &[Mutation::SetHeader {
                name: "List-Id".to_string(),
                value: "<dev.lists.example.org>".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(
            text(&out),
            "From: alice@example.org\nSubject: no body\nList-Id: <dev.lists.example.org>\n\n"
        );
    }

    #[test]
    fn test_render_without_mutations_is_identity() {
        assert_eq!(render(SIMPLE, &[]).unwrap(), SIMPLE);
    }

    #[test]
    fn test_set_header_replaces_all_occurrences() {
        let raw = b"Reply-To: a@example.org\nFrom: x@example.org\nReply-To: b@example.org\n\nbody";
        let out = render(
            raw,
            &[Mutation::SetHeader {
                name: "reply-to".to_string(),
                value: "list@example.org".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(
            text(&out),
            "reply-to: list@example.org\nFrom: x@example.org\n\nbody"
        );
    }

    #[test]
    fn test_folded_header_survives() {
        let raw = b"To: a@example.org,\n b@example.org\nSubject: hi\n\nbody";
        let out = render(
            raw,
            &[Mutation::AppendHeader {
                name: "List-Id".to_string(),
                value: "dev <dev.example.org>".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(
            text(&out),
            "To: a@example.org,\n b@example.org\nSubject: hi\nList-Id: dev <dev.example.org>\n\nbody"
        );
    }

    #[test]
    fn test_prefix_subject_once() {
        let once = render(
            SIMPLE,
            &[Mutation::PrefixSubject {
                prefix: "[dev] ".to_string(),
            }],
        )
        .unwrap();
        assert!(text(&once).contains("Subject: [dev] Hello\n"));

        let twice = render(
            &once,
            &[Mutation::PrefixSubject {
                prefix: "[dev] ".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_prefix_subject_checks_only_the_start() {
        let prefix = |raw: &[u8]| {
            let out = render(
                raw,
                &[Mutation::PrefixSubject {
                    prefix: "[dev] ".to_string(),
                }],
            )
            .unwrap();
            header_value(&out, "Subject").unwrap()
        };

        assert_eq!(
            prefix(b"Subject: Re: notes from [dev] sync\n\nbody"),
            "[dev] Re: notes from [dev] sync"
        );
        assert_eq!(prefix(b"Subject: Re: [dev] x\n\nbody"), "Re: [dev] x");
        assert_eq!(prefix(b"Subject: RE: Fwd: [DEV] x\n\nbody"), "RE: Fwd: [DEV] x");
        assert_eq!(prefix(b"Subject: Reply about [dev]\n\nbody"), "[dev] Reply about [dev]");
    }

    #[test]
    fn test_prefix_subject_adds_missing_subject() {
        let out = render(
            b"From: a@example.org\n\nbody",
            &[Mutation::PrefixSubject {
                prefix: "[dev] ".to_string(),
            }],
        )
        .unwrap();
        assert!(text(&out).contains("Subject: [dev]\n"));
    }

    #[test]
    fn test_normalize_line_endings() {
        let out = render(SIMPLE, &[Mutation::NormalizeLineEndings]).unwrap();
        assert_eq!(
            text(&out),
            "From: alice@example.org\r\nSubject: Hello\r\n\r\nBody line\r\n"
        );
        assert_eq!(normalize_line_endings(b"a\rb\r\nc\n"), b"a\r\nb\r\nc\r\n");
    }

    #[test]
    fn test_header_values_cannot_inject_lines() {
        let out = render(
            SIMPLE,
            &[Mutation::SetHeader {
                name: "X-Test".to_string(),
                value: "one\r\nBcc: evil@example.org".to_string(),
            }],
        )
        .unwrap();
        assert!(!text(&out).contains("\nBcc:"));
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(
            render(b" folded\nFrom: a\n\nbody", &[]),
            Err(StructuralError::OrphanContinuation)
        );
        assert!(matches!(
            render(b"not a header\n\nbody", &[]),
            Err(StructuralError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_recording_is_idempotent() {
        let mut mutations = Mutations::new();
        mutations.set_header("List-Id", "dev <dev.example.org>");
        mutations.record(Mutation::NormalizeLineEndings);
        mutations.record(Mutation::PrefixSubject {
            prefix: "[dev] ".to_string(),
        });
        let snapshot = mutations.clone();

        mutations.set_header("list-id", "dev <dev.example.org>");
        mutations.record(Mutation::NormalizeLineEndings);
        mutations.record(Mutation::PrefixSubject {
            prefix: "[dev] ".to_string(),
        });

        assert_eq!(mutations.len(), 3);
        assert_eq!(mutations.as_slice(), snapshot.as_slice());
        assert_eq!(mutations.header("LIST-ID"), Some("dev <dev.example.org>"));
    }

    #[test]
    fn test_header_value_uses_mailparse() {
        assert_eq!(header_value(SIMPLE, "subject").as_deref(), Some("Hello"));
        assert_eq!(header_value(SIMPLE, "Message-ID"), None);
    }
}
