//! Minimal, tolerant HTML tokenizer.
//!
//! The build only needs to find tags, read their attributes, and splice new
//! attribute values back into the original text. This tokenizer records the
//! byte span of every token and of every attribute value so callers can do
//! exactly that without re-serializing anything they did not touch.
//!
//! It is deliberately forgiving:
//!
//! - tag and attribute names are matched case-insensitively (stored lowercased)
//! - comments are a single token, so `<!-- <link href="x.css"> -->` never
//!   produces a link tag
//! - `script`, `style`, `title` and `textarea` bodies are raw text up to the
//!   matching close tag
//! - a `<` that does not begin well-formed markup is plain text

use std::ops::Range;

/// Elements whose content is raw text rather than markup.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "title", "textarea"];

/// One attribute of a start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    /// Lowercased attribute name.
    pub name: String,
    /// Raw value (entities are not decoded). `None` for bare attributes.
    pub value: Option<String>,
    /// Byte range of the value inside the source, excluding quotes.
    pub value_span: Option<Range<usize>>,
}

/// A start tag with its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Lowercased tag name.
    pub name: String,
    pub attrs: Vec<Attr>,
    /// Byte range of the whole tag, `<` through `>`.
    pub span: Range<usize>,
    pub self_closing: bool,
}

impl Tag {
    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.name == name)
    }

    /// Value of an attribute, or `None` if absent or bare.
    pub fn attr_value(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(|a| a.value.as_deref())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Whether the attribute's value equals `expected`, ignoring ASCII case
    /// and surrounding whitespace.
    pub fn attr_is(&self, name: &str, expected: &str) -> bool {
        self.attr_value(name)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case(expected))
    }

    /// Whether a whitespace-separated token list attribute (like `rel`)
    /// contains `token`, ignoring ASCII case.
    pub fn attr_has_token(&self, name: &str, token: &str) -> bool {
        self.attr_value(name).is_some_and(|v| {
            v.split_ascii_whitespace()
                .any(|t| t.eq_ignore_ascii_case(token))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    StartTag(Tag),
    EndTag { name: String, span: Range<usize> },
    Comment(Range<usize>),
    /// `<!DOCTYPE …>` and processing instructions.
    Declaration(Range<usize>),
    Text(Range<usize>),
}

impl Token {
    pub fn span(&self) -> Range<usize> {
        match self {
            Token::StartTag(tag) => tag.span.clone(),
            Token::EndTag { span, .. } => span.clone(),
            Token::Comment(span) | Token::Declaration(span) | Token::Text(span) => span.clone(),
        }
    }
}

/// Split `src` into tokens. Token spans cover the whole input without gaps.
pub fn tokenize(src: &str) -> Vec<Token> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut text_start = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'<' {
            pos += 1;
            continue;
        }
        let Some((token, end)) = scan_markup(src, pos) else {
            pos += 1;
            continue;
        };

        if text_start < pos {
            tokens.push(Token::Text(text_start..pos));
        }
        let raw_element = match &token {
            Token::StartTag(tag)
                if !tag.self_closing && RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) =>
            {
                Some(tag.name.clone())
            }
            _ => None,
        };
        tokens.push(token);
        pos = end;

        if let Some(name) = raw_element {
            let close = find_close_tag(bytes, end, &name).unwrap_or(bytes.len());
            if end < close {
                tokens.push(Token::Text(end..close));
            }
            pos = close;
        }
        text_start = pos;
    }

    if text_start < bytes.len() {
        tokens.push(Token::Text(text_start..bytes.len()));
    }
    tokens
}

/// Try to read one markup token starting at the `<` at `start`.
fn scan_markup(src: &str, start: usize) -> Option<(Token, usize)> {
    let bytes = src.as_bytes();
    let rest = &bytes[start..];

    if rest.starts_with(b"<!--") {
        // An unterminated comment swallows the rest of the document, as in browsers.
        let end = find(bytes, start + 4, b"-->").map_or(bytes.len(), |i| i + 3);
        return Some((Token::Comment(start..end), end));
    }
    if rest.starts_with(b"<!") || rest.starts_with(b"<?") {
        let end = find(bytes, start + 2, b">")? + 1;
        return Some((Token::Declaration(start..end), end));
    }
    if rest.starts_with(b"</") {
        let name_start = start + 2;
        let name_end = scan_name(bytes, name_start);
        if name_end == name_start || !bytes[name_start].is_ascii_alphabetic() {
            return None;
        }
        let end = find(bytes, name_end, b">")? + 1;
        let name = src[name_start..name_end].to_ascii_lowercase();
        return Some((Token::EndTag { name, span: start..end }, end));
    }
    if rest.len() > 1 && rest[1].is_ascii_alphabetic() {
        return scan_start_tag(src, start).map(|(tag, end)| (Token::StartTag(tag), end));
    }
    None
}

fn scan_start_tag(src: &str, start: usize) -> Option<(Tag, usize)> {
    let bytes = src.as_bytes();
    let name_end = scan_name(bytes, start + 1);
    let name = src[start + 1..name_end].to_ascii_lowercase();
    let mut attrs = Vec::new();
    let mut i = name_end;

    loop {
        i = skip_whitespace(bytes, i);
        match *bytes.get(i)? {
            b'>' => {
                let span = start..i + 1;
                return Some((Tag { name, attrs, span, self_closing: false }, i + 1));
            }
            b'/' if bytes.get(i + 1) == Some(&b'>') => {
                let span = start..i + 2;
                return Some((Tag { name, attrs, span, self_closing: true }, i + 2));
            }
            b'/' => i += 1,
            _ => {
                let attr_start = i;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && !matches!(bytes[i], b'=' | b'>' | b'/')
                {
                    i += 1;
                }
                if i == attr_start {
                    // Stray '=' with no name.
                    i += 1;
                    continue;
                }
                let attr_name = src[attr_start..i].to_ascii_lowercase();

                let after_name = skip_whitespace(bytes, i);
                if bytes.get(after_name) != Some(&b'=') {
                    attrs.push(Attr { name: attr_name, value: None, value_span: None });
                    continue;
                }
                i = skip_whitespace(bytes, after_name + 1);
                let value_span = match *bytes.get(i)? {
                    quote @ (b'"' | b'\'') => {
                        let close = find(bytes, i + 1, &[quote])?;
                        let span = i + 1..close;
                        i = close + 1;
                        span
                    }
                    _ => {
                        let value_start = i;
                        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                            i += 1;
                        }
                        value_start..i
                    }
                };
                attrs.push(Attr {
                    name: attr_name,
                    value: Some(src[value_span.clone()].to_string()),
                    value_span: Some(value_span),
                });
            }
        }
    }
}

fn scan_name(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'-' | b':' | b'_')) {
        i += 1;
    }
    i
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from > bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Position of the `</name` that closes a raw-text element, case-insensitive.
fn find_close_tag(bytes: &[u8], from: usize, name: &str) -> Option<usize> {
    let name = name.as_bytes();
    let mut i = from;
    while let Some(lt) = find(bytes, i, b"</") {
        let name_start = lt + 2;
        let name_end = name_start + name.len();
        if name_end <= bytes.len()
            && bytes[name_start..name_end].eq_ignore_ascii_case(name)
            && bytes
                .get(name_end)
                .is_none_or(|b| b.is_ascii_whitespace() || matches!(b, b'>' | b'/'))
        {
            return Some(lt);
        }
        i = name_start;
    }
    None
}
