//! HTML token model and a minimal scanner.
//!
//! The driver operates on a token stream; in production that stream
//! comes from the hosting server's parser. This scanner is a small
//! stand-in that recognizes exactly what the rewriter needs: start and
//! end tags with attributes, text runs, comments, and the raw bodies
//! of `<script>` and `<style>` elements. Untouched tokens serialize
//! back to their original bytes.

/// Quoting style of an attribute value, preserved through rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    Double,
    Single,
    Bare,
}

impl Quote {
    fn delim(self) -> &'static str {
        match self {
            Quote::Double => "\"",
            Quote::Single => "'",
            Quote::Bare => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
    pub quote: Quote,
}

/// A start tag with its attributes. Serializes from the original bytes
/// until an attribute is mutated, after which it is rebuilt from the
/// parsed structure (original quote styles kept, spacing normalized).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub self_closing: bool,
    raw: String,
    modified: bool,
}

impl StartTag {
    /// Looks up an attribute value; names compare case-insensitively.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .and_then(|a| a.value.as_deref())
    }

    /// Replaces the value of an existing attribute. Marks the tag
    /// modified so it re-serializes from structure.
    pub fn set_attr(&mut self, name: &str, value: &str) -> bool {
        for attr in &mut self.attributes {
            if attr.name.eq_ignore_ascii_case(name) {
                attr.value = Some(value.to_string());
                if attr.quote == Quote::Bare {
                    attr.quote = Quote::Double;
                }
                self.modified = true;
                return true;
            }
        }
        false
    }

    fn write(&self, out: &mut String) {
        if !self.modified {
            out.push_str(&self.raw);
            return;
        }
        out.push('<');
        out.push_str(&self.name);
        for attr in &self.attributes {
            out.push(' ');
            out.push_str(&attr.name);
            if let Some(value) = &attr.value {
                out.push('=');
                out.push_str(attr.quote.delim());
                out.push_str(value);
                out.push_str(attr.quote.delim());
            }
        }
        if self.self_closing {
            out.push('/');
        }
        out.push('>');
    }
}

/// One token of the document stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlToken {
    StartTag(StartTag),
    EndTag { raw: String },
    Text(String),
    /// Raw body of a `<script>` or `<style>` element.
    CharacterData { element: String, text: String },
    /// Comment, including delimiters.
    Comment(String),
    /// Doctype, processing instructions, and malformed markup passed
    /// through untouched.
    Raw(String),
}

impl HtmlToken {
    pub fn write(&self, out: &mut String) {
        match self {
            HtmlToken::StartTag(tag) => tag.write(out),
            HtmlToken::EndTag { raw }
            | HtmlToken::Comment(raw)
            | HtmlToken::Raw(raw)
            | HtmlToken::Text(raw) => out.push_str(raw),
            HtmlToken::CharacterData { text, .. } => out.push_str(text),
        }
    }
}

/// Serializes a token sequence back to markup.
pub fn write_tokens(tokens: &[HtmlToken]) -> String {
    let mut out = String::new();
    for token in tokens {
        token.write(&mut out);
    }
    out
}

/// Scans `input` into tokens. Never fails: anything unrecognized is
/// emitted as a `Raw` token so serialization stays lossless.
pub fn scan_html(input: &str) -> Vec<HtmlToken> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'<' {
            let end = input[pos..]
                .find('<')
                .map(|off| pos + off)
                .unwrap_or(bytes.len());
            tokens.push(HtmlToken::Text(input[pos..end].to_string()));
            pos = end;
            continue;
        }

        if input[pos..].starts_with("<!--") {
            let end = input[pos + 4..]
                .find("-->")
                .map(|off| pos + 4 + off + 3)
                .unwrap_or(bytes.len());
            tokens.push(HtmlToken::Comment(input[pos..end].to_string()));
            pos = end;
        } else if input[pos..].starts_with("<!") || input[pos..].starts_with("<?") {
            let end = input[pos..]
                .find('>')
                .map(|off| pos + off + 1)
                .unwrap_or(bytes.len());
            tokens.push(HtmlToken::Raw(input[pos..end].to_string()));
            pos = end;
        } else if input[pos..].starts_with("</") {
            match input[pos..].find('>') {
                Some(off) => {
                    let end = pos + off + 1;
                    tokens.push(HtmlToken::EndTag {
                        raw: input[pos..end].to_string(),
                    });
                    pos = end;
                }
                None => {
                    tokens.push(HtmlToken::Raw(input[pos..].to_string()));
                    pos = bytes.len();
                }
            }
        } else if bytes
            .get(pos + 1)
            .is_some_and(|b| b.is_ascii_alphabetic())
        {
            match scan_start_tag(input, pos) {
                Some((tag, end)) => {
                    let raw_text_element = !tag.self_closing
                        && (tag.name.eq_ignore_ascii_case("script")
                            || tag.name.eq_ignore_ascii_case("style"));
                    let element = tag.name.to_ascii_lowercase();
                    tokens.push(HtmlToken::StartTag(tag));
                    pos = end;
                    if raw_text_element {
                        pos = scan_character_data(input, pos, &element, &mut tokens);
                    }
                }
                None => {
                    tokens.push(HtmlToken::Raw(input[pos..].to_string()));
                    pos = bytes.len();
                }
            }
        } else {
            // Lone '<' that opens nothing.
            tokens.push(HtmlToken::Text("<".to_string()));
            pos += 1;
        }
    }

    tokens
}

/// Consumes the raw body of a script/style element up to (not
/// including) its end tag.
fn scan_character_data(
    input: &str,
    pos: usize,
    element: &str,
    tokens: &mut Vec<HtmlToken>,
) -> usize {
    let close = format!("</{element}");
    let lower = input[pos..].to_ascii_lowercase();
    let end = lower.find(&close).map(|off| pos + off).unwrap_or(input.len());
    if end > pos {
        tokens.push(HtmlToken::CharacterData {
            element: element.to_string(),
            text: input[pos..end].to_string(),
        });
    }
    end
}

/// Parses one start tag beginning at `pos` (which points at `<`).
/// Returns the tag and the index just past its `>`.
fn scan_start_tag(input: &str, pos: usize) -> Option<(StartTag, usize)> {
    let bytes = input.as_bytes();
    let mut i = pos + 1;

    let name_start = i;
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' && bytes[i] != b'/'
    {
        i += 1;
    }
    let name = input[name_start..i].to_string();

    let mut attributes = Vec::new();
    let mut self_closing = false;
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            return None;
        }
        match bytes[i] {
            b'>' => {
                i += 1;
                break;
            }
            b'/' => {
                self_closing = true;
                i += 1;
            }
            _ => {
                let (attr, next) = scan_attribute(input, i)?;
                attributes.push(attr);
                i = next;
            }
        }
    }

    Some((
        StartTag {
            name,
            attributes,
            self_closing,
            raw: input[pos..i].to_string(),
            modified: false,
        },
        i,
    ))
}

fn scan_attribute(input: &str, pos: usize) -> Option<(Attribute, usize)> {
    let bytes = input.as_bytes();
    let mut i = pos;

    let name_start = i;
    while i < bytes.len()
        && !bytes[i].is_ascii_whitespace()
        && bytes[i] != b'='
        && bytes[i] != b'>'
        && bytes[i] != b'/'
    {
        i += 1;
    }
    if i == name_start {
        return None;
    }
    let name = input[name_start..i].to_string();

    let mut j = i;
    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
        j += 1;
    }
    if j >= bytes.len() || bytes[j] != b'=' {
        // Boolean attribute.
        return Some((
            Attribute {
                name,
                value: None,
                quote: Quote::Bare,
            },
            i,
        ));
    }
    j += 1;
    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
        j += 1;
    }
    if j >= bytes.len() {
        return None;
    }

    match bytes[j] {
        q @ (b'"' | b'\'') => {
            let value_start = j + 1;
            let end = input[value_start..].find(q as char)? + value_start;
            Some((
                Attribute {
                    name,
                    value: Some(input[value_start..end].to_string()),
                    quote: if q == b'"' { Quote::Double } else { Quote::Single },
                },
                end + 1,
            ))
        }
        _ => {
            let value_start = j;
            while j < bytes.len() && !bytes[j].is_ascii_whitespace() && bytes[j] != b'>' {
                j += 1;
            }
            Some((
                Attribute {
                    name,
                    value: Some(input[value_start..j].to_string()),
                    quote: Quote::Bare,
                },
                j,
            ))
        }
    }
}
