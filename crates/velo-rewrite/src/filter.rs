//! The closed filter enumeration and codec seam.
//!
//! Filters are selected by a short identifier that also appears in the
//! encoded output URL. The codecs shipped here are deliberately simple
//! stand-ins behind the [`RewriteFilter`] seam; production codecs
//! (libjpeg, a real JS minifier) plug in behind the same trait.

use crate::error::RewriteError;
use bytes::Bytes;
use std::fmt;
use velo_types::ContentType;

/// Closed enumeration of rewrite filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterId {
    /// `ic` - image recompression.
    ImageCompress,
    /// `cf` - CSS rewriting (nested references plus minification).
    CssRewrite,
    /// `jm` - JavaScript minification.
    JsMinify,
    /// `ce` - cache extension (identity bytes, content-addressed URL).
    CacheExtend,
}

impl FilterId {
    /// The short identifier used in encoded URLs.
    pub fn code(&self) -> &'static str {
        match self {
            FilterId::ImageCompress => "ic",
            FilterId::CssRewrite => "cf",
            FilterId::JsMinify => "jm",
            FilterId::CacheExtend => "ce",
        }
    }

    /// Parses a short identifier.
    pub fn from_code(code: &str) -> Option<FilterId> {
        match code {
            "ic" => Some(FilterId::ImageCompress),
            "cf" => Some(FilterId::CssRewrite),
            "jm" => Some(FilterId::JsMinify),
            "ce" => Some(FilterId::CacheExtend),
            _ => None,
        }
    }

    /// All filters, in identifier order.
    pub fn all() -> &'static [FilterId] {
        &[
            FilterId::ImageCompress,
            FilterId::CssRewrite,
            FilterId::JsMinify,
            FilterId::CacheExtend,
        ]
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Result of a successful optimization.
#[derive(Debug, Clone)]
pub struct Optimized {
    pub bytes: Bytes,
    pub content_type: ContentType,
}

/// Codec capability interface.
///
/// `optimize` must be deterministic: equal inputs produce byte-equal
/// outputs, which is what lets equal fingerprints share artifacts.
pub trait RewriteFilter: Send + Sync {
    /// The filter this codec implements.
    fn id(&self) -> FilterId;

    /// Optimizes `input`, or refuses with
    /// [`RewriteError::CodecRefused`] when the output would not be an
    /// improvement or the input is not of the expected type.
    fn optimize(
        &self,
        input: &[u8],
        content_type: ContentType,
    ) -> Result<Optimized, RewriteError>;
}

/// Image recompression stand-in.
///
/// Strips trailing zero padding, refusing when that yields no gain.
/// The point is the seam and the grow-refusal contract, not the codec.
pub struct ImageOptimizer;

impl RewriteFilter for ImageOptimizer {
    fn id(&self) -> FilterId {
        FilterId::ImageCompress
    }

    fn optimize(
        &self,
        input: &[u8],
        content_type: ContentType,
    ) -> Result<Optimized, RewriteError> {
        if !content_type.is_image() {
            return Err(RewriteError::CodecRefused(format!(
                "not an image: {content_type}"
            )));
        }
        let trimmed = input
            .iter()
            .rposition(|&b| b != 0)
            .map(|last| &input[..=last])
            .unwrap_or(&[]);
        if trimmed.len() >= input.len() {
            return Err(RewriteError::CodecRefused(
                "recompression would not shrink".to_string(),
            ));
        }
        Ok(Optimized {
            bytes: Bytes::copy_from_slice(trimmed),
            content_type,
        })
    }
}

/// CSS minifier: drops comments and collapses whitespace outside
/// string literals.
pub struct CssMinifier;

impl RewriteFilter for CssMinifier {
    fn id(&self) -> FilterId {
        FilterId::CssRewrite
    }

    fn optimize(
        &self,
        input: &[u8],
        content_type: ContentType,
    ) -> Result<Optimized, RewriteError> {
        if content_type != ContentType::Css {
            return Err(RewriteError::CodecRefused(format!(
                "not css: {content_type}"
            )));
        }
        let text = std::str::from_utf8(input)
            .map_err(|_| RewriteError::CodecRefused("css is not UTF-8".to_string()))?;
        let minified = minify_css(text);
        if minified.len() >= input.len() {
            return Err(RewriteError::CodecRefused(
                "minification would not shrink".to_string(),
            ));
        }
        Ok(Optimized {
            bytes: Bytes::from(minified),
            content_type,
        })
    }
}

/// JavaScript minifier: drops comments and collapses blank runs,
/// conservatively leaving string literals intact.
pub struct JsMinifier;

impl RewriteFilter for JsMinifier {
    fn id(&self) -> FilterId {
        FilterId::JsMinify
    }

    fn optimize(
        &self,
        input: &[u8],
        content_type: ContentType,
    ) -> Result<Optimized, RewriteError> {
        if content_type != ContentType::Javascript {
            return Err(RewriteError::CodecRefused(format!(
                "not javascript: {content_type}"
            )));
        }
        let text = std::str::from_utf8(input)
            .map_err(|_| RewriteError::CodecRefused("js is not UTF-8".to_string()))?;
        let minified = minify_js(text);
        if minified.len() >= input.len() {
            return Err(RewriteError::CodecRefused(
                "minification would not shrink".to_string(),
            ));
        }
        Ok(Optimized {
            bytes: Bytes::from(minified),
            content_type,
        })
    }
}

/// Cache extender: identity bytes under a content-addressed URL. Never
/// refuses; the win is the immutable cache lifetime, not the bytes.
pub struct CacheExtender;

impl RewriteFilter for CacheExtender {
    fn id(&self) -> FilterId {
        FilterId::CacheExtend
    }

    fn optimize(
        &self,
        input: &[u8],
        content_type: ContentType,
    ) -> Result<Optimized, RewriteError> {
        Ok(Optimized {
            bytes: Bytes::copy_from_slice(input),
            content_type,
        })
    }
}

/// Discovers `url(...)` references in a CSS body.
///
/// Returns (byte range of the URL text, unquoted URL) pairs in
/// document order. Data URIs and empty references are skipped.
pub fn find_css_urls(css: &str) -> Vec<(std::ops::Range<usize>, String)> {
    let bytes = css.as_bytes();
    let mut refs = Vec::new();
    let mut i = 0;
    while let Some(at) = css[i..].find("url(") {
        let open = i + at + 4;
        let Some(close_rel) = css[open..].find(')') else {
            break;
        };
        let close = open + close_rel;
        let mut start = open;
        let mut end = close;
        // Trim whitespace and one layer of quotes.
        while start < end && bytes[start].is_ascii_whitespace() {
            start += 1;
        }
        while end > start && bytes[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        if end > start && (bytes[start] == b'"' || bytes[start] == b'\'') && bytes[end - 1] == bytes[start] {
            start += 1;
            end -= 1;
        }
        let url = &css[start..end];
        if !url.is_empty() && !url.starts_with("data:") {
            refs.push((start..end, url.to_string()));
        }
        i = close + 1;
    }
    refs
}

fn minify_css(text: &str) -> String {
    let without_comments = strip_block_comments(text);
    collapse_whitespace(&without_comments)
}

fn minify_js(text: &str) -> String {
    let without_block = strip_block_comments(text);
    let mut out = String::with_capacity(without_block.len());
    for line in without_block.lines() {
        let line = match find_line_comment(line) {
            Some(at) => &line[..at],
            None => line,
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(trimmed);
    }
    out
}

/// Byte offset of a `//` comment outside string literals, if any.
fn find_line_comment(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut in_string: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        match in_string {
            Some(quote) => {
                if bytes[i] == b'\\' {
                    i += 1;
                } else if bytes[i] == quote {
                    in_string = None;
                }
            }
            None => match bytes[i] {
                b'"' | b'\'' | b'`' => in_string = Some(bytes[i]),
                b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => return Some(i),
                _ => {}
            },
        }
        i += 1;
    }
    None
}

fn strip_block_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string: Option<char> = None;
    let mut chars = text.char_indices().peekable();
    // Single pass; string literals shield comment markers.
    let mut skip_until: Option<usize> = None;
    while let Some((i, c)) = chars.next() {
        if let Some(until) = skip_until {
            if i < until {
                continue;
            }
            skip_until = None;
        }
        match in_string {
            Some(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == quote {
                    in_string = None;
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    in_string = Some(c);
                    out.push(c);
                } else if c == '/' && matches!(chars.peek(), Some((_, '*'))) {
                    match text[i..].find("*/") {
                        Some(end_rel) => {
                            skip_until = Some(i + end_rel + 2);
                        }
                        None => break,
                    }
                } else {
                    out.push(c);
                }
            }
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string: Option<char> = None;
    let mut pending_space = false;
    for c in text.chars() {
        match in_string {
            Some(quote) => {
                out.push(c);
                if c == quote {
                    in_string = None;
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    if pending_space && !out.is_empty() {
                        out.push(' ');
                    }
                    pending_space = false;
                    in_string = Some(c);
                    out.push(c);
                } else if c.is_whitespace() {
                    pending_space = true;
                } else {
                    // No space needed around punctuation that CSS
                    // treats as a separator of its own.
                    if pending_space
                        && !out.is_empty()
                        && !matches!(out.chars().last(), Some('{' | '}' | ';' | ':' | ','))
                        && !matches!(c, '{' | '}' | ';' | ':' | ',')
                    {
                        out.push(' ');
                    }
                    pending_space = false;
                    out.push(c);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn filter_id_codes_roundtrip() {
        for id in FilterId::all() {
            assert_eq!(FilterId::from_code(id.code()), Some(*id));
        }
        assert_eq!(FilterId::from_code("zz"), None);
    }

    #[test]
    fn image_optimizer_shrinks_or_refuses() {
        let optimizer = ImageOptimizer;
        let padded = [b"PNGDATA".as_slice(), &[0u8; 16]].concat();
        let out = optimizer.optimize(&padded, ContentType::Png).unwrap();
        assert_eq!(out.bytes.as_ref(), b"PNGDATA");

        // Already minimal: refusal, not growth.
        assert!(matches!(
            optimizer.optimize(b"PNGDATA", ContentType::Png),
            Err(RewriteError::CodecRefused(_))
        ));
        // Content-type mismatch.
        assert!(optimizer.optimize(b"body{}", ContentType::Css).is_err());
    }

    #[test]
    fn image_optimizer_is_deterministic() {
        let optimizer = ImageOptimizer;
        let input = [b"IMG".as_slice(), &[0u8; 4]].concat();
        let a = optimizer.optimize(&input, ContentType::Jpeg).unwrap();
        let b = optimizer.optimize(&input, ContentType::Jpeg).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn css_minifier_strips_comments_and_space() {
        let css = "/* banner */\nbody {\n  color : red ;\n}\n";
        let out = CssMinifier.optimize(css.as_bytes(), ContentType::Css).unwrap();
        assert_eq!(out.bytes.as_ref(), b"body{color:red;}");
    }

    #[test]
    fn css_minifier_preserves_strings() {
        let css = "a::after { content : \"  spaced  \" ; }";
        let out = CssMinifier.optimize(css.as_bytes(), ContentType::Css).unwrap();
        let text = std::str::from_utf8(&out.bytes).unwrap();
        assert!(text.contains("\"  spaced  \""));
    }

    #[test]
    fn js_minifier_strips_comments() {
        let js = "// header\nvar a = 1; /* note */\nvar b = \"http://x//y\";\n";
        let out = JsMinifier.optimize(js.as_bytes(), ContentType::Javascript).unwrap();
        let text = std::str::from_utf8(&out.bytes).unwrap();
        assert!(!text.contains("header"));
        assert!(!text.contains("note"));
        // The // inside a string literal is not a comment.
        assert!(text.contains("http://x//y"));
    }

    #[test]
    fn cache_extender_is_identity() {
        let out = CacheExtender.optimize(b"anything", ContentType::Png).unwrap();
        assert_eq!(out.bytes.as_ref(), b"anything");
    }

    #[test]
    fn css_url_discovery() {
        let css = "a{background:url(img/a.png)} b{background: url( \"b.png\" )} \
                   c{background:url(data:image/png;base64,xyz)}";
        let refs = find_css_urls(css);
        let urls: Vec<&str> = refs.iter().map(|(_, u)| u.as_str()).collect();
        assert_eq!(urls, vec!["img/a.png", "b.png"]);
        // Ranges index the exact URL text.
        let (range, _) = &refs[0];
        assert_eq!(&css[range.clone()], "img/a.png");
    }
}
