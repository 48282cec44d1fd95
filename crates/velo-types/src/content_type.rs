//! Closed content-type recognition table.
//!
//! Rewriting only touches resources whose type it can prove; anything
//! outside this table is left alone. Lookup is case-insensitive on the
//! extension and the MIME type, but the canonical forms returned here
//! are always lowercase.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A recognized resource content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Html,
    Css,
    Javascript,
    Text,
    Xml,
    Png,
    Gif,
    Jpeg,
    Webp,
    Ico,
    Pdf,
    Mp4,
    Webm,
    Swf,
}

/// One row of the recognition table: canonical extension, extra
/// extensions, and the MIME type.
struct TableRow {
    content_type: ContentType,
    mime: &'static str,
    extensions: &'static [&'static str],
}

const TABLE: &[TableRow] = &[
    TableRow {
        content_type: ContentType::Html,
        mime: "text/html",
        extensions: &["html", "htm"],
    },
    TableRow {
        content_type: ContentType::Css,
        mime: "text/css",
        extensions: &["css"],
    },
    TableRow {
        content_type: ContentType::Javascript,
        mime: "application/javascript",
        extensions: &["js"],
    },
    TableRow {
        content_type: ContentType::Text,
        mime: "text/plain",
        extensions: &["txt"],
    },
    TableRow {
        content_type: ContentType::Xml,
        mime: "application/xml",
        extensions: &["xml"],
    },
    TableRow {
        content_type: ContentType::Png,
        mime: "image/png",
        extensions: &["png"],
    },
    TableRow {
        content_type: ContentType::Gif,
        mime: "image/gif",
        extensions: &["gif"],
    },
    TableRow {
        content_type: ContentType::Jpeg,
        mime: "image/jpeg",
        extensions: &["jpg", "jpeg"],
    },
    TableRow {
        content_type: ContentType::Webp,
        mime: "image/webp",
        extensions: &["webp"],
    },
    TableRow {
        content_type: ContentType::Ico,
        mime: "image/x-icon",
        extensions: &["ico"],
    },
    TableRow {
        content_type: ContentType::Pdf,
        mime: "application/pdf",
        extensions: &["pdf"],
    },
    TableRow {
        content_type: ContentType::Mp4,
        mime: "video/mp4",
        extensions: &["mp4"],
    },
    TableRow {
        content_type: ContentType::Webm,
        mime: "video/webm",
        extensions: &["webm"],
    },
    TableRow {
        content_type: ContentType::Swf,
        mime: "application/x-shockwave-flash",
        extensions: &["swf"],
    },
];

impl ContentType {
    /// Looks up a content type by file extension (without the dot).
    ///
    /// Returns `None` for extensions outside the closed table.
    pub fn from_extension(ext: &str) -> Option<ContentType> {
        let lower = ext.to_ascii_lowercase();
        TABLE
            .iter()
            .find(|row| row.extensions.contains(&lower.as_str()))
            .map(|row| row.content_type)
    }

    /// Looks up a content type by MIME string.
    ///
    /// Any `;charset=` suffix is ignored; matching is case-insensitive.
    pub fn from_mime(mime: &str) -> Option<ContentType> {
        let bare = mime.split(';').next().unwrap_or("").trim();
        let lower = bare.to_ascii_lowercase();
        // text/javascript is a legacy alias still emitted by some origins.
        if lower == "text/javascript" {
            return Some(ContentType::Javascript);
        }
        TABLE
            .iter()
            .find(|row| row.mime == lower)
            .map(|row| row.content_type)
    }

    /// Returns the MIME type string.
    pub fn mime(&self) -> &'static str {
        self.row().mime
    }

    /// Returns the canonical (lowercase) file extension.
    pub fn extension(&self) -> &'static str {
        self.row().extensions[0]
    }

    /// Returns true for image types.
    pub fn is_image(&self) -> bool {
        matches!(
            self,
            ContentType::Png
                | ContentType::Gif
                | ContentType::Jpeg
                | ContentType::Webp
                | ContentType::Ico
        )
    }

    /// Returns true for types whose bodies are text.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            ContentType::Html
                | ContentType::Css
                | ContentType::Javascript
                | ContentType::Text
                | ContentType::Xml
        )
    }

    fn row(&self) -> &'static TableRow {
        TABLE
            .iter()
            .find(|row| row.content_type == *self)
            .unwrap_or(&TABLE[0])
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_lookup() {
        assert_eq!(ContentType::from_extension("png"), Some(ContentType::Png));
        assert_eq!(ContentType::from_extension("JPG"), Some(ContentType::Jpeg));
        assert_eq!(ContentType::from_extension("jpeg"), Some(ContentType::Jpeg));
        assert_eq!(ContentType::from_extension("htm"), Some(ContentType::Html));
        assert_eq!(ContentType::from_extension("exe"), None);
        assert_eq!(ContentType::from_extension(""), None);
    }

    #[test]
    fn mime_lookup_ignores_charset_and_case() {
        assert_eq!(
            ContentType::from_mime("Text/CSS; charset=utf-8"),
            Some(ContentType::Css)
        );
        assert_eq!(
            ContentType::from_mime("text/javascript"),
            Some(ContentType::Javascript)
        );
        assert_eq!(ContentType::from_mime("application/unknown"), None);
    }

    #[test]
    fn canonical_extension_is_lowercase() {
        assert_eq!(ContentType::Jpeg.extension(), "jpg");
        assert_eq!(ContentType::Javascript.extension(), "js");
    }

    #[test]
    fn classification() {
        assert!(ContentType::Webp.is_image());
        assert!(!ContentType::Webp.is_text());
        assert!(ContentType::Css.is_text());
        assert!(!ContentType::Mp4.is_text());
    }
}
