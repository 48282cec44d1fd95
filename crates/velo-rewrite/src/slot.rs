//! Resource slots: the binding between one URL occurrence in the
//! token stream and the rewrite that may replace it.

use crate::html::HtmlToken;
use std::ops::Range;
use tracing::warn;

/// What a completed rewrite wants done to the slot's token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderAction {
    /// Swap the referenced URL for the optimized output URL.
    ReplaceUrl(String),
    /// Overwrite the attribute value with the resource body itself
    /// (data URIs, small inlined CSS).
    InlineBody(String),
    /// Leave the token exactly as parsed.
    Unchanged,
}

/// Where in the token the slot's URL lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotTarget {
    /// An `src`/`href`-like attribute holding a URL.
    UrlAttribute { attr: String },
    /// An attribute whose value is replaced wholesale by the body.
    /// Produced by inlining filters (small-resource data URIs), which
    /// plug in through [`RenderAction::InlineBody`]; none of the
    /// built-in codecs inline yet.
    InlineAttribute { attr: String },
    /// A byte range inside a character-data token (a `url(...)`
    /// reference in an inline `<style>` body).
    CharacterData { range: Range<usize> },
}

/// One occurrence of a rewritable URL. Renders at most once; a
/// disabled slot never mutates its token.
#[derive(Debug, Clone)]
pub struct ResourceSlot {
    pub token_index: usize,
    pub target: SlotTarget,
    rendered: bool,
    disabled: bool,
}

impl ResourceSlot {
    pub fn url_attribute(token_index: usize, attr: &str) -> Self {
        Self {
            token_index,
            target: SlotTarget::UrlAttribute {
                attr: attr.to_string(),
            },
            rendered: false,
            disabled: false,
        }
    }

    pub fn inline_attribute(token_index: usize, attr: &str) -> Self {
        Self {
            token_index,
            target: SlotTarget::InlineAttribute {
                attr: attr.to_string(),
            },
            rendered: false,
            disabled: false,
        }
    }

    pub fn character_data(token_index: usize, range: Range<usize>) -> Self {
        Self {
            token_index,
            target: SlotTarget::CharacterData { range },
            rendered: false,
            disabled: false,
        }
    }

    /// Prevents any future render from touching the token. Set when
    /// the flush deadline elapses or a prerequisite fails.
    pub fn disable(&mut self) {
        self.disabled = true;
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Applies `action` to the slot's token. Idempotent: the first
    /// call wins, later calls are no-ops. Returns whether the token
    /// was mutated.
    pub fn render(&mut self, tokens: &mut [HtmlToken], action: &RenderAction) -> bool {
        if self.rendered || self.disabled {
            return false;
        }
        self.rendered = true;

        let replacement = match action {
            RenderAction::Unchanged => return false,
            RenderAction::ReplaceUrl(url) => url,
            RenderAction::InlineBody(body) => body,
        };

        let Some(token) = tokens.get_mut(self.token_index) else {
            warn!(index = self.token_index, "slot bound past end of token stream");
            return false;
        };
        match (&self.target, token) {
            (
                SlotTarget::UrlAttribute { attr } | SlotTarget::InlineAttribute { attr },
                HtmlToken::StartTag(tag),
            ) => tag.set_attr(attr, replacement),
            (SlotTarget::CharacterData { range }, HtmlToken::CharacterData { text, .. }) => {
                if range.end <= text.len() {
                    text.replace_range(range.clone(), replacement);
                    true
                } else {
                    warn!(?range, len = text.len(), "slot range past character data");
                    false
                }
            }
            _ => {
                warn!(index = self.token_index, "slot target does not match token");
                false
            }
        }
    }
}
