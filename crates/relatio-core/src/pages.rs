//! Page lookup over converted text, used to back-fill references that came without pages.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::reference::CanonicalReference;

/// Width of a pseudo page when the text carries no page markers.
pub const PSEUDO_PAGE_BYTES: usize = 3000;

/// Only this many leading characters of a snippet are searched for.
const SNIPPET_CHARS: usize = 50;

/// `[PAGE 3]` anywhere, or `Page 3` at the start of a line.
static PAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\[PAGE\s+(\d+)\]|(?:^|\n|\x0c)\s*Page\s+(\d+))")
        .expect("PAGE_RE should compile")
});

/// Byte offset → page number anchors, ascending by offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMap {
    anchors: Vec<(usize, u32)>,
}

impl PageMap {
    pub fn build(text: &str) -> Self {
        let anchors: Vec<(usize, u32)> = PAGE_RE
            .captures_iter(text)
            .filter_map(|c| {
                let start = c.get(0)?.start();
                let page = c.get(1).or_else(|| c.get(2))?.as_str().parse().ok()?;
                Some((start, page))
            })
            .collect();

        if !anchors.is_empty() {
            return Self { anchors };
        }

        let pseudo = (0..=text.len() / PSEUDO_PAGE_BYTES)
            .map(|i| (i * PSEUDO_PAGE_BYTES, i as u32 + 1))
            .collect();
        Self { anchors: pseudo }
    }

    /// Page containing `offset`; text before the first marker is page 1.
    pub fn page_at(&self, offset: usize) -> u32 {
        self.anchors
            .iter()
            .take_while(|(start, _)| *start <= offset)
            .last()
            .map_or(1, |&(_, page)| page)
    }

    /// Page on which `snippet` first occurs in `text`.
    pub fn locate(&self, text: &str, snippet: &str) -> Option<u32> {
        let snippet = snippet.trim();
        if snippet.is_empty() {
            return None;
        }
        let head = match snippet.char_indices().nth(SNIPPET_CHARS) {
            Some((end, _)) => &snippet[..end],
            None => snippet,
        };
        text.find(head).map(|offset| self.page_at(offset))
    }
}

/// Fill empty `page_numbers` from where the citation (else context, else title)
/// appears in the source text. Returns how many references were filled.
pub fn backfill(references: &mut [CanonicalReference], text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let map = PageMap::build(text);
    let mut filled = 0;
    for r in references.iter_mut().filter(|r| r.reference.page_numbers.is_empty()) {
        let reference = &r.reference;
        let snippet = [
            reference.exact_citation_text.as_str(),
            reference.context_paragraph.as_str(),
            reference.referenced_document_title.as_str(),
        ]
        .into_iter()
        .find(|s| !s.trim().is_empty());

        if let Some(page) = snippet.and_then(|s| map.locate(text, s)) {
            r.reference.page_numbers = vec![page];
            filled += 1;
        }
    }
    debug!(filled, "page back-fill complete");
    filled
}
