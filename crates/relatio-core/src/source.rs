//! Source-document metadata detection from converted markdown.

use std::sync::LazyLock;

use regex::Regex;

use crate::normalize::parse_date;
use crate::reference::SourceDocument;

/// Lines scanned for the circular number and issue date.
const HEADER_LINES: usize = 15;
/// Lines scanned for the `Sub:` subject line.
const SUBJECT_LINES: usize = 50;

/// Circular numbers as printed in the header, most specific first.
static NUMBER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // HO/38/44/12(1)2026-MIRSD-TPD1
        r"[A-Z]+/\d+/\d+/[\d()]+[-A-Z\d]+",
        // SEBI/HO/MIRSD/2024/120
        r"SEBI/[A-Z]+/[A-Z\-]+/\d+/\d+",
        // SEBI/IMD/CIR No. 18/198647/2010
        r"SEBI/[A-Z]+/CIR\s+No\.\s+\d+/\d+/\d+",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("circular number pattern should compile"))
    .collect()
});

static ISSUE_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}",
    )
    .expect("ISSUE_DATE_RE should compile")
});

static SUBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\*\*)?\s*Sub(?:ject)?\s*:\s*-?\s*").expect("SUBJECT_RE should compile")
});

/// `Page **3** of **7**` footers.
static PAGE_OF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Page\s+\*\*(\d+)\*\*\s+of\s+\*\*(\d+)\*\*").expect("PAGE_OF_RE should compile")
});

static PAGE_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[PAGE\s+(\d+)\]").expect("PAGE_MARKER_RE should compile"));

/// Detect the circular's own identity from its converted text.
///
/// `reported_pages` is the converter's page count and wins when positive.
/// Missing fields fall back to: title = filename, number and date = `None`,
/// pages = 1.
pub fn detect_source_document(
    markdown: &str,
    filename: &str,
    reported_pages: Option<u32>,
    processing_timestamp: impl Into<String>,
) -> SourceDocument {
    let header: Vec<&str> = markdown.lines().take(HEADER_LINES).collect();

    let sebi_reference_number = header.iter().find_map(|line| {
        NUMBER_PATTERNS
            .iter()
            .find_map(|re| re.find(line))
            .map(|m| m.as_str().to_string())
    });

    let date_issued = header.iter().find_map(|line| {
        ISSUE_DATE_RE
            .find(line)
            .and_then(|m| parse_date(m.as_str()))
            .map(|d| d.format("%Y-%m-%d").to_string())
    });

    let circular_title = detect_subject(markdown).unwrap_or_else(|| filename.to_string());

    let total_pages = reported_pages
        .filter(|&p| p > 0)
        .or_else(|| count_pages(markdown))
        .unwrap_or(1);

    SourceDocument {
        filename: filename.to_string(),
        circular_title,
        sebi_reference_number,
        date_issued,
        total_pages,
        processing_timestamp: processing_timestamp.into(),
    }
}

fn detect_subject(markdown: &str) -> Option<String> {
    let line = markdown
        .lines()
        .take(SUBJECT_LINES)
        .map(str::trim)
        .find(|l| SUBJECT_RE.is_match(l))?;
    let title = SUBJECT_RE.replace(line, "").replace("**", "");
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Page count from `Page **N** of **M**` footers, else the highest `[PAGE N]` marker.
pub fn count_pages(markdown: &str) -> Option<u32> {
    if let Some(total) = PAGE_OF_RE
        .captures_iter(markdown)
        .last()
        .and_then(|c| c[2].parse().ok())
    {
        return Some(total);
    }
    PAGE_MARKER_RE
        .captures_iter(markdown)
        .filter_map(|c| c[1].parse::<u32>().ok())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CIRCULAR: &str = "\
[PAGE 1]
**CIRCULAR**
HO/38/44/12(1)2026-MIRSD-TPD1
January 09, 2026

To,
All Stock Brokers

**Sub: - Review of Framework for Stock Brokers**

1. SEBI vide circular SEBI/HO/MIRSD/2023/105 dated May 1, 2023 ...
[PAGE 2]
2. This circular supersedes ...
Page **2** of **3**
[PAGE 3]
";

    #[test]
    fn detects_header_fields() {
        let src = detect_source_document(CIRCULAR, "circular.pdf", None, "2026-01-21T06:30:00Z");
        assert_eq!(src.filename, "circular.pdf");
        assert_eq!(src.sebi_reference_number.as_deref(), Some("HO/38/44/12(1)2026-MIRSD-TPD1"));
        assert_eq!(src.date_issued.as_deref(), Some("2026-01-09"));
        assert_eq!(src.circular_title, "Review of Framework for Stock Brokers");
        assert_eq!(src.total_pages, 3);
        assert_eq!(src.processing_timestamp, "2026-01-21T06:30:00Z");
    }

    #[test]
    fn sebi_style_number() {
        let md = "SEBI/HO/MIRSD/2024/120\nSeptember 15, 2024\n";
        let src = detect_source_document(md, "x.md", None, "t");
        assert_eq!(src.sebi_reference_number.as_deref(), Some("SEBI/HO/MIRSD/2024/120"));
        assert_eq!(src.date_issued.as_deref(), Some("2024-09-15"));
    }

    #[test]
    fn fallbacks_when_nothing_detected() {
        let src = detect_source_document("plain text only", "notice.pdf", None, "t");
        assert_eq!(src.circular_title, "notice.pdf");
        assert_eq!(src.sebi_reference_number, None);
        assert_eq!(src.date_issued, None);
        assert_eq!(src.total_pages, 1);
    }

    #[test]
    fn reported_pages_win() {
        let src = detect_source_document(CIRCULAR, "circular.pdf", Some(9), "t");
        assert_eq!(src.total_pages, 9);
        let src = detect_source_document(CIRCULAR, "circular.pdf", Some(0), "t");
        assert_eq!(src.total_pages, 3);
    }

    #[test]
    fn page_markers_without_footer() {
        assert_eq!(count_pages("[PAGE 1]\na\n[PAGE 4]\nb\n[PAGE 2]"), Some(4));
        assert_eq!(count_pages("no markers"), None);
    }

    #[test]
    fn footer_beats_markers() {
        assert_eq!(count_pages("[PAGE 1]\nPage **1** of **12**\n[PAGE 2]"), Some(12));
    }

    #[test]
    fn number_outside_header_is_ignored() {
        let mut md = String::new();
        for _ in 0..HEADER_LINES {
            md.push_str("filler\n");
        }
        md.push_str("SEBI/HO/MIRSD/2024/120\n");
        let src = detect_source_document(&md, "x.md", None, "t");
        assert_eq!(src.sebi_reference_number, None);
    }
}
