//! Comment documents: the XML snapshots served by the host.
//!
//! A document is a flat root element whose children are either header
//! fields (`chatserver`, `chatid`, `mission`, `maxlimit`, `source`, `ds`)
//! or `<d p="...">` comment entries. The `p` attribute is kept verbatim for
//! re-emission alongside its parsed fields.

mod parse;
mod write;

pub use parse::{parse_comment_document, parse_roll_dates};
pub use write::write_document;

use crate::error::ScrapeError;

/// Header tags a reconstructed document keeps.
pub const ROOT_HEADERS: [&str; 6] = ["chatserver", "chatid", "mission", "maxlimit", "source", "ds"];

/// One header element of a comment document, preserved in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub tag: String,
    pub text: String,
}

/// One timed comment.
///
/// `raw` is the original `p` attribute string; the parsed fields exist for
/// comparisons and database export, the raw string for XML re-emission.
#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    /// Seconds into the video.
    pub offset: f64,
    pub mode: u32,
    pub font_size: u32,
    pub color: u32,
    /// Unix seconds the comment was posted.
    pub date: i64,
    /// 0 = normal (and protected), 1 = title, 2 = code.
    pub pool: u32,
    /// Sender hash; tourists are prefixed with `D`.
    pub user: String,
    pub id: u64,
    pub raw: String,
    pub text: String,
}

impl Comment {
    /// Parse a comma-separated `p` attribute. The original string is kept.
    pub fn parse(p: &str, text: String) -> Result<Comment, ScrapeError> {
        let mut fields = p.split(',');
        let mut next = || {
            fields
                .next()
                .ok_or_else(|| ScrapeError::Parse(format!("comment attributes too short: {p:?}")))
        };
        let bad = |what: &str| ScrapeError::Parse(format!("bad comment {what}: {p:?}"));

        let offset = next()?.parse::<f64>().map_err(|_| bad("offset"))?;
        let mode = next()?.parse::<u32>().map_err(|_| bad("mode"))?;
        let font_size = next()?.parse::<u32>().map_err(|_| bad("font size"))?;
        let color = next()?.parse::<u32>().map_err(|_| bad("color"))?;
        let date = next()?.parse::<i64>().map_err(|_| bad("date"))?;
        let pool = next()?.parse::<u32>().map_err(|_| bad("pool"))?;
        let user = next()?.to_string();
        let id = next()?.parse::<u64>().map_err(|_| bad("id"))?;

        Ok(Comment {
            offset,
            mode,
            font_size,
            color,
            date,
            pool,
            user,
            id,
            raw: p.to_string(),
            text,
        })
    }
}

/// One parsed snapshot: ordered headers plus ordered comment entries.
#[derive(Debug, Clone, Default)]
pub struct CommentDocument {
    pub headers: Vec<HeaderField>,
    pub comments: Vec<Comment>,
}

impl CommentDocument {
    /// Integer header field, or `default` when the tag is absent or empty.
    pub fn find_int(&self, tag: &str, default: i64) -> i64 {
        self.headers
            .iter()
            .find(|h| h.tag == tag)
            .and_then(|h| h.text.trim().parse::<i64>().ok())
            .unwrap_or(default)
    }

    /// Drop header fields outside the known set, preserving order.
    pub fn retain_known_headers(&mut self) {
        self.headers.retain(|h| ROOT_HEADERS.contains(&h.tag.as_str()));
    }
}

/// Rewrite code points forbidden by XML 1.0 into visible escapes so the
/// document parses. The host emits them verbatim in old pools.
pub fn escape_invalid_xml_chars(text: &str) -> String {
    if !text.chars().any(is_invalid_xml_char) {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_invalid_xml_char(c) {
            let code = c as u32;
            if code <= 0xFF {
                out.push_str(&format!("\\x{code:02X}"));
            } else {
                out.push_str(&format!("\\u{code:04X}"));
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn is_invalid_xml_char(c: char) -> bool {
    let code = c as u32;
    matches!(code, 0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0xFFFE | 0xFFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_raw_attribute_verbatim() {
        let p = "12.5,1,25,16777215,1440000000,0,Ab12Cd34,7654321";
        let c = Comment::parse(p, "hello".into()).unwrap();
        assert_eq!(c.raw, p);
        assert_eq!(c.offset, 12.5);
        assert_eq!(c.mode, 1);
        assert_eq!(c.font_size, 25);
        assert_eq!(c.color, 16_777_215);
        assert_eq!(c.date, 1_440_000_000);
        assert_eq!(c.pool, 0);
        assert_eq!(c.user, "Ab12Cd34");
        assert_eq!(c.id, 7_654_321);
        assert_eq!(c.text, "hello");
    }

    #[test]
    fn parse_rejects_short_or_malformed_attributes() {
        assert!(Comment::parse("1,2,3", String::new()).is_err());
        assert!(Comment::parse("x,1,25,0,0,0,u,1", String::new()).is_err());
    }

    #[test]
    fn find_int_defaults_when_absent() {
        let doc = CommentDocument {
            headers: vec![HeaderField {
                tag: "maxlimit".into(),
                text: "1500".into(),
            }],
            comments: vec![],
        };
        assert_eq!(doc.find_int("maxlimit", 1), 1500);
        assert_eq!(doc.find_int("ds", 0), 0);
    }

    #[test]
    fn escape_rewrites_forbidden_code_points() {
        assert_eq!(escape_invalid_xml_chars("plain"), "plain");
        assert_eq!(escape_invalid_xml_chars("a\u{0008}b"), "a\\x08b");
        assert_eq!(escape_invalid_xml_chars("tab\tok\nline"), "tab\tok\nline");
        assert_eq!(escape_invalid_xml_chars("\u{0000}"), "\\x00");
    }
}
