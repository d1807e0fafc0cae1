//! Parse host payloads: comment XML and roll-date JSON.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

use crate::error::ScrapeError;

use super::{Comment, CommentDocument, HeaderField};

fn xml_err(e: impl std::fmt::Display) -> ScrapeError {
    ScrapeError::Parse(format!("invalid XML: {e}"))
}

/// Parse one comment document.
///
/// The host signals a missing or dropped pool by replying with the literal
/// text `error` or an element-less body; both are [`ScrapeError::Content`].
pub fn parse_comment_document(xml: &str) -> Result<CommentDocument, ScrapeError> {
    // Text is kept untrimmed so comment bodies survive verbatim; the
    // whitespace between elements only ever reaches `root_text`.
    let mut reader = Reader::from_str(xml);

    let mut doc = CommentDocument::default();
    let mut root_seen = false;
    let mut root_text = String::new();
    let mut depth = 0usize;
    // (tag, p attribute) of the child element being read
    let mut current: Option<(String, Option<String>)> = None;
    let mut current_text = String::new();

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                depth += 1;
                match depth {
                    1 => root_seen = true,
                    2 => {
                        let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        let mut p = None;
                        for attr in e.attributes() {
                            let attr = attr.map_err(xml_err)?;
                            if attr.key.as_ref() == b"p" {
                                p = Some(attr.unescape_value().map_err(xml_err)?.into_owned());
                            }
                        }
                        current = Some((tag, p));
                        current_text.clear();
                    }
                    // The host never nests deeper; anything below is
                    // swallowed into the enclosing child's text.
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if depth == 1 {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    let mut p = None;
                    for attr in e.attributes() {
                        let attr = attr.map_err(xml_err)?;
                        if attr.key.as_ref() == b"p" {
                            p = Some(attr.unescape_value().map_err(xml_err)?.into_owned());
                        }
                    }
                    push_child(&mut doc, tag, p, String::new())?;
                } else if depth == 0 {
                    root_seen = true;
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(xml_err)?;
                match depth {
                    0 | 1 => root_text.push_str(&text),
                    _ => current_text.push_str(&text),
                }
            }
            Event::End(_) => {
                if depth == 2 {
                    if let Some((tag, p)) = current.take() {
                        push_child(&mut doc, tag, p, std::mem::take(&mut current_text))?;
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            // declarations, comments, processing instructions
            _ => {}
        }
    }

    if root_text.trim() == "error" {
        return Err(ScrapeError::Content);
    }
    if !root_seen || (doc.headers.is_empty() && doc.comments.is_empty()) {
        return Err(ScrapeError::Content);
    }
    Ok(doc)
}

fn push_child(
    doc: &mut CommentDocument,
    tag: String,
    p: Option<String>,
    text: String,
) -> Result<(), ScrapeError> {
    if tag == "d" {
        let p = p.ok_or_else(|| ScrapeError::Parse("comment entry without p attribute".into()))?;
        doc.comments.push(Comment::parse(&p, text)?);
    } else {
        doc.headers.push(HeaderField { tag, text });
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RollDateEntry {
    timestamp: i64,
}

/// Parse the roll-date checkpoint list: a JSON array of
/// `{"timestamp": N, ...}` objects, ascending.
pub fn parse_roll_dates(json: &str) -> Result<Vec<i64>, ScrapeError> {
    let entries: Vec<RollDateEntry> = serde_json::from_str(json)
        .map_err(|e| ScrapeError::Parse(format!("invalid roll date JSON: {e}")))?;
    Ok(entries.into_iter().map(|e| e.timestamp).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?><i>"#,
        "<chatserver>chat.example.com</chatserver><chatid>1234</chatid>",
        "<mission>0</mission><maxlimit>1500</maxlimit><source>k-v</source><ds>930000000</ds>",
        r#"<d p="1.5,1,25,16777215,1440000000,0,aaaa,10">first</d>"#,
        r#"<d p="3.0,1,25,16777215,1440000100,0,bbbb,20">second &amp; third</d>"#,
        "</i>",
    );

    #[test]
    fn parses_headers_and_comments_in_order() {
        let doc = parse_comment_document(SAMPLE).unwrap();
        assert_eq!(doc.headers.len(), 6);
        assert_eq!(doc.headers[0].tag, "chatserver");
        assert_eq!(doc.headers[0].text, "chat.example.com");
        assert_eq!(doc.find_int("maxlimit", 1), 1500);
        assert_eq!(doc.find_int("ds", 0), 930_000_000);
        assert_eq!(doc.comments.len(), 2);
        assert_eq!(doc.comments[0].id, 10);
        assert_eq!(doc.comments[1].text, "second & third");
    }

    #[test]
    fn self_closing_comment_entries_parse() {
        let doc =
            parse_comment_document(r#"<i><d p="0,0,0,0,5,0,u,7"/></i>"#).unwrap();
        assert_eq!(doc.comments.len(), 1);
        assert_eq!(doc.comments[0].id, 7);
        assert!(doc.comments[0].text.is_empty());
    }

    #[test]
    fn error_sentinel_is_content_error() {
        assert!(matches!(
            parse_comment_document("<i>error</i>"),
            Err(ScrapeError::Content)
        ));
        assert!(matches!(
            parse_comment_document(""),
            Err(ScrapeError::Content)
        ));
    }

    #[test]
    fn malformed_xml_is_parse_error() {
        assert!(matches!(
            parse_comment_document("<i><d p=1,2,3></i>"),
            Err(ScrapeError::Parse(_))
        ));
    }

    #[test]
    fn roll_dates_parse_in_order() {
        let json = r#"[{"timestamp":1404100000,"new":100},{"timestamp":1404986640,"new":42}]"#;
        assert_eq!(parse_roll_dates(json).unwrap(), vec![1_404_100_000, 1_404_986_640]);
        assert_eq!(parse_roll_dates("[]").unwrap(), Vec::<i64>::new());
        assert!(parse_roll_dates("not json").is_err());
    }
}
