//! Serialize documents back into the host's XML dialect.

use std::io::{self, Write};

use quick_xml::escape::escape;

use super::{Comment, HeaderField};

/// Write a document: XML declaration, root, header fields in order, then
/// one `<d>` line per comment with its original `p` attribute.
pub fn write_document<'a, W, H, I>(w: &mut W, headers: H, comments: I) -> io::Result<()>
where
    W: Write,
    H: IntoIterator<Item = &'a HeaderField>,
    I: IntoIterator<Item = &'a Comment>,
{
    w.write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n")?;
    w.write_all(b"<i>\n")?;
    for h in headers {
        writeln!(w, "\t<{tag}>{text}</{tag}>", tag = h.tag, text = escape(&h.text))?;
    }
    for c in comments {
        writeln!(w, "\t<d p=\"{}\">{}</d>", c.raw, escape(&c.text))?;
    }
    w.write_all(b"</i>")?;
    Ok(())
}
