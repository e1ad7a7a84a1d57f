//! Stream framing for the XMPP wire format.
//!
//! An XMPP session is one long XML document. [`StanzaCodec`] cuts it into
//! frames: the opening `<stream:stream>` tag, each complete top-level
//! element, and the closing tag. Incomplete input is left in the buffer
//! until more bytes arrive; whitespace between stanzas (keepalives) is
//! discarded.

use std::borrow::Cow;
use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::element::Element;
use crate::error::{XmppError, XmppResult};

/// Default limit of one buffered stanza.
pub const DEFAULT_MAX_STANZA_SIZE: usize = 512 * 1024;

const STREAM_NS: &str = "http://etherx.jabber.org/streams";

/// A decoded unit of the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `<stream:stream ...>` with its attributes.
    StreamStart(HashMap<String, String>),
    /// A complete top-level element.
    Stanza(Element),
    /// `</stream:stream>`.
    StreamEnd,
}

/// Something to write to the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Opening stream header addressed to a domain.
    StreamHeader { to: String },
    Stanza(Element),
    /// Raw text, used for whitespace keepalives.
    Raw(String),
    StreamEnd,
}

#[derive(Debug)]
pub struct StanzaCodec {
    max_stanza_size: usize,
}

impl Default for StanzaCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl StanzaCodec {
    pub fn new() -> Self {
        Self {
            max_stanza_size: DEFAULT_MAX_STANZA_SIZE,
        }
    }

    pub fn with_max_stanza_size(max_stanza_size: usize) -> Self {
        Self { max_stanza_size }
    }

    /// Prepares for a stream restart after STARTTLS or SASL.
    ///
    /// The codec keeps no parse state between frames, so a restart only
    /// needs the caller to drop buffered bytes of the old stream.
    pub fn reset(&mut self, buf: &mut BytesMut) {
        buf.clear();
    }
}

/// Outcome of scanning the buffer.
enum Scan {
    /// Need more bytes.
    Incomplete,
    /// Skip this many bytes (declarations, whitespace, comments).
    Skip(usize),
    /// A frame ending at this offset.
    Frame(Frame, usize),
}

fn name_of(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

fn element_of(start: &BytesStart<'_>) -> XmppResult<Element> {
    let mut el = Element::new(name_of(start));
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmppError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?;
        el.set_attr(key, value.into_owned());
    }
    Ok(el)
}

fn is_stream_tag(name: &str) -> bool {
    name == "stream:stream" || name == "stream"
}

/// Syntax errors at the end of a slice mean "not all bytes arrived yet".
fn is_incomplete(err: &quick_xml::Error) -> bool {
    matches!(err, quick_xml::Error::Syntax(_))
}

fn scan(buf: &[u8]) -> XmppResult<Scan> {
    let mut reader = Reader::from_reader(buf);
    reader.config_mut().check_end_names = false;
    reader.config_mut().allow_unmatched_ends = true;

    let mut stack: Vec<Element> = Vec::new();
    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) if is_incomplete(&e) => return Ok(Scan::Incomplete),
            Err(e) => return Err(e.into()),
        };
        let pos = reader.buffer_position() as usize;

        match event {
            Event::Start(start) => {
                let el = element_of(&start)?;
                if stack.is_empty() && is_stream_tag(el.name()) {
                    let attrs = el.attrs().map(|(k, v)| (k.to_string(), v.to_string())).collect();
                    return Ok(Scan::Frame(Frame::StreamStart(attrs), pos));
                }
                stack.push(el);
            }
            Event::Empty(start) => {
                let el = element_of(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.push_child(el),
                    None => return Ok(Scan::Frame(Frame::Stanza(el), pos)),
                }
            }
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                match stack.pop() {
                    None if is_stream_tag(&name) => return Ok(Scan::Frame(Frame::StreamEnd, pos)),
                    None => return Err(XmppError::Xml(format!("unexpected </{name}>"))),
                    Some(el) => match stack.last_mut() {
                        Some(parent) => parent.push_child(el),
                        None => return Ok(Scan::Frame(Frame::Stanza(el), pos)),
                    },
                }
            }
            Event::Text(text) => {
                let text = text.unescape()?;
                match stack.last_mut() {
                    Some(parent) => {
                        if !text.trim().is_empty() {
                            parent.push_text(text.into_owned());
                        }
                    }
                    None if text.trim().is_empty() => {}
                    None => return Err(XmppError::Xml("text outside of a stanza".into())),
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    let raw = data.into_inner();
                    parent.push_text(String::from_utf8_lossy(&raw).into_owned());
                }
            }
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => {
                if stack.is_empty() {
                    return Ok(Scan::Skip(pos));
                }
            }
            Event::Eof => return Ok(Scan::Incomplete),
        }
    }
}

impl Decoder for StanzaCodec {
    type Item = Frame;
    type Error = XmppError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, XmppError> {
        loop {
            let whitespace = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            if whitespace > 0 {
                let _ = buf.split_to(whitespace);
            }
            if buf.is_empty() {
                return Ok(None);
            }
            match scan(buf)? {
                Scan::Skip(n) => {
                    let _ = buf.split_to(n);
                }
                Scan::Frame(frame, n) => {
                    let _ = buf.split_to(n);
                    trace!(?frame, "Decoded frame");
                    return Ok(Some(frame));
                }
                Scan::Incomplete => {
                    if buf.len() > self.max_stanza_size {
                        return Err(XmppError::StanzaTooLarge {
                            limit: self.max_stanza_size,
                        });
                    }
                    return Ok(None);
                }
            }
        }
    }
}

impl Encoder<Outgoing> for StanzaCodec {
    type Error = XmppError;

    fn encode(&mut self, item: Outgoing, dst: &mut BytesMut) -> Result<(), XmppError> {
        let text: Cow<'_, str> = match &item {
            Outgoing::StreamHeader { to } => Cow::Owned(stream_header(to)),
            Outgoing::Stanza(el) => Cow::Owned(el.to_string()),
            Outgoing::Raw(raw) => Cow::Borrowed(raw.as_str()),
            Outgoing::StreamEnd => Cow::Borrowed("</stream:stream>"),
        };
        trace!(out = %text, "Encoding");
        dst.reserve(text.len());
        dst.put_slice(text.as_bytes());
        Ok(())
    }
}

/// The opening header of a client-to-server stream.
pub fn stream_header(to: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream to='{}' version='1.0' xmlns='jabber:client' xmlns:stream='{STREAM_NS}'>",
        quick_xml::escape::escape(to)
    )
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    use super::*;

    fn decode_all(codec: &mut StanzaCodec, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_stream_start_and_stanzas() {
        let mut codec = StanzaCodec::new();
        let mut buf = BytesMut::from(
            "<?xml version='1.0'?><stream:stream from='example.com' id='s1' version='1.0' \
             xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams'>\
             <stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></stream:features> \n\
             <presence from='a@x'/>",
        );

        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames.len(), 3);
        match &frames[0] {
            Frame::StreamStart(attrs) => assert_eq!(attrs.get("id").map(String::as_str), Some("s1")),
            other => panic!("unexpected {other:?}"),
        }
        match &frames[1] {
            Frame::Stanza(el) => {
                assert_eq!(el.name(), "stream:features");
                assert!(el.get_child_ns("bind", "urn:ietf:params:xml:ns:xmpp-bind").is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&frames[2], Frame::Stanza(el) if el.name() == "presence"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_input_waits() {
        let mut codec = StanzaCodec::new();
        let mut buf = BytesMut::from("<message to='a@x'><body>hel");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(!buf.is_empty());

        buf.extend_from_slice(b"lo &amp; bye</body></mess");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"age>");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        match frame {
            Frame::Stanza(el) => assert_eq!(el.child_text("body").as_deref(), Some("hello & bye")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_keepalive_whitespace_and_stream_end() {
        let mut codec = StanzaCodec::new();
        let mut buf = BytesMut::from("  \n </stream:stream>");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::StreamEnd));

        let mut buf = BytesMut::from(" ");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_size_limit() {
        let mut codec = StanzaCodec::with_max_stanza_size(16);
        let mut buf = BytesMut::from("<message><body>way too long for the limit");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(XmppError::StanzaTooLarge { limit: 16 })
        ));
    }

    #[test]
    fn test_encode() {
        let mut codec = StanzaCodec::new();
        let mut dst = BytesMut::new();
        codec
            .encode(Outgoing::Stanza(Element::new("presence")), &mut dst)
            .unwrap();
        codec.encode(Outgoing::Raw(" ".into()), &mut dst).unwrap();
        assert_eq!(&dst[..], b"<presence/> ");

        let header = stream_header("example.com");
        assert!(header.contains("to='example.com'"));
        assert!(header.ends_with("xmlns:stream='http://etherx.jabber.org/streams'>"));
    }

    #[tokio::test]
    async fn test_framed_read_over_chunked_io() {
        let io = tokio_test::io::Builder::new()
            .read(b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams'><mess")
            .read(b"age type='chat'><body>hi</body></message>")
            .read(b"</stream:stream>")
            .build();
        let mut framed = FramedRead::new(io, StanzaCodec::new());

        assert!(matches!(framed.next().await, Some(Ok(Frame::StreamStart(_)))));
        match framed.next().await {
            Some(Ok(Frame::Stanza(el))) => assert_eq!(el.get_attr("type"), Some("chat")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(framed.next().await, Some(Ok(Frame::StreamEnd))));
        assert!(framed.next().await.is_none());
    }
}
