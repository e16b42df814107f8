use std::{io::Write, path::Path};

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use super::attachment::{Attachment, AttachmentType};
use super::session::{SessionAggregates, SessionUpdate};
use super::types::{Event, Transaction};

/// Ways that parsing an envelope from bytes can fail.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The input ended before the frame was complete.
    #[error("unexpected end of file")]
    UnexpectedEof,
    /// The input did not start with an envelope header.
    #[error("missing envelope header")]
    MissingHeader,
    /// An item had no header line.
    #[error("missing item header")]
    MissingItemHeader,
    /// A header or payload was not newline terminated.
    #[error("missing newline after header or payload")]
    MissingNewline,
    /// The envelope header was not valid JSON.
    #[error("invalid envelope header")]
    InvalidHeader(#[source] serde_json::Error),
    /// An item header was not valid JSON.
    #[error("invalid item header")]
    InvalidItemHeader(#[source] serde_json::Error),
    /// An item payload did not deserialize as its declared type.
    #[error("invalid item payload")]
    InvalidItemPayload(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    event_id: Option<Uuid>,
}

/// An envelope item header.
///
/// The item type is kept as a plain string so that unrecognized types can be
/// carried through instead of failing the parse.
#[derive(Clone, Debug, Deserialize)]
struct EnvelopeItemHeader {
    r#type: String,
    length: Option<usize>,
    // Fields below apply only to the attachment item type.
    filename: Option<String>,
    content_type: Option<String>,
    attachment_type: Option<String>,
}

/// One item inside an [`Envelope`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
#[allow(clippy::large_enum_variant)]
pub enum EnvelopeItem {
    /// An error report.
    Event(Event<'static>),
    /// A release health session update.
    SessionUpdate(SessionUpdate<'static>),
    /// A batch of aggregated release health sessions.
    SessionAggregates(SessionAggregates<'static>),
    /// A finished trace segment.
    Transaction(Transaction<'static>),
    /// A file attached to an event.
    Attachment(Attachment),
    /// An item of a type this client does not know about.
    ///
    /// The payload is preserved byte-for-byte so forwarding does not lose
    /// data produced by newer peers.
    Unknown {
        /// The wire name of the item type.
        ty: String,
        /// The raw item payload.
        payload: Vec<u8>,
    },
    /// Stands in for the opaque bytes of a raw envelope when filtering.
    Raw,
}

impl From<Event<'static>> for EnvelopeItem {
    fn from(event: Event<'static>) -> Self {
        EnvelopeItem::Event(event)
    }
}

impl From<SessionUpdate<'static>> for EnvelopeItem {
    fn from(session: SessionUpdate<'static>) -> Self {
        EnvelopeItem::SessionUpdate(session)
    }
}

impl From<SessionAggregates<'static>> for EnvelopeItem {
    fn from(aggregates: SessionAggregates<'static>) -> Self {
        EnvelopeItem::SessionAggregates(aggregates)
    }
}

impl From<Transaction<'static>> for EnvelopeItem {
    fn from(transaction: Transaction<'static>) -> Self {
        EnvelopeItem::Transaction(transaction)
    }
}

impl From<Attachment> for EnvelopeItem {
    fn from(attachment: Attachment) -> Self {
        EnvelopeItem::Attachment(attachment)
    }
}

/// Iterator returned by [`Envelope::items`].
#[derive(Clone)]
pub struct EnvelopeItemIter<'s> {
    inner: std::slice::Iter<'s, EnvelopeItem>,
}

impl<'s> Iterator for EnvelopeItemIter<'s> {
    type Item = &'s EnvelopeItem;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Envelope contents, either parsed items or an opaque preframed blob.
#[derive(Debug, Clone, PartialEq)]
enum Items {
    EnvelopeItems(Vec<EnvelopeItem>),
    Raw(Vec<u8>),
}

impl Default for Items {
    fn default() -> Self {
        Self::EnvelopeItems(Default::default())
    }
}

impl Items {
    fn is_empty(&self) -> bool {
        match self {
            Items::EnvelopeItems(items) => items.is_empty(),
            Items::Raw(bytes) => bytes.is_empty(),
        }
    }
}

/// The submission unit for the collector.
///
/// An envelope is a newline delimited frame: a JSON envelope header, followed
/// by any number of items, each with its own JSON header and payload. Related
/// items, such as an event and its attachments, travel in one envelope;
/// session updates are independent.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Envelope {
    event_id: Option<Uuid>,
    items: Items,
}

impl Envelope {
    /// Creates a new empty envelope.
    pub fn new() -> Envelope {
        Default::default()
    }

    /// Appends an item to the envelope.
    ///
    /// The first event or transaction added also stamps its id into the
    /// envelope header.
    pub fn add_item<I>(&mut self, item: I)
    where
        I: Into<EnvelopeItem>,
    {
        let item = item.into();

        let Items::EnvelopeItems(ref mut items) = self.items else {
            if item != EnvelopeItem::Raw {
                flare_debug!("envelope contains raw items, dropping the added item");
            }
            return;
        };

        if self.event_id.is_none() {
            if let EnvelopeItem::Event(ref event) = item {
                self.event_id = Some(event.event_id);
            } else if let EnvelopeItem::Transaction(ref transaction) = item {
                self.event_id = Some(transaction.event_id);
            }
        }
        items.push(item);
    }

    /// Iterates over the items carried by this envelope.
    ///
    /// Raw envelopes yield nothing here, their bytes are opaque.
    pub fn items(&self) -> EnvelopeItemIter {
        let inner = match &self.items {
            Items::EnvelopeItems(items) => items.iter(),
            Items::Raw(_) => [].iter(),
        };

        EnvelopeItemIter { inner }
    }

    /// The event id recorded in the envelope header, if any.
    pub fn uuid(&self) -> Option<&Uuid> {
        self.event_id.as_ref()
    }

    /// The first error event in this envelope, if it carries one.
    pub fn event(&self) -> Option<&Event<'static>> {
        let Items::EnvelopeItems(ref items) = self.items else {
            return None;
        };

        items.iter().find_map(|item| match item {
            EnvelopeItem::Event(event) => Some(event),
            _ => None,
        })
    }

    /// Keeps only the items the predicate accepts and returns the result as a
    /// new envelope.
    ///
    /// Attachments are additionally dropped when nothing remains for them to
    /// attach to, that is when the surviving items include neither an event
    /// nor a transaction. Returns [`None`] when no items survive at all.
    pub fn filter<P>(self, mut predicate: P) -> Option<Self>
    where
        P: FnMut(&EnvelopeItem) -> bool,
    {
        let Items::EnvelopeItems(items) = self.items else {
            return if predicate(&EnvelopeItem::Raw) {
                Some(self)
            } else {
                None
            };
        };

        let mut filtered = Envelope::new();
        for item in items {
            if predicate(&item) {
                filtered.add_item(item);
            }
        }

        // attachments without an event or transaction have nothing to attach to
        if filtered.uuid().is_none() {
            if let Items::EnvelopeItems(ref mut items) = filtered.items {
                items.retain(|item| !matches!(item, EnvelopeItem::Attachment(..)))
            }
        }

        if filtered.items.is_empty() {
            None
        } else {
            Some(filtered)
        }
    }

    /// Writes the envelope in its newline delimited wire format.
    pub fn to_writer<W>(&self, mut writer: W) -> std::io::Result<()>
    where
        W: Write,
    {
        let items = match &self.items {
            Items::Raw(bytes) => return writer.write_all(bytes),
            Items::EnvelopeItems(items) => items,
        };

        let event_id = self.uuid();
        match event_id {
            Some(uuid) => writeln!(writer, r#"{{"event_id":"{uuid}"}}"#)?,
            _ => writeln!(writer, "{{}}")?,
        }

        // Item payloads go through a scratch buffer first because the item
        // header states their length up front.
        let mut item_buf = Vec::new();
        for item in items {
            match item {
                EnvelopeItem::Event(event) => serde_json::to_writer(&mut item_buf, event)?,
                EnvelopeItem::SessionUpdate(session) => {
                    serde_json::to_writer(&mut item_buf, session)?
                }
                EnvelopeItem::SessionAggregates(aggregates) => {
                    serde_json::to_writer(&mut item_buf, aggregates)?
                }
                EnvelopeItem::Transaction(transaction) => {
                    serde_json::to_writer(&mut item_buf, transaction)?
                }
                EnvelopeItem::Attachment(attachment) => {
                    attachment.to_writer(&mut writer)?;
                    writeln!(writer)?;
                    continue;
                }
                EnvelopeItem::Unknown { payload, .. } => item_buf.extend_from_slice(payload),
                EnvelopeItem::Raw => {
                    continue;
                }
            }
            let item_type = match item {
                EnvelopeItem::Event(_) => "event",
                EnvelopeItem::SessionUpdate(_) => "session",
                EnvelopeItem::SessionAggregates(_) => "sessions",
                EnvelopeItem::Transaction(_) => "transaction",
                EnvelopeItem::Unknown { ty, .. } => ty.as_str(),
                EnvelopeItem::Attachment(_) | EnvelopeItem::Raw => unreachable!(),
            };
            writeln!(
                writer,
                r#"{{"type":"{}","length":{}}}"#,
                item_type,
                item_buf.len()
            )?;
            writer.write_all(&item_buf)?;
            writeln!(writer)?;
            item_buf.clear();
        }

        Ok(())
    }

    /// Renders the wire format into a fresh byte buffer.
    pub fn to_vec(&self) -> std::io::Result<Vec<u8>> {
        let mut body = Vec::new();
        self.to_writer(&mut body)?;
        Ok(body)
    }

    /// Parses an envelope from its wire format.
    pub fn from_slice(slice: &[u8]) -> Result<Envelope, EnvelopeError> {
        let (header, offset) = Self::parse_header(slice)?;
        let items = Self::parse_items(slice, offset)?;

        let mut envelope = Envelope {
            event_id: header.event_id,
            ..Default::default()
        };

        for item in items {
            envelope.add_item(item);
        }

        Ok(envelope)
    }

    /// Wraps an already framed envelope without inspecting it.
    pub fn from_bytes_raw(bytes: Vec<u8>) -> Result<Self, EnvelopeError> {
        Ok(Self {
            event_id: None,
            items: Items::Raw(bytes),
        })
    }

    /// Reads and parses an envelope from a file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Envelope, EnvelopeError> {
        let bytes = std::fs::read(path).map_err(|_| EnvelopeError::UnexpectedEof)?;
        Envelope::from_slice(&bytes)
    }

    /// Reads a file as a raw envelope.
    ///
    /// The bytes are kept verbatim and no header is parsed, so the result has
    /// no `event_id`.
    pub fn from_path_raw<P: AsRef<Path>>(path: P) -> Result<Self, EnvelopeError> {
        let bytes = std::fs::read(path).map_err(|_| EnvelopeError::UnexpectedEof)?;
        Self::from_bytes_raw(bytes)
    }

    fn parse_header(slice: &[u8]) -> Result<(EnvelopeHeader, usize), EnvelopeError> {
        let mut stream = serde_json::Deserializer::from_slice(slice).into_iter();

        let header: EnvelopeHeader = match stream.next() {
            None => return Err(EnvelopeError::MissingHeader),
            Some(Err(error)) => return Err(EnvelopeError::InvalidHeader(error)),
            Some(Ok(header)) => header,
        };

        // headers end with a bare newline
        Self::require_termination(slice, stream.byte_offset())?;

        Ok((header, stream.byte_offset() + 1))
    }

    fn parse_items(slice: &[u8], mut offset: usize) -> Result<Vec<EnvelopeItem>, EnvelopeError> {
        let mut items = Vec::new();

        while offset < slice.len() {
            let bytes = slice.get(offset..).ok_or(EnvelopeError::MissingItemHeader)?;
            let (item, item_size) = Self::parse_item(bytes)?;
            offset += item_size;
            items.push(item);
        }

        Ok(items)
    }

    fn parse_item(slice: &[u8]) -> Result<(EnvelopeItem, usize), EnvelopeError> {
        let mut stream = serde_json::Deserializer::from_slice(slice).into_iter();

        let header: EnvelopeItemHeader = match stream.next() {
            None => return Err(EnvelopeError::UnexpectedEof),
            Some(Err(error)) => return Err(EnvelopeError::InvalidItemHeader(error)),
            Some(Ok(header)) => header,
        };

        // headers end with a bare newline
        let header_end = stream.byte_offset();
        Self::require_termination(slice, header_end)?;

        // The final header may omit its trailing newline, in which case
        // `payload_start` lands one past the end of the buffer.
        let payload_start = std::cmp::min(header_end + 1, slice.len());
        let payload_end = match header.length {
            Some(len) => {
                let payload_end = payload_start + len;
                if slice.len() < payload_end {
                    return Err(EnvelopeError::UnexpectedEof);
                }

                // sized payloads also end with a bare newline
                Self::require_termination(slice, payload_end)?;
                payload_end
            }
            None => match slice.get(payload_start..) {
                Some(range) => match range.iter().position(|&b| b == b'\n') {
                    Some(relative_end) => payload_start + relative_end,
                    None => slice.len(),
                },
                None => slice.len(),
            },
        };

        let payload = slice
            .get(payload_start..payload_end)
            .ok_or(EnvelopeError::UnexpectedEof)?;

        let item = match header.r#type.as_str() {
            "event" => serde_json::from_slice(payload)
                .map(EnvelopeItem::Event)
                .map_err(EnvelopeError::InvalidItemPayload)?,
            "transaction" => serde_json::from_slice(payload)
                .map(EnvelopeItem::Transaction)
                .map_err(EnvelopeError::InvalidItemPayload)?,
            "session" => serde_json::from_slice(payload)
                .map(EnvelopeItem::SessionUpdate)
                .map_err(EnvelopeError::InvalidItemPayload)?,
            "sessions" => serde_json::from_slice(payload)
                .map(EnvelopeItem::SessionAggregates)
                .map_err(EnvelopeError::InvalidItemPayload)?,
            "attachment" => EnvelopeItem::Attachment(Attachment {
                buffer: payload.to_owned(),
                filename: header.filename.unwrap_or_default(),
                content_type: header.content_type,
                // unrecognized values degrade to a plain attachment
                ty: header
                    .attachment_type
                    .as_deref()
                    .and_then(AttachmentType::from_str),
            }),
            // Unrecognized item types are carried through untouched.
            _ => EnvelopeItem::Unknown {
                ty: header.r#type,
                payload: payload.to_owned(),
            },
        };

        Ok((item, payload_end + 1))
    }

    fn require_termination(slice: &[u8], offset: usize) -> Result<(), EnvelopeError> {
        match slice.get(offset) {
            Some(&b'\n') | None => Ok(()),
            Some(_) => Err(EnvelopeError::MissingNewline),
        }
    }
}

impl<T> From<T> for Envelope
where
    T: Into<EnvelopeItem>,
{
    fn from(item: T) -> Self {
        let mut envelope = Self::default();
        envelope.add_item(item.into());
        envelope
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::protocol::{SessionAttributes, SessionStatus, Span, SpanId, TraceId};

    const ID: &str = "9f2a7d6e-3c41-4b8a-b0cd-5e91a4f0c223";
    // 2024-03-05T09:22:30Z as unix seconds.
    const STARTED: u64 = 1_709_630_550;

    fn render(envelope: Envelope) -> String {
        let mut buf = Vec::new();
        envelope.to_writer(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_empty() {
        assert_eq!(render(Envelope::new()), "{}\n");
    }

    #[test]
    fn test_event() {
        let event = Event {
            event_id: Uuid::parse_str(ID).unwrap(),
            timestamp: at(STARTED),
            ..Default::default()
        };
        let envelope: Envelope = event.into();
        assert_eq!(
            render(envelope),
            r#"{"event_id":"9f2a7d6e-3c41-4b8a-b0cd-5e91a4f0c223"}
{"type":"event","length":70}
{"event_id":"9f2a7d6e3c414b8ab0cd5e91a4f0c223","timestamp":1709630550}
"#
        );
    }

    #[test]
    fn test_session() {
        let session = SessionUpdate {
            session_id: Uuid::parse_str(ID).unwrap(),
            distinct_id: Some("ops@flare.dev".to_owned()),
            sequence: None,
            timestamp: None,
            started: at(STARTED),
            init: true,
            duration: Some(2.5),
            status: SessionStatus::Ok,
            errors: 4,
            attributes: SessionAttributes {
                release: "flare-demo@0.3.0".into(),
                environment: Some("staging".into()),
                ip_address: None,
                user_agent: None,
            },
        };
        let envelope: Envelope = session.into();
        assert_eq!(
            render(envelope),
            r#"{}
{"type":"session","length":216}
{"sid":"9f2a7d6e-3c41-4b8a-b0cd-5e91a4f0c223","did":"ops@flare.dev","started":"2024-03-05T09:22:30Z","init":true,"duration":2.5,"status":"ok","errors":4,"attrs":{"release":"flare-demo@0.3.0","environment":"staging"}}
"#
        );
    }

    #[test]
    fn test_transaction() {
        let spans = vec![Span {
            span_id: SpanId::from_str("ab4ccd2e7f013d58").unwrap(),
            trace_id: TraceId::from_str("6f8a9c0d1e2b34455667788990a0b1c2").unwrap(),
            start_timestamp: at(STARTED),
            ..Default::default()
        }];
        let transaction = Transaction {
            event_id: Uuid::parse_str(ID).unwrap(),
            start_timestamp: at(STARTED),
            spans,
            ..Default::default()
        };
        let envelope: Envelope = transaction.into();
        assert_eq!(
            render(envelope),
            r#"{"event_id":"9f2a7d6e-3c41-4b8a-b0cd-5e91a4f0c223"}
{"type":"transaction","length":192}
{"event_id":"9f2a7d6e3c414b8ab0cd5e91a4f0c223","start_timestamp":1709630550,"spans":[{"span_id":"ab4ccd2e7f013d58","trace_id":"6f8a9c0d1e2b34455667788990a0b1c2","start_timestamp":1709630550}]}
"#
        );
    }

    #[test]
    fn test_roundtrip() {
        let payload = r#"{"event_id":"9f2a7d6e-3c41-4b8a-b0cd-5e91a4f0c223"}
{"type":"event","length":70}
{"event_id":"9f2a7d6e3c414b8ab0cd5e91a4f0c223","timestamp":1709630550}
"#;
        let envelope = Envelope::from_slice(payload.as_bytes()).unwrap();
        assert_eq!(render(envelope), payload);
    }

    #[test]
    fn test_unknown_item_type_roundtrip() {
        let payload = "{}\n{\"type\":\"profile\",\"length\":16}\n{\"not\":\"parsed\"}\n";
        let envelope = Envelope::from_slice(payload.as_bytes()).unwrap();

        let items: Vec<_> = envelope.items().collect();
        assert_eq!(items.len(), 1);
        match items[0] {
            EnvelopeItem::Unknown { ty, payload } => {
                assert_eq!(ty, "profile");
                assert_eq!(payload.as_slice(), br#"{"not":"parsed"}"#);
            }
            other => panic!("expected unknown item, got {other:?}"),
        }

        assert_eq!(render(envelope), payload);
    }

    #[test]
    fn test_attachment_roundtrip() {
        let payload = br#"{"event_id":"9f2a7d6e-3c41-4b8a-b0cd-5e91a4f0c223"}
{"type":"event","length":70}
{"event_id":"9f2a7d6e3c414b8ab0cd5e91a4f0c223","timestamp":1709630550}
{"type":"attachment","length":10,"filename":"attachment.txt","attachment_type":"event.minidump","content_type":"text/plain"}
some text
"#;
        let envelope = Envelope::from_slice(payload).unwrap();
        assert_eq!(envelope.items().count(), 2);

        let attachment = envelope
            .items()
            .find_map(|item| match item {
                EnvelopeItem::Attachment(attachment) => Some(attachment),
                _ => None,
            })
            .unwrap();
        assert_eq!(attachment.filename, "attachment.txt");
        assert_eq!(attachment.buffer, b"some text\n");
        assert_eq!(attachment.ty, Some(AttachmentType::Minidump));

        let mut serialized = Vec::new();
        envelope.to_writer(&mut serialized).unwrap();
        let serialized = String::from_utf8_lossy(&serialized);
        assert!(serialized.contains(r#""attachment_type":"event.minidump""#));
    }

    #[test]
    fn test_unrecognized_attachment_type_degrades() {
        let payload = b"{}\n{\"type\":\"attachment\",\"length\":3,\"filename\":\"x\",\"attachment_type\":\"event.hologram\"}\nabc\n";
        let envelope = Envelope::from_slice(payload).unwrap();
        match envelope.items().next().unwrap() {
            EnvelopeItem::Attachment(attachment) => assert_eq!(attachment.ty, None),
            other => panic!("expected attachment, got {other:?}"),
        }
    }

    #[test]
    fn test_filter_removes_dangling_attachment() {
        let mut envelope = Envelope::new();
        envelope.add_item(Event::default());
        envelope.add_item(Attachment {
            buffer: vec![1, 2, 3],
            filename: "data.bin".into(),
            ..Default::default()
        });

        let filtered = envelope.filter(|item| !matches!(item, EnvelopeItem::Event(_)));
        assert!(filtered.is_none());
    }

    #[test]
    fn test_raw_envelope_ignores_added_items() {
        let framed = b"{}\n{\"type\":\"event\",\"length\":2}\n{}\n".to_vec();
        let mut envelope = Envelope::from_bytes_raw(framed.clone()).unwrap();

        envelope.add_item(Event::default());

        assert_eq!(envelope.items().count(), 0);
        assert_eq!(envelope.to_vec().unwrap(), framed);
    }

    #[test]
    fn test_deserialize_without_newline_at_eof() {
        // without terminating newline after the payload
        let payload = b"{}\n{\"type\":\"session\"}\n{\"sid\":\"9f2a7d6e-3c41-4b8a-b0cd-5e91a4f0c223\",\"started\":\"2024-03-05T09:22:30Z\",\"attrs\":{\"release\":\"flare-demo@0.3.0\"}}";
        let envelope = Envelope::from_slice(payload).unwrap();
        assert_eq!(envelope.items().count(), 1);
    }
}
