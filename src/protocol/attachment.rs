use std::fmt;

/// The special role an attachment plays during ingestion.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum AttachmentType {
    /// A plain attachment with no special meaning.
    #[default]
    Attachment,
    /// A minidump file, symbolicated during ingestion. The payload should
    /// start with the `MDMP` magic bytes.
    Minidump,
    /// A serialized view hierarchy captured alongside the event.
    ViewHierarchy,
}

impl AttachmentType {
    /// The value used for this type on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attachment => "event.attachment",
            Self::Minidump => "event.minidump",
            Self::ViewHierarchy => "event.view_hierarchy",
        }
    }

    /// Parses a wire value back into a type, `None` for unrecognized ones.
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "event.attachment" => Some(Self::Attachment),
            "event.minidump" => Some(Self::Minidump),
            "event.view_hierarchy" => Some(Self::ViewHierarchy),
            _ => None,
        }
    }
}

/// Represents an attachment item.
#[derive(Clone, PartialEq, Default)]
pub struct Attachment {
    /// The actual attachment data.
    pub buffer: Vec<u8>,
    /// The filename of the attachment.
    pub filename: String,
    /// The content type of the attachment payload.
    pub content_type: Option<String>,
    /// The special type of this attachment, if any.
    pub ty: Option<AttachmentType>,
}

impl Attachment {
    /// Writes the attachment and its item header to the provided `Writer`.
    pub fn to_writer<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: std::io::Write,
    {
        write!(
            writer,
            r#"{{"type":"attachment","length":{length},"filename":"{filename}""#,
            filename = self.filename,
            length = self.buffer.len(),
        )?;
        if let Some(ty) = self.ty {
            write!(writer, r#","attachment_type":"{}""#, ty.as_str())?;
        }
        writeln!(
            writer,
            r#","content_type":"{ct}"}}"#,
            ct = self
                .content_type
                .as_deref()
                .unwrap_or("application/octet-stream"),
        )?;

        writer.write_all(&self.buffer)?;
        Ok(())
    }
}

// Implement Debug manually, otherwise users will be sad when they get a dump
// of decimal encoded bytes to their console.
impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("buffer", &self.buffer.len())
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("type", &self.ty)
            .finish()
    }
}
