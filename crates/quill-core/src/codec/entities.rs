//! Codec implementations for Note, Block, Folder and Tag

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;
use uuid::Uuid;

use super::{CodecError, Collection, Document, DocumentCodec, Value};
use crate::models::{Attachment, Block, BlockKind, Folder, Note, Tag, TagColor};

/// Wire field names
pub mod keys {
    // Shared
    pub const ID: &str = "id";
    pub const USER_ID: &str = "userId";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";

    // Note
    pub const TITLE: &str = "title";
    pub const IS_PINNED: &str = "isPinned";
    pub const IS_DELETED: &str = "isDeleted";
    pub const TAG_IDS: &str = "tagIds";
    pub const FOLDER_ID: &str = "folderId";
    pub const DELETED_AT: &str = "deletedAt";
    pub const CONTENT_BLOCKS: &str = "contentBlocks";

    // Folder / Tag
    pub const NAME: &str = "name";
    pub const COLOR_HEX: &str = "colorHex";

    // Block
    pub const TYPE: &str = "type";
    pub const CONTENT: &str = "content";
    pub const METADATA: &str = "metadata";

    // Block metadata
    pub const RESOURCE_URL: &str = "resourceURL";
    pub const PAGE_NUMBER: &str = "pageNumber";
    pub const OCR_CONFIDENCE: &str = "ocrConfidence";
    pub const ORIGINAL_FILE_NAME: &str = "originalFileName";
    pub const MIME_TYPE: &str = "mimeType";

    // Older clients wrote per-type URL keys
    pub const LEGACY_IMAGE_URL: &str = "imageURL";
    pub const LEGACY_PDF_URL: &str = "pdfURL";
}

/// Older clients stored embedded documents under this type name
const LEGACY_PDF_TYPE: &str = "pdf";

impl DocumentCodec for Note {
    const COLLECTION: Collection = Collection::Notes;
    const CLEARABLE_FIELDS: &'static [&'static str] = &[keys::FOLDER_ID, keys::DELETED_AT];

    fn encode(&self) -> Document {
        let mut doc = Document::new()
            .with(keys::ID, self.id)
            .with(keys::USER_ID, &self.owner_id)
            .with(keys::TITLE, &self.title)
            .with(keys::CREATED_AT, self.created_at)
            .with(keys::UPDATED_AT, self.updated_at)
            .with(keys::IS_PINNED, self.is_pinned)
            .with(keys::IS_DELETED, self.is_deleted())
            .with(keys::TAG_IDS, uuid_array(&self.tag_ids))
            .with(
                keys::CONTENT_BLOCKS,
                self.blocks
                    .iter()
                    .map(|b| Value::Map(encode_block(b)))
                    .collect::<Vec<_>>(),
            );

        if let Some(folder_id) = self.folder_id {
            doc.insert(keys::FOLDER_ID, folder_id);
        }
        if let Some(deleted_at) = self.deleted_at {
            doc.insert(keys::DELETED_AT, deleted_at);
        }
        doc
    }

    fn decode(doc: &Document) -> Result<Self, CodecError> {
        let id = required_uuid(doc, keys::ID)?;
        let owner_id = required_str(doc, keys::USER_ID)?.to_string();
        let title = required_str(doc, keys::TITLE)?.to_string();
        let created_at = required_timestamp(doc, keys::CREATED_AT)?;
        let updated_at = required_timestamp(doc, keys::UPDATED_AT)?;

        let blocks = match doc.get_present(keys::CONTENT_BLOCKS) {
            Some(value) => value
                .as_array()
                .ok_or_else(|| invalid_type(keys::CONTENT_BLOCKS, "array"))?
                .iter()
                .map(|item| {
                    item.as_map()
                        .ok_or_else(|| invalid_type(keys::CONTENT_BLOCKS, "map"))
                        .and_then(decode_block)
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        // The flag is authoritative; a deleted note always carries a timestamp
        let is_deleted = optional_bool(doc, keys::IS_DELETED);
        let deleted_at = if is_deleted {
            Some(optional_timestamp(doc, keys::DELETED_AT).unwrap_or(updated_at))
        } else {
            None
        };

        Ok(Note {
            id,
            owner_id,
            title,
            blocks,
            created_at,
            updated_at,
            folder_id: optional_uuid(doc, keys::FOLDER_ID),
            tag_ids: uuid_list(doc, keys::TAG_IDS),
            is_pinned: optional_bool(doc, keys::IS_PINNED),
            deleted_at,
        })
    }
}

impl DocumentCodec for Folder {
    const COLLECTION: Collection = Collection::Folders;

    fn encode(&self) -> Document {
        Document::new()
            .with(keys::ID, self.id)
            .with(keys::USER_ID, &self.owner_id)
            .with(keys::NAME, &self.name)
            .with(keys::CREATED_AT, self.created_at)
            .with(keys::UPDATED_AT, self.updated_at)
    }

    fn decode(doc: &Document) -> Result<Self, CodecError> {
        Ok(Folder {
            id: required_uuid(doc, keys::ID)?,
            owner_id: required_str(doc, keys::USER_ID)?.to_string(),
            name: required_str(doc, keys::NAME)?.to_string(),
            created_at: required_timestamp(doc, keys::CREATED_AT)?,
            updated_at: required_timestamp(doc, keys::UPDATED_AT)?,
        })
    }
}

impl DocumentCodec for Tag {
    const COLLECTION: Collection = Collection::Tags;

    fn encode(&self) -> Document {
        Document::new()
            .with(keys::ID, self.id)
            .with(keys::USER_ID, &self.owner_id)
            .with(keys::NAME, &self.name)
            .with(keys::COLOR_HEX, self.color.as_str())
            .with(keys::CREATED_AT, self.created_at)
            .with(keys::UPDATED_AT, self.updated_at)
    }

    fn decode(doc: &Document) -> Result<Self, CodecError> {
        let id = required_uuid(doc, keys::ID)?;
        let raw_color = required_str(doc, keys::COLOR_HEX)?;
        let color = TagColor::parse(raw_color).unwrap_or_else(|_| {
            warn!("Tag {} has invalid color '{}', using default", id, raw_color);
            TagColor::default()
        });

        Ok(Tag {
            id,
            owner_id: required_str(doc, keys::USER_ID)?.to_string(),
            name: required_str(doc, keys::NAME)?.to_string(),
            color,
            created_at: required_timestamp(doc, keys::CREATED_AT)?,
            updated_at: required_timestamp(doc, keys::UPDATED_AT)?,
        })
    }
}

/// Encode one content block as a nested map
pub(crate) fn encode_block(block: &Block) -> Document {
    let mut doc = Document::new()
        .with(keys::ID, block.id)
        .with(keys::TYPE, block.kind.type_name())
        .with(keys::CONTENT, &block.content)
        .with(keys::CREATED_AT, block.created_at)
        .with(keys::UPDATED_AT, block.updated_at);

    let metadata = encode_metadata(&block.kind);
    if !metadata.is_empty() {
        doc.insert(keys::METADATA, metadata);
    }
    doc
}

/// Decode one content block
pub(crate) fn decode_block(doc: &Document) -> Result<Block, CodecError> {
    let id = required_uuid(doc, keys::ID)?;
    let type_name = required_str(doc, keys::TYPE)?;
    let content = required_str(doc, keys::CONTENT)?.to_string();
    let created_at = required_timestamp(doc, keys::CREATED_AT)?;
    let updated_at = required_timestamp(doc, keys::UPDATED_AT)?;

    let empty = Document::new();
    let metadata = doc
        .get_present(keys::METADATA)
        .and_then(Value::as_map)
        .unwrap_or(&empty);

    Ok(Block {
        id,
        kind: decode_kind(type_name, metadata)?,
        content,
        created_at,
        updated_at,
    })
}

fn encode_metadata(kind: &BlockKind) -> Document {
    let mut meta = Document::new();
    match kind {
        BlockKind::Text | BlockKind::Markdown | BlockKind::Code | BlockKind::AiGenerated => {}
        BlockKind::Image(attachment) | BlockKind::Audio(attachment) | BlockKind::Video(attachment) => {
            put_attachment(&mut meta, attachment);
        }
        BlockKind::EmbeddedDocument { attachment, page } => {
            put_attachment(&mut meta, attachment);
            put_opt(&mut meta, keys::PAGE_NUMBER, *page);
        }
        BlockKind::OcrText {
            source,
            page,
            confidence,
        } => {
            put_attachment(&mut meta, source);
            put_opt(&mut meta, keys::PAGE_NUMBER, *page);
            put_opt(&mut meta, keys::OCR_CONFIDENCE, *confidence);
        }
        // Source titles share the file name slot
        BlockKind::Transcript { source_url, title } | BlockKind::VideoReference { url: source_url, title } => {
            put_opt(&mut meta, keys::RESOURCE_URL, source_url.clone());
            put_opt(&mut meta, keys::ORIGINAL_FILE_NAME, title.clone());
        }
        BlockKind::Link(attachment) => put_attachment(&mut meta, attachment),
    }
    meta
}

fn decode_kind(type_name: &str, meta: &Document) -> Result<BlockKind, CodecError> {
    let url = optional_string(meta, keys::RESOURCE_URL)
        .or_else(|| optional_string(meta, keys::LEGACY_IMAGE_URL))
        .or_else(|| optional_string(meta, keys::LEGACY_PDF_URL));
    let file_name = optional_string(meta, keys::ORIGINAL_FILE_NAME);
    let page = match meta.get_present(keys::PAGE_NUMBER) {
        None => None,
        Some(value) => Some(
            value
                .as_i64()
                .and_then(|p| u32::try_from(p).ok())
                .ok_or_else(|| CodecError::InvalidType {
                    field: keys::PAGE_NUMBER.to_string(),
                    expected: "page number",
                })?,
        ),
    };
    let attachment = Attachment {
        url: url.clone(),
        file_name: file_name.clone(),
        mime_type: optional_string(meta, keys::MIME_TYPE),
    };

    let kind = match type_name {
        "text" => BlockKind::Text,
        "markdown" => BlockKind::Markdown,
        "code" => BlockKind::Code,
        "ai_generated" => BlockKind::AiGenerated,
        "image" => BlockKind::Image(attachment),
        "pdf_embed" | LEGACY_PDF_TYPE => BlockKind::EmbeddedDocument { attachment, page },
        "transcript" => BlockKind::Transcript {
            source_url: url,
            title: file_name,
        },
        "ocr_text" => BlockKind::OcrText {
            source: attachment,
            page,
            confidence: meta.get_present(keys::OCR_CONFIDENCE).and_then(Value::as_f64),
        },
        "youtube" => BlockKind::VideoReference {
            url,
            title: file_name,
        },
        "link" => BlockKind::Link(attachment),
        "audio" => BlockKind::Audio(attachment),
        "video" => BlockKind::Video(attachment),
        other => return Err(CodecError::UnknownBlockType(other.to_string())),
    };
    Ok(kind)
}

fn put_attachment(meta: &mut Document, attachment: &Attachment) {
    put_opt(meta, keys::RESOURCE_URL, attachment.url.clone());
    put_opt(meta, keys::ORIGINAL_FILE_NAME, attachment.file_name.clone());
    put_opt(meta, keys::MIME_TYPE, attachment.mime_type.clone());
}

fn put_opt<T: Into<Value>>(meta: &mut Document, key: &str, value: Option<T>) {
    if let Some(value) = value {
        meta.insert(key, value);
    }
}

fn uuid_array(ids: &[Uuid]) -> Vec<Value> {
    ids.iter().map(|id| Value::from(*id)).collect()
}

fn invalid_type(field: &str, expected: &'static str) -> CodecError {
    CodecError::InvalidType {
        field: field.to_string(),
        expected,
    }
}

fn required_str<'a>(doc: &'a Document, key: &str) -> Result<&'a str, CodecError> {
    match doc.get_present(key) {
        Some(value) => value.as_str().ok_or_else(|| invalid_type(key, "string")),
        None => Err(CodecError::MissingField(key.to_string())),
    }
}

fn required_uuid(doc: &Document, key: &str) -> Result<Uuid, CodecError> {
    let raw = required_str(doc, key)?;
    Uuid::parse_str(raw).map_err(|_| CodecError::InvalidId {
        field: key.to_string(),
        value: raw.to_string(),
    })
}

fn required_timestamp(doc: &Document, key: &str) -> Result<DateTime<Utc>, CodecError> {
    match doc.get_present(key) {
        Some(value) => timestamp_of(value)
            .ok_or_else(|| CodecError::InvalidTimestamp(key.to_string())),
        None => Err(CodecError::MissingField(key.to_string())),
    }
}

/// Accepts native timestamps, epoch milliseconds and RFC 3339 strings
fn timestamp_of(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Timestamp(ts) => Some(*ts),
        Value::Integer(millis) => Utc.timestamp_millis_opt(*millis).single(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        _ => None,
    }
}

fn optional_timestamp(doc: &Document, key: &str) -> Option<DateTime<Utc>> {
    doc.get_present(key).and_then(timestamp_of)
}

fn optional_string(doc: &Document, key: &str) -> Option<String> {
    doc.get_present(key).and_then(Value::as_str).map(str::to_string)
}

fn optional_bool(doc: &Document, key: &str) -> bool {
    doc.get_present(key).and_then(Value::as_bool).unwrap_or(false)
}

fn optional_uuid(doc: &Document, key: &str) -> Option<Uuid> {
    doc.get_present(key)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Ids in a list field; unparseable entries are dropped
fn uuid_list(doc: &Document, key: &str) -> Vec<Uuid> {
    doc.get_present(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|s| Uuid::parse_str(s).ok())
                .collect()
        })
        .unwrap_or_default()
}
