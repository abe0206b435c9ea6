//! Data models for Quill
//!
//! Defines the synchronized entities: Note, Folder and Tag, plus the Block
//! content units owned by a Note.
//!
//! Equality is field-wise so that stored and decoded values can be compared
//! directly; identity is the `id` exposed through [`Entity`]. Folder and tag
//! references held by a note are plain ids and may dangle until the owning
//! store scrubs them.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::validation::ValidationError;

/// Title given to notes created without one
pub const DEFAULT_NOTE_TITLE: &str = "New Note";

/// Preset tag colors offered to users, as (name, hex) pairs
pub const PRESET_COLORS: [(&str, &str); 5] = [
    ("blue", "#3B82F6"),
    ("green", "#10B981"),
    ("red", "#EF4444"),
    ("orange", "#F59E0B"),
    ("purple", "#8B5CF6"),
];

/// Common view of a top-level synchronized record
pub trait Entity: Clone + Send + Sync + 'static {
    /// Human-readable kind, used in errors and logs
    const KIND: &'static str;

    /// Unique identifier
    fn id(&self) -> Uuid;

    /// Last modification time
    fn updated_at(&self) -> DateTime<Utc>;
}

/// A user note made of ordered content blocks
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user
    pub owner_id: String,
    /// Note title
    pub title: String,
    /// Ordered content
    pub blocks: Vec<Block>,
    /// When this note was created
    pub created_at: DateTime<Utc>,
    /// When this note was last updated
    pub updated_at: DateTime<Utc>,
    /// Containing folder, if any
    pub folder_id: Option<Uuid>,
    /// Attached tags, without duplicates, in insertion order
    pub tag_ids: Vec<Uuid>,
    /// Whether the note is pinned
    pub is_pinned: bool,
    /// Set when the note is soft-deleted
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Note {
    /// Create a new empty note
    pub fn new(title: impl Into<String>, owner_id: impl Into<String>, folder_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            title: title.into(),
            blocks: Vec::new(),
            created_at: now,
            updated_at: now,
            folder_id,
            tag_ids: Vec::new(),
            is_pinned: false,
            deleted_at: None,
        }
    }

    /// Whether the note is in the recently-deleted state
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Mark the note as modified now
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Update the title
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    /// Append a block at the end of the note
    pub fn push_block(&mut self, block: Block) {
        self.blocks.push(block);
        self.touch();
    }

    /// Find a block by ID
    pub fn block(&self, block_id: Uuid) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == block_id)
    }

    /// Replace the content of a block
    ///
    /// Returns `false` if the note has no such block.
    pub fn update_block_content(&mut self, block_id: Uuid, content: impl Into<String>) -> bool {
        match self.blocks.iter_mut().find(|b| b.id == block_id) {
            Some(block) => {
                block.set_content(content);
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Replace the type and metadata of a block
    ///
    /// Returns `false` if the note has no such block.
    pub fn set_block_kind(&mut self, block_id: Uuid, kind: BlockKind) -> bool {
        match self.blocks.iter_mut().find(|b| b.id == block_id) {
            Some(block) => {
                block.kind = kind;
                block.updated_at = Utc::now();
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Remove a block
    ///
    /// Returns `false` if the note has no such block.
    pub fn remove_block(&mut self, block_id: Uuid) -> bool {
        match self.blocks.iter().position(|b| b.id == block_id) {
            Some(pos) => {
                self.blocks.remove(pos);
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Move the note to a folder, or out of any folder
    pub fn set_folder(&mut self, folder_id: Option<Uuid>) {
        self.folder_id = folder_id;
        self.touch();
    }

    /// Check whether a tag is attached
    pub fn has_tag(&self, tag_id: Uuid) -> bool {
        self.tag_ids.contains(&tag_id)
    }

    /// Attach a tag
    ///
    /// Returns `false` if the tag was already attached.
    pub fn add_tag(&mut self, tag_id: Uuid) -> bool {
        if self.has_tag(tag_id) {
            return false;
        }
        self.tag_ids.push(tag_id);
        self.touch();
        true
    }

    /// Detach a tag
    ///
    /// Returns `false` if the tag was not attached.
    pub fn remove_tag(&mut self, tag_id: Uuid) -> bool {
        match self.tag_ids.iter().position(|t| *t == tag_id) {
            Some(pos) => {
                self.tag_ids.remove(pos);
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Flip the pinned flag
    pub fn toggle_pin(&mut self) {
        self.is_pinned = !self.is_pinned;
        self.touch();
    }

    /// Move the note to recently deleted
    pub fn soft_delete(&mut self) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    /// Bring the note back from recently deleted
    pub fn restore(&mut self) {
        self.deleted_at = None;
        self.touch();
    }

    /// All block contents joined by blank lines
    pub fn plain_text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.content.as_str())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Entity for Note {
    const KIND: &'static str = "note";

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// A unit of note content
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Unique identifier (within the owning note)
    pub id: Uuid,
    /// Block type, with the metadata meaningful for it
    pub kind: BlockKind,
    /// Body text, or the textual artifact of a media block
    pub content: String,
    /// When this block was created
    pub created_at: DateTime<Utc>,
    /// When this block was last updated
    pub updated_at: DateTime<Utc>,
}

impl Block {
    /// Create a new block
    pub fn new(kind: BlockKind, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a plain text block
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(BlockKind::Text, content)
    }

    /// Replace the content
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.updated_at = Utc::now();
    }
}

/// Reference to an uploaded or remote file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attachment {
    /// Remote resource URL
    pub url: Option<String>,
    /// Original file name
    pub file_name: Option<String>,
    /// MIME type
    pub mime_type: Option<String>,
}

impl Attachment {
    /// Attachment pointing at a URL
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Whether no field is set
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.file_name.is_none() && self.mime_type.is_none()
    }
}

/// Block type
///
/// Each variant carries only the metadata that applies to it.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Text,
    Markdown,
    Code,
    AiGenerated,
    Image(Attachment),
    EmbeddedDocument {
        attachment: Attachment,
        page: Option<u32>,
    },
    Transcript {
        source_url: Option<String>,
        title: Option<String>,
    },
    OcrText {
        source: Attachment,
        page: Option<u32>,
        confidence: Option<f64>,
    },
    VideoReference {
        url: Option<String>,
        title: Option<String>,
    },
    /// A linked resource, possibly an uploaded file
    Link(Attachment),
    Audio(Attachment),
    Video(Attachment),
}

impl BlockKind {
    /// Name stored in the `type` field of a block document
    pub fn type_name(&self) -> &'static str {
        match self {
            BlockKind::Text => "text",
            BlockKind::Markdown => "markdown",
            BlockKind::Code => "code",
            BlockKind::AiGenerated => "ai_generated",
            BlockKind::Image(_) => "image",
            BlockKind::EmbeddedDocument { .. } => "pdf_embed",
            BlockKind::Transcript { .. } => "transcript",
            BlockKind::OcrText { .. } => "ocr_text",
            BlockKind::VideoReference { .. } => "youtube",
            BlockKind::Link(_) => "link",
            BlockKind::Audio(_) => "audio",
            BlockKind::Video(_) => "video",
        }
    }
}

/// A folder grouping notes
#[derive(Debug, Clone, PartialEq)]
pub struct Folder {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user
    pub owner_id: String,
    /// Display name
    pub name: String,
    /// When this folder was created
    pub created_at: DateTime<Utc>,
    /// When this folder was last updated
    pub updated_at: DateTime<Utc>,
}

impl Folder {
    /// Create a new folder
    pub fn new(name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rename the folder
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.updated_at = Utc::now();
    }
}

impl Entity for Folder {
    const KIND: &'static str = "folder";

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// A colored label attached to notes
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user
    pub owner_id: String,
    /// Display name
    pub name: String,
    /// Display color
    pub color: TagColor,
    /// When this tag was created
    pub created_at: DateTime<Utc>,
    /// When this tag was last updated
    pub updated_at: DateTime<Utc>,
}

impl Tag {
    /// Create a new tag
    pub fn new(name: impl Into<String>, owner_id: impl Into<String>, color: TagColor) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            name: name.into(),
            color,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rename the tag
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.updated_at = Utc::now();
    }

    /// Change the tag color
    pub fn set_color(&mut self, color: TagColor) {
        self.color = color;
        self.updated_at = Utc::now();
    }
}

impl Entity for Tag {
    const KIND: &'static str = "tag";

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// A `#RRGGBB` color, stored upper-cased
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagColor(String);

impl TagColor {
    /// Parse a hex color, with or without the leading `#`
    pub fn parse(hex: &str) -> Result<Self, ValidationError> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidColor(hex.to_string()));
        }
        Ok(Self(format!("#{}", digits.to_ascii_uppercase())))
    }

    /// Look up a color from [`PRESET_COLORS`] by name
    pub fn preset(name: &str) -> Option<Self> {
        PRESET_COLORS
            .iter()
            .find(|(preset, _)| preset.eq_ignore_ascii_case(name))
            .map(|(_, hex)| Self((*hex).to_string()))
    }

    /// The hex string, including `#`
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TagColor {
    fn default() -> Self {
        Self(PRESET_COLORS[0].1.to_string())
    }
}

impl std::fmt::Display for TagColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pause() {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    #[test]
    fn test_note_new() {
        let note = Note::new(DEFAULT_NOTE_TITLE, "user-1", None);
        assert_eq!(note.title, "New Note");
        assert_eq!(note.owner_id, "user-1");
        assert!(note.blocks.is_empty());
        assert!(note.tag_ids.is_empty());
        assert!(!note.is_pinned);
        assert!(!note.is_deleted());
        assert_eq!(note.created_at, note.updated_at);
    }

    #[test]
    fn test_note_set_title_bumps_updated_at() {
        let mut note = Note::new("Draft", "user-1", None);
        let original = note.updated_at;
        pause();
        note.set_title("Final");
        assert_eq!(note.title, "Final");
        assert!(note.updated_at > original);
        assert_eq!(note.created_at, original);
    }

    #[test]
    fn test_note_blocks() {
        let mut note = Note::new("Blocks", "user-1", None);
        let block = Block::text("first");
        let block_id = block.id;
        note.push_block(block);
        note.push_block(Block::new(BlockKind::Markdown, "# second"));
        assert_eq!(note.blocks.len(), 2);

        let before = note.updated_at;
        pause();
        assert!(note.update_block_content(block_id, "edited"));
        assert_eq!(note.block(block_id).unwrap().content, "edited");
        assert!(note.updated_at > before);
        assert!(note.block(block_id).unwrap().updated_at > note.block(block_id).unwrap().created_at);

        assert!(note.remove_block(block_id));
        assert!(!note.remove_block(block_id));
        assert_eq!(note.blocks.len(), 1);
        assert!(!note.update_block_content(Uuid::new_v4(), "nothing"));
    }

    #[test]
    fn test_note_set_block_kind() {
        let mut note = Note::new("Media", "user-1", None);
        let block = Block::text("caption");
        let block_id = block.id;
        note.push_block(block);

        let kind = BlockKind::Image(Attachment::url("https://cdn.example.com/a.png"));
        assert!(note.set_block_kind(block_id, kind.clone()));
        assert_eq!(note.block(block_id).unwrap().kind, kind);
    }

    #[test]
    fn test_note_tags() {
        let mut note = Note::new("Tagged", "user-1", None);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(note.add_tag(a));
        assert!(note.add_tag(b));
        assert!(!note.add_tag(a));
        assert_eq!(note.tag_ids, vec![a, b]);

        assert!(note.remove_tag(a));
        assert!(!note.remove_tag(a));
        assert_eq!(note.tag_ids, vec![b]);
    }

    #[test]
    fn test_soft_delete_and_restore() {
        let mut note = Note::new("Draft", "user-1", None);
        let original = note.clone();

        note.soft_delete();
        assert!(note.is_deleted());
        assert!(note.deleted_at.is_some());

        note.restore();
        assert!(!note.is_deleted());
        assert!(note.deleted_at.is_none());

        note.updated_at = original.updated_at;
        assert_eq!(note, original);
    }

    #[test]
    fn test_toggle_pin_and_folder() {
        let mut note = Note::new("Pin me", "user-1", None);
        note.toggle_pin();
        assert!(note.is_pinned);
        note.toggle_pin();
        assert!(!note.is_pinned);

        let folder = Uuid::new_v4();
        note.set_folder(Some(folder));
        assert_eq!(note.folder_id, Some(folder));
        note.set_folder(None);
        assert!(note.folder_id.is_none());
    }

    #[test]
    fn test_plain_text_skips_empty_blocks() {
        let mut note = Note::new("Text", "user-1", None);
        note.push_block(Block::text("one"));
        note.push_block(Block::text(""));
        note.push_block(Block::new(BlockKind::AiGenerated, "two"));
        assert_eq!(note.plain_text(), "one\n\ntwo");
    }

    #[test]
    fn test_block_kind_type_names() {
        assert_eq!(BlockKind::Text.type_name(), "text");
        assert_eq!(
            BlockKind::EmbeddedDocument {
                attachment: Attachment::default(),
                page: None
            }
            .type_name(),
            "pdf_embed"
        );
        assert_eq!(
            BlockKind::VideoReference { url: None, title: None }.type_name(),
            "youtube"
        );
    }

    #[test]
    fn test_folder_rename() {
        let mut folder = Folder::new("Work", "user-1");
        let before = folder.updated_at;
        pause();
        folder.rename("Office");
        assert_eq!(folder.name, "Office");
        assert!(folder.updated_at > before);
    }

    #[test]
    fn test_tag_color_parse() {
        assert_eq!(TagColor::parse("#ef4444").unwrap().as_str(), "#EF4444");
        assert_eq!(TagColor::parse("3b82f6").unwrap().as_str(), "#3B82F6");
        assert!(TagColor::parse("#12345").is_err());
        assert!(TagColor::parse("#GGGGGG").is_err());
    }

    #[test]
    fn test_tag_color_preset() {
        assert_eq!(TagColor::preset("Red").unwrap().as_str(), "#EF4444");
        assert!(TagColor::preset("teal").is_none());
        assert_eq!(TagColor::default().as_str(), "#3B82F6");
    }

    #[test]
    fn test_tag_update() {
        let mut tag = Tag::new("Urgent", "user-1", TagColor::parse("#EF4444").unwrap());
        tag.rename("Later");
        tag.set_color(TagColor::preset("green").unwrap());
        assert_eq!(tag.name, "Later");
        assert_eq!(tag.color.to_string(), "#10B981");
    }

    #[test]
    fn test_entity_ids() {
        let note = Note::new("n", "u", None);
        let folder = Folder::new("f", "u");
        assert_eq!(Entity::id(&note), note.id);
        assert_eq!(Entity::id(&folder), folder.id);
        assert_eq!(Note::KIND, "note");
        assert_eq!(Tag::KIND, "tag");
    }
}
