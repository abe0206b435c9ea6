//! Query and filter layer
//!
//! Pure functions over a snapshot of the store's collections. Nothing here
//! mutates its input; every function returns a new list. Call sites compose
//! them as filter, then search, then sort (see [`NoteQuery`]).

use std::cmp::Ordering;
use std::collections::HashMap;

use uuid::Uuid;

use crate::models::{Folder, Note, Tag};

/// Which notes a list shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NoteFilter {
    /// Every live (non-deleted) note
    #[default]
    All,
    /// Live notes in a folder
    Folder(Uuid),
    /// Live notes carrying a tag
    Tag(Uuid),
    /// Soft-deleted notes only
    RecentlyDeleted,
    /// Live pinned notes
    Pinned,
}

impl NoteFilter {
    /// Whether `note` passes this filter
    pub fn matches(&self, note: &Note) -> bool {
        match self {
            NoteFilter::RecentlyDeleted => note.is_deleted(),
            _ if note.is_deleted() => false,
            NoteFilter::All => true,
            NoteFilter::Folder(id) => note.folder_id == Some(*id),
            NoteFilter::Tag(id) => note.has_tag(*id),
            NoteFilter::Pinned => note.is_pinned,
        }
    }
}

/// Note list ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    /// Most recently updated first
    #[default]
    UpdatedDescending,
    /// Title A to Z, ignoring case
    TitleAscending,
    /// Most recently created first
    CreatedDescending,
}

impl SortOrder {
    fn compare(&self, a: &Note, b: &Note) -> Ordering {
        match self {
            SortOrder::UpdatedDescending => b.updated_at.cmp(&a.updated_at),
            SortOrder::TitleAscending => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            SortOrder::CreatedDescending => b.created_at.cmp(&a.created_at),
        }
    }
}

/// Notes passing `filter`
pub fn by_filter(notes: &[Note], filter: NoteFilter) -> Vec<Note> {
    notes.iter().filter(|n| filter.matches(n)).cloned().collect()
}

/// Whether `note`'s title or any block content contains `needle`
///
/// `needle` must already be lower-cased.
fn note_contains(note: &Note, needle: &str) -> bool {
    note.title.to_lowercase().contains(needle)
        || note
            .blocks
            .iter()
            .any(|b| b.content.to_lowercase().contains(needle))
}

/// Case-insensitive substring search over titles and block contents
///
/// An empty (or all-whitespace) query returns the input unchanged.
pub fn search(notes: &[Note], query: &str) -> Vec<Note> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return notes.to_vec();
    }
    notes
        .iter()
        .filter(|n| note_contains(n, &needle))
        .cloned()
        .collect()
}

/// Stable sort into a new list
pub fn sort(notes: &[Note], order: SortOrder) -> Vec<Note> {
    let mut sorted = notes.to_vec();
    sorted.sort_by(|a, b| order.compare(a, b));
    sorted
}

/// The `limit` most recently updated live notes
pub fn recent(notes: &[Note], limit: usize) -> Vec<Note> {
    let mut live = by_filter(notes, NoteFilter::All);
    live.sort_by(|a, b| SortOrder::UpdatedDescending.compare(a, b));
    live.truncate(limit);
    live
}

/// Filter, search and sort in one step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteQuery {
    pub filter: NoteFilter,
    pub search: String,
    pub order: SortOrder,
}

impl NoteQuery {
    pub fn new(filter: NoteFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = query.into();
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Run the query: filter, then search, then sort
    pub fn run(&self, notes: &[Note]) -> Vec<Note> {
        let filtered = by_filter(notes, self.filter);
        let found = search(&filtered, &self.search);
        sort(&found, self.order)
    }
}

/// Folders ordered by name, ignoring case
pub fn folders_by_name(folders: &[Folder]) -> Vec<Folder> {
    let mut sorted = folders.to_vec();
    sorted.sort_by_key(|f| f.name.to_lowercase());
    sorted
}

/// Tags ordered by name, ignoring case
pub fn tags_by_name(tags: &[Tag]) -> Vec<Tag> {
    let mut sorted = tags.to_vec();
    sorted.sort_by_key(|t| t.name.to_lowercase());
    sorted
}

/// Each tag with the number of live notes carrying it, ordered by name
pub fn tag_counts(tags: &[Tag], notes: &[Note]) -> Vec<(Tag, usize)> {
    let mut counts: HashMap<Uuid, usize> = HashMap::new();
    for note in notes.iter().filter(|n| !n.is_deleted()) {
        for tag_id in &note.tag_ids {
            *counts.entry(*tag_id).or_default() += 1;
        }
    }
    tags_by_name(tags)
        .into_iter()
        .map(|tag| {
            let count = counts.get(&tag.id).copied().unwrap_or(0);
            (tag, count)
        })
        .collect()
}

/// Each folder with the number of live notes in it, ordered by name
pub fn folder_counts(folders: &[Folder], notes: &[Note]) -> Vec<(Folder, usize)> {
    folders_by_name(folders)
        .into_iter()
        .map(|folder| {
            let count = by_filter(notes, NoteFilter::Folder(folder.id)).len();
            (folder, count)
        })
        .collect()
}
