//! First-run content for an empty store

use chrono::{Duration, Utc};

use crate::models::{Block, BlockKind, Folder, Note, Tag, TagColor};

use super::state::Snapshot;

const FOLDERS: [&str; 3] = ["Personal", "Work", "Ideas"];

const TAGS: [(&str, &str); 5] = [
    ("Work", "blue"),
    ("Personal", "green"),
    ("Important", "red"),
    ("Ideas", "orange"),
    ("Projects", "purple"),
];

const WELCOME: &str = "Welcome to Quill! This is your first note. \
Notes are made of blocks: text, images, documents, transcripts and more.";

const FEATURES: &str = "Here is what you can do:\n\
- Organize notes into folders\n\
- Tag notes and filter by tag\n\
- Pin the notes you use most\n\
- Generate summaries, flashcards and quizzes from a note\n\
- Import YouTube videos as notes\n\
- Restore notes from Recently Deleted";

fn folder<'a>(folders: &'a [Folder], name: &str) -> Option<&'a Folder> {
    folders.iter().find(|f| f.name == name)
}

fn tag_ids(tags: &[Tag], names: &[&str]) -> Vec<uuid::Uuid> {
    names
        .iter()
        .filter_map(|name| tags.iter().find(|t| t.name == *name).map(|t| t.id))
        .collect()
}

/// Sample folders, tags and notes owned by `owner_id`
pub(crate) fn sample_content(owner_id: &str) -> Snapshot {
    let folders: Vec<Folder> = FOLDERS
        .iter()
        .map(|name| Folder::new(*name, owner_id))
        .collect();

    let tags: Vec<Tag> = TAGS
        .iter()
        .map(|(name, color)| Tag::new(*name, owner_id, TagColor::preset(color).unwrap_or_default()))
        .collect();

    let now = Utc::now();
    let mut notes = Vec::new();

    let mut welcome = Note::new("Welcome to Quill", owner_id, None);
    welcome.blocks.push(Block::text(WELCOME));
    welcome.blocks.push(Block::new(BlockKind::AiGenerated, FEATURES));
    notes.push(welcome);

    let mut goals = Note::new(
        "Personal Goals",
        owner_id,
        folder(&folders, "Personal").map(|f| f.id),
    );
    goals.blocks.push(Block::text(
        "1. Read 12 books this year\n2. Exercise three times a week\n3. Learn a new language",
    ));
    goals.tag_ids = tag_ids(&tags, &["Personal", "Ideas"]);
    goals.updated_at = now - Duration::hours(1);
    notes.push(goals);

    let mut projects = Note::new(
        "Project Ideas",
        owner_id,
        folder(&folders, "Work").map(|f| f.id),
    );
    projects.blocks.push(Block::text(
        "- Automate the weekly report\n- Build a shared team glossary\n- Review onboarding docs",
    ));
    projects.tag_ids = tag_ids(&tags, &["Work", "Ideas", "Projects"]);
    projects.updated_at = now - Duration::hours(2);
    notes.push(projects);

    let mut contacts = Note::new("Important Contacts", owner_id, None);
    contacts.blocks.push(Block::text(
        "Team lead: lead@example.com\nIT support: support@example.com",
    ));
    contacts.tag_ids = tag_ids(&tags, &["Important", "Work"]);
    contacts.is_pinned = true;
    contacts.updated_at = now - Duration::days(1);
    notes.push(contacts);

    Snapshot {
        notes: notes.into(),
        folders: folders.into(),
        tags: tags.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_content_references_resolve() {
        let sample = sample_content("local");

        assert_eq!(sample.folders.len(), 3);
        assert_eq!(sample.tags.len(), 5);
        assert_eq!(sample.notes.len(), 4);

        for note in sample.notes.iter() {
            assert_eq!(note.owner_id, "local");
            if let Some(folder_id) = note.folder_id {
                assert!(sample.folder(folder_id).is_some());
            }
            for tag_id in &note.tag_ids {
                assert!(sample.tag(*tag_id).is_some());
            }
        }
    }

    #[test]
    fn test_sample_tags_use_preset_colors() {
        let sample = sample_content("local");
        let important = sample.tags.iter().find(|t| t.name == "Important").unwrap();
        assert_eq!(important.color.as_str(), "#EF4444");

        let pinned: Vec<_> = sample.notes.iter().filter(|n| n.is_pinned).collect();
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].title, "Important Contacts");
    }
}
