//! Content policy limits
//!
//! The store accepts any value it is given; callers check these limits
//! before handing user input to it.

use thiserror::Error;

use crate::models::{Block, Note};

/// Maximum note title length, in characters
pub const MAX_NOTE_TITLE: usize = 100;

/// Maximum block content length, in characters
pub const MAX_BLOCK_CONTENT: usize = 10_000;

/// Maximum number of notes a user may keep
pub const MAX_NOTES_PER_USER: usize = 1_000;

/// Policy violations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Title is {len} characters long (maximum {max})")]
    TitleTooLong { len: usize, max: usize },

    #[error("Block content is {len} characters long (maximum {max})")]
    ContentTooLong { len: usize, max: usize },

    #[error("Note limit of {max} reached")]
    TooManyNotes { max: usize },

    #[error("Invalid color '{0}': expected #RRGGBB")]
    InvalidColor(String),
}

/// Check a note title
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    let len = title.chars().count();
    if len > MAX_NOTE_TITLE {
        return Err(ValidationError::TitleTooLong {
            len,
            max: MAX_NOTE_TITLE,
        });
    }
    Ok(())
}

/// Check the content of a single block
pub fn validate_block_content(content: &str) -> Result<(), ValidationError> {
    let len = content.chars().count();
    if len > MAX_BLOCK_CONTENT {
        return Err(ValidationError::ContentTooLong {
            len,
            max: MAX_BLOCK_CONTENT,
        });
    }
    Ok(())
}

/// Check whether one more note may be created
pub fn validate_note_count(existing: usize) -> Result<(), ValidationError> {
    if existing >= MAX_NOTES_PER_USER {
        return Err(ValidationError::TooManyNotes {
            max: MAX_NOTES_PER_USER,
        });
    }
    Ok(())
}

/// Check a block
pub fn validate_block(block: &Block) -> Result<(), ValidationError> {
    validate_block_content(&block.content)
}

/// Check a whole note: its title and every block
pub fn validate_note(note: &Note) -> Result<(), ValidationError> {
    validate_title(&note.title)?;
    note.blocks.iter().try_for_each(validate_block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_limit_counts_chars() {
        assert!(validate_title(&"a".repeat(100)).is_ok());
        assert_eq!(
            validate_title(&"a".repeat(101)),
            Err(ValidationError::TitleTooLong { len: 101, max: 100 })
        );
        // Multi-byte characters count once
        assert!(validate_title(&"é".repeat(100)).is_ok());
    }

    #[test]
    fn test_content_limit() {
        assert!(validate_block_content(&"x".repeat(MAX_BLOCK_CONTENT)).is_ok());
        assert!(validate_block_content(&"x".repeat(MAX_BLOCK_CONTENT + 1)).is_err());
    }

    #[test]
    fn test_note_count() {
        assert!(validate_note_count(0).is_ok());
        assert!(validate_note_count(MAX_NOTES_PER_USER - 1).is_ok());
        assert_eq!(
            validate_note_count(MAX_NOTES_PER_USER),
            Err(ValidationError::TooManyNotes { max: 1000 })
        );
    }

    #[test]
    fn test_validate_note_checks_blocks() {
        let mut note = Note::new("Fine", "user-1", None);
        note.push_block(Block::text("short"));
        assert!(validate_note(&note).is_ok());

        note.push_block(Block::text("y".repeat(MAX_BLOCK_CONTENT + 5)));
        assert!(matches!(
            validate_note(&note),
            Err(ValidationError::ContentTooLong { .. })
        ));
    }

    #[test]
    fn test_error_display() {
        let err = ValidationError::InvalidColor("blue".to_string());
        assert!(err.to_string().contains("#RRGGBB"));
    }
}
