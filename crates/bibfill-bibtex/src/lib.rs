//! BibTeX data layer for bibfill: entry and field models, normalizers,
//! author handling, entry matching, and file read/write.

pub mod author;
pub mod entry;
pub mod field;
pub mod matching;
pub mod normalize;
pub mod read;
pub mod write;

pub use author::Author;
pub use entry::{Entry, SourceId};
pub use field::{FIELD_ACCEPT, FIELD_FULL_MATCH, FIELD_NO_MATCH};
pub use matching::{ACCEPT_MATCH, CERTAIN_MATCH, NO_MATCH, match_score};
pub use read::{Bibliography, Item, ParseIssue, ReadError, read_file, read_str};
pub use write::{write_bibliography, write_entry};
