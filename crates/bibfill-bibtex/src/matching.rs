//! Entry-level matching: turns per-field scores into one verdict.

use crate::entry::Entry;
use crate::field::{self, FIELD_ACCEPT, FIELD_FULL_MATCH, FIELD_NO_MATCH};

/// Entry-level score for a definite non-match. Candidates at this score
/// are rejected.
pub const NO_MATCH: i32 = 0;
/// Minimum entry-level score at which a candidate may be merged.
pub const ACCEPT_MATCH: i32 = NO_MATCH + 1;
/// Entry-level score for a certain match; triggers the dispatcher's
/// identifier short-circuit.
pub const CERTAIN_MATCH: i32 = 1000;

/// Fixed weights over the comparison set.
const TITLE_WEIGHT: i32 = 4;
const AUTHOR_WEIGHT: i32 = 2;
const YEAR_WEIGHT: i32 = 1;

/// Score a candidate entry against a local entry.
///
/// DOIs are oracular: when both sides carry one, equality decides alone.
/// Otherwise title, author, and year contribute with weights 4:2:1, scaled
/// strictly between [`NO_MATCH`] and [`CERTAIN_MATCH`]. The result is only
/// promoted to `CERTAIN_MATCH` when the title matches fully and the author
/// lists agree; a full title plus a full year without author support stays
/// partial, since repeated titles across years are common.
pub fn match_score(a: &Entry, b: &Entry) -> i32 {
    if let (Some(da), Some(db)) = (a.doi(), b.doi()) {
        return if da == db { CERTAIN_MATCH } else { NO_MATCH };
    }

    let title = compare(a, b, "title");
    let author = compare(a, b, "author");
    let year = compare(a, b, "year");

    if let Some(score) = title
        && score <= FIELD_NO_MATCH
    {
        return NO_MATCH;
    }
    // Without a comparable title there is nothing identifying to agree on.
    if title.is_none() {
        return NO_MATCH;
    }

    if title == Some(FIELD_FULL_MATCH)
        && let Some(author_score) = author
        && author_score >= FIELD_ACCEPT
    {
        return CERTAIN_MATCH;
    }

    let mut sum = 0i64;
    let mut weight = 0i64;
    for (score, w) in [
        (title, TITLE_WEIGHT),
        (author, AUTHOR_WEIGHT),
        (year, YEAR_WEIGHT),
    ] {
        if let Some(s) = score {
            sum += s.max(0) as i64 * w as i64;
            weight += w as i64 * FIELD_FULL_MATCH as i64;
        }
    }
    if weight == 0 {
        return NO_MATCH;
    }

    let span = (CERTAIN_MATCH - NO_MATCH - 2) as i64;
    (NO_MATCH + 1) + ((sum * span) / weight) as i32
}

fn compare(a: &Entry, b: &Entry, name: &str) -> Option<i32> {
    let va = a.get(name)?;
    let vb = b.get(name)?;
    field::matches_raw(name, va, vb)
}

/// Whether `challenger` should replace `best` at equal or better score:
/// higher score wins, ties go to the entry with more non-empty fields.
/// Callers resolve remaining ties by adapter priority (stable order).
pub fn improves(challenger_score: i32, challenger: &Entry, best_score: i32, best: &Entry) -> bool {
    challenger_score > best_score
        || (challenger_score == best_score
            && challenger.non_empty_count() > best.non_empty_count())
}
