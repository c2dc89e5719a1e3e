use std::sync::{Mutex, MutexGuard, PoisonError};

use unicode_segmentation::UnicodeSegmentation;

/// Locks the given mutex, recovering the inner value if a previous holder panicked.
///
/// All state guarded in this crate is a cache, so a poisoned lock
/// still holds usable (if possibly stale) data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Truncates `text` to at most `max_graphemes` grapheme clusters,
/// appending an ellipsis if anything was cut off.
pub(crate) fn truncate_graphemes(text: String, max_graphemes: usize) -> String {
    let cut_at = text.grapheme_indices(true).nth(max_graphemes).map(|(i, _)| i);
    match cut_at {
        Some(byte_index) => {
            let mut truncated = text[..byte_index].trim_end().to_owned();
            truncated.push('…');
            truncated
        }
        None => text,
    }
}
