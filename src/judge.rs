use std::collections::HashSet;

use crate::types::{PageSnapshot, Verdict};

/// Classify what an action actually did, from the pre/post snapshot pair
/// alone. Pure and total: never touches the live page, and the same pair
/// always yields the same verdict.
///
/// Rules are checked in order of evidential strength: navigation, then a
/// blocking panel closing, then fresh error text, then field progress,
/// then a substantial text shift. Anything below that is `NoChange`,
/// which callers treat as a soft failure even when the action raised no
/// error.
pub fn verdict(pre: &PageSnapshot, post: &PageSnapshot, text_change_ratio: f32) -> (Verdict, String) {
    if pre.url != post.url {
        return (Verdict::Success, "navigation occurred".into());
    }

    if post.modal_count < pre.modal_count {
        return (Verdict::Success, "a blocking panel closed".into());
    }

    let before: HashSet<&str> = pre.error_messages.iter().map(String::as_str).collect();
    if let Some(new_error) = post
        .error_messages
        .iter()
        .find(|e| !before.contains(e.as_str()))
    {
        return (Verdict::Failure, format!("error appeared: {new_error}"));
    }

    if post.filled_field_count() > pre.filled_field_count() {
        return (Verdict::LikelySuccess, "more fields are filled".into());
    }
    if !pre.any_file_filled() && post.any_file_filled() {
        return (Verdict::LikelySuccess, "file attached".into());
    }

    if pre.text_sample != post.text_sample
        && text_difference(&pre.text_sample, &post.text_sample) > text_change_ratio
    {
        return (Verdict::Partial, "page content changed".into());
    }

    if pre.modal_count != post.modal_count {
        // a new modal opening is movement, just not clearly forward
        return (Verdict::Partial, "a panel opened".into());
    }

    (Verdict::NoChange, "no meaningful change detected".into())
}

/// Proportion of the post sample's words that were not present before.
fn text_difference(pre: &str, post: &str) -> f32 {
    let before: HashSet<&str> = pre.split_whitespace().collect();
    let post_words: Vec<&str> = post.split_whitespace().collect();
    if post_words.is_empty() {
        return if before.is_empty() { 0.0 } else { 1.0 };
    }
    let new = post_words.iter().filter(|w| !before.contains(*w)).count();
    new as f32 / post_words.len() as f32
}
