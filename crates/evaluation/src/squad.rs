//! Extractive question answering: span selection, text re-projection and exact match.

use crate::topk::top_k_with_offset;

/// Candidate start and end positions considered per question.
pub const DEFAULT_N_BEST: usize = 20;
/// Longest answer, in word-pieces.
pub const DEFAULT_MAX_ANSWER_LENGTH: usize = 30;

const ARTICLES: [&str; 3] = ["a", "an", "the"];

/// Pick the highest scoring `(start, end)` token span.
///
/// Only the `n_best` best starts and ends are combined. A span is kept when
/// `end >= start`, it is at most `max_answer_length` tokens long and both ends satisfy
/// `is_valid` (typically: the token maps back into the original document).
pub fn best_span<F>(
    start_logits: &[f32],
    end_logits: &[f32],
    n_best: usize,
    max_answer_length: usize,
    is_valid: F,
) -> Option<(usize, usize)>
where
    F: Fn(usize) -> bool,
{
    let starts = top_k_with_offset(start_logits, n_best, 0);
    let ends = top_k_with_offset(end_logits, n_best, 0);

    let mut best: Option<((usize, usize), f32)> = None;
    for &start in &starts {
        if !is_valid(start) {
            continue;
        }
        for &end in &ends {
            if end < start || end - start + 1 > max_answer_length || !is_valid(end) {
                continue;
            }
            let score = start_logits[start] + end_logits[end];
            if best.is_none_or(|(_, current)| score > current) {
                best = Some(((start, end), score));
            }
        }
    }
    best.map(|(span, _)| span)
}

/// Join word-pieces back into space separated words, gluing `##` continuations.
pub fn join_wordpieces<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut text = String::new();
    for token in tokens {
        let token = token.as_ref();
        match token.strip_prefix("##") {
            Some(rest) => text.push_str(rest),
            None => {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(token);
            }
        }
    }
    text
}

/// Lowercase, split on whitespace and split punctuation into its own tokens.
///
/// This is the uncased basic tokenization applied before word-piece splitting, so its
/// output lines up character-for-character (ignoring spaces) with the original words.
pub fn basic_tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split_whitespace() {
        let mut current = String::new();
        for c in word.to_lowercase().chars() {
            if c.is_ascii_punctuation() {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            } else {
                current.push(c);
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
    }
    tokens
}

/// Map a predicted, tokenized answer back onto the original text.
///
/// `orig_tokens` is the tokenized form of `orig_words`; both are expected to contain
/// the same non-space characters. The match of `pred_tokens` inside `orig_tokens` is
/// carried over to `orig_words` through that non-space alignment. When the prediction
/// can't be located, `orig_words` is returned as is.
pub fn final_text(pred_tokens: &str, orig_tokens: &str, orig_words: &str) -> String {
    let fallback = || orig_words.to_string();
    if pred_tokens.is_empty() {
        return fallback();
    }
    let Some(start) = orig_tokens.find(pred_tokens) else {
        return fallback();
    };
    let end = start + pred_tokens.len();

    let mut ns_start = None;
    let mut ns_end = None;
    let non_space = orig_tokens.char_indices().filter(|(_, c)| *c != ' ');
    for (count, (i, _)) in non_space.enumerate() {
        if i >= start && i < end {
            ns_start.get_or_insert(count);
            ns_end = Some(count);
        }
    }
    let (Some(ns_start), Some(ns_end)) = (ns_start, ns_end) else {
        return fallback();
    };

    let mut from = None;
    let mut to = None;
    let non_space = orig_words.char_indices().filter(|(_, c)| *c != ' ');
    for (count, (i, c)) in non_space.enumerate() {
        if count == ns_start {
            from = Some(i);
        }
        if count == ns_end {
            to = Some(i + c.len_utf8());
            break;
        }
    }
    match (from, to) {
        (Some(from), Some(to)) => orig_words[from..to].to_string(),
        _ => fallback(),
    }
}

/// Full answer reconstruction for one predicted span: glue the word-pieces, then
/// re-project onto the original document words the span covers.
pub fn answer_text<S: AsRef<str>, W: AsRef<str>>(span_tokens: &[S], orig_words: &[W]) -> String {
    let pred_tokens = join_wordpieces(span_tokens);
    let orig_words = orig_words
        .iter()
        .map(|w| w.as_ref())
        .collect::<Vec<_>>()
        .join(" ");
    let orig_tokens = basic_tokenize(&orig_words).join(" ");
    final_text(&pred_tokens, &orig_tokens, &orig_words)
}

/// Lowercase, strip punctuation, drop articles and collapse whitespace.
pub fn normalize_answer(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    lowered
        .split_whitespace()
        .filter(|w| !ARTICLES.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Exact match against any of the accepted answers.
pub fn is_result_match<S: AsRef<str>>(ground_truths: &[S], prediction: &str) -> bool {
    let prediction = normalize_answer(prediction);
    ground_truths
        .iter()
        .any(|answer| normalize_answer(answer.as_ref()) == prediction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_text_finds_prediction() {
        let text = "barack obama was president";
        assert_eq!(final_text("barack obama", text, text), "barack obama");
    }

    #[test]
    fn final_text_falls_back_to_original_words() {
        let text = "barack obama was president";
        assert_eq!(final_text("george bush", text, text), text);
        assert_eq!(final_text("", text, text), text);
    }

    #[test]
    fn final_text_restores_case_and_punctuation_spacing() {
        let words = "Barack Obama's term";
        let tokens = basic_tokenize(words).join(" ");
        assert_eq!(tokens, "barack obama ' s term");
        assert_eq!(final_text("obama", &tokens, words), "Obama");
        assert_eq!(final_text("obama ' s", &tokens, words), "Obama's");
    }

    #[test]
    fn normalization_drops_articles_case_and_punctuation() {
        assert_eq!(normalize_answer("The Obama"), "obama");
        assert_eq!(normalize_answer("  an apple, a day!  "), "apple day");
        assert!(is_result_match(&["obama"], "The Obama"));
        assert!(is_result_match(&["Paris", "the city of Paris"], "city of paris."));
        assert!(!is_result_match(&["London"], "Paris"));
    }

    #[test]
    fn wordpieces_are_glued() {
        let tokens = ["the", "un", "##believ", "##able", "story"];
        assert_eq!(join_wordpieces(&tokens), "the unbelievable story");
    }

    #[test]
    fn answer_text_rebuilds_original_spelling() {
        let span = ["denver", "broncos"];
        let words = ["Denver", "Broncos."];
        assert_eq!(answer_text(&span, &words), "Denver Broncos");
    }

    #[test]
    fn best_span_respects_order_and_length() {
        // Best start is 3 but the best end is 1: that pair is invalid.
        let start = [0.0f32, 1.0, 0.0, 5.0, 0.0];
        let end = [0.0f32, 6.0, 2.0, 0.0, 3.0];
        assert_eq!(best_span(&start, &end, 20, 30, |_| true), Some((3, 4)));
        assert_eq!(best_span(&start, &end, 20, 1, |_| true), Some((1, 1)));
    }

    #[test]
    fn best_span_skips_invalid_positions() {
        let start = [9.0f32, 1.0, 0.0];
        let end = [9.0f32, 0.0, 1.0];
        assert_eq!(best_span(&start, &end, 20, 30, |i| i > 0), Some((1, 2)));
        assert_eq!(best_span(&start, &end, 20, 30, |_| false), None);
    }
}
