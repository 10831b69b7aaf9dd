//! Prompt construction. Each prompt asks for bare output so the reply can be
//! rendered without post-processing.

/// Translate `selected` as it is used inside `paragraph`, optionally
/// prefixed with a summary of the whole page.
pub fn translation(paragraph: &str, selected: &str, target: &str, page: Option<&str>) -> String {
    let lead = match page.map(str::trim).filter(|p| !p.is_empty()) {
        Some(page) => format!("The page is about: {page}\n"),
        None => String::new(),
    };
    format!(
        "{lead}In the sentence \"{paragraph}\", translate 「{selected}」 into {target}. \
         Output only the {target} translation of 「{selected}」, nothing else."
    )
}

/// One-off summary of the page topic.
pub fn page_context(excerpt: &str) -> String {
    format!(
        "Analyse the topic and context of this web page in two sentences. Page text: {excerpt}"
    )
}

/// Word in `translation` that corresponds to `selected`.
pub fn matching_word(translation: &str, selected: &str) -> String {
    format!(
        "Find the word in 「{translation}」 that corresponds exactly to 「{selected}」, searching \
         from the start. Output only that word, copied as it appears, nothing else."
    )
}

/// Short usage explanation, streamed into the popup.
pub fn explanation(selected: &str, translation: &str, target: &str) -> String {
    format!(
        "「{selected}」 was translated as 「{translation}」. In {target}, briefly explain \
         what it means and how it is used, with one short example. Plain text only."
    )
}

/// Pronunciation: IPA for English, hiragana for Japanese.
pub fn phonetic(selected: &str) -> String {
    format!(
        "Give the pronunciation of 「{selected}」: IPA if it is English, hiragana if it is \
         Japanese. Output only the pronunciation, without brackets or explanation."
    )
}

/// Ruby markup pairing each kanji with its reading.
pub fn furigana(text: &str) -> String {
    format!(
        "Annotate the kanji in 「{text}」 with furigana using HTML ruby markup, e.g. \
         <ruby>漢<rt>かん</rt></ruby>. Keep kana and punctuation unchanged. \
         Output only the HTML."
    )
}

/// Meaning of a word or phrase inside an already translated paragraph.
pub fn lexical(selected: &str, original: &str, target: &str) -> String {
    format!(
        "「{selected}」 appears in the sentence 「{original}」. In {target}, explain what it \
         means in this sentence. Output only the meaning."
    )
}

/// Whole-element translation that keeps tags and attributes.
pub fn full_paragraph(outer_html: &str, target: &str) -> String {
    format!(
        "I will give you an HTML element and its content. Translate the text into {target} \
         but keep the HTML structure and attributes unchanged.\n\n\
         Original HTML:\n{outer_html}\n\n\
         Return the complete HTML element with only the text replaced by the translation. \
         Do not add any explanation or prefix."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_prompt_carries_context_and_target() {
        let p = translation("I read the book.", "book", "Simplified Chinese", None);
        assert!(p.starts_with("In the sentence"));
        assert!(p.contains("I read the book."));
        assert!(p.contains("「book」"));
        assert!(p.contains("Simplified Chinese"));
    }

    #[test]
    fn translation_prompt_leads_with_page_summary() {
        let p = translation("I read the book.", "book", "Simplified Chinese", Some("A diary."));
        assert!(p.starts_with("The page is about: A diary.\n"));
        let blank = translation("I read the book.", "book", "Simplified Chinese", Some("  "));
        assert!(blank.starts_with("In the sentence"));
    }

    #[test]
    fn full_paragraph_prompt_embeds_markup() {
        let p = full_paragraph("<p id=\"x\">Hi</p>", "Simplified Chinese");
        assert!(p.contains("<p id=\"x\">Hi</p>"));
        assert!(p.contains("keep the HTML structure"));
    }
}
