/// Characters that attach to the preceding word.
const CLOSING: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '%', '»', '…'];

/// Characters that attach to the following word.
const OPENING: &[char] = &['(', '[', '{', '"', '«'];

/// Join recognized words into line text.
///
/// Words are separated by one space, except before closing punctuation and after opening
/// punctuation. Empty words are skipped.
pub fn join_words<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    let mut line = String::new();
    for word in words {
        let word = word.trim();
        if word.is_empty() {
            continue;
        }
        let attach = line.is_empty()
            || word.starts_with(CLOSING)
            || line.ends_with(OPENING);
        if !attach {
            line.push(' ');
        }
        line.push_str(word);
    }
    line
}
