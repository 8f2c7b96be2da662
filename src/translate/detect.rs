// src/translate/detect.rs
//! Script-range fallback used when an engine cannot detect the language.

/// Best-effort ISO 639-1 guess from the Unicode scripts present in `text`.
///
/// Kana wins over Han so Japanese text with kanji is not reported as Chinese.
pub fn heuristic_language(text: &str) -> &'static str {
    let mut han = 0usize;
    let mut kana = 0usize;
    let mut hangul = 0usize;
    let mut cyrillic = 0usize;
    let mut arabic = 0usize;
    let mut thai = 0usize;

    for c in text.chars() {
        match c as u32 {
            0x3040..=0x30FF | 0x31F0..=0x31FF => kana += 1,
            0x4E00..=0x9FFF | 0x3400..=0x4DBF => han += 1,
            0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F => hangul += 1,
            0x0400..=0x04FF => cyrillic += 1,
            0x0600..=0x06FF => arabic += 1,
            0x0E00..=0x0E7F => thai += 1,
            _ => {}
        }
    }

    if kana > 0 {
        "ja"
    } else if hangul > 0 {
        "ko"
    } else if han > 0 {
        "zh"
    } else if cyrillic > 0 {
        "ru"
    } else if arabic > 0 {
        "ar"
    } else if thai > 0 {
        "th"
    } else {
        "en"
    }
}

#[cfg(test)]
mod tests {
    use super::heuristic_language;

    #[test]
    fn scripts_map_to_languages() {
        assert_eq!(heuristic_language("東京で会議があります"), "ja");
        assert_eq!(heuristic_language("今天天气很好"), "zh");
        assert_eq!(heuristic_language("안녕하세요"), "ko");
        assert_eq!(heuristic_language("Привет, мир"), "ru");
        assert_eq!(heuristic_language("مرحبا"), "ar");
        assert_eq!(heuristic_language("สวัสดี"), "th");
        assert_eq!(heuristic_language("Hello world"), "en");
        assert_eq!(heuristic_language(""), "en");
    }
}
