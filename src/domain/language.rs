/// Language metadata and source-unit counting rules
///
/// Word-count thresholds are defined over *source* text. Space-separated
/// languages count whitespace-delimited tokens; character-based languages
/// count characters after stripping punctuation and whitespace.

/// Languages whose source units are counted per character
const CHARACTER_BASED: &[&str] = &["ja"];

pub fn is_character_based(code: &str) -> bool {
    CHARACTER_BASED.contains(&code)
}

/// Count source units for threshold accounting
pub fn count_source_units(text: &str, language: &str) -> usize {
    if is_character_based(language) {
        text.chars()
            .filter(|c| !c.is_whitespace() && !is_punctuation(*c))
            .count()
    } else {
        text.split_whitespace().count()
    }
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation() || matches!(c, '。' | '、' | '．' | '，' | '！' | '？' | '「' | '」' | '『' | '』' | '・' | '：' | '；')
}

/// Human-readable language name for prompt construction
pub fn display_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "ja" => "Japanese",
        "zh" => "Chinese",
        "ko" => "Korean",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "ru" => "Russian",
        "pt" => "Portuguese",
        "it" => "Italian",
        "hi" => "Hindi",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_english_counts_words() {
        assert_eq!(count_source_units("Life asks questions.", "en"), 3);
        assert_eq!(count_source_units("  spaced   out  ", "en"), 2);
        assert_eq!(count_source_units("", "en"), 0);
    }

    #[test]
    fn test_japanese_counts_characters() {
        // Punctuation and whitespace are stripped before counting
        assert_eq!(count_source_units("こんにちは。", "ja"), 5);
        assert_eq!(count_source_units("人生は 問いかける。", "ja"), 8);
    }

    #[test]
    fn test_character_based_detection() {
        assert!(is_character_based("ja"));
        assert!(!is_character_based("en"));
        assert!(!is_character_based("es"));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(display_name("en"), "English");
        assert_eq!(display_name("ja"), "Japanese");
        assert_eq!(display_name("xx"), "xx");
    }
}
