//! Text classification: Chinese / kanji / kana-only gates, and voice selection
//! for speech playback. Pure and synchronous.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static CJK_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{3000}-\u{303F}\u{FF00}-\u{FFEF}]").unwrap());

static CHINESE_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[\u{4E00}-\u{9FFF}\u{3000}-\u{303F}\u{FF00}-\u{FFEF}\s，。！？、：；“”‘’（）"']+$"#)
        .unwrap()
});

static KANA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\u{3040}-\u{309F}\u{30A0}-\u{30FF}\u{FF66}-\u{FF9F}]").unwrap()
});

static KANA_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\u{3040}-\u{309F}\u{30A0}-\u{30FF}\u{FF66}-\u{FF9F}\s]+$").unwrap()
});

static HAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\u{4E00}-\u{9FFF}]").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Already Chinese: translation is skipped.
    pub is_chinese: bool,
    /// Contains at least one Han character: furigana enrichment applies.
    /// Fires for Chinese text too, since the scripts share Han characters.
    pub is_japanese_kanji: bool,
    /// Only hiragana/katakana: phonetic lookup is skipped.
    pub is_japanese_kana_only: bool,
}

pub fn classify(text: &str) -> Classification {
    Classification {
        is_chinese: is_chinese(text),
        is_japanese_kanji: has_kanji(text),
        is_japanese_kana_only: is_kana_only(text),
    }
}

/// Kana presence always wins: mixed kanji + kana text is Japanese.
pub fn is_chinese(text: &str) -> bool {
    if KANA.is_match(text) {
        return false;
    }
    CJK_PUNCTUATION.is_match(text) && CHINESE_ONLY.is_match(text)
}

pub fn has_kanji(text: &str) -> bool {
    HAN.is_match(text)
}

pub fn has_kana(text: &str) -> bool {
    KANA.is_match(text)
}

pub fn is_kana_only(text: &str) -> bool {
    KANA_ONLY.is_match(text) && KANA.is_match(text)
}

/// Voice used for pronunciation playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    /// BCP-47 language tag, e.g. "ja-JP".
    pub lang: &'static str,
    pub name: &'static str,
}

const JAPANESE_VOICE: Voice = Voice {
    lang: "ja-JP",
    name: "ja-JP-NanamiNeural",
};

const DEFAULT_VOICE: Voice = Voice {
    lang: "en-US",
    name: "en-US-JennyNeural",
};

/// Pick a voice by script. Kana or Han characters select the Japanese voice;
/// otherwise a reliable whatlang detection picks a matching voice, falling
/// back to the default English one.
pub fn voice_for(text: &str) -> Voice {
    if has_kana(text) || has_kanji(text) {
        return JAPANESE_VOICE;
    }
    whatlang::detect(text)
        .filter(|info| info.is_reliable())
        .and_then(|info| voice_for_lang(info.lang()))
        .unwrap_or(DEFAULT_VOICE)
}

fn voice_for_lang(lang: whatlang::Lang) -> Option<Voice> {
    use whatlang::Lang::*;
    let (lang, name) = match lang {
        Eng => ("en-US", "en-US-JennyNeural"),
        Fra => ("fr-FR", "fr-FR-DeniseNeural"),
        Deu => ("de-DE", "de-DE-KatjaNeural"),
        Spa => ("es-ES", "es-ES-ElviraNeural"),
        Ita => ("it-IT", "it-IT-ElsaNeural"),
        Por => ("pt-BR", "pt-BR-FranciscaNeural"),
        Rus => ("ru-RU", "ru-RU-SvetlanaNeural"),
        Kor => ("ko-KR", "ko-KR-SunHiNeural"),
        _ => return None,
    };
    Some(Voice { lang, name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn han_with_cjk_punctuation_is_chinese() {
        assert!(is_chinese("你好，世界。"));
        assert!(is_chinese("这是一个测试！"));
        assert!(is_chinese("「引用」内容"));
    }

    #[test]
    fn chinese_requires_cjk_punctuation() {
        assert!(!is_chinese("你好世界"));
    }

    #[test]
    fn latin_text_is_not_chinese() {
        assert!(!is_chinese("Hello, world。"));
    }

    #[test]
    fn any_kana_forces_not_chinese() {
        assert!(!is_chinese("日本語を勉強します。"));
        assert!(!is_chinese("カタカナ、漢字。"));
        assert!(!is_chinese("漢字ｱ。"));
    }

    #[test]
    fn kanji_presence_includes_chinese() {
        assert!(has_kanji("日本語"));
        assert!(has_kanji("你好，世界。"));
        assert!(classify("勉強する").is_japanese_kanji);
        assert!(!has_kanji("ひらがな"));
        assert!(!has_kanji("plain text"));
    }

    #[test]
    fn kana_only_detection() {
        assert!(is_kana_only("ひらがな"));
        assert!(is_kana_only("カタカナ ひらがな"));
        assert!(!is_kana_only("漢字かな"));
        assert!(!is_kana_only("   "));
        assert!(!is_kana_only(""));
        assert!(!is_kana_only("abc"));
    }

    #[test]
    fn classify_combines_all_flags() {
        let c = classify("食べる");
        assert!(!c.is_chinese);
        assert!(c.is_japanese_kanji);
        assert!(!c.is_japanese_kana_only);
    }

    #[test]
    fn japanese_text_gets_japanese_voice() {
        assert_eq!(voice_for("こんにちは").lang, "ja-JP");
        assert_eq!(voice_for("漢字").name, "ja-JP-NanamiNeural");
    }

    #[test]
    fn short_latin_text_falls_back_to_default_voice() {
        assert_eq!(voice_for("ok").lang, "en-US");
    }
}
