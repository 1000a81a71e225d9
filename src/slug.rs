//! Filesystem-safe names derived from video titles.

use std::path::Path;

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

const DEFAULT_EXTENSION: &str = "mp4";

/// Turns an arbitrary title into a lowercase, hyphen-separated slug.
///
/// The title is decomposed (NFD) first so accented letters keep their base
/// letter and lose the mark: `Café` becomes `cafe`. Anything else that is not
/// an ASCII letter, ASCII digit, ASCII whitespace, `-` or `_` is dropped,
/// emoji and Unicode spaces included. Runs of whitespace, underscores and
/// hyphens become a single `-`, and the result never starts or ends with one.
/// Inputs with nothing left to keep produce `""`.
pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_separator = false;

    for c in raw.nfd().filter(|c| !is_combining_mark(*c)) {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else if c.is_ascii_whitespace() || c == '_' || c == '-' {
            pending_separator = true;
        }
        // Everything else is stripped without acting as a separator.
    }

    slug
}

/// Picks the final file name for a merged download.
///
/// An explicit name wins and gets `.mp4` appended when it has no extension.
/// Otherwise the slugged title is used, falling back to the video id when the
/// title has no usable characters.
pub fn output_file_name(explicit: Option<&str>, title: &str, video_id: &str) -> String {
    if let Some(name) = explicit.map(str::trim).filter(|name| !name.is_empty()) {
        if Path::new(name).extension().is_some() {
            return name.to_owned();
        }
        return format!("{name}.{DEFAULT_EXTENSION}");
    }

    let stem = slugify(title);
    let stem = if stem.is_empty() {
        slugify(video_id)
    } else {
        stem
    };
    let stem = if stem.is_empty() {
        "video".to_owned()
    } else {
        stem
    };
    format!("{stem}.{DEFAULT_EXTENSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_matches_known_titles() {
        let cases = [
            ("Test 🚀 Video_Title... <>", "test-video-title"),
            ("Another Test: Filename@Here!", "another-test-filenamehere"),
            ("file_name_123...", "file-name-123"),
            ("file_with_emoji_😀_and_chars", "file-with-emoji-and-chars"),
            ("   Leading and trailing   ", "leading-and-trailing"),
            ("<>:|*", ""),
            ("   ", ""),
            ("My file name", "my-file-name"),
            (
                "  some @@file__ with$$$  random  spaces  ",
                "some-file-with-random-spaces",
            ),
            ("--already--hyphenated--", "already-hyphenated"),
            ("Café Ñandú", "cafe-nandu"),
            ("Über Straße", "uber-strae"),
            ("Crème\u{0301}", "creme"),
        ];

        for (input, expected) in cases {
            assert_eq!(slugify(input), expected, "input: {input:?}");
        }
    }

    #[test]
    fn unicode_spaces_are_stripped_not_separators() {
        assert_eq!(slugify("a\u{a0}b"), "ab");
        assert_eq!(slugify("a\u{2003}b c"), "ab-c");
        assert_eq!(slugify("a\tb\nc"), "a-b-c");
    }

    #[test]
    fn slugify_output_is_canonical() {
        let inputs = [
            "",
            "-",
            "_ _ _",
            "A  B\tC\nD",
            "Rust 2024 | Edition Guide (Part 1/3)",
            "日本語のタイトル",
            "Ångström Œuvre naïve",
            "x-_-y",
            "TRAILING___",
        ];

        for input in inputs {
            let slug = slugify(input);
            assert!(
                slug.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
                "unexpected character in {slug:?}"
            );
            assert!(!slug.starts_with('-') && !slug.ends_with('-'));
            assert!(!slug.contains("--"));
            assert_eq!(slugify(&slug), slug);
        }
    }

    #[test]
    fn output_file_name_prefers_explicit_name() {
        assert_eq!(output_file_name(Some("clip.mkv"), "Title", "id"), "clip.mkv");
        assert_eq!(output_file_name(Some("clip"), "Title", "id"), "clip.mp4");
        assert_eq!(output_file_name(Some("  "), "My Title", "id"), "my-title.mp4");
    }

    #[test]
    fn output_file_name_falls_back_to_id() {
        assert_eq!(output_file_name(None, "🚀🚀", "dQw4w9WgXcQ"), "dqw4w9wgxcq.mp4");
        assert_eq!(output_file_name(None, "!!!", "???"), "video.mp4");
    }
}
