/// Delimiters that commonly separate a page title from site branding.
const TITLE_DELIMITERS: [char; 4] = ['-', ':', '|', ';'];

fn word_count(segment: &str) -> usize {
    segment.split_whitespace().count()
}

/// Splits at delimiter characters that border whitespace, so a hyphen
/// inside a name ("n-tv.de") does not count as a boundary.
fn split_segments(title: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = title.char_indices().collect();
    let mut segments = Vec::new();
    let mut start = 0;
    for (i, &(pos, ch)) in chars.iter().enumerate() {
        if !TITLE_DELIMITERS.contains(&ch) {
            continue;
        }
        let prev_is_space = i == 0 || chars[i - 1].1.is_whitespace();
        let next_is_space = i + 1 == chars.len() || chars[i + 1].1.is_whitespace();
        if prev_is_space || next_is_space {
            segments.push(&title[start..pos]);
            start = pos + ch.len_utf8();
        }
    }
    segments.push(&title[start..]);
    segments
}

/// Derives a short display title by truncating at delimiters: when the
/// title splits into a leading segment of at least three words and a
/// trailing segment of one to three words, the trailing segment is the
/// short title ("News, headlines & videos - n-tv.de" becomes
/// "n-tv.de"). Anything else keeps the full title.
pub fn generate_short_title(title: &str) -> String {
    let segments: Vec<&str> = split_segments(title)
        .into_iter()
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect();
    if segments.len() < 2 {
        return title.to_string();
    }
    let first = segments[0];
    let last = segments[segments.len() - 1];
    let last_words = word_count(last);
    if word_count(first) >= 3 && (1..=3).contains(&last_words) {
        last.to_string()
    } else {
        title.to_string()
    }
}
