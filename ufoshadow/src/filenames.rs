//! Turning glyph and layer names into file names.
//!
//! See <https://unifiedfontobject.org/versions/ufo3/conventions/#common-user-name-to-file-name-algorithm>

use std::collections::HashSet;

pub const GLIF_SUFFIX: &str = ".glif";

const MAX_FILE_NAME_LENGTH: usize = 255;
const CLASH_DIGITS: usize = 15;

#[inline]
fn ok_for_filenames(c: char) -> bool {
    match c as u32 {
        v if v < 32 => false,
        0x7F => false,
        0x0022 => false, // quotation mark
        0x002a => false, // asterisk
        0x002b => false, // plus sign
        0x002f => false, // solidus
        0x003a => false, // colon
        0x003c => false, // less-than sign
        0x003e => false, // greater-than sign
        0x003f => false, // question mark
        0x005b => false, // left square bracket
        0x005c => false, // reverse solidus
        0x005d => false, // right square bracket
        0x007c => false, // vertical line
        _ => true,
    }
}

fn is_reserved_filename(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    if upper.len() == 2 && upper.ends_with(':') {
        return upper.as_bytes()[0].is_ascii_uppercase();
    }
    matches!(
        upper.as_str(),
        "CON" | "PRN" | "AUX" | "CLOCK$" | "NUL" | "COM1" | "COM2" | "COM3" | "COM4" | "LPT1"
            | "LPT2" | "LPT3"
    )
}

/// Names already taken in a directory, compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsedNames(HashSet<String>);

impl UsedNames {
    pub fn new() -> UsedNames {
        Default::default()
    }

    pub fn insert(&mut self, name: &str) -> bool {
        self.0.insert(name.to_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.0.remove(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(&name.to_lowercase())
    }
}

impl<'a> FromIterator<&'a str> for UsedNames {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        let mut used = UsedNames::new();
        for name in iter {
            used.insert(name);
        }
        used
    }
}

/// Transliterate a user name into something every filesystem accepts.
///
/// Illegal characters become `_`, every upper case letter is followed by `_`,
/// a leading `.` becomes `_` and reserved device names get a `_` prefix.
pub fn safe_name(name: &str) -> String {
    let mut filename = String::with_capacity(name.len() * 2);
    for ch in name.chars() {
        if ok_for_filenames(ch) {
            filename.push(ch);
        } else {
            filename.push('_');
        }
        if ch.is_uppercase() {
            filename.push('_');
        }
    }
    if filename.starts_with('.') {
        filename.replace_range(0..1, "_");
    }
    filename
        .split('.')
        .map(|part| {
            if is_reserved_filename(part) {
                format!("_{part}")
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// `prefix + safe_name(name) + suffix`, made unique against `used`.
///
/// Collisions are resolved by appending a 15 digit counter to the name part,
/// so the result is deterministic for a given set of used names.
pub fn user_name_to_file_name(name: &str, used: &UsedNames, prefix: &str, suffix: &str) -> String {
    let budget = MAX_FILE_NAME_LENGTH
        .saturating_sub(prefix.chars().count())
        .saturating_sub(suffix.chars().count());
    let safe = safe_name(name);
    let base = truncate_chars(&safe, budget);

    let candidate = format!("{prefix}{base}{suffix}");
    if !used.contains(&candidate) {
        return candidate;
    }

    let base = truncate_chars(base, budget.saturating_sub(CLASH_DIGITS));
    let mut counter: u64 = 1;
    loop {
        let candidate = format!("{prefix}{base}{counter:0width$}{suffix}", width = CLASH_DIGITS);
        if !used.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// The file name for a glyph, unique within `used`.
pub fn glyph_file_name(glyph_name: &str, used: &UsedNames) -> String {
    user_name_to_file_name(glyph_name, used, "", GLIF_SUFFIX)
}

/// The directory name for a non-default layer, unique within `used`.
pub fn layer_directory_name(layer_name: &str, used: &UsedNames) -> String {
    user_name_to_file_name(layer_name, used, "glyphs.", "")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rstest::rstest;

    use super::*;

    fn assert_unique_for_caseinsensitive_fs(names: &[&str]) {
        let mut used = UsedNames::new();
        let filenames: HashSet<_> = names
            .iter()
            .map(|n| {
                let file_name = glyph_file_name(n, &used);
                used.insert(&file_name);
                file_name.to_lowercase()
            })
            .collect();
        assert_eq!(
            names.len(),
            filenames.len(),
            "{names:?} became {filenames:?}"
        );
    }

    #[rstest]
    #[case("a", "a.glif")]
    #[case("A", "A_.glif")]
    #[case("AE", "A_E_.glif")]
    #[case("Ae", "A_e.glif")]
    #[case("ae", "ae.glif")]
    #[case("aE", "aE_.glif")]
    #[case("a.alt", "a.alt.glif")]
    #[case("A.alt", "A_.alt.glif")]
    #[case("A.Alt", "A_.A_lt.glif")]
    #[case("T_H", "T__H_.glif")]
    #[case(".notdef", "_notdef.glif")]
    #[case("con", "_con.glif")]
    #[case("CON", "C_O_N_.glif")]
    #[case("alt.con", "alt._con.glif")]
    #[case("a/b", "a_b.glif")]
    #[case("a*b|c", "a_b_c.glif")]
    fn glyph_names(#[case] glyph: &str, #[case] expected: &str) {
        assert_eq!(expected, glyph_file_name(glyph, &UsedNames::new()));
    }

    #[test]
    fn lower_and_upper_a() {
        assert_unique_for_caseinsensitive_fs(&["a", "A"]);
    }

    #[test]
    fn collision_gets_counter() {
        let used: UsedNames = ["a.glif"].into_iter().collect();
        assert_eq!("a000000000000001.glif", glyph_file_name("a", &used));
        // case-insensitive
        let used: UsedNames = ["A.GLIF", "a000000000000001.glif"].into_iter().collect();
        assert_eq!("a000000000000002.glif", glyph_file_name("a", &used));
    }

    #[test]
    fn long_names_fit() {
        let name = "a".repeat(300);
        let file_name = glyph_file_name(&name, &UsedNames::new());
        assert_eq!(MAX_FILE_NAME_LENGTH, file_name.chars().count());
        let used: UsedNames = [file_name.as_str()].into_iter().collect();
        let clash = glyph_file_name(&name, &used);
        assert_eq!(MAX_FILE_NAME_LENGTH, clash.chars().count());
        assert!(clash.ends_with("000000000000001.glif"));
    }

    #[test]
    fn layer_directories() {
        let used: UsedNames = ["glyphs"].into_iter().collect();
        assert_eq!(
            "glyphs.public.background",
            layer_directory_name("public.background", &used)
        );
        assert_eq!("glyphs.B_old", layer_directory_name("Bold", &used));
    }
}
