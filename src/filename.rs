const INVALID_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];
const EXTENSION: &str = ".mp4";

/// Turns a user supplied name into a filesystem-safe `.mp4` filename.
///
/// An empty (or blank) name is replaced by a fresh UUID.
pub fn sanitize_filename(raw: Option<&str>) -> String {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    let generated;
    let source = if trimmed.is_empty() {
        generated = uuid::Uuid::new_v4().to_string();
        generated.as_str()
    } else {
        trimmed
    };

    let mut name = String::with_capacity(source.len() + EXTENSION.len());
    let mut in_invalid_run = false;
    let mut in_space_run = false;
    for c in source.chars() {
        if INVALID_CHARS.contains(&c) {
            if !in_invalid_run {
                name.push('_');
            }
            in_invalid_run = true;
            in_space_run = false;
        } else if c.is_whitespace() {
            if !in_space_run {
                name.push(' ');
            }
            in_space_run = true;
            in_invalid_run = false;
        } else {
            name.push(c);
            in_invalid_run = false;
            in_space_run = false;
        }
    }

    if !name.to_lowercase().ends_with(EXTENSION) {
        name.push_str(EXTENSION);
    }
    name
}

/// Name for the n-th (1-based) link of a row; later links get an ordinal suffix.
pub fn ordinal_name(base: &str, position: usize) -> String {
    if position <= 1 {
        base.to_string()
    } else {
        format!("{base} ({position})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_clean(name: &str) {
        assert!(name.ends_with(".mp4"), "{name}");
        assert!(!name.contains(INVALID_CHARS), "{name}");
        let chars: Vec<char> = name.chars().collect();
        assert!(
            !chars
                .windows(2)
                .any(|w| w[0].is_whitespace() && w[1].is_whitespace()),
            "{name}"
        );
    }

    #[test]
    fn replaces_invalid_characters() {
        assert_eq!(sanitize_filename(Some("a/b:c")), "a_b_c.mp4");
        assert_eq!(sanitize_filename(Some(r#"what?<>"|*"#)), "what_.mp4");
        assert_eq!(sanitize_filename(Some(r"dir\file")), "dir_file.mp4");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(sanitize_filename(Some("  my \t\n clip  ")), "my clip.mp4");
    }

    #[test]
    fn keeps_existing_extension_case_insensitive() {
        assert_eq!(sanitize_filename(Some("Clip.MP4")), "Clip.MP4");
        assert_eq!(sanitize_filename(Some("clip.mp4")), "clip.mp4");
        assert_eq!(sanitize_filename(Some("clip.mov")), "clip.mov.mp4");
    }

    #[test]
    fn empty_input_gets_unique_name() {
        let a = sanitize_filename(None);
        let b = sanitize_filename(Some("   "));
        assert_ne!(a, b);
        assert!(a.len() > ".mp4".len());
        assert_clean(&a);
        assert_clean(&b);
    }

    #[test]
    fn output_is_always_clean_and_idempotent() {
        let inputs = [
            "Demo",
            "Demo (2)",
            "a  b  c",
            "::??**",
            " x . ",
            "tab\there",
            "ünïcødé / name",
            "already.mp4",
            "\"quoted\" <name> | pipe",
        ];
        for input in inputs {
            let once = sanitize_filename(Some(input));
            assert_clean(&once);
            assert_eq!(sanitize_filename(Some(once.as_str())), once, "input {input:?}");
        }
    }

    #[test]
    fn ordinal_suffix_only_after_first_link() {
        assert_eq!(ordinal_name("Demo", 1), "Demo");
        assert_eq!(ordinal_name("Demo", 2), "Demo (2)");
        assert_eq!(ordinal_name("Demo", 3), "Demo (3)");
    }
}
