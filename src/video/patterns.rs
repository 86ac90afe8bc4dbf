//! Searches a product page for an embedded video URL.
//!
//! Patterns are tried in a fixed order: embedded JSON state, known CDN URLs,
//! then plain `<video>` markup.

use regex::Regex;

const STATE_MARKERS: &[&str] = &["window.runParams", "window._dida_config_", "__INITIAL_STATE__"];

pub fn find_media_url(html: &str) -> Option<String> {
    from_embedded_json(html)
        .or_else(|| from_cdn_pattern(html))
        .or_else(|| from_video_tags(html))
}

fn is_media_url(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    (lower.starts_with("https://") || lower.starts_with("http://"))
        && lower.split('?').next().is_some_and(|p| p.ends_with(".mp4"))
}

fn first_media_url(value: &json::JsonValue) -> Option<String> {
    if let Some(s) = value.as_str() {
        return is_media_url(s).then(|| s.to_string());
    }
    if value.is_object() {
        return value.entries().find_map(|(_, v)| first_media_url(v));
    }
    value.members().find_map(first_media_url)
}

/// The `{...}` starting at `start`, honoring strings and escapes.
fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..=start + i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn json_blobs(html: &str) -> Vec<String> {
    let mut blobs = Vec::new();

    let document = scraper::Html::parse_document(html);
    if let Ok(selector) =
        scraper::Selector::parse(r#"script[type="application/json"], script#__NEXT_DATA__"#)
    {
        blobs.extend(document.select(&selector).map(|s| s.inner_html()));
    }

    for marker in STATE_MARKERS {
        let mut from = 0;
        while let Some(pos) = html[from..].find(marker) {
            let at = from + pos + marker.len();
            if let Some(open) = html[at..].find('{') {
                if let Some(blob) = balanced_object(html, at + open) {
                    blobs.push(blob.to_string());
                }
            }
            from = at;
        }
    }
    blobs
}

fn from_embedded_json(html: &str) -> Option<String> {
    json_blobs(html).iter().find_map(|blob| match json::parse(blob) {
        Ok(value) => first_media_url(&value),
        Err(e) => {
            log::debug!("Skipping unparsable page state: {e}");
            None
        }
    })
}

fn from_cdn_pattern(html: &str) -> Option<String> {
    let unescaped = html.replace("\\u002F", "/").replace("\\/", "/");
    let re = Regex::new(
        r#"https?://(?:video\.aliexpress-media\.com|cloud\.video\.taobao\.com|[a-z0-9.-]+\.alicdn\.com)/[^"'\s<>\\]+?\.mp4(?:\?[^"'\s<>\\]*)?"#,
    )
    .ok()?;
    re.find(&unescaped).map(|m| m.as_str().replace("&amp;", "&"))
}

fn from_video_tags(html: &str) -> Option<String> {
    let document = scraper::Html::parse_document(html);
    ["video source", "video"].iter().find_map(|css| {
        let selector = scraper::Selector::parse(css).ok()?;
        document.select(&selector).find_map(|el| {
            ["src", "data-src"]
                .iter()
                .filter_map(|attr| el.value().attr(attr))
                .find(|src| src.starts_with("http"))
                .map(ToString::to_string)
        })
    })
}
