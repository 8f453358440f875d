/// Windows-safe local name for a downloaded document.
///
/// Uses `preferred` when given, else the last segment of `remote_path` with
/// any query string dropped.
pub fn download_filename(preferred: Option<&str>, remote_path: &str) -> String {
    let raw = match preferred {
        Some(name) => name,
        None => remote_path
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("document"),
    };
    sanitize(raw)
}

fn sanitize(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches(&['_', ' ', '.'][..]);

    let mut compacted = String::with_capacity(cleaned.len());
    let mut prev_underscore = false;
    for c in cleaned.chars() {
        if c == '_' && prev_underscore {
            continue;
        }
        prev_underscore = c == '_';
        compacted.push(c);
    }
    if compacted.is_empty() {
        compacted.push_str("document");
    }

    let mut name: String = compacted.chars().take(120).collect();
    let stem = name.split('.').next().unwrap_or_default();
    if is_reserved_windows_name(stem) {
        name.insert(stem.len(), '_');
    }
    name
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_last_path_segment_without_query() {
        assert_eq!(
            download_filename(None, "/api/documents/7/download?inline=1"),
            "download"
        );
        assert_eq!(
            download_filename(None, "/files/Chapter 3: Cells.pdf"),
            "Chapter 3_ Cells.pdf"
        );
    }

    #[test]
    fn preferred_name_is_sanitized() {
        assert_eq!(download_filename(Some("..notes/week*1.docx"), "/x"), "notes_week_1.docx");
        assert_eq!(download_filename(Some("con.pdf"), "/x"), "con_.pdf");
        assert_eq!(download_filename(Some("///"), "/x"), "document");
    }
}
