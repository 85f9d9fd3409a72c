//! Content classification.
//!
//! Decides, from filename and declared MIME, whether a file is text-like
//! (its server-rendered content is fetched after upload) or opaque
//! (metadata only), and whether it is a structured-data file eligible for
//! server-side processing.

/// File extensions whose content is fetched as text.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "csv", "json", "log", "md", "xml", "html", "css", "js", "ts", "py", "java", "cpp", "c",
    "h",
];

/// Extensions eligible for server-side structured processing.
const STRUCTURED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls", "json", "txt", "log"];

/// MIME types (exact) treated as text-like in addition to the `text/*` prefix.
const TEXT_MIMES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
];

fn extension(name: &str) -> Option<String> {
    let ext = name.rsplit('.').next()?;
    if ext.len() == name.len() {
        // No dot at all.
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Whether the file's textual content should be fetched after upload.
///
/// Extension and MIME each classify independently; if either says
/// text-like, the file is text-like.
pub fn is_text_like(name: &str, mime: &str) -> bool {
    let by_extension = extension(name)
        .map(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false);

    let mime = mime.to_ascii_lowercase();
    let by_mime = mime.starts_with("text/") || TEXT_MIMES.contains(&mime.as_str());

    by_extension || by_mime
}

/// Whether the file warrants server-side processing into a structured
/// summary (spreadsheets and data files).
pub fn is_structured_data(name: &str) -> bool {
    extension(name)
        .map(|ext| STRUCTURED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Declared MIME for a local file picked up from disk.
pub fn mime_for_name(name: &str) -> &'static str {
    match extension(name).as_deref() {
        Some("md") => "text/markdown",
        Some("txt" | "log") => "text/plain",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("xls") => "application/vnd.ms-excel",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_by_extension() {
        assert!(is_text_like("notes.txt", "application/octet-stream"));
        assert!(is_text_like("main.PY", "application/octet-stream"));
        assert!(is_text_like("data.csv", ""));
    }

    #[test]
    fn text_by_mime() {
        assert!(is_text_like("payload.bin", "application/json"));
        assert!(is_text_like("readme", "text/plain"));
        assert!(is_text_like("page", "TEXT/HTML"));
    }

    #[test]
    fn opaque_files() {
        assert!(!is_text_like("photo.png", "image/png"));
        assert!(!is_text_like("archive.tar.gz", "application/gzip"));
        assert!(!is_text_like("noext", "application/octet-stream"));
    }

    #[test]
    fn structured_extensions() {
        assert!(is_structured_data("sales.xlsx"));
        assert!(is_structured_data("sales.XLS"));
        assert!(is_structured_data("rows.csv"));
        assert!(is_structured_data("notes.txt"));
        assert!(!is_structured_data("photo.png"));
        assert!(!is_structured_data("page.html"));
    }

    #[test]
    fn spreadsheets_are_not_text_like() {
        assert!(!is_text_like(
            "sales.xlsx",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        ));
    }
}
