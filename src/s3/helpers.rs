use std::path::Path;

/// Cache-Control for HTML documents: always revalidate
pub const CACHE_CONTROL_HTML: &str = "no-cache, must-revalidate";

/// Cache-Control for fingerprinted static assets
pub const CACHE_CONTROL_IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// Cache-Control for everything else
pub const CACHE_CONTROL_DEFAULT: &str = "public, max-age=3600";

/// Fallback MIME type
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Detect Content-Type based on file extension
///
/// Matching is case-insensitive. Falls back to "application/octet-stream"
/// for unknown types and files without an extension.
pub fn detect_content_type(path: &Path) -> &'static str {
    match lowercase_extension(path).as_deref() {
        // Documents
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") | Some("cjs") => "text/javascript; charset=utf-8",
        Some("json") | Some("map") => "application/json",
        Some("webmanifest") => "application/manifest+json",
        Some("xml") => "application/xml",
        Some("rss") => "application/rss+xml",
        Some("atom") => "application/atom+xml",
        Some("txt") => "text/plain; charset=utf-8",
        Some("csv") => "text/csv",
        Some("md") => "text/markdown",
        Some("pdf") => "application/pdf",
        Some("wasm") => "application/wasm",

        // Image formats
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("ico") => "image/x-icon",

        // Fonts
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",
        Some("eot") => "application/vnd.ms-fontobject",

        // Media
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",

        // Archives
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",

        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Pick the Cache-Control tier for a file
///
/// HTML is always revalidated; scripts, styles, images, fonts and media are
/// cached for a year.
pub fn detect_cache_control(path: &Path) -> &'static str {
    match lowercase_extension(path).as_deref() {
        Some("html") | Some("htm") => CACHE_CONTROL_HTML,
        Some("css") | Some("js") | Some("mjs") | Some("cjs") | Some("wasm") | Some("jpg")
        | Some("jpeg") | Some("png") | Some("gif") | Some("bmp") | Some("svg") | Some("webp")
        | Some("avif") | Some("ico") | Some("woff") | Some("woff2") | Some("ttf")
        | Some("otf") | Some("eot") | Some("mp4") | Some("webm") | Some("mp3") | Some("ogg")
        | Some("wav") => CACHE_CONTROL_IMMUTABLE,
        _ => CACHE_CONTROL_DEFAULT,
    }
}
