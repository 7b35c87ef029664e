//! Module specifier normalization.

/// Normalize `specifier` as imported from the module named `referrer`.
///
/// - `./x` and `../x` resolve against the referrer's directory
/// - `/x` is rooted
/// - anything else (bare names) is kept as written, minus `.` segments
///
/// `..` never climbs above the root. Normalized names carry no leading
/// `./` or `/`.
pub fn normalize_specifier(referrer: &str, specifier: &str) -> String {
    let relative = specifier.starts_with("./") || specifier.starts_with("../");

    let mut segments: Vec<&str> = Vec::new();

    if relative {
        // Directory part of the referrer
        if let Some((dir, _)) = referrer.rsplit_once('/') {
            segments.extend(dir.split('/').filter(|s| !s.is_empty()));
        }
    }

    for segment in specifier.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    segments.join("/")
}
