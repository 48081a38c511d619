//! URL validation, sanitization and platform detection

use anyhow::{anyhow, Result};
use url::Url;

/// Query parameters that only carry share-tracking state and are stripped
/// before a URL is cached, probed or handed to the extraction tool.
const TRACKING_PARAMS: [&str; 2] = ["si", "feature"];

/// Validate that the input parses as a URL at all
pub fn validate_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| anyhow!("Invalid URL format: {}", e))
}

/// Check if URL is something the extraction tool could plausibly handle
pub fn is_valid_media_url(url: &str) -> bool {
    if let Ok(parsed) = Url::parse(url) {
        let scheme = parsed.scheme();
        scheme == "http" || scheme == "https"
    } else {
        false
    }
}

/// Strip tracking query parameters, leaving everything else untouched.
/// Unparseable input is returned as-is; validation rejects it later.
pub fn sanitize_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    let Some(query) = parsed.query().map(str::to_string) else {
        return parsed.to_string();
    };

    // segments are filtered raw: kept parameters keep their original
    // percent-encoding byte for byte
    let kept = query
        .split('&')
        .filter(|segment| {
            let key = segment.split_once('=').map_or(*segment, |(k, _)| k);
            !TRACKING_PARAMS.contains(&key)
        })
        .collect::<Vec<_>>()
        .join("&");

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.set_query(Some(&kept));
    }

    parsed.to_string()
}

/// Map a URL's host to a user-facing platform label
pub fn detect_platform(url: &str) -> String {
    let host = match Url::parse(url) {
        Ok(parsed) => parsed.host_str().unwrap_or("").to_lowercase(),
        Err(_) => return "Other".to_string(),
    };

    let platforms: [(&[&str], &str); 9] = [
        (&["youtube.com", "youtu.be"], "YouTube"),
        (&["vimeo.com"], "Vimeo"),
        (&["tiktok.com"], "TikTok"),
        (&["instagram.com"], "Instagram"),
        (&["twitter.com", "x.com"], "Twitter/X"),
        (&["reddit.com"], "Reddit"),
        (&["soundcloud.com"], "SoundCloud"),
        (&["dailymotion.com"], "Dailymotion"),
        (&["facebook.com", "fb.watch"], "Facebook"),
    ];

    for (hosts, label) in platforms {
        if hosts
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
        {
            return label.to_string();
        }
    }

    "Other".to_string()
}

/// Heuristic playlist detection from URL shape alone, used when no probe
/// metadata is available for the URL yet.
pub fn looks_like_playlist(url: &str) -> bool {
    if let Ok(parsed) = Url::parse(url) {
        if parsed.query_pairs().any(|(key, _)| key == "list") {
            return true;
        }
        return parsed.path().to_lowercase().contains("playlist");
    }
    false
}
