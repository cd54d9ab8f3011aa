use anyhow::Result;
use unicode_normalization::UnicodeNormalization;
use url::Url;

/// Fallback name used when neither the URL nor the title yield anything usable
pub const DEFAULT_EPISODE_NAME: &str = "transcript";

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Sanitize a title or URL path segment into a filesystem-safe name.
///
/// The output only contains ASCII letters, digits and underscores. Running the
/// function on its own output returns the same string.
pub fn sanitize_filename(input: &str) -> String {
    let without_podcast = input.replace("/podcast/", "");
    let without_query = without_podcast.split('?').next().unwrap_or_default();
    let last_segment = without_query.rsplit('/').next().unwrap_or_default();

    let filtered: String = last_segment
        .nfkd()
        .filter(char::is_ascii)
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '_' => Some(c),
            c if c.is_ascii_whitespace() || c == '-' => Some(' '),
            _ => None,
        })
        .collect();

    filtered
        .split_whitespace()
        .filter(|token| !is_id_token(token))
        .collect::<Vec<_>>()
        .join("_")
}

/// Apple-style catalogue ids (`id1234567`) carry no meaning in a filename
fn is_id_token(token: &str) -> bool {
    token
        .strip_prefix("id")
        .map(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// Derive the episode name used for output files.
///
/// Podcast directory URLs usually carry a readable slug, which wins over the title.
pub fn episode_name(url: &str, fallback_title: Option<&str>) -> String {
    if url.contains("podcast") {
        let segments: Vec<String> = match Url::parse(url) {
            Ok(parsed) => parsed
                .path_segments()
                .map(|segments| segments.map(str::to_string).collect())
                .unwrap_or_default(),
            Err(_) => url
                .split('?')
                .next()
                .unwrap_or_default()
                .split('/')
                .map(str::to_string)
                .collect(),
        };

        for segment in &segments {
            if segment.chars().count() <= 10 {
                continue;
            }
            let decoded = urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.clone());
            let cleaned = decoded.replace('-', " ");
            if cleaned.starts_with("id") || cleaned.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let name = sanitize_filename(&decoded);
            if !name.is_empty() {
                return name;
            }
        }
    }

    fallback_title
        .map(sanitize_filename)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_EPISODE_NAME.to_string())
}

/// Validate and normalize a URL
pub fn validate_and_normalize_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|_| anyhow::anyhow!("Invalid URL format: {}", url))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("URL must use HTTP or HTTPS protocol");
    }

    Ok(parsed.to_string())
}

/// Check if the current environment has required tools
pub async fn check_dependencies() -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available("yt-dlp", "--version").await {
        missing.push("yt-dlp - required for downloading podcast and video audio".to_string());
    }

    if !check_command_available("ffmpeg", "-version").await {
        missing.push("ffmpeg - required for splitting long recordings".to_string());
    }

    if !check_command_available("ffprobe", "-version").await {
        missing.push("ffprobe - required for measuring audio duration".to_string());
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str, version_flag: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg(version_flag)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
