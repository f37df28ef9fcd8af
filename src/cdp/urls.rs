//! Conversion between file-system paths and `file://` URLs

use std::path::{Path, PathBuf};

use url::Url;

use crate::common::{Error, Result};

/// `file://` URL for a path; relative paths are taken from the current directory
pub fn path_to_file_url(path: &Path) -> Result<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|()| Error::invalid_url(&absolute.display().to_string(), "not a file path"))
}

/// Path for a `file://` URL, or `None` for any other scheme
pub fn file_url_to_path(url: &str) -> Option<PathBuf> {
    let parsed = Url::parse(url).ok()?;
    if parsed.scheme() != "file" {
        return None;
    }
    parsed.to_file_path().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_round_trip_with_spaces() {
        let path = Path::new("/srv/my app/main.js");
        let url = path_to_file_url(path).unwrap();
        assert_eq!(url, "file:///srv/my%20app/main.js");
        assert_eq!(file_url_to_path(&url), Some(path.to_path_buf()));
    }

    #[test]
    fn test_relative_path_is_absolutized() {
        let url = path_to_file_url(Path::new("app.js")).unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("/app.js"));
    }

    #[test]
    fn test_non_file_urls() {
        assert_eq!(file_url_to_path("node:internal/main"), None);
        assert_eq!(file_url_to_path("https://example.com/a.js"), None);
        assert_eq!(file_url_to_path(""), None);
    }
}
