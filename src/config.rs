use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::sheet::SheetLayout;

pub const DEFAULT_CREDS_PATH: &str = "/etc/secrets/GOOGLE_CREDS";
pub const DEFAULT_INSTAGRAM_COOKIES_PATH: &str = "/etc/secrets/INSTAGRAM_COOKIES";
// Forces the global storefront so product pages render the video block.
pub const DEFAULT_DIRECT_COOKIES: &str =
    "aep_usuc_f=site=glo&c_tp=USD&region=US&b_locale=en_US; intl_locale=en_US";

/// Where the service account key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Inline(String),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SheetConfig {
    pub sheet_id: String,
    pub layout: SheetLayout,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub credentials: CredentialSource,
    pub drive_folder_id: String,
    pub make_public: bool,
    pub sheet: Option<SheetConfig>,

    pub instagram_cookies: Option<String>,
    pub instagram_cookies_path: PathBuf,
    pub direct_cookies: String,
    pub webdriver_url: Option<String>,

    pub ytdlp_bin: PathBuf,
    pub ytdlp_timeout: Duration,
    pub download_dir: PathBuf,
    pub http_timeout: Duration,

    pub upload_max_attempts: u32,
    pub upload_backoff: Duration,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let s = s.trim().to_string();
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    })
}

fn parse_bool(key: &str, value: Option<String>, default: bool) -> Result<bool> {
    match non_empty(value) {
        None => Ok(default),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("Invalid boolean for {key}: {v}")),
        },
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
    match non_empty(value) {
        None => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid number for {key}: {v}")),
    }
}

fn parse_columns(value: &str) -> Result<(String, String)> {
    let (from, to) = value
        .split_once(':')
        .ok_or_else(|| anyhow!("SHEET_WRITE_COLUMNS must look like F:G, got {value}"))?;
    let valid = |c: &str| !c.is_empty() && c.chars().all(|ch| ch.is_ascii_alphabetic());
    if !valid(from) || !valid(to) {
        return Err(anyhow!("SHEET_WRITE_COLUMNS must look like F:G, got {value}"));
    }
    Ok((from.to_ascii_uppercase(), to.to_ascii_uppercase()))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| non_empty(lookup(key));

        let credentials = match get("GOOGLE_CREDS_JSON") {
            Some(blob) => CredentialSource::Inline(blob),
            None => CredentialSource::File(PathBuf::from(
                get("GOOGLE_CREDS_PATH").unwrap_or_else(|| DEFAULT_CREDS_PATH.to_string()),
            )),
        };

        let drive_folder_id =
            get("DRIVE_FOLDER_ID").context("DRIVE_FOLDER_ID must be set")?;

        let sheet = match get("SHEET_ID") {
            None => None,
            Some(sheet_id) => {
                let read_range = get("SHEET_RANGE").unwrap_or_else(|| "videos!C2:G".to_string());
                let write_columns = parse_columns(
                    &get("SHEET_WRITE_COLUMNS").unwrap_or_else(|| "F:G".to_string()),
                )?;
                let layout = SheetLayout::parse(&read_range, write_columns)
                    .context("Invalid SHEET_RANGE")?;
                Some(SheetConfig { sheet_id, layout })
            }
        };

        let upload_max_attempts =
            parse_number("UPLOAD_MAX_ATTEMPTS", lookup("UPLOAD_MAX_ATTEMPTS"), 5)?;
        if upload_max_attempts == 0 {
            return Err(anyhow!("UPLOAD_MAX_ATTEMPTS must be at least 1"));
        }

        Ok(Self {
            listen_addr: get("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            credentials,
            drive_folder_id,
            make_public: parse_bool("DRIVE_MAKE_PUBLIC", lookup("DRIVE_MAKE_PUBLIC"), false)?,
            sheet,

            instagram_cookies: get("IG_COOKIES"),
            instagram_cookies_path: PathBuf::from(
                get("INSTAGRAM_COOKIES_PATH")
                    .unwrap_or_else(|| DEFAULT_INSTAGRAM_COOKIES_PATH.to_string()),
            ),
            direct_cookies: get("DIRECT_COOKIES")
                .unwrap_or_else(|| DEFAULT_DIRECT_COOKIES.to_string()),
            webdriver_url: get("WEBDRIVER_URL"),

            ytdlp_bin: PathBuf::from(get("YTDLP_BIN").unwrap_or_else(|| "yt-dlp".to_string())),
            ytdlp_timeout: Duration::from_secs(parse_number(
                "YTDLP_TIMEOUT_SECS",
                lookup("YTDLP_TIMEOUT_SECS"),
                600,
            )?),
            download_dir: get("DOWNLOAD_DIR").map_or_else(std::env::temp_dir, PathBuf::from),
            http_timeout: Duration::from_secs(parse_number(
                "HTTP_TIMEOUT_SECS",
                lookup("HTTP_TIMEOUT_SECS"),
                60,
            )?),

            upload_max_attempts,
            upload_backoff: Duration::from_secs(parse_number(
                "UPLOAD_BACKOFF_SECS",
                lookup("UPLOAD_BACKOFF_SECS"),
                5,
            )?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_only_folder() {
        let cfg = config_from(&[("DRIVE_FOLDER_ID", "folder123")]).unwrap();
        assert_eq!(cfg.drive_folder_id, "folder123");
        assert_eq!(cfg.listen_addr, "0.0.0.0:8000");
        assert_eq!(
            cfg.credentials,
            CredentialSource::File(PathBuf::from(DEFAULT_CREDS_PATH))
        );
        assert!(!cfg.make_public);
        assert!(cfg.sheet.is_none());
        assert_eq!(cfg.upload_max_attempts, 5);
        assert_eq!(cfg.upload_backoff, Duration::from_secs(5));
        assert_eq!(cfg.direct_cookies, DEFAULT_DIRECT_COOKIES);
    }

    #[test]
    fn missing_folder_is_an_error() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("DRIVE_FOLDER_ID", "   ")]).is_err());
    }

    #[test]
    fn inline_credentials_win_over_path() {
        let cfg = config_from(&[
            ("DRIVE_FOLDER_ID", "f"),
            ("GOOGLE_CREDS_JSON", "{\"a\":1}"),
            ("GOOGLE_CREDS_PATH", "/tmp/creds.json"),
        ])
        .unwrap();
        assert_eq!(cfg.credentials, CredentialSource::Inline("{\"a\":1}".to_string()));
    }

    #[test]
    fn parses_flags_and_sheet() {
        let cfg = config_from(&[
            ("DRIVE_FOLDER_ID", "f"),
            ("DRIVE_MAKE_PUBLIC", "TRUE"),
            ("SHEET_ID", "sheet1"),
            ("SHEET_WRITE_COLUMNS", "h:i"),
            ("UPLOAD_BACKOFF_SECS", "10"),
        ])
        .unwrap();
        assert!(cfg.make_public);
        let sheet = cfg.sheet.unwrap();
        assert_eq!(sheet.sheet_id, "sheet1");
        assert_eq!(sheet.layout.read_range, "videos!C2:G");
        assert_eq!(sheet.layout.first_row, 2);
        assert_eq!(sheet.layout.write_columns, ("H".to_string(), "I".to_string()));
        assert_eq!(cfg.upload_backoff, Duration::from_secs(10));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config_from(&[("DRIVE_FOLDER_ID", "f"), ("DRIVE_MAKE_PUBLIC", "maybe")]).is_err());
        assert!(config_from(&[("DRIVE_FOLDER_ID", "f"), ("HTTP_TIMEOUT_SECS", "soon")]).is_err());
        assert!(config_from(&[("DRIVE_FOLDER_ID", "f"), ("UPLOAD_MAX_ATTEMPTS", "0")]).is_err());
        assert!(config_from(&[
            ("DRIVE_FOLDER_ID", "f"),
            ("SHEET_ID", "s"),
            ("SHEET_WRITE_COLUMNS", "F")
        ])
        .is_err());
    }

    #[test]
    fn bad_sheet_range_is_a_configuration_error() {
        let err = config_from(&[
            ("DRIVE_FOLDER_ID", "f"),
            ("SHEET_ID", "s"),
            ("SHEET_RANGE", "videos!C2x:G"),
        ])
        .unwrap_err();
        assert!(format!("{err:#}").contains("SHEET_RANGE"), "{err:#}");
    }
}
