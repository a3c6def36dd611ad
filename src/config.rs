use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::model::Isin;

const DEFAULT_CONFIG_FILE: &str = "gpw.toml";

/// Runtime settings: built-in defaults, then `gpw.toml`, then `GPW_*` env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    /// Listing pages to scan for identifiers. `{base_url}`, `{offset}` and
    /// `{limit}` are substituted; a URL containing `{offset}` is paginated.
    pub listing_urls: Vec<String>,
    pub listing_page_size: usize,
    pub max_listing_pages: usize,
    pub detail_url_template: String,
    /// Separate Notoria endpoint. Unset means the metrics table is read from
    /// the detail page itself.
    pub notoria_url_template: Option<String>,
    pub db_path: PathBuf,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub concurrency: usize,
    pub skip_recent_hours: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: "https://www.gpw.pl".into(),
            // Endpoint behind the "show more" pager on /spolki
            listing_urls: vec![
                "{base_url}/ajaxindex.php?action=GPWListaSp&start=listForSearch\
                 &lang=PL&offset={offset}&limit={limit}"
                    .into(),
            ],
            listing_page_size: 100,
            max_listing_pages: 50,
            detail_url_template: "{base_url}/spolka?isin={isin}".into(),
            notoria_url_template: None,
            db_path: PathBuf::from("data/gpw.sqlite"),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .into(),
            timeout_secs: 30,
            max_retries: 3,
            base_backoff_ms: 2000,
            concurrency: 4,
            skip_recent_hours: 24,
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("GPW")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("listing_urls"),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize::<Settings>()
            .context("Invalid configuration")?;
        Ok(settings)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn detail_url(&self, isin: &Isin) -> String {
        self.fill(&self.detail_url_template, isin)
    }

    pub fn notoria_url(&self, isin: &Isin) -> Option<String> {
        self.notoria_url_template
            .as_deref()
            .map(|t| self.fill(t, isin))
    }

    pub fn listing_url(&self, template: &str, offset: usize) -> String {
        template
            .replace("{base_url}", self.base_url())
            .replace("{offset}", &offset.to_string())
            .replace("{limit}", &self.listing_page_size.to_string())
    }

    fn fill(&self, template: &str, isin: &Isin) -> String {
        template
            .replace("{base_url}", self.base_url())
            .replace("{isin}", isin.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_from_templates() {
        let s = Settings {
            base_url: "https://example.test/".into(),
            ..Settings::default()
        };
        let isin: Isin = "PLPKO0000016".parse().unwrap();
        assert_eq!(s.detail_url(&isin), "https://example.test/spolka?isin=PLPKO0000016");
        assert_eq!(s.notoria_url(&isin), None);
        assert_eq!(
            s.listing_url("{base_url}/list?start={offset}", 200),
            "https://example.test/list?start=200"
        );
        assert_eq!(
            s.listing_url(&s.listing_urls[0], 100),
            "https://example.test/ajaxindex.php?action=GPWListaSp&start=listForSearch\
             &lang=PL&offset=100&limit=100"
        );
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let s = Settings::load(None).unwrap();
        assert_eq!(s.max_retries, 3);
        assert!(s.concurrency >= 1);
    }
}
