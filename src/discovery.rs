use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::DiscoveryError;
use crate::fetcher::PageSource;
use crate::model::{DiscoveredCompany, Isin};

const DETAIL_LINK_MARKER: &str = "spolka?isin=";

static ISIN_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"isin=([A-Za-z0-9]{12})").unwrap());
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Fetch the configured listing pages and return every company found,
/// deduplicated and ordered by ISIN.
pub async fn discover(
    source: &dyn PageSource,
    settings: &Settings,
) -> Result<Vec<DiscoveredCompany>, DiscoveryError> {
    let mut found: BTreeMap<Isin, DiscoveredCompany> = BTreeMap::new();
    let mut pages = 0usize;

    for template in &settings.listing_urls {
        let paginated = template.contains("{offset}");
        let max_pages = if paginated { settings.max_listing_pages } else { 1 };

        for page in 0..max_pages {
            let url = settings.listing_url(template, page * settings.listing_page_size);
            info!("Fetching listing page: {}", url);
            let html = match source.fetch(&url).await {
                Ok(html) => html,
                // Past the last page the pager endpoint answers with an error
                Err(e) if page > 0 && !e.is_transient() => {
                    info!("Listing ends at {}: {}", url, e);
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            pages += 1;

            let before = found.len();
            for company in parse_listing(&html, settings) {
                found.entry(company.isin.clone()).or_insert(company);
            }
            let added = found.len() - before;
            debug!("{} new identifiers on {}", added, url);
            if added == 0 {
                break;
            }
        }
    }

    if found.is_empty() {
        return Err(DiscoveryError::NoIdentifiers { pages });
    }
    info!("Discovered {} companies on {} listing page(s)", found.len(), pages);
    Ok(found.into_values().collect())
}

/// Extract company identifiers from links to detail pages.
pub fn parse_listing(html: &str, settings: &Settings) -> Vec<DiscoveredCompany> {
    let doc = Html::parse_document(html);
    let mut found: BTreeMap<Isin, DiscoveredCompany> = BTreeMap::new();

    for a in doc.select(&ANCHOR) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        if !href.contains(DETAIL_LINK_MARKER) {
            continue;
        }
        let Some(token) = ISIN_PARAM_RE.captures(href).map(|c| c[1].to_string()) else {
            continue;
        };
        match token.parse::<Isin>() {
            Ok(isin) => {
                found.entry(isin.clone()).or_insert_with(|| DiscoveredCompany {
                    url: settings.detail_url(&isin),
                    isin,
                });
            }
            Err(e) => warn!("Skipping listing link {}: {}", href, e),
        }
    }

    found.into_values().collect()
}
