use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db::{self, Outcome, StoredPage};
use crate::error::{FetchError, StoreError};
use crate::fetcher::PageSource;
use crate::model::{CompanyRecord, DiscoveredCompany, Isin, SectionKind};
use crate::parser::{self, NotoriaInput};

#[derive(Debug, Clone, PartialEq)]
pub struct PartialCompany {
    pub isin: Isin,
    pub name: Option<String>,
    pub failed_sections: Vec<SectionKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedCompany {
    pub isin: Isin,
    pub name: Option<String>,
    pub reason: String,
}

/// Counts and per-company failures of one pipeline run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub partial: Vec<PartialCompany>,
    pub failed: Vec<FailedCompany>,
}

impl RunSummary {
    fn sort(&mut self) {
        self.partial.sort_by(|a, b| a.isin.cmp(&b.isin));
        self.failed.sort_by(|a, b| a.isin.cmp(&b.isin));
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Attempted: {}", self.attempted)?;
        writeln!(f, "Succeeded: {}", self.succeeded)?;
        writeln!(f, "Partial:   {}", self.partial.len())?;
        writeln!(f, "Failed:    {}", self.failed.len())?;
        for p in &self.partial {
            let sections: Vec<&str> = p.failed_sections.iter().map(|s| s.as_str()).collect();
            writeln!(
                f,
                "  partial {} ({}): {}",
                p.isin,
                p.name.as_deref().unwrap_or("?"),
                sections.join(", ")
            )?;
        }
        for c in &self.failed {
            writeln!(
                f,
                "  failed  {} ({}): {}",
                c.isin,
                c.name.as_deref().unwrap_or("?"),
                c.reason
            )?;
        }
        Ok(())
    }
}

enum CompanyResult {
    Fetched { page: StoredPage, record: CompanyRecord },
    FetchFailed { isin: Isin, error: FetchError },
}

/// Fetch, extract and store every target. Fetches run on a bounded pool;
/// all writes go through this task, one company at a time. A failure for
/// one company never stops the others; only a store error aborts.
pub async fn scrape(
    conn: &Connection,
    source: Arc<dyn PageSource>,
    targets: Vec<DiscoveredCompany>,
    settings: &Settings,
) -> Result<RunSummary> {
    db::insert_companies(conn, &targets)?;

    let concurrency = settings.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let total = targets.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    // Channel: workers send results, this loop writes them
    let (tx, mut rx) = tokio::sync::mpsc::channel::<CompanyResult>(concurrency * 2);

    for company in targets {
        let source = Arc::clone(&source);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let notoria_url = settings.notoria_url(&company.isin);

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let result = fetch_company(source.as_ref(), company, notoria_url).await;
            let _ = tx.send(result).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut summary = RunSummary::default();
    while let Some(result) = rx.recv().await {
        let now = Utc::now();
        match result {
            CompanyResult::Fetched { page, record } => {
                db::save_page(conn, &page, now)?;
                let outcome = store_record(conn, &record, &mut summary)?;
                let failed = record.failed_sections();
                let error = (outcome == Outcome::Failed).then(|| describe_errors(&record));
                db::record_scrape(conn, &record.isin, outcome, &failed, error.as_deref(), now)?;
            }
            CompanyResult::FetchFailed { isin, error } => {
                warn!("{}: {}", isin, error);
                summary.attempted += 1;
                summary.failed.push(FailedCompany {
                    isin: isin.clone(),
                    name: db::get_profile(conn, &isin)?.and_then(|p| p.name),
                    reason: error.to_string(),
                });
                db::record_scrape(conn, &isin, Outcome::Failed, &[], Some(&error.to_string()), now)?;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    summary.sort();
    info!(
        "Scraped {} companies ({} ok, {} partial, {} failed)",
        summary.attempted,
        summary.succeeded,
        summary.partial.len(),
        summary.failed.len()
    );
    Ok(summary)
}

async fn fetch_company(
    source: &dyn PageSource,
    company: DiscoveredCompany,
    notoria_url: Option<String>,
) -> CompanyResult {
    let html = match source.fetch(&company.url).await {
        Ok(html) => html,
        Err(error) => {
            return CompanyResult::FetchFailed {
                isin: company.isin,
                error,
            }
        }
    };

    let notoria = match notoria_url {
        None => NotoriaInput::SamePage,
        Some(url) => match source.fetch(&url).await {
            Ok(body) => NotoriaInput::Page(body),
            Err(e) => {
                warn!("{}: Notoria unavailable: {}", company.isin, e);
                NotoriaInput::Failed(e)
            }
        },
    };

    let record = parser::extract_company(&company.isin, &company.url, &html, &notoria);
    let notoria_html = match notoria {
        NotoriaInput::Page(body) => Some(body),
        _ => None,
    };
    CompanyResult::Fetched {
        page: StoredPage {
            isin: company.isin,
            url: company.url,
            html,
            notoria_html,
        },
        record,
    }
}

/// Re-extract cached pages without touching the network.
pub fn reprocess(conn: &Connection, pages: &[StoredPage]) -> Result<RunSummary> {
    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut summary = RunSummary::default();
    for chunk in pages.chunks(500) {
        let records: Vec<CompanyRecord> = chunk
            .par_iter()
            .map(|page| {
                let notoria = match &page.notoria_html {
                    Some(body) => NotoriaInput::Page(body.clone()),
                    None => NotoriaInput::SamePage,
                };
                parser::extract_company(&page.isin, &page.url, &page.html, &notoria)
            })
            .collect();

        for record in &records {
            store_record(conn, record, &mut summary)?;
        }
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    summary.sort();
    Ok(summary)
}

/// Upsert the present sections and classify the company for the summary.
fn store_record(
    conn: &Connection,
    record: &CompanyRecord,
    summary: &mut RunSummary,
) -> std::result::Result<Outcome, StoreError> {
    summary.attempted += 1;
    let failed = record.failed_sections();

    if failed.len() == SectionKind::ALL.len() {
        warn!("{}: nothing could be extracted", record.isin);
        summary.failed.push(FailedCompany {
            isin: record.isin.clone(),
            name: None,
            reason: describe_errors(record),
        });
        return Ok(Outcome::Failed);
    }

    let written = db::upsert(conn, record)?;
    debug!(
        "{}: wrote {} section(s), kept {} from earlier runs",
        record.isin,
        written.written.len(),
        written.skipped.len()
    );
    if failed.is_empty() {
        summary.succeeded += 1;
        Ok(Outcome::Ok)
    } else {
        for e in record.errors() {
            warn!("{}: {}", record.isin, e);
        }
        summary.partial.push(PartialCompany {
            isin: record.isin.clone(),
            name: record.name().map(str::to_string),
            failed_sections: failed,
        });
        Ok(Outcome::Partial)
    }
}

fn describe_errors(record: &CompanyRecord) -> String {
    record
        .errors()
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rusqlite::types::Value;
    use std::collections::HashMap;

    struct FakeSite(HashMap<String, Result<String, FetchError>>);

    #[async_trait]
    impl PageSource for FakeSite {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.0.get(url).cloned().unwrap_or_else(|| {
                Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            })
        }
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    fn target(isin: &str) -> DiscoveredCompany {
        let isin: Isin = isin.parse().unwrap();
        DiscoveredCompany {
            url: format!("https://www.gpw.pl/spolka?isin={}", isin),
            isin,
        }
    }

    fn site() -> Arc<dyn PageSource> {
        let mut pages = HashMap::new();
        pages.insert(
            "https://www.gpw.pl/spolka?isin=PLPKO0000016".to_string(),
            Ok(fixture("company_pko")),
        );
        pages.insert(
            "https://www.gpw.pl/spolka?isin=PLKGHM000017".to_string(),
            Ok(fixture("company_no_shareholders")),
        );
        pages.insert(
            "https://www.gpw.pl/spolka?isin=PLPZU0000011".to_string(),
            Err(FetchError::Timeout {
                url: "https://www.gpw.pl/spolka?isin=PLPZU0000011".into(),
            }),
        );
        pages.insert(
            "https://www.gpw.pl/spolka?isin=PLLPP0000011".to_string(),
            Ok("<html><body>Przerwa techniczna</body></html>".into()),
        );
        Arc::new(FakeSite(pages))
    }

    fn targets() -> Vec<DiscoveredCompany> {
        ["PLPZU0000011", "PLKGHM000017", "PLPKO0000016", "PLLPP0000011"]
            .into_iter()
            .map(target)
            .collect()
    }

    fn dump(conn: &Connection) -> Vec<String> {
        let tables = [
            "profiles",
            "financials",
            "index_memberships",
            "reports",
            "shareholders",
            "notoria_metrics",
            "stored_sections",
        ];
        let mut out = Vec::new();
        for table in tables {
            let mut stmt = conn
                .prepare(&format!("SELECT * FROM {} ORDER BY 1, 2", table))
                .unwrap();
            let columns = stmt.column_count();
            let rows = stmt
                .query_map([], |row| {
                    let values: Vec<Value> = (0..columns)
                        .map(|i| row.get::<_, Value>(i))
                        .collect::<rusqlite::Result<_>>()?;
                    Ok(format!("{}: {:?}", table, values))
                })
                .unwrap()
                .collect::<rusqlite::Result<Vec<_>>>()
                .unwrap();
            out.extend(rows);
        }
        out
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_run() {
        let conn = db::open_in_memory().unwrap();
        let summary = scrape(&conn, site(), targets(), &Settings::default())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.partial.len(), 1);
        assert_eq!(summary.partial[0].isin.as_str(), "PLKGHM000017");
        assert_eq!(summary.partial[0].name.as_deref(), Some("KGHM"));
        assert_eq!(
            summary.partial[0].failed_sections,
            vec![SectionKind::Shareholders, SectionKind::Notoria]
        );

        let failed: Vec<&str> = summary.failed.iter().map(|f| f.isin.as_str()).collect();
        assert_eq!(failed, vec!["PLLPP0000011", "PLPZU0000011"]);
        assert!(summary.failed[1].reason.contains("timed out"));

        // Companies after the failing one were still stored
        let pko: Isin = "PLPKO0000016".parse().unwrap();
        assert!(db::get_profile(&conn, &pko).unwrap().is_some());
        assert_eq!(db::get_shareholders(&conn, &pko).unwrap().unwrap().len(), 2);

        let printed = summary.to_string();
        assert!(printed.contains("PLKGHM000017 (KGHM): shareholders, notoria"));
    }

    #[tokio::test]
    async fn missing_shareholders_still_stores_profile_and_financials() {
        let conn = db::open_in_memory().unwrap();
        scrape(&conn, site(), vec![target("PLKGHM000017")], &Settings::default())
            .await
            .unwrap();

        let kghm: Isin = "PLKGHM000017".parse().unwrap();
        let profile = db::get_profile(&conn, &kghm).unwrap().unwrap();
        assert_eq!(profile.ticker.as_deref(), Some("KGH"));
        let financials = db::get_financials(&conn, &kghm).unwrap().unwrap();
        assert_eq!(financials.market_cap_mln, Some(28_500.0));
        assert_eq!(financials.pe_ratio, None);
        assert_eq!(financials.change_percent, Some(0.52));
        assert_eq!(db::get_shareholders(&conn, &kghm).unwrap(), None);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let conn = db::open_in_memory().unwrap();
        let settings = Settings {
            concurrency: 2,
            ..Settings::default()
        };
        scrape(&conn, site(), targets(), &settings).await.unwrap();
        let first = dump(&conn);
        assert!(!first.is_empty());

        scrape(&conn, site(), targets(), &settings).await.unwrap();
        assert_eq!(dump(&conn), first);
    }

    #[tokio::test]
    async fn failed_refetch_keeps_previous_records() {
        let conn = db::open_in_memory().unwrap();
        scrape(&conn, site(), vec![target("PLPKO0000016")], &Settings::default())
            .await
            .unwrap();
        let before = dump(&conn);

        let down: Arc<dyn PageSource> = Arc::new(FakeSite(HashMap::new()));
        let summary = scrape(&conn, down, vec![target("PLPKO0000016")], &Settings::default())
            .await
            .unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].name.as_deref(), Some("PKOBP"));
        assert_eq!(dump(&conn), before);
    }

    #[tokio::test]
    async fn separate_notoria_source_may_fail_alone() {
        let conn = db::open_in_memory().unwrap();
        let settings = Settings {
            notoria_url_template: Some("https://notoria.test/{isin}".into()),
            ..Settings::default()
        };
        let summary = scrape(&conn, site(), vec![target("PLPKO0000016")], &settings)
            .await
            .unwrap();
        assert_eq!(summary.partial.len(), 1);
        assert_eq!(summary.partial[0].failed_sections, vec![SectionKind::Notoria]);

        let pko: Isin = "PLPKO0000016".parse().unwrap();
        assert!(db::get_financials(&conn, &pko).unwrap().is_some());
        assert_eq!(db::get_notoria(&conn, &pko).unwrap(), None);
    }

    #[tokio::test]
    async fn reprocess_matches_scrape() {
        let conn = db::open_in_memory().unwrap();
        scrape(&conn, site(), targets(), &Settings::default()).await.unwrap();
        let scraped = dump(&conn);

        let pages = db::fetch_pages(&conn, None).unwrap();
        assert_eq!(pages.len(), 3);
        let summary = reprocess(&conn, &pages).unwrap();
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(dump(&conn), scraped);
    }
}
