use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use strsim::jaro_winkler;

use crate::db;
use crate::error::StoreError;
use crate::model::*;

type Result<T> = std::result::Result<T, StoreError>;

/// Lowest Jaro-Winkler similarity accepted as a misspelled name.
const FUZZY_CUTOFF: f64 = 0.85;
/// Shorter queries match too many names by similarity alone.
const FUZZY_MIN_CHARS: usize = 4;

#[derive(Debug, Serialize)]
pub struct ScrapeStatus {
    pub last_scraped: String,
    pub outcome: String,
    pub failed_sections: Vec<String>,
    pub error: Option<String>,
}

/// Everything stored for one company. Sections never stored are `None`.
#[derive(Debug, Serialize)]
pub struct CompanyView {
    pub isin: Isin,
    pub url: String,
    pub profile: Option<CompanyProfile>,
    pub financials: Option<FinancialSnapshot>,
    pub indices: Option<Vec<String>>,
    pub current_reports: Option<Vec<ReportReference>>,
    pub periodic_reports: Option<Vec<ReportReference>>,
    pub shareholders: Option<Vec<ShareholderEntry>>,
    pub notoria: Option<Vec<NotoriaMetric>>,
    pub last_scrape: Option<ScrapeStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanySummary {
    pub isin: String,
    pub ticker: Option<String>,
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub sector: Option<String>,
    pub market_cap_mln: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectorCount {
    pub sector: String,
    pub companies: usize,
}

pub fn company_by_isin(conn: &Connection, isin: &Isin) -> Result<Option<CompanyView>> {
    let url: Option<String> = conn
        .query_row(
            "SELECT url FROM companies WHERE isin = ?1",
            params![isin.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    let Some(url) = url else {
        return Ok(None);
    };

    Ok(Some(CompanyView {
        isin: isin.clone(),
        url,
        profile: db::get_profile(conn, isin)?,
        financials: db::get_financials(conn, isin)?,
        indices: db::get_indices(conn, isin)?,
        current_reports: db::get_reports(conn, isin, ReportKind::Current)?,
        periodic_reports: db::get_reports(conn, isin, ReportKind::Periodic)?,
        shareholders: db::get_shareholders(conn, isin)?,
        notoria: db::get_notoria(conn, isin)?,
        last_scrape: scrape_status(conn, isin)?,
    }))
}

/// Ticker match is case-insensitive.
pub fn company_by_ticker(conn: &Connection, ticker: &str) -> Result<Option<CompanyView>> {
    let wanted = ticker.trim().to_lowercase();
    let found = summaries(conn)?
        .into_iter()
        .find(|c| c.ticker.as_deref().map(str::to_lowercase).as_deref() == Some(wanted.as_str()));
    match found {
        Some(c) => {
            let isin = c.isin.parse::<Isin>().map_err(|e| StoreError::Corrupt(e.to_string()))?;
            company_by_isin(conn, &isin)
        }
        None => Ok(None),
    }
}

/// Case-insensitive search over ticker, name and full name. Exact ticker
/// hits rank first, then prefix matches, then substring matches, then names
/// similar enough to be a typo of the query.
pub fn search_companies(conn: &Connection, text: &str, limit: usize) -> Result<Vec<CompanySummary>> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(Vec::new());
    }

    let mut ranked: Vec<((u8, f64), CompanySummary)> = summaries(conn)?
        .into_iter()
        .filter_map(|c| rank(&c, &needle).map(|r| (r, c)))
        .collect();
    ranked.sort_by(|((ra, sa), a), ((rb, sb), b)| {
        ra.cmp(rb)
            .then_with(|| sb.total_cmp(sa))
            .then_with(|| a.isin.cmp(&b.isin))
    });
    Ok(ranked.into_iter().take(limit).map(|(_, c)| c).collect())
}

/// Rank bucket and, for fuzzy hits, the similarity within it.
fn rank(c: &CompanySummary, needle: &str) -> Option<(u8, f64)> {
    let fields: Vec<String> = [&c.ticker, &c.name, &c.full_name]
        .into_iter()
        .flatten()
        .map(|f| f.to_lowercase())
        .collect();

    if c.ticker.as_deref().map(str::to_lowercase).as_deref() == Some(needle) {
        return Some((0, 1.0));
    }
    if fields.iter().any(|f| f.starts_with(needle)) {
        return Some((1, 1.0));
    }
    if fields.iter().any(|f| f.contains(needle)) {
        return Some((2, 1.0));
    }
    if needle.chars().count() < FUZZY_MIN_CHARS {
        return None;
    }
    let best = [&c.name, &c.full_name]
        .into_iter()
        .flatten()
        .map(|f| jaro_winkler(&f.to_lowercase(), needle))
        .fold(0.0, f64::max);
    (best >= FUZZY_CUTOFF).then_some((3, best))
}

/// Shareholders by share of votes, largest first. Rows without a vote
/// percentage keep their page order at the end.
pub fn shareholders(conn: &Connection, isin: &Isin) -> Result<Option<Vec<ShareholderEntry>>> {
    let Some(mut holders) = db::get_shareholders(conn, isin)? else {
        return Ok(None);
    };
    holders.sort_by(|a, b| match (a.votes_pct, b.votes_pct) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    Ok(Some(holders))
}

pub fn sectors(conn: &Connection) -> Result<Vec<SectorCount>> {
    let mut stmt = conn.prepare(
        "SELECT sector, COUNT(*) FROM profiles
         WHERE sector IS NOT NULL AND sector != ''
         GROUP BY sector ORDER BY sector",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SectorCount {
                sector: row.get(0)?,
                companies: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Companies whose sector equals `sector`, ignoring case, largest first.
pub fn companies_in_sector(conn: &Connection, sector: &str) -> Result<Vec<CompanySummary>> {
    let wanted = sector.trim().to_lowercase();
    let mut found: Vec<CompanySummary> = summaries(conn)?
        .into_iter()
        .filter(|c| c.sector.as_deref().map(str::to_lowercase).as_deref() == Some(wanted.as_str()))
        .collect();
    found.sort_by(|a, b| match (a.market_cap_mln, b.market_cap_mln) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.isin.cmp(&b.isin),
    });
    Ok(found)
}

fn summaries(conn: &Connection) -> Result<Vec<CompanySummary>> {
    let mut stmt = conn.prepare(
        "SELECT p.isin, p.ticker, p.name, p.full_name, p.sector, f.market_cap_mln
         FROM profiles p
         LEFT JOIN financials f ON f.isin = p.isin
         ORDER BY p.isin",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CompanySummary {
                isin: row.get(0)?,
                ticker: row.get(1)?,
                name: row.get(2)?,
                full_name: row.get(3)?,
                sector: row.get(4)?,
                market_cap_mln: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn scrape_status(conn: &Connection, isin: &Isin) -> Result<Option<ScrapeStatus>> {
    let status = conn
        .query_row(
            "SELECT last_scraped, outcome, failed_sections, error FROM scrape_log WHERE isin = ?1",
            params![isin.as_str()],
            |row| {
                let sections: Option<String> = row.get(2)?;
                Ok(ScrapeStatus {
                    last_scraped: row.get(0)?,
                    outcome: row.get(1)?,
                    failed_sections: sections
                        .map(|s| s.split(',').map(String::from).collect())
                        .unwrap_or_default(),
                    error: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn company(isin: &str, ticker: &str, name: &str, sector: &str, cap: Option<f64>) -> CompanyRecord {
        CompanyRecord {
            isin: isin.parse().unwrap(),
            url: format!("https://www.gpw.pl/spolka?isin={}", isin),
            profile: Extracted::Present(CompanyProfile {
                name: Some(name.into()),
                ticker: Some(ticker.into()),
                full_name: Some(format!("{} SPÓŁKA AKCYJNA", name)),
                sector: Some(sector.into()),
                ..CompanyProfile::default()
            }),
            financials: Extracted::Present(FinancialSnapshot {
                market_cap_mln: cap,
                ..FinancialSnapshot::default()
            }),
            indices: Extracted::Present(vec!["WIG".into()]),
            current_reports: Extracted::absent(SectionKind::CurrentReports, "tab missing"),
            periodic_reports: Extracted::Present(vec![]),
            shareholders: Extracted::absent(SectionKind::Shareholders, "tab missing"),
            notoria: Extracted::absent(SectionKind::Notoria, "tab missing"),
        }
    }

    fn holder(name: &str, votes_pct: Option<f64>) -> ShareholderEntry {
        ShareholderEntry {
            name: name.into(),
            shares_count: None,
            shares_pct: votes_pct,
            votes_count: None,
            votes_pct,
        }
    }

    fn seeded() -> Connection {
        let conn = db::open_in_memory().unwrap();
        let mut pko = company("PLPKO0000016", "PKO", "PKOBP", "Banki", Some(71_437.5));
        pko.shareholders = Extracted::Present(vec![
            holder("Pozostali", None),
            holder("Nationale-Nederlanden OFE", Some(5.02)),
            holder("Skarb Państwa", Some(29.43)),
        ]);
        db::upsert(&conn, &pko).unwrap();
        db::upsert(&conn, &company("PLPZU0000011", "PZU", "PZU", "Ubezpieczenia", Some(40_000.0)))
            .unwrap();
        db::upsert(&conn, &company("PLKGHM000017", "KGH", "KGHM", "Surowce", Some(28_500.0)))
            .unwrap();
        db::upsert(&conn, &company("PLOPTTC00011", "CDR", "CDPROJEKT", "Gry", None)).unwrap();
        db::upsert(&conn, &company("PLDINPL00011", "DNP", "DINOPL", "Handel", Some(35_000.0)))
            .unwrap();
        db::upsert(&conn, &company("PLLPP0000011", "LPP", "LPP", "Handel", Some(30_000.0)))
            .unwrap();
        conn
    }

    #[test]
    fn lookup_by_isin_and_ticker() {
        let conn = seeded();
        let pko: Isin = "PLPKO0000016".parse().unwrap();
        db::record_scrape(
            &conn,
            &pko,
            db::Outcome::Partial,
            &[SectionKind::CurrentReports, SectionKind::Notoria],
            None,
            Utc::now(),
        )
        .unwrap();

        let view = company_by_isin(&conn, &pko).unwrap().unwrap();
        assert_eq!(view.profile.unwrap().ticker.as_deref(), Some("PKO"));
        assert_eq!(view.indices, Some(vec!["WIG".to_string()]));
        assert_eq!(view.current_reports, None);
        assert_eq!(view.periodic_reports, Some(vec![]));
        let status = view.last_scrape.unwrap();
        assert_eq!(status.outcome, "partial");
        assert_eq!(status.failed_sections, vec!["current_reports", "notoria"]);

        let by_ticker = company_by_ticker(&conn, "pko").unwrap().unwrap();
        assert_eq!(by_ticker.isin, pko);
        assert!(company_by_ticker(&conn, "XYZ").unwrap().is_none());

        let unknown: Isin = "US0378331005".parse().unwrap();
        assert!(company_by_isin(&conn, &unknown).unwrap().is_none());
    }

    #[test]
    fn search_ranks_exact_ticker_then_prefix_then_substring() {
        let conn = seeded();
        let tickers = |text: &str| -> Vec<Option<String>> {
            search_companies(&conn, text, 10)
                .unwrap()
                .into_iter()
                .map(|c| c.ticker)
                .collect()
        };

        // "lpp" is LPP's ticker; nothing else contains it
        assert_eq!(tickers("lpp"), vec![Some("LPP".to_string())]);
        // "pz": PZU by prefix
        assert_eq!(tickers("PZ"), vec![Some("PZU".to_string())]);
        // "pl" is a substring of DINOPL only
        assert_eq!(tickers("pl"), vec![Some("DNP".to_string())]);
        // "kgh": exact ticker for KGHM
        assert_eq!(tickers("kgh")[0], Some("KGH".to_string()));
        assert!(tickers("   ").is_empty());
        assert!(tickers("xyzw").is_empty());
        assert_eq!(search_companies(&conn, "a", 2).unwrap().len(), 2);
    }

    #[test]
    fn search_tolerates_typos_in_names() {
        let conn = seeded();
        let mut orlen = company("PLPKN0000018", "PKN", "ORLEN", "Paliwa", Some(80_000.0));
        orlen.profile = Extracted::Present(CompanyProfile {
            name: Some("ORLEN".into()),
            ticker: Some("PKN".into()),
            full_name: Some("ORLEN SPÓŁKA AKCYJNA".into()),
            sector: Some("Paliwa".into()),
            ..CompanyProfile::default()
        });
        db::upsert(&conn, &orlen).unwrap();

        let hits = search_companies(&conn, "orlem spolka akcyjna", 5).unwrap();
        assert_eq!(hits[0].isin, "PLPKN0000018");

        // Exact and substring hits still outrank similarity
        let hits = search_companies(&conn, "orle", 5).unwrap();
        assert_eq!(hits[0].ticker.as_deref(), Some("PKN"));
        assert_eq!(search_companies(&conn, "cdprojekt", 5).unwrap()[0].ticker.as_deref(), Some("CDR"));
    }

    #[test]
    fn shareholders_by_votes_desc() {
        let conn = seeded();
        let pko: Isin = "PLPKO0000016".parse().unwrap();
        let names: Vec<String> = shareholders(&conn, &pko)
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(names, vec!["Skarb Państwa", "Nationale-Nederlanden OFE", "Pozostali"]);

        let pzu: Isin = "PLPZU0000011".parse().unwrap();
        assert_eq!(shareholders(&conn, &pzu).unwrap(), None);
    }

    #[test]
    fn sectors_and_members() {
        let conn = seeded();
        let all = sectors(&conn).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(
            all.iter().find(|s| s.sector == "Handel"),
            Some(&SectorCount {
                sector: "Handel".into(),
                companies: 2
            })
        );

        let retail: Vec<String> = companies_in_sector(&conn, "handel")
            .unwrap()
            .into_iter()
            .map(|c| c.isin)
            .collect();
        assert_eq!(retail, vec!["PLDINPL00011", "PLLPP0000011"]);
        assert!(companies_in_sector(&conn, "Kosmos").unwrap().is_empty());
    }
}
