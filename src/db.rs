use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::StoreError;
use crate::model::*;

type Result<T> = std::result::Result<T, StoreError>;

pub fn connect(path: &Path) -> anyhow::Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS companies (
            isin          TEXT PRIMARY KEY,
            url           TEXT NOT NULL,
            discovered_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Raw pages, kept so extraction can be re-run without re-fetching
        CREATE TABLE IF NOT EXISTS page_data (
            isin         TEXT PRIMARY KEY REFERENCES companies(isin),
            url          TEXT NOT NULL,
            html         TEXT NOT NULL,
            notoria_html TEXT,
            fetched_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS scrape_log (
            isin            TEXT PRIMARY KEY REFERENCES companies(isin),
            last_scraped    TEXT NOT NULL,
            outcome         TEXT NOT NULL CHECK(outcome IN ('ok','partial','failed')),
            failed_sections TEXT,
            error           TEXT
        );

        -- Sections that have been written at least once for a company
        CREATE TABLE IF NOT EXISTS stored_sections (
            isin    TEXT NOT NULL REFERENCES companies(isin),
            section TEXT NOT NULL,
            PRIMARY KEY (isin, section)
        );

        -- Extracted entities, one table per kind
        CREATE TABLE IF NOT EXISTS profiles (
            isin           TEXT PRIMARY KEY REFERENCES companies(isin),
            name           TEXT,
            ticker         TEXT,
            page_isin      TEXT,
            full_name      TEXT,
            description    TEXT,
            president      TEXT,
            province       TEXT,
            address        TEXT,
            phone          TEXT,
            fax            TEXT,
            website        TEXT,
            email          TEXT,
            debut_date     TEXT,
            sector         TEXT,
            market_segment TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_profiles_ticker ON profiles(ticker);
        CREATE INDEX IF NOT EXISTS idx_profiles_sector ON profiles(sector);

        CREATE TABLE IF NOT EXISTS financials (
            isin                   TEXT PRIMARY KEY REFERENCES companies(isin),
            issued_shares          REAL,
            market_cap_mln         REAL,
            book_value_mln         REAL,
            price_to_book          REAL,
            pe_ratio               REAL,
            dividend_yield_percent REAL,
            last_price             REAL,
            change_percent         REAL,
            bid                    REAL,
            ask                    REAL,
            min_price              REAL,
            max_price              REAL,
            volume                 REAL,
            turnover_value         REAL,
            debut_price            REAL,
            max_52w                REAL,
            min_52w                REAL
        );

        CREATE TABLE IF NOT EXISTS index_memberships (
            isin       TEXT NOT NULL REFERENCES companies(isin),
            position   INTEGER NOT NULL,
            index_name TEXT NOT NULL,
            PRIMARY KEY (isin, position)
        );
        CREATE INDEX IF NOT EXISTS idx_index_name ON index_memberships(index_name);

        CREATE TABLE IF NOT EXISTS reports (
            isin     TEXT NOT NULL REFERENCES companies(isin),
            kind     TEXT NOT NULL CHECK(kind IN ('current','periodic')),
            position INTEGER NOT NULL,
            date     TEXT NOT NULL,
            url      TEXT NOT NULL,
            PRIMARY KEY (isin, kind, position)
        );

        CREATE TABLE IF NOT EXISTS shareholders (
            isin         TEXT NOT NULL REFERENCES companies(isin),
            position     INTEGER NOT NULL,
            name         TEXT NOT NULL,
            shares_count REAL,
            shares_pct   REAL,
            votes_count  REAL,
            votes_pct    REAL,
            PRIMARY KEY (isin, position)
        );

        CREATE TABLE IF NOT EXISTS notoria_metrics (
            isin     TEXT NOT NULL REFERENCES companies(isin),
            metric   TEXT NOT NULL,
            position INTEGER NOT NULL,
            raw      TEXT NOT NULL,
            value    REAL,
            PRIMARY KEY (isin, metric)
        );
        ",
    )?;
    Ok(())
}

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ── Discovery ──

/// Union discovered companies into the catalogue. Returns how many were new.
pub fn insert_companies(conn: &Connection, companies: &[DiscoveredCompany]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO companies (isin, url) VALUES (?1, ?2)")?;
        for c in companies {
            count += stmt.execute(params![c.isin.as_str(), c.url])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

/// Companies due for a scrape, ordered by ISIN. With `fresh_since`, those
/// successfully scraped after that instant are left out.
pub fn fetch_targets(
    conn: &Connection,
    limit: Option<usize>,
    fresh_since: Option<DateTime<Utc>>,
) -> Result<Vec<DiscoveredCompany>> {
    let sql = format!(
        "SELECT c.isin, c.url
         FROM companies c
         LEFT JOIN scrape_log l ON l.isin = c.isin
         WHERE ?1 IS NULL OR l.isin IS NULL OR l.outcome = 'failed' OR l.last_scraped < ?1
         ORDER BY c.isin{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let cutoff = fresh_since.map(timestamp);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![cutoff], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(isin, url)| -> Result<DiscoveredCompany> {
            let isin = isin
                .parse::<Isin>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            Ok(DiscoveredCompany { isin, url })
        })
        .collect()
}

// ── Raw pages ──

pub struct StoredPage {
    pub isin: Isin,
    pub url: String,
    pub html: String,
    pub notoria_html: Option<String>,
}

pub fn save_page(
    conn: &Connection,
    page: &StoredPage,
    fetched_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO page_data (isin, url, html, notoria_html, fetched_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            page.isin.as_str(),
            page.url,
            page.html,
            page.notoria_html,
            timestamp(fetched_at)
        ],
    )?;
    Ok(())
}

pub fn fetch_pages(conn: &Connection, limit: Option<usize>) -> Result<Vec<StoredPage>> {
    let sql = format!(
        "SELECT isin, url, html, notoria_html FROM page_data ORDER BY isin{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(isin, url, html, notoria_html)| -> Result<StoredPage> {
            Ok(StoredPage {
                isin: isin
                    .parse::<Isin>()
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                url,
                html,
                notoria_html,
            })
        })
        .collect()
}

// ── Scrape log ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Partial,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Partial => "partial",
            Outcome::Failed => "failed",
        }
    }
}

pub fn record_scrape(
    conn: &Connection,
    isin: &Isin,
    outcome: Outcome,
    failed_sections: &[SectionKind],
    error: Option<&str>,
    at: DateTime<Utc>,
) -> Result<()> {
    let sections = if failed_sections.is_empty() {
        None
    } else {
        Some(
            failed_sections
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(","),
        )
    };
    conn.execute(
        "INSERT OR REPLACE INTO scrape_log (isin, last_scraped, outcome, failed_sections, error)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![isin.as_str(), timestamp(at), outcome.as_str(), sections, error],
    )?;
    Ok(())
}

// ── Upsert ──

#[derive(Debug, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub written: Vec<SectionKind>,
    pub skipped: Vec<SectionKind>,
}

/// Write every present section of `record`, each in its own transaction.
/// Absent sections leave whatever was stored before untouched.
pub fn upsert(conn: &Connection, record: &CompanyRecord) -> Result<UpsertOutcome> {
    let isin = record.isin.as_str();
    conn.execute(
        "INSERT OR IGNORE INTO companies (isin, url) VALUES (?1, ?2)",
        params![isin, record.url],
    )?;

    let mut outcome = UpsertOutcome::default();
    let mut track = |kind: SectionKind, written: bool| {
        if written {
            outcome.written.push(kind);
        } else {
            outcome.skipped.push(kind);
        }
    };

    track(
        SectionKind::Profile,
        write_section(conn, isin, SectionKind::Profile, &record.profile, write_profile)?,
    );
    track(
        SectionKind::Financials,
        write_section(conn, isin, SectionKind::Financials, &record.financials, write_financials)?,
    );
    track(
        SectionKind::Indices,
        write_section(conn, isin, SectionKind::Indices, &record.indices, |c, i, v| {
            write_indices(c, i, v)
        })?,
    );
    track(
        SectionKind::CurrentReports,
        write_section(conn, isin, SectionKind::CurrentReports, &record.current_reports, |c, i, r| {
            write_reports(c, i, ReportKind::Current, r)
        })?,
    );
    track(
        SectionKind::PeriodicReports,
        write_section(conn, isin, SectionKind::PeriodicReports, &record.periodic_reports, |c, i, r| {
            write_reports(c, i, ReportKind::Periodic, r)
        })?,
    );
    track(
        SectionKind::Shareholders,
        write_section(conn, isin, SectionKind::Shareholders, &record.shareholders, |c, i, v| {
            write_shareholders(c, i, v)
        })?,
    );
    track(
        SectionKind::Notoria,
        write_section(conn, isin, SectionKind::Notoria, &record.notoria, |c, i, v| {
            write_notoria(c, i, v)
        })?,
    );

    Ok(outcome)
}

fn write_section<T>(
    conn: &Connection,
    isin: &str,
    kind: SectionKind,
    section: &Extracted<T>,
    write: impl FnOnce(&Connection, &str, &T) -> rusqlite::Result<()>,
) -> Result<bool> {
    let Extracted::Present(data) = section else {
        return Ok(false);
    };
    let tx = conn.unchecked_transaction()?;
    write(&tx, isin, data)?;
    tx.execute(
        "INSERT OR IGNORE INTO stored_sections (isin, section) VALUES (?1, ?2)",
        params![isin, kind.as_str()],
    )?;
    tx.commit()?;
    Ok(true)
}

fn write_profile(conn: &Connection, isin: &str, p: &CompanyProfile) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO profiles
         (isin, name, ticker, page_isin, full_name, description, president, province,
          address, phone, fax, website, email, debut_date, sector, market_segment)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
        params![
            isin, p.name, p.ticker, p.isin, p.full_name, p.description, p.president,
            p.province, p.address, p.phone, p.fax, p.website, p.email, p.debut_date,
            p.sector, p.market_segment,
        ],
    )?;
    Ok(())
}

fn write_financials(conn: &Connection, isin: &str, f: &FinancialSnapshot) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO financials
         (isin, issued_shares, market_cap_mln, book_value_mln, price_to_book, pe_ratio,
          dividend_yield_percent, last_price, change_percent, bid, ask, min_price, max_price,
          volume, turnover_value, debut_price, max_52w, min_52w)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
        params![
            isin, f.issued_shares, f.market_cap_mln, f.book_value_mln, f.price_to_book,
            f.pe_ratio, f.dividend_yield_percent, f.last_price, f.change_percent, f.bid,
            f.ask, f.min_price, f.max_price, f.volume, f.turnover_value, f.debut_price,
            f.max_52w, f.min_52w,
        ],
    )?;
    Ok(())
}

fn write_indices(conn: &Connection, isin: &str, names: &[String]) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM index_memberships WHERE isin = ?1", params![isin])?;
    let mut stmt = conn.prepare(
        "INSERT INTO index_memberships (isin, position, index_name) VALUES (?1, ?2, ?3)",
    )?;
    for (i, name) in names.iter().enumerate() {
        stmt.execute(params![isin, i as i64, name])?;
    }
    Ok(())
}

fn write_reports(
    conn: &Connection,
    isin: &str,
    kind: ReportKind,
    reports: &[ReportReference],
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM reports WHERE isin = ?1 AND kind = ?2",
        params![isin, kind.as_str()],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO reports (isin, kind, position, date, url) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (i, r) in reports.iter().enumerate() {
        stmt.execute(params![isin, kind.as_str(), i as i64, r.date, r.url])?;
    }
    Ok(())
}

fn write_shareholders(
    conn: &Connection,
    isin: &str,
    holders: &[ShareholderEntry],
) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM shareholders WHERE isin = ?1", params![isin])?;
    let mut stmt = conn.prepare(
        "INSERT INTO shareholders
         (isin, position, name, shares_count, shares_pct, votes_count, votes_pct)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for (i, h) in holders.iter().enumerate() {
        stmt.execute(params![
            isin, i as i64, h.name, h.shares_count, h.shares_pct, h.votes_count, h.votes_pct,
        ])?;
    }
    Ok(())
}

fn write_notoria(conn: &Connection, isin: &str, metrics: &[NotoriaMetric]) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM notoria_metrics WHERE isin = ?1", params![isin])?;
    let mut stmt = conn.prepare(
        "INSERT INTO notoria_metrics (isin, metric, position, raw, value)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (i, m) in metrics.iter().enumerate() {
        stmt.execute(params![isin, m.metric, i as i64, m.raw, m.value])?;
    }
    Ok(())
}

// ── Read-back ──

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Entity {
    Profile(CompanyProfile),
    Financials(FinancialSnapshot),
    Indices(Vec<String>),
    Reports(Vec<ReportReference>),
    Shareholders(Vec<ShareholderEntry>),
    Notoria(Vec<NotoriaMetric>),
}

/// Read one entity kind back. `None` when that section was never stored.
pub fn get(conn: &Connection, isin: &Isin, kind: SectionKind) -> Result<Option<Entity>> {
    Ok(match kind {
        SectionKind::Profile => get_profile(conn, isin)?.map(Entity::Profile),
        SectionKind::Financials => get_financials(conn, isin)?.map(Entity::Financials),
        SectionKind::Indices => get_indices(conn, isin)?.map(Entity::Indices),
        SectionKind::CurrentReports => {
            get_reports(conn, isin, ReportKind::Current)?.map(Entity::Reports)
        }
        SectionKind::PeriodicReports => {
            get_reports(conn, isin, ReportKind::Periodic)?.map(Entity::Reports)
        }
        SectionKind::Shareholders => get_shareholders(conn, isin)?.map(Entity::Shareholders),
        SectionKind::Notoria => get_notoria(conn, isin)?.map(Entity::Notoria),
    })
}

fn is_stored(conn: &Connection, isin: &Isin, kind: SectionKind) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM stored_sections WHERE isin = ?1 AND section = ?2",
            params![isin.as_str(), kind.as_str()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn get_profile(conn: &Connection, isin: &Isin) -> Result<Option<CompanyProfile>> {
    let profile = conn
        .query_row(
            "SELECT name, ticker, page_isin, full_name, description, president, province,
                    address, phone, fax, website, email, debut_date, sector, market_segment
             FROM profiles WHERE isin = ?1",
            params![isin.as_str()],
            |row| {
                Ok(CompanyProfile {
                    name: row.get(0)?,
                    ticker: row.get(1)?,
                    isin: row.get(2)?,
                    full_name: row.get(3)?,
                    description: row.get(4)?,
                    president: row.get(5)?,
                    province: row.get(6)?,
                    address: row.get(7)?,
                    phone: row.get(8)?,
                    fax: row.get(9)?,
                    website: row.get(10)?,
                    email: row.get(11)?,
                    debut_date: row.get(12)?,
                    sector: row.get(13)?,
                    market_segment: row.get(14)?,
                })
            },
        )
        .optional()?;
    Ok(profile)
}

pub fn get_financials(conn: &Connection, isin: &Isin) -> Result<Option<FinancialSnapshot>> {
    let snapshot = conn
        .query_row(
            "SELECT issued_shares, market_cap_mln, book_value_mln, price_to_book, pe_ratio,
                    dividend_yield_percent, last_price, change_percent, bid, ask, min_price,
                    max_price, volume, turnover_value, debut_price, max_52w, min_52w
             FROM financials WHERE isin = ?1",
            params![isin.as_str()],
            |row| {
                Ok(FinancialSnapshot {
                    issued_shares: row.get(0)?,
                    market_cap_mln: row.get(1)?,
                    book_value_mln: row.get(2)?,
                    price_to_book: row.get(3)?,
                    pe_ratio: row.get(4)?,
                    dividend_yield_percent: row.get(5)?,
                    last_price: row.get(6)?,
                    change_percent: row.get(7)?,
                    bid: row.get(8)?,
                    ask: row.get(9)?,
                    min_price: row.get(10)?,
                    max_price: row.get(11)?,
                    volume: row.get(12)?,
                    turnover_value: row.get(13)?,
                    debut_price: row.get(14)?,
                    max_52w: row.get(15)?,
                    min_52w: row.get(16)?,
                })
            },
        )
        .optional()?;
    Ok(snapshot)
}

pub fn get_indices(conn: &Connection, isin: &Isin) -> Result<Option<Vec<String>>> {
    if !is_stored(conn, isin, SectionKind::Indices)? {
        return Ok(None);
    }
    let mut stmt = conn.prepare(
        "SELECT index_name FROM index_memberships WHERE isin = ?1 ORDER BY position",
    )?;
    let names = stmt
        .query_map(params![isin.as_str()], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(Some(names))
}

pub fn get_reports(
    conn: &Connection,
    isin: &Isin,
    kind: ReportKind,
) -> Result<Option<Vec<ReportReference>>> {
    if !is_stored(conn, isin, kind.section())? {
        return Ok(None);
    }
    let mut stmt = conn.prepare(
        "SELECT date, url FROM reports WHERE isin = ?1 AND kind = ?2 ORDER BY position",
    )?;
    let reports = stmt
        .query_map(params![isin.as_str(), kind.as_str()], |row| {
            Ok(ReportReference {
                kind,
                date: row.get(0)?,
                url: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some(reports))
}

pub fn get_shareholders(conn: &Connection, isin: &Isin) -> Result<Option<Vec<ShareholderEntry>>> {
    if !is_stored(conn, isin, SectionKind::Shareholders)? {
        return Ok(None);
    }
    let mut stmt = conn.prepare(
        "SELECT name, shares_count, shares_pct, votes_count, votes_pct
         FROM shareholders WHERE isin = ?1 ORDER BY position",
    )?;
    let holders = stmt
        .query_map(params![isin.as_str()], |row| {
            Ok(ShareholderEntry {
                name: row.get(0)?,
                shares_count: row.get(1)?,
                shares_pct: row.get(2)?,
                votes_count: row.get(3)?,
                votes_pct: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some(holders))
}

pub fn get_notoria(conn: &Connection, isin: &Isin) -> Result<Option<Vec<NotoriaMetric>>> {
    if !is_stored(conn, isin, SectionKind::Notoria)? {
        return Ok(None);
    }
    let mut stmt = conn.prepare(
        "SELECT metric, raw, value FROM notoria_metrics WHERE isin = ?1 ORDER BY position",
    )?;
    let metrics = stmt
        .query_map(params![isin.as_str()], |row| {
            Ok(NotoriaMetric {
                metric: row.get(0)?,
                raw: row.get(1)?,
                value: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some(metrics))
}

// ── Overview ──

pub struct OverviewRow {
    pub isin: String,
    pub ticker: String,
    pub name: String,
    pub sector: String,
    pub market_cap_mln: Option<f64>,
    pub last_price: Option<f64>,
    pub change_percent: Option<f64>,
    pub index_count: usize,
}

pub fn fetch_overview(
    conn: &Connection,
    sector: Option<&str>,
    index: Option<&str>,
    limit: usize,
) -> Result<Vec<OverviewRow>> {
    let mut conditions = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(s) = sector {
        conditions.push(format!("p.sector = ?{}", args.len() + 1));
        args.push(Box::new(s.to_string()));
    }
    if let Some(i) = index {
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM index_memberships m WHERE m.isin = p.isin AND m.index_name = ?{})",
            args.len() + 1
        ));
        args.push(Box::new(i.to_string()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT p.isin, COALESCE(p.ticker,''), COALESCE(p.name,''), COALESCE(p.sector,''),
                f.market_cap_mln, f.last_price, f.change_percent,
                (SELECT COUNT(*) FROM index_memberships m WHERE m.isin = p.isin)
         FROM profiles p
         LEFT JOIN financials f ON f.isin = p.isin{}
         ORDER BY f.market_cap_mln IS NULL, f.market_cap_mln DESC, p.isin
         LIMIT {}",
        where_clause, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let arg_refs: Vec<&dyn rusqlite::types::ToSql> = args.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(arg_refs.as_slice(), |row| {
            Ok(OverviewRow {
                isin: row.get(0)?,
                ticker: row.get(1)?,
                name: row.get(2)?,
                sector: row.get(3)?,
                market_cap_mln: row.get(4)?,
                last_price: row.get(5)?,
                change_percent: row.get(6)?,
                index_count: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub companies: usize,
    pub scraped: usize,
    pub ok: usize,
    pub partial: usize,
    pub failed: usize,
    pub unscraped: usize,
    pub profiles: usize,
    pub shareholders: usize,
    pub reports: usize,
    pub notoria_metrics: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    let companies = count("SELECT COUNT(*) FROM companies")?;
    let scraped = count("SELECT COUNT(*) FROM scrape_log")?;
    Ok(Stats {
        companies,
        scraped,
        ok: count("SELECT COUNT(*) FROM scrape_log WHERE outcome = 'ok'")?,
        partial: count("SELECT COUNT(*) FROM scrape_log WHERE outcome = 'partial'")?,
        failed: count("SELECT COUNT(*) FROM scrape_log WHERE outcome = 'failed'")?,
        unscraped: companies.saturating_sub(scraped),
        profiles: count("SELECT COUNT(*) FROM profiles")?,
        shareholders: count("SELECT COUNT(*) FROM shareholders")?,
        reports: count("SELECT COUNT(*) FROM reports")?,
        notoria_metrics: count("SELECT COUNT(*) FROM notoria_metrics")?,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn isin() -> Isin {
        "PLPKO0000016".parse().unwrap()
    }

    fn record(indices: Vec<&str>) -> CompanyRecord {
        CompanyRecord {
            isin: isin(),
            url: "https://www.gpw.pl/spolka?isin=PLPKO0000016".into(),
            profile: Extracted::Present(CompanyProfile {
                name: Some("PKOBP".into()),
                ticker: Some("PKO".into()),
                sector: Some("Banki".into()),
                ..CompanyProfile::default()
            }),
            financials: Extracted::Present(FinancialSnapshot {
                last_price: Some(57.15),
                book_value_mln: None,
                ..FinancialSnapshot::default()
            }),
            indices: Extracted::Present(indices.into_iter().map(String::from).collect()),
            current_reports: Extracted::Present(vec![ReportReference {
                kind: ReportKind::Current,
                date: "2024-05-10".into(),
                url: "https://www.gpw.pl/komunikat?geru_id=1".into(),
            }]),
            periodic_reports: Extracted::Present(vec![]),
            shareholders: Extracted::Present(vec![ShareholderEntry {
                name: "Skarb Państwa".into(),
                shares_count: Some(367_918_980.0),
                shares_pct: Some(29.43),
                votes_count: Some(367_918_980.0),
                votes_pct: Some(29.43),
            }]),
            notoria: Extracted::absent(SectionKind::Notoria, "no table"),
        }
    }

    #[test]
    fn index_membership_is_replaced_not_merged() {
        let conn = open_in_memory().unwrap();
        upsert(&conn, &record(vec!["WIG20", "WIG"])).unwrap();
        assert_eq!(
            get_indices(&conn, &isin()).unwrap(),
            Some(vec!["WIG20".to_string(), "WIG".to_string()])
        );

        upsert(&conn, &record(vec!["WIG"])).unwrap();
        assert_eq!(get_indices(&conn, &isin()).unwrap(), Some(vec!["WIG".to_string()]));
    }

    #[test]
    fn absent_section_keeps_previous_data() {
        let conn = open_in_memory().unwrap();
        upsert(&conn, &record(vec!["WIG"])).unwrap();

        let mut broken = record(vec!["WIG"]);
        broken.financials = Extracted::absent(SectionKind::Financials, "tab missing");
        broken.shareholders = Extracted::absent(SectionKind::Shareholders, "tab missing");
        broken.profile = Extracted::Present(CompanyProfile {
            name: Some("PKO BANK POLSKI".into()),
            ..CompanyProfile::default()
        });
        let outcome = upsert(&conn, &broken).unwrap();
        assert!(outcome.skipped.contains(&SectionKind::Financials));
        assert!(outcome.skipped.contains(&SectionKind::Shareholders));

        let f = get_financials(&conn, &isin()).unwrap().unwrap();
        assert_eq!(f.last_price, Some(57.15));
        assert_eq!(f.book_value_mln, None);
        assert_eq!(get_shareholders(&conn, &isin()).unwrap().unwrap().len(), 1);
        // the profile itself is overwritten wholesale
        let p = get_profile(&conn, &isin()).unwrap().unwrap();
        assert_eq!(p.name.as_deref(), Some("PKO BANK POLSKI"));
        assert_eq!(p.ticker, None);
    }

    #[test]
    fn never_stored_versus_stored_empty() {
        let conn = open_in_memory().unwrap();
        assert_eq!(get(&conn, &isin(), SectionKind::Profile).unwrap(), None);

        upsert(&conn, &record(vec![])).unwrap();
        assert_eq!(
            get(&conn, &isin(), SectionKind::Indices).unwrap(),
            Some(Entity::Indices(vec![]))
        );
        assert_eq!(
            get(&conn, &isin(), SectionKind::PeriodicReports).unwrap(),
            Some(Entity::Reports(vec![]))
        );
        assert_eq!(get(&conn, &isin(), SectionKind::Notoria).unwrap(), None);
    }

    #[test]
    fn targets_skip_recently_scraped() {
        let conn = open_in_memory().unwrap();
        let companies: Vec<DiscoveredCompany> = ["PLPKO0000016", "PLPZU0000011", "PLKGHM000017"]
            .iter()
            .map(|s| {
                let isin: Isin = s.parse().unwrap();
                DiscoveredCompany {
                    url: format!("https://www.gpw.pl/spolka?isin={}", isin),
                    isin,
                }
            })
            .collect();
        assert_eq!(insert_companies(&conn, &companies).unwrap(), 3);
        assert_eq!(insert_companies(&conn, &companies).unwrap(), 0);

        let now = Utc::now();
        record_scrape(&conn, &companies[0].isin, Outcome::Ok, &[], None, now).unwrap();
        record_scrape(&conn, &companies[1].isin, Outcome::Failed, &[], Some("HTTP 404"), now)
            .unwrap();

        let due = fetch_targets(&conn, None, Some(now - chrono::Duration::hours(24))).unwrap();
        let due: Vec<&str> = due.iter().map(|c| c.isin.as_str()).collect();
        assert_eq!(due, vec!["PLKGHM000017", "PLPZU0000011"]);

        assert_eq!(fetch_targets(&conn, None, None).unwrap().len(), 3);
        assert_eq!(fetch_targets(&conn, Some(1), None).unwrap().len(), 1);
    }

    #[test]
    fn stats_and_overview() {
        let conn = open_in_memory().unwrap();
        upsert(&conn, &record(vec!["WIG20", "WIG"])).unwrap();
        record_scrape(&conn, &isin(), Outcome::Partial, &[SectionKind::Notoria], None, Utc::now())
            .unwrap();

        let s = get_stats(&conn).unwrap();
        assert_eq!(s.companies, 1);
        assert_eq!(s.partial, 1);
        assert_eq!(s.shareholders, 1);

        let rows = fetch_overview(&conn, Some("Banki"), Some("WIG20"), 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ticker, "PKO");
        assert_eq!(rows[0].index_count, 2);
        assert!(fetch_overview(&conn, Some("Surowce"), None, 10).unwrap().is_empty());
    }
}
