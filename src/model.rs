use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;

// ── Identifier ──

/// A validated ISIN: country code, nine alphanumerics, Luhn check digit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Isin(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ISIN {0:?}")]
pub struct InvalidIsin(pub String);

impl Isin {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Isin {
    type Err = InvalidIsin;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_uppercase();
        let bytes = s.as_bytes();
        let well_formed = bytes.len() == 12
            && bytes[..2].iter().all(u8::is_ascii_uppercase)
            && bytes[2..11].iter().all(u8::is_ascii_alphanumeric)
            && bytes[11].is_ascii_digit();
        if !well_formed || check_digit(&s[..11]) != (bytes[11] - b'0') as u32 {
            return Err(InvalidIsin(s));
        }
        Ok(Isin(s))
    }
}

/// Letters expand to two digits (A=10 … Z=35); every second digit from the
/// right is doubled.
fn check_digit(body: &str) -> u32 {
    let digits: Vec<u32> = body
        .chars()
        .filter_map(|c| c.to_digit(36))
        .flat_map(|v| {
            if v >= 10 {
                vec![v / 10, v % 10]
            } else {
                vec![v]
            }
        })
        .collect();
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 0 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    (10 - sum % 10) % 10
}

impl TryFrom<String> for Isin {
    type Error = InvalidIsin;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Isin> for String {
    fn from(isin: Isin) -> Self {
        isin.0
    }
}

impl fmt::Display for Isin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredCompany {
    pub isin: Isin,
    pub url: String,
}

// ── Sections ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Profile,
    Financials,
    Indices,
    CurrentReports,
    PeriodicReports,
    Shareholders,
    Notoria,
}

impl SectionKind {
    pub const ALL: [SectionKind; 7] = [
        SectionKind::Profile,
        SectionKind::Financials,
        SectionKind::Indices,
        SectionKind::CurrentReports,
        SectionKind::PeriodicReports,
        SectionKind::Shareholders,
        SectionKind::Notoria,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKind::Profile => "profile",
            SectionKind::Financials => "financials",
            SectionKind::Indices => "indices",
            SectionKind::CurrentReports => "current_reports",
            SectionKind::PeriodicReports => "periodic_reports",
            SectionKind::Shareholders => "shareholders",
            SectionKind::Notoria => "notoria",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SectionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown section {s:?}"))
    }
}

/// Outcome of parsing one independently-fallible part of a company page.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted<T> {
    Present(T),
    Absent(ExtractionError),
}

impl<T> Extracted<T> {
    pub fn absent(section: SectionKind, reason: impl Into<String>) -> Self {
        Extracted::Absent(ExtractionError::new(section, reason))
    }

    pub fn present(&self) -> Option<&T> {
        match self {
            Extracted::Present(v) => Some(v),
            Extracted::Absent(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ExtractionError> {
        match self {
            Extracted::Present(_) => None,
            Extracted::Absent(e) => Some(e),
        }
    }
}

// ── Entities ──

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompanyProfile {
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub isin: Option<String>,
    pub full_name: Option<String>,
    pub description: Option<String>,
    pub president: Option<String>,
    pub province: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub fax: Option<String>,
    pub website: Option<String>,
    pub email: Option<String>,
    pub debut_date: Option<String>,
    pub sector: Option<String>,
    pub market_segment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FinancialSnapshot {
    pub issued_shares: Option<f64>,
    pub market_cap_mln: Option<f64>,
    pub book_value_mln: Option<f64>,
    pub price_to_book: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub dividend_yield_percent: Option<f64>,
    pub last_price: Option<f64>,
    pub change_percent: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub volume: Option<f64>,
    pub turnover_value: Option<f64>,
    pub debut_price: Option<f64>,
    pub max_52w: Option<f64>,
    pub min_52w: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Current,
    Periodic,
}

impl ReportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportKind::Current => "current",
            ReportKind::Periodic => "periodic",
        }
    }

    pub fn section(self) -> SectionKind {
        match self {
            ReportKind::Current => SectionKind::CurrentReports,
            ReportKind::Periodic => SectionKind::PeriodicReports,
        }
    }

    /// Container id of the tab listing this kind of report.
    pub fn tab_id(self) -> &'static str {
        match self {
            ReportKind::Current => "reportsTab1",
            ReportKind::Periodic => "reportsTab2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportReference {
    pub kind: ReportKind,
    pub date: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareholderEntry {
    pub name: String,
    pub shares_count: Option<f64>,
    pub shares_pct: Option<f64>,
    pub votes_count: Option<f64>,
    pub votes_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotoriaMetric {
    pub metric: String,
    pub raw: String,
    pub value: Option<f64>,
}

/// Everything extracted from one company's pages.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyRecord {
    pub isin: Isin,
    pub url: String,
    pub profile: Extracted<CompanyProfile>,
    pub financials: Extracted<FinancialSnapshot>,
    pub indices: Extracted<Vec<String>>,
    pub current_reports: Extracted<Vec<ReportReference>>,
    pub periodic_reports: Extracted<Vec<ReportReference>>,
    pub shareholders: Extracted<Vec<ShareholderEntry>>,
    pub notoria: Extracted<Vec<NotoriaMetric>>,
}

impl CompanyRecord {
    pub fn errors(&self) -> Vec<&ExtractionError> {
        [
            self.profile.error(),
            self.financials.error(),
            self.indices.error(),
            self.current_reports.error(),
            self.periodic_reports.error(),
            self.shareholders.error(),
            self.notoria.error(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn failed_sections(&self) -> Vec<SectionKind> {
        self.errors().into_iter().map(|e| e.section).collect()
    }

    pub fn name(&self) -> Option<&str> {
        self.profile.present().and_then(|p| p.name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_isins() {
        for s in ["PLPKO0000016", "PLKGHM000017", "US0378331005", "plpzu0000011"] {
            assert!(s.parse::<Isin>().is_ok(), "{s} should be valid");
        }
        assert_eq!("plpzu0000011".parse::<Isin>().unwrap().as_str(), "PLPZU0000011");
    }

    #[test]
    fn bad_check_digit_rejected() {
        assert!("PLPKO0000015".parse::<Isin>().is_err());
        assert!("PLPKO000001".parse::<Isin>().is_err());
        assert!("12PKO0000016".parse::<Isin>().is_err());
    }

    #[test]
    fn failed_sections_listed() {
        let record = CompanyRecord {
            isin: "PLPKO0000016".parse().unwrap(),
            url: String::new(),
            profile: Extracted::Present(CompanyProfile::default()),
            financials: Extracted::Present(FinancialSnapshot::default()),
            indices: Extracted::Present(vec![]),
            current_reports: Extracted::Present(vec![]),
            periodic_reports: Extracted::Present(vec![]),
            shareholders: Extracted::absent(SectionKind::Shareholders, "table missing"),
            notoria: Extracted::absent(SectionKind::Notoria, "fetch failed"),
        };
        assert_eq!(
            record.failed_sections(),
            vec![SectionKind::Shareholders, SectionKind::Notoria]
        );
    }

    #[test]
    fn section_kind_round_trips_names() {
        for kind in SectionKind::ALL {
            assert_eq!(kind.as_str().parse::<SectionKind>(), Ok(kind));
        }
    }
}
