pub mod extract;
pub mod html;
pub mod numbers;

use scraper::Html;
use tracing::warn;

use crate::error::FetchError;
use crate::model::{CompanyRecord, Extracted, Isin, ReportKind, SectionKind};

const INFO_TAB: &str = "infoTab";
const INDICATORS_TAB: &str = "indicatorsTab";
const QUOTATIONS_TAB: &str = "quotationsTab";
const SHAREHOLDERS_TAB: &str = "shareholdersTab";
const NOTORIA_TAB: &str = "showNotoria";

/// Where the Notoria metrics for a company come from.
#[derive(Debug, Clone)]
pub enum NotoriaInput {
    /// Embedded in the detail page.
    SamePage,
    /// Fetched separately.
    Page(String),
    Failed(FetchError),
}

/// Parse a company detail page into a record. Every section is extracted
/// independently; a missing section is reported, never fatal.
pub fn extract_company(isin: &Isin, url: &str, html: &str, notoria: &NotoriaInput) -> CompanyRecord {
    let doc = Html::parse_document(html);
    let info = html::tab(&doc, INFO_TAB);
    let indicators = html::tab(&doc, INDICATORS_TAB);
    let quotations = html::tab(&doc, QUOTATIONS_TAB);

    let profile = extract::profile::extract(&doc, info, indicators);
    if let Some(printed) = profile.present().and_then(|p| p.isin.as_deref()) {
        if printed != isin.as_str() {
            warn!("{}: page reports ISIN {}", isin, printed);
        }
    }

    let notoria = match notoria {
        NotoriaInput::SamePage => match html::tab(&doc, NOTORIA_TAB) {
            Some(scope) => extract::notoria::extract(scope),
            None => Extracted::absent(SectionKind::Notoria, "#showNotoria not found"),
        },
        NotoriaInput::Page(body) => {
            let notoria_doc = Html::parse_document(body);
            // Endpoints may serve the bare fragment without the tab wrapper.
            let scope = html::tab(&notoria_doc, NOTORIA_TAB)
                .unwrap_or_else(|| notoria_doc.root_element());
            extract::notoria::extract(scope)
        }
        NotoriaInput::Failed(e) => Extracted::absent(SectionKind::Notoria, e.to_string()),
    };

    CompanyRecord {
        isin: isin.clone(),
        url: url.to_string(),
        profile,
        financials: extract::financials::extract(indicators, quotations),
        indices: extract::indices::extract(quotations),
        current_reports: extract::reports::extract(&doc, ReportKind::Current, url),
        periodic_reports: extract::reports::extract(&doc, ReportKind::Periodic, url),
        shareholders: extract::shareholders::extract(html::tab(&doc, SHAREHOLDERS_TAB)),
        notoria,
    }
}

// ── Tests ──
