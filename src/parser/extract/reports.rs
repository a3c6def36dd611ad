use std::sync::LazyLock;

use reqwest::Url;
use scraper::{Html, Selector};

use crate::model::{Extracted, ReportKind, ReportReference};
use crate::parser::html::{clean_text, tab, table_rows};

static DATE_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td:nth-of-type(1) a[href^='komunikat']").unwrap());

pub fn extract(doc: &Html, kind: ReportKind, page_url: &str) -> Extracted<Vec<ReportReference>> {
    let Some(scope) = tab(doc, kind.tab_id()) else {
        return Extracted::absent(kind.section(), format!("#{} not found", kind.tab_id()));
    };
    let Some(rows) = table_rows(scope) else {
        return Extracted::absent(kind.section(), "reports table not found");
    };
    let base = Url::parse(page_url).ok();

    let reports = rows
        .into_iter()
        .filter_map(|row| {
            let link = row.select(&DATE_LINK).next()?;
            let date = clean_text(link);
            if date.is_empty() || date == "Data" {
                return None;
            }
            let href = link.value().attr("href")?;
            Some(ReportReference {
                kind,
                date,
                url: resolve(base.as_ref(), href),
            })
        })
        .collect();
    Extracted::Present(reports)
}

fn resolve(base: Option<&Url>, href: &str) -> String {
    base.and_then(|b| b.join(href).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| href.to_string())
}
