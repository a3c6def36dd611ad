use scraper::ElementRef;

use crate::model::{Extracted, SectionKind, ShareholderEntry};
use crate::parser::html::{cells, clean_text, header_cell, table_rows};
use crate::parser::numbers::parse_number;

pub fn extract(scope: Option<ElementRef>) -> Extracted<Vec<ShareholderEntry>> {
    let Some(scope) = scope else {
        return Extracted::absent(SectionKind::Shareholders, "#shareholdersTab not found");
    };
    let Some(rows) = table_rows(scope) else {
        return Extracted::absent(SectionKind::Shareholders, "shareholders table not found");
    };

    let entries = rows
        .into_iter()
        .filter(|row| header_cell(*row).is_none())
        .filter_map(|row| {
            let texts: Vec<String> = cells(row).into_iter().map(clean_text).collect();
            if texts.len() < 5 || texts[0].is_empty() {
                return None;
            }
            Some(ShareholderEntry {
                name: texts[0].clone(),
                shares_count: parse_number(&texts[1]),
                shares_pct: parse_number(&texts[2]),
                votes_count: parse_number(&texts[3]),
                votes_pct: parse_number(&texts[4]),
            })
        })
        .collect();
    Extracted::Present(entries)
}
