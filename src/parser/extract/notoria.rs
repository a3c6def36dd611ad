use scraper::ElementRef;

use crate::model::{Extracted, NotoriaMetric, SectionKind};
use crate::parser::html::{cells, clean_text, header_cell, table_rows};
use crate::parser::numbers::parse_number;

/// Metric rows are `<th>name</th><td>value</td>`.
pub fn extract(scope: ElementRef) -> Extracted<Vec<NotoriaMetric>> {
    let Some(rows) = table_rows(scope) else {
        return Extracted::absent(SectionKind::Notoria, "Notoria table not found");
    };

    let mut metrics: Vec<NotoriaMetric> = Vec::new();
    for row in rows {
        let (Some(th), Some(td)) = (header_cell(row), cells(row).into_iter().next()) else {
            continue;
        };
        let metric = clean_text(th);
        if metric.is_empty() || metrics.iter().any(|m| m.metric == metric) {
            continue;
        }
        let raw = clean_text(td);
        metrics.push(NotoriaMetric {
            value: parse_number(&raw),
            metric,
            raw,
        });
    }
    Extracted::Present(metrics)
}
