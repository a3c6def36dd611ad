use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

static TR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static TH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").unwrap());
static TD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());
static BODY_ROWS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table tbody tr").unwrap());

/// The tab container with the given element id.
pub fn tab<'a>(doc: &'a Html, id: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(&format!("#{}", id)).ok()?;
    doc.select(&selector).next()
}

/// Text content with NBSPs and whitespace runs collapsed.
pub fn clean_text(el: ElementRef) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First `<td>` of the first row whose `<th>` contains `label`.
pub fn labelled_cell<'a>(scope: ElementRef<'a>, label: &str) -> Option<ElementRef<'a>> {
    scope
        .select(&TR)
        .find(|tr| tr.select(&TH).any(|th| clean_text(th).contains(label)))
        .and_then(|tr| tr.select(&TD).next())
}

pub fn labelled_value(scope: Option<ElementRef>, label: &str) -> Option<String> {
    scope
        .and_then(|s| labelled_cell(s, label))
        .map(clean_text)
        .filter(|t| !t.is_empty())
}

/// Body rows of the tables inside `scope`, or `None` when there is no table.
pub fn table_rows<'a>(scope: ElementRef<'a>) -> Option<Vec<ElementRef<'a>>> {
    let rows: Vec<_> = scope.select(&BODY_ROWS).collect();
    if rows.is_empty() && !has_table(scope) {
        None
    } else {
        Some(rows)
    }
}

fn has_table(scope: ElementRef) -> bool {
    static TABLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
    scope.select(&TABLE).next().is_some()
}

pub fn cells<'a>(row: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    row.select(&TD).collect()
}

pub fn header_cell<'a>(row: ElementRef<'a>) -> Option<ElementRef<'a>> {
    row.select(&TH).next()
}
