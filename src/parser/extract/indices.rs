use std::sync::LazyLock;

use scraper::{ElementRef, Selector};

use crate::model::{Extracted, SectionKind};
use crate::parser::html::{clean_text, labelled_cell};

static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

/// Index names linked from the quotations "index membership" row. A company
/// outside every index has no such row and gets an empty list.
pub fn extract(quotations: Option<ElementRef>) -> Extracted<Vec<String>> {
    let Some(quotations) = quotations else {
        return Extracted::absent(SectionKind::Indices, "#quotationsTab not found");
    };

    let mut names: Vec<String> = Vec::new();
    if let Some(cell) = labelled_cell(quotations, "Przynależność do indeksu") {
        for a in cell.select(&LINK) {
            let name = clean_text(a);
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
    }
    Extracted::Present(names)
}
