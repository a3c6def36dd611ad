use scraper::ElementRef;

use crate::model::{Extracted, FinancialSnapshot, SectionKind};
use crate::parser::html::labelled_value;
use crate::parser::numbers::{parse_number, parse_trailing_number};

pub fn extract(
    indicators: Option<ElementRef>,
    quotations: Option<ElementRef>,
) -> Extracted<FinancialSnapshot> {
    if indicators.is_none() && quotations.is_none() {
        return Extracted::absent(
            SectionKind::Financials,
            "neither #indicatorsTab nor #quotationsTab found",
        );
    }
    let ind = |label: &str| labelled_value(indicators, label).and_then(|v| parse_number(&v));
    let quo = |label: &str| labelled_value(quotations, label).and_then(|v| parse_number(&v));

    Extracted::Present(FinancialSnapshot {
        issued_shares: ind("Liczba wyemitowanych akcji"),
        market_cap_mln: ind("Wartość rynkowa"),
        book_value_mln: ind("Wartość księgowa"),
        price_to_book: ind("C/WK"),
        pe_ratio: ind("C/Z"),
        dividend_yield_percent: ind("Stopa dywidendy"),
        last_price: quo("Kurs ostatni"),
        change_percent: quo("Zmiana"),
        bid: quo("Oferta kupna"),
        ask: quo("Oferta sprzedaży"),
        min_price: quo("Min."),
        max_price: quo("Max."),
        volume: quo("Wol. obrotu"),
        turnover_value: quo("Wart. obrotu"),
        debut_price: labelled_value(quotations, "Data i kurs debiutu")
            .and_then(|v| parse_trailing_number(&v)),
        max_52w: quo("Max historyczny"),
        min_52w: quo("Min historyczny"),
    })
}
