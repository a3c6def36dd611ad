use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::model::{CompanyProfile, Extracted, SectionKind};
use crate::parser::html::{clean_text, labelled_value};

// The site's own class name is misspelled; accept both.
static DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "div.comapny-description > div:nth-child(2), div.company-description > div:nth-child(2)",
    )
    .unwrap()
});

pub fn extract(
    doc: &Html,
    info: Option<ElementRef>,
    indicators: Option<ElementRef>,
) -> Extracted<CompanyProfile> {
    if info.is_none() {
        return Extracted::absent(SectionKind::Profile, "#infoTab not found");
    }
    let get = |label: &str| labelled_value(info, label).filter(|v| v != "-");
    let indicator = |label: &str| labelled_value(indicators, label).filter(|v| v != "-");

    let name = get("Nazwa:");
    if name.is_none() {
        return Extracted::absent(SectionKind::Profile, "company name not found");
    }

    let description = doc
        .select(&DESCRIPTION)
        .next()
        .map(clean_text)
        .filter(|t| !t.is_empty());

    Extracted::Present(CompanyProfile {
        name,
        ticker: get("Skrót:"),
        isin: indicator("ISIN"),
        full_name: get("Nazwa pełna:"),
        description,
        president: get("Prezes Zarządu:"),
        province: get("Województwo:"),
        address: get("Adres siedziby:"),
        phone: get("Numer telefonu:"),
        fax: get("Numer faksu:"),
        website: get("Strona www:"),
        email: get("E-mail:"),
        debut_date: get("Na giełdzie od:"),
        sector: indicator("Sektor"),
        market_segment: indicator("Rynek/Segment"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::html::tab;

    #[test]
    fn dash_in_indicators_is_no_value() {
        let doc = Html::parse_document(
            r#"<div id="infoTab"><table>
                 <tr><th>Nazwa:</th><td>NOWA</td></tr>
                 <tr><th>Skrót:</th><td>-</td></tr>
               </table></div>
               <div id="indicatorsTab"><table>
                 <tr><th>Sektor</th><td>-</td></tr>
                 <tr><th>Rynek/Segment</th><td> - </td></tr>
                 <tr><th>ISIN</th><td>-</td></tr>
               </table></div>"#,
        );
        let profile = extract(&doc, tab(&doc, "infoTab"), tab(&doc, "indicatorsTab"));
        let p = profile.present().unwrap();
        assert_eq!(p.name.as_deref(), Some("NOWA"));
        assert_eq!(p.ticker, None);
        assert_eq!(p.sector, None);
        assert_eq!(p.market_segment, None);
        assert_eq!(p.isin, None);
    }
}
