use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use crate::crawler::models::{ListingRecord, ListingSummary};

const SITE_ROOT: &str = "https://remax.pt";

/// Subtype tokens the site embeds after the transaction marker in listing
/// URLs. Anything else lands in the generic bucket.
const SUBTYPE_VOCABULARY: &[&str] = &[
    "apartamento",
    "moradia",
    "terreno",
    "predio",
    "loja",
    "escritorio",
    "armazem",
    "quinta",
    "garagem",
    "duplex",
];

/// Strips everything that is not a digit before parsing. Source text
/// interleaves thousands separators, currency symbols and unit suffixes,
/// so a plain float parse is never safe here.
pub fn clean_number(raw: Option<&str>) -> i64 {
    let Some(raw) = raw else { return 0 };
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Listing id is the trailing `digits-digits` segment of the canonical
/// address. When the pattern is missing the full address stands in, which
/// keeps the record but makes its key fragile; callers get the flag.
pub fn extract_listing_id(link: &str) -> (String, bool) {
    let re = Regex::new(r"/(\d+-\d+)$").unwrap();
    match re.captures(link).and_then(|c| c.get(1)) {
        Some(m) => (m.as_str().to_string(), true),
        None => (link.to_string(), false),
    }
}

/// Classifies the property subtype from the transaction-and-type token in
/// the address, e.g. `venda-apartamento-t3-lisboa` -> "Apartamento T3".
/// Unknown tokens classify as "Outro"; a missing marker as "Desconhecida".
pub fn parse_subtype(link: &str) -> String {
    let re = Regex::new(r"(?i)(?:venda|arrendamento)-([a-z]+)(?:-(t\d+))?").unwrap();
    let Some(caps) = re.captures(link) else {
        return "Desconhecida".to_string();
    };

    let token = caps[1].to_lowercase();
    if !SUBTYPE_VOCABULARY.contains(&token.as_str()) {
        return "Outro".to_string();
    }

    let mut subtype = capitalize(&token);
    if let Some(typology) = caps.get(2) {
        subtype.push(' ');
        subtype.push_str(&typology.as_str().to_uppercase());
    }
    subtype
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Summary-mode extraction: one `ListingSummary` per index card. Missing
/// fields default (price/area 0, locality "Desconhecido") rather than
/// dropping the card.
pub fn parse_summaries(html: &str) -> Vec<ListingSummary> {
    let doc = Html::parse_document(html);
    let card_sel = Selector::parse(r#"a[data-id="listing-card-link"]"#).unwrap();
    let price_sel = Selector::parse("span").unwrap();
    let area_sel = Selector::parse("b").unwrap();
    let locality_sel = Selector::parse("p.text-ellipsis").unwrap();

    let mut summaries = Vec::new();

    for card in doc.select(&card_sel) {
        let Some(href) = card.value().attr("href") else {
            continue;
        };
        let link = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{SITE_ROOT}{href}")
        };

        let (id, stable_id) = extract_listing_id(&link);
        if !stable_id {
            warn!(link = %link, "listing id pattern missing, falling back to full address");
        }

        let price_raw = card
            .select(&price_sel)
            .map(element_text)
            .find(|t| t.contains('€'));
        let area_raw = card
            .select(&area_sel)
            .map(element_text)
            .find(|t| t.contains("m²"));
        let locality = card
            .select(&locality_sel)
            .next()
            .map(element_text)
            .and_then(|t| t.split(',').next().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Desconhecido".to_string());

        summaries.push(ListingSummary {
            id,
            link,
            price: clean_number(price_raw.as_deref()) as f64,
            area: clean_number(area_raw.as_deref()),
            locality,
            stable_id,
        });
    }

    summaries
}

/// End-of-results detection: the "next" control is absent or disabled.
pub fn has_next_page(html: &str) -> bool {
    let doc = Html::parse_document(html);
    let next_sel = Selector::parse(r#"button[aria-label="Go to next page"]"#).unwrap();

    match doc.select(&next_sel).next() {
        Some(button) => !button
            .value()
            .attr("class")
            .unwrap_or_default()
            .contains("Mui-disabled"),
        None => false,
    }
}

/// Current page number carried in the `p` query parameter; absent means 1.
pub fn page_number(url: &str) -> u32 {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "p")
                .and_then(|(_, v)| v.parse().ok())
        })
        .unwrap_or(1)
}

/// Rewrites the `p` query parameter, preserving every other parameter.
pub fn with_page(url: &str, page: u32) -> anyhow::Result<String> {
    let mut parsed = reqwest::Url::parse(url)?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "p")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut pairs = parsed.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair("p", &page.to_string());
    }

    Ok(parsed.to_string())
}

/// Detail-mode extraction. Best effort over the labelled characteristics
/// table of the detail page; absent labels resolve to null, the summary
/// supplies price, locality and the area estimate.
pub fn parse_detail(
    html: &str,
    summary: &ListingSummary,
    now: DateTime<Utc>,
) -> ListingRecord {
    let doc = Html::parse_document(html);

    let private_area = detail_value(&doc, "Área Bruta Privativa");
    let gross_area_raw = detail_value(&doc, "Área Bruta");
    let usable_area = detail_value(&doc, "Área Útil");
    let lot_area = detail_value(&doc, "Área Total do Lote");

    // Area precedence mirrors the source site's own field hierarchy:
    // gross private area wins, plain gross area is the fallback, and the
    // index-page estimate stands when the detail page has neither.
    let gross_area = private_area
        .as_deref()
        .map(|v| clean_number(Some(v)) as f64)
        .or_else(|| gross_area_raw.as_deref().map(|v| clean_number(Some(v)) as f64))
        .or(Some(summary.area as f64));

    let bathrooms = detail_value(&doc, "WC").or_else(|| detail_value(&doc, "Casas de banho"));

    ListingRecord {
        id: summary.id.clone(),
        link: summary.link.clone(),
        last_crawled: now,
        published_at: now.date_naive(),
        price: summary.price,
        locality: summary.locality.clone(),
        property_subtype: parse_subtype(&summary.link),
        gross_area,
        usable_area: usable_area.map(|v| clean_number(Some(&v)) as f64),
        lot_area: lot_area.map(|v| clean_number(Some(&v)) as f64),
        build_year: detail_int(&doc, "Ano de Construção"),
        bedrooms: detail_int(&doc, "Quartos"),
        bathrooms: bathrooms.map(|v| clean_number(Some(&v)) as i32),
        parking: detail_value(&doc, "Estacionamento"),
        elevator: detail_value(&doc, "Elevador"),
        energy_certificate: energy_certificate(&doc),
        description: description(&doc),
    }
}

fn detail_int(doc: &Html, label: &str) -> Option<i32> {
    detail_value(doc, label).map(|v| clean_number(Some(&v)) as i32)
}

/// Label -> value rule: the first span whose text contains the label,
/// paired with its next sibling span.
fn detail_value(doc: &Html, label: &str) -> Option<String> {
    let span_sel = Selector::parse("span").unwrap();

    for span in doc.select(&span_sel) {
        if !element_text(span).contains(label) {
            continue;
        }
        let value = span
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|sib| sib.value().name() == "span")
            .map(element_text);
        if let Some(v) = value {
            let v = v.trim().to_string();
            return Some(v);
        }
    }
    None
}

fn description(doc: &Html) -> Option<String> {
    let desc_sel = Selector::parse("#description .custom-description").unwrap();
    let text = doc
        .select(&desc_sel)
        .next()
        .map(|el| {
            el.text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Certificate grade lives in the alt text of a badge image next to the
/// "Eficiência energética" label.
fn energy_certificate(doc: &Html) -> Option<String> {
    let any_sel = Selector::parse("*").unwrap();
    let img_sel = Selector::parse("img").unwrap();

    for el in doc.select(&any_sel) {
        if !own_text(el).contains("Eficiência energética") {
            continue;
        }
        let cert = el
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|sib| sib.value().name() == "span")
            .and_then(|span| {
                span.select(&img_sel)
                    .next()
                    .and_then(|img| img.value().attr("alt"))
                    .map(|alt| alt.trim().to_string())
            });
        if cert.is_some() {
            return cert;
        }
    }
    None
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Text directly inside the element, excluding descendants — the label
/// match must not fire on a container wrapping the whole table.
fn own_text(el: ElementRef) -> String {
    el.children()
        .filter_map(|n| n.value().as_text().map(|t| t.trim().to_string()))
        .collect::<Vec<_>>()
        .join(" ")
}
