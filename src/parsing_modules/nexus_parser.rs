//! Nexus market pages.
//!
//! Product pages carry an "Add to Cart" button; vendor profiles show the
//! vendor's "Public key" and list that vendor's reviews on the same page.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html};
use std::collections::{BTreeMap, BTreeSet};

use super::{
    MarketHistory, PageKind, PageParser, ParseError, ProductRecord, ReviewRecord, VendorRecord,
    first, next_element_sibling, own_text, selector, text_of, with_classes,
};

const MARKETPLACE: &str = "nexus";
const NOT_ON_MARKET: &str = "not-on-nexus";
const NOT_FOUND_TEXT: &str = "Sorry, the page you are looking for could not be found.";

lazy_static! {
    static ref DIGITS: Regex = Regex::new(r"\d+").expect("Invalid digits regex");
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NexusParser;

impl PageParser for NexusParser {
    fn name(&self) -> &'static str {
        MARKETPLACE
    }

    fn is_valid(&self, page: &Html) -> bool {
        !page_text(page).contains(NOT_FOUND_TEXT)
    }

    fn classify(&self, page: &Html) -> BTreeSet<PageKind> {
        let text = page_text(page);
        let mut kinds = BTreeSet::new();
        if text.contains("Add to Cart") {
            kinds.insert(PageKind::Product);
        } else if text.contains("Public key") {
            kinds.insert(PageKind::Vendor);
            kinds.insert(PageKind::Review);
        }
        kinds
    }

    fn extract_product(&self, page: &Html) -> Result<ProductRecord, ParseError> {
        let root = page.root_element();

        let name = with_classes(root, "h1", &["text-2xl"])?
            .first()
            .map(|h| text_of(*h))
            .ok_or(ParseError::MissingField("name"))?;

        let category = with_classes(root, "a", &["hover:text-base-500", "duration-[750ms]"])?
            .into_iter()
            .map(text_of)
            .collect::<Vec<_>>()
            .join(" ");

        let picture = with_classes(root, "a", &["image-box"])?
            .first()
            .and_then(|a| a.value().attr("href"))
            .unwrap_or_default()
            .to_string();

        let (price, currency) = match with_classes(
            root,
            "dd",
            &["order-first", "text-sm", "font-semibold", "tracking-tight", "text-green-500"],
        )?
        .first()
        {
            Some(dd) => {
                let currency = first(*dd, "span")?.map(text_of).unwrap_or_default();
                (own_text(*dd), currency)
            }
            None => (String::new(), String::new()),
        };

        let description = first(root, "div#description-data p")?
            .map(text_of)
            .unwrap_or_default();

        let vendor = with_classes(root, "h1", &["font-semibold", "text-center", "text-xl", "text-lime-500"])?
            .first()
            .map(|h| text_of(*h))
            .unwrap_or_else(|| "Not Available".to_string());

        Ok(ProductRecord {
            name,
            category,
            picture,
            sold_since: NOT_ON_MARKET.to_string(),
            sold_count: NOT_ON_MARKET.to_string(),
            price,
            currency,
            description,
            shipped_from: NOT_ON_MARKET.to_string(),
            shipped_to: NOT_ON_MARKET.to_string(),
            vendor,
            marketplace: MARKETPLACE.to_string(),
            original_url: String::new(),
        })
    }

    fn extract_vendor(&self, page: &Html) -> Result<VendorRecord, ParseError> {
        let root = page.root_element();

        let name = with_classes(root, "h2", &["text-lg"])?
            .first()
            .map(|h| text_of(*h))
            .ok_or(ParseError::MissingField("vendor name"))?;

        let about_text = first(root, "div#about-data p")?
            .map(text_of)
            .unwrap_or_else(|| "Not found".to_string());

        // The first <code> block is the market's own key
        let codes: Vec<ElementRef<'_>> = root.select(&selector("code")?).collect();
        let pgp_key = match codes.as_slice() {
            [_, vendor_key] => vendor_key.text().collect::<String>(),
            _ => String::new(),
        };

        let rating = with_classes(
            root,
            "div",
            &["text-xs", "text-gray-400/80", "hover:text-gray-400", "font-semibold"],
        )?
        .first()
        .map(|div| parse_rating(*div))
        .transpose()?
        .flatten();

        let mut marketplace_history = BTreeMap::new();
        for element in with_classes(root, "div", &["px-4", "text-gray-700"])? {
            let Some(market) = first(element, "h3")? else {
                continue;
            };
            let spans: Vec<ElementRef<'_>> = element.select(&selector("span")?).collect();
            if let [sales, rating] = spans.as_slice() {
                marketplace_history.insert(
                    text_of(market),
                    MarketHistory {
                        sales: text_of(*sales),
                        rating: text_of(*rating),
                    },
                );
            }
        }

        Ok(VendorRecord {
            name,
            about_text,
            profile_picture: "NA".to_string(),
            pgp_key,
            wallet_address: "NA".to_string(),
            review_count: labelled_value(root, "Reviews")?,
            rating,
            sale_count: labelled_value(root, "Sales")?,
            historic_sale_count: labelled_value(root, "Historical Sales")?,
            marketplace: MARKETPLACE.to_string(),
            marketplace_history,
            original_url: String::new(),
        })
    }

    fn extract_review(&self, page: &Html, vendor: &str) -> Result<Vec<ReviewRecord>, ParseError> {
        let root = page.root_element();
        let Some(container) = first(root, "div#reviews-data")? else {
            return Ok(Vec::new());
        };

        let span = selector("span")?;
        let paragraph = selector("p")?;
        let mut reviews = Vec::new();

        for element in with_classes(container, "div", &["p-4", "flex", "flex-col", "h-full"])? {
            let spans: Vec<String> = element.select(&span).map(text_of).collect();
            let paragraphs: Vec<String> = element.select(&paragraph).map(text_of).collect();

            let (product_link, product) = match first(element, "a")? {
                Some(a) => (a.value().attr("href").unwrap_or_default().to_string(), text_of(a)),
                None => (String::new(), String::new()),
            };

            let mut price_parts = spans.last().map(|s| s.split_whitespace()).into_iter().flatten();
            let price_paid = price_parts.next().unwrap_or_default().to_string();
            let currency = price_parts.next().unwrap_or_default().to_string();

            reviews.push(ReviewRecord {
                vendor: vendor.to_string(),
                product,
                product_link,
                datetime: spans.first().cloned().unwrap_or_default(),
                author: "nexus-no-author".to_string(),
                rating: paragraphs.first().cloned().unwrap_or_default(),
                text: paragraphs.get(1).cloned().unwrap_or_default(),
                price_paid,
                currency,
                original_url: String::new(),
            });
        }
        Ok(reviews)
    }
}

fn page_text(page: &Html) -> String {
    page.root_element().text().collect()
}

/// "4.8 <span>/5</span>" becomes 0.96.
fn parse_rating(element: ElementRef<'_>) -> Result<Option<f64>, ParseError> {
    let Ok(value) = own_text(element).parse::<f64>() else {
        return Ok(None);
    };
    let scale: String = first(element, "span")?
        .map(text_of)
        .map(|s| DIGITS.find_iter(&s).map(|m| m.as_str().to_string()).collect())
        .unwrap_or_default();

    Ok(scale
        .parse::<f64>()
        .ok()
        .filter(|scale| *scale > 0.0)
        .map(|scale| value / scale))
}

/// Text of the element following the one whose own text is `label`.
fn labelled_value(root: ElementRef<'_>, label: &str) -> Result<Option<String>, ParseError> {
    let any = selector("*")?;
    Ok(root
        .select(&any)
        .find(|element| own_text(*element).trim_end_matches(':') == label)
        .and_then(next_element_sibling)
        .map(text_of))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT_PAGE: &str = r#"<html><body>
        <nav>
          <a class="hover:text-base-500 duration-[750ms]">Drugs</a>
          <a class="hover:text-base-500 duration-[750ms]">Stimulants</a>
        </nav>
        <h1 class="text-2xl font-bold"> Blue Widget </h1>
        <a class="image-box" href="/img/widget.png">img</a>
        <dl><dd class="order-first text-sm font-semibold tracking-tight text-green-500"><span>USD</span> 120.00</dd></dl>
        <div id="description-data"><p>Top quality widget.</p></div>
        <h1 class="font-semibold text-center text-xl text-lime-500">acme</h1>
        <button>Add to Cart</button>
    </body></html>"#;

    const VENDOR_PAGE: &str = r#"<html><body>
        <h2 class="text-lg">acme</h2>
        <div id="about-data"><p>Fast shipping.</p></div>
        <code>MARKET KEY</code><code>VENDOR KEY</code>
        <p>Public key</p>
        <div><span>Sales</span><span>340</span></div>
        <div><span>Reviews</span><span> 12 </span></div>
        <div class="text-xs text-gray-400/80 hover:text-gray-400 font-semibold">4.8<span>/5</span></div>
        <div class="px-4 text-gray-700"><h3>Abacus</h3><span>1000</span><span>4.9</span></div>
        <div id="reviews-data">
          <div class="p-4 flex flex-col h-full">
            <span>2024-01-02</span>
            <a href="/product/1">Blue Widget</a>
            <p>5/5</p><p>Great stuff</p>
            <span>120.00 USD</span>
          </div>
        </div>
    </body></html>"#;

    #[test]
    fn test_classify() {
        let parser = NexusParser;
        assert_eq!(
            parser.classify(&Html::parse_document(PRODUCT_PAGE)),
            BTreeSet::from([PageKind::Product])
        );
        assert_eq!(
            parser.classify(&Html::parse_document(VENDOR_PAGE)),
            BTreeSet::from([PageKind::Vendor, PageKind::Review])
        );
        assert!(parser.classify(&Html::parse_document("<p>home</p>")).is_empty());
    }

    #[test]
    fn test_not_found_page_is_invalid() {
        let page = Html::parse_document(&format!("<p>{NOT_FOUND_TEXT}</p>"));
        assert!(!NexusParser.is_valid(&page));
        assert!(NexusParser.is_valid(&Html::parse_document(PRODUCT_PAGE)));
    }

    #[test]
    fn test_extract_product() {
        let product = NexusParser
            .extract_product(&Html::parse_document(PRODUCT_PAGE))
            .unwrap();
        assert_eq!(product.name, "Blue Widget");
        assert_eq!(product.category, "Drugs Stimulants");
        assert_eq!(product.picture, "/img/widget.png");
        assert_eq!(product.price, "120.00");
        assert_eq!(product.currency, "USD");
        assert_eq!(product.description, "Top quality widget.");
        assert_eq!(product.vendor, "acme");
        assert_eq!(product.shipped_to, "not-on-nexus");
        assert_eq!(product.marketplace, "nexus");
    }

    #[test]
    fn test_product_without_name_fails() {
        let result = NexusParser.extract_product(&Html::parse_document("<button>Add to Cart</button>"));
        assert_eq!(result.unwrap_err(), ParseError::MissingField("name"));
    }

    #[test]
    fn test_extract_vendor() {
        let vendor = NexusParser
            .extract_vendor(&Html::parse_document(VENDOR_PAGE))
            .unwrap();
        assert_eq!(vendor.name, "acme");
        assert_eq!(vendor.about_text, "Fast shipping.");
        assert_eq!(vendor.pgp_key, "VENDOR KEY");
        assert_eq!(vendor.sale_count.as_deref(), Some("340"));
        assert_eq!(vendor.review_count.as_deref(), Some("12"));
        assert!(vendor.historic_sale_count.is_none());
        assert!((vendor.rating.unwrap() - 0.96).abs() < 1e-9);
        assert_eq!(vendor.marketplace_history["Abacus"].sales, "1000");
    }

    #[test]
    fn test_extract_review() {
        let reviews = NexusParser
            .extract_review(&Html::parse_document(VENDOR_PAGE), "acme")
            .unwrap();
        assert_eq!(reviews.len(), 1);
        let review = &reviews[0];
        assert_eq!(review.vendor, "acme");
        assert_eq!(review.product, "Blue Widget");
        assert_eq!(review.product_link, "/product/1");
        assert_eq!(review.datetime, "2024-01-02");
        assert_eq!(review.rating, "5/5");
        assert_eq!(review.text, "Great stuff");
        assert_eq!(review.price_paid, "120.00");
        assert_eq!(review.currency, "USD");
    }

    #[test]
    fn test_page_without_reviews() {
        let reviews = NexusParser
            .extract_review(&Html::parse_document(PRODUCT_PAGE), "acme")
            .unwrap();
        assert!(reviews.is_empty());
    }
}
