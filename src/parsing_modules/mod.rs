//! Site-specific parsers for stored market pages.
//!
//! The crawl loop never looks inside a page beyond its links. Everything
//! market-specific lives behind [`PageParser`], one implementation per
//! market, used by the offline `scrape` command.

pub mod nexus_parser;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub use nexus_parser::NexusParser;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("required field '{0}' not found")]
    MissingField(&'static str),

    #[error("invalid selector '{0}'")]
    Selector(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PageKind {
    Product,
    Vendor,
    Review,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Vendor => "vendor",
            Self::Review => "review",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRecord {
    pub name: String,
    pub category: String,
    pub picture: String,
    pub sold_since: String,
    pub sold_count: String,
    pub price: String,
    pub currency: String,
    pub description: String,
    pub shipped_from: String,
    pub shipped_to: String,
    pub vendor: String,
    pub marketplace: String,
    pub original_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketHistory {
    pub sales: String,
    pub rating: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VendorRecord {
    pub name: String,
    pub about_text: String,
    pub profile_picture: String,
    pub pgp_key: String,
    pub wallet_address: String,
    pub review_count: Option<String>,
    pub rating: Option<f64>,
    pub sale_count: Option<String>,
    pub historic_sale_count: Option<String>,
    pub marketplace: String,
    pub marketplace_history: BTreeMap<String, MarketHistory>,
    pub original_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewRecord {
    pub vendor: String,
    pub product: String,
    pub product_link: String,
    pub datetime: String,
    pub author: String,
    pub rating: String,
    pub text: String,
    pub price_paid: String,
    pub currency: String,
    pub original_url: String,
}

/// Market-specific page understanding.
///
/// Extractors fill `original_url` with an empty string; the caller knows
/// where the page came from and sets it.
pub trait PageParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// `false` for error pages and anything else not worth extracting.
    fn is_valid(&self, page: &Html) -> bool;

    fn classify(&self, page: &Html) -> BTreeSet<PageKind>;

    fn extract_product(&self, page: &Html) -> Result<ProductRecord, ParseError>;

    fn extract_vendor(&self, page: &Html) -> Result<VendorRecord, ParseError>;

    fn extract_review(&self, page: &Html, vendor: &str) -> Result<Vec<ReviewRecord>, ParseError>;
}

/// Look up a parser by market name.
pub fn parser_for(market: &str) -> Option<Box<dyn PageParser>> {
    match market {
        "nexus" => Some(Box::new(NexusParser)),
        _ => None,
    }
}

pub fn known_parsers() -> &'static [&'static str] {
    &["nexus"]
}

pub(crate) fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|_| ParseError::Selector(css.to_string()))
}

/// Whitespace-collapsed text of an element and its descendants.
pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text directly inside `element`, ignoring child elements.
pub(crate) fn own_text(element: ElementRef<'_>) -> String {
    element
        .children()
        .filter_map(|child| child.value().as_text())
        .flat_map(|text| text.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Elements named `tag` that carry every class in `classes`.
///
/// Utility class names such as `hover:text-base-500` do not survive CSS
/// selector parsing, so classes are compared as plain strings.
pub(crate) fn with_classes<'a>(
    root: ElementRef<'a>,
    tag: &str,
    classes: &[&str],
) -> Result<Vec<ElementRef<'a>>, ParseError> {
    let selector = selector(tag)?;
    Ok(root
        .select(&selector)
        .filter(|element| {
            let present: BTreeSet<&str> = element.value().classes().collect();
            classes.iter().all(|class| present.contains(class))
        })
        .collect())
}

pub(crate) fn first<'a>(root: ElementRef<'a>, css: &str) -> Result<Option<ElementRef<'a>>, ParseError> {
    Ok(root.select(&selector(css)?).next())
}

pub(crate) fn next_element_sibling(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element.next_siblings().find_map(ElementRef::wrap)
}
