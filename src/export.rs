//! Offline scrape of stored pages into JSON lines, one file per record kind.

use scraper::Html;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checkpoint::Checkpoint;
use crate::link_graph::{GraphError, LinkGraph};
use crate::page_store::PageStore;
use crate::parsing_modules::{PageKind, PageParser, ParseError, ProductRecord, ReviewRecord, VendorRecord};

/// Stand-in for pages whose URL never made it into the link graph.
pub const URL_NOT_SAVED: &str = "url-not-saved";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Link graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Write each record as one line of JSON. Returns the number written.
pub fn export_to_jsonl<W, T, I>(records: I, writer: &mut W) -> Result<usize, ExportError>
where
    W: Write,
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut written = 0;
    for record in records {
        serde_json::to_writer(&mut *writer, &record)?;
        writer.write_all(b"\n")?;
        written += 1;
    }
    Ok(written)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeSummary {
    pub pages: usize,
    pub invalid: usize,
    pub failed: usize,
    pub products: usize,
    pub vendors: usize,
    pub reviews: usize,
}

#[derive(Debug, Default)]
struct ScrapedPage {
    products: Vec<ProductRecord>,
    vendors: Vec<VendorRecord>,
    reviews: Vec<ReviewRecord>,
}

/// Appends to `<out>/<target>-<kind>.jsonl`, opening each file on first use.
struct RecordFiles {
    out_dir: PathBuf,
    target: String,
    writers: BTreeMap<PageKind, BufWriter<File>>,
}

impl RecordFiles {
    fn new(out_dir: &Path, target: &str) -> Self {
        Self {
            out_dir: out_dir.to_path_buf(),
            target: target.to_string(),
            writers: BTreeMap::new(),
        }
    }

    fn append<T: Serialize>(&mut self, kind: PageKind, records: &[T]) -> Result<usize, ExportError> {
        if records.is_empty() {
            return Ok(0);
        }
        let writer = match self.writers.entry(kind) {
            std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::btree_map::Entry::Vacant(entry) => {
                let path = self
                    .out_dir
                    .join(format!("{}-{}.jsonl", self.target, kind.as_str()));
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                entry.insert(BufWriter::new(file))
            }
        };
        export_to_jsonl(records, writer)
    }

    fn finish(mut self) -> Result<(), ExportError> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Run `parser` over every stored page of `target`.
///
/// Pages that fail to read or extract are counted and logged; only output
/// and link-graph errors abort the run.
pub fn run_scrape(
    parser: &dyn PageParser,
    data_dir: &Path,
    target: &str,
    out_dir: &Path,
) -> Result<ScrapeSummary, ExportError> {
    let store = PageStore::new(data_dir, target);
    let graph = LinkGraph::load(&Checkpoint::new(data_dir, target).graph_path())?;
    std::fs::create_dir_all(out_dir)?;

    let mut files = RecordFiles::new(out_dir, target);
    let mut summary = ScrapeSummary::default();
    info!(parser = parser.name(), crawl = target, graph_entries = graph.len(), "scraping stored pages");

    for (fp, path) in store.list_pages()? {
        summary.pages += 1;

        let original_url = match graph.get(&fp) {
            Some(entry) => entry.original.clone(),
            None => {
                warn!(path = %path.display(), "no original URL in link graph");
                URL_NOT_SAVED.to_string()
            }
        };

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read stored page");
                summary.failed += 1;
                continue;
            }
        };
        let page = Html::parse_document(&String::from_utf8_lossy(&bytes));

        if !parser.is_valid(&page) {
            debug!(path = %path.display(), "page not valid for scraping");
            summary.invalid += 1;
            continue;
        }

        let scraped = match scrape_page(parser, &page, &original_url) {
            Ok(scraped) => scraped,
            Err(e) => {
                warn!(path = %path.display(), url = %original_url, error = %e, "extraction failed");
                summary.failed += 1;
                continue;
            }
        };

        summary.vendors += files.append(PageKind::Vendor, &scraped.vendors)?;
        summary.reviews += files.append(PageKind::Review, &scraped.reviews)?;
        summary.products += files.append(PageKind::Product, &scraped.products)?;
    }

    files.finish()?;
    info!(
        pages = summary.pages,
        invalid = summary.invalid,
        failed = summary.failed,
        products = summary.products,
        vendors = summary.vendors,
        reviews = summary.reviews,
        "scrape finished"
    );
    Ok(summary)
}

/// Vendor comes first: reviews are attributed to the vendor on the page.
fn scrape_page(parser: &dyn PageParser, page: &Html, original_url: &str) -> Result<ScrapedPage, ParseError> {
    let kinds = parser.classify(page);
    let mut scraped = ScrapedPage::default();

    if kinds.contains(&PageKind::Vendor) {
        let mut vendor = parser.extract_vendor(page)?;
        vendor.original_url = original_url.to_string();
        scraped.vendors.push(vendor);
    }

    if kinds.contains(&PageKind::Review) {
        let vendor = scraped
            .vendors
            .first()
            .map(|v| v.name.clone())
            .ok_or(ParseError::MissingField("vendor name"))?;
        scraped.reviews = parser
            .extract_review(page, &vendor)?
            .into_iter()
            .map(|mut review| {
                review.original_url = original_url.to_string();
                review
            })
            .collect();
    }

    if kinds.contains(&PageKind::Product) {
        let mut product = parser.extract_product(page)?;
        product.original_url = original_url.to_string();
        scraped.products.push(product);
    }

    Ok(scraped)
}
