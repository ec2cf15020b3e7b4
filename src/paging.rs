//! Cursor pagination over Gmail listing endpoints
//!
//! Every listing (filters, labels, message ids) is driven to completion
//! before the caller sees anything: a failed page discards the pages already
//! read, so diff and search logic never runs against a partial view.

use std::collections::HashSet;
use std::future::Future;
use tracing::{debug, warn};

use crate::error::{GmailError, Result};

/// One page of a listing plus the cursor for the next page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_page_token: Option<String>) -> Self {
        // The API reports "no more pages" as either a missing or an empty token
        let next_page_token = next_page_token.filter(|t| !t.is_empty());
        Self {
            items,
            next_page_token,
        }
    }

    /// A page with no successor
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }
}

/// Drives a listing operation until the cursor runs out
#[derive(Debug, Clone, Copy)]
pub struct PagedLister {
    max_pages: usize,
}

impl Default for PagedLister {
    fn default() -> Self {
        Self { max_pages: 10_000 }
    }
}

impl PagedLister {
    pub fn new(max_pages: usize) -> Self {
        Self {
            max_pages: max_pages.max(1),
        }
    }

    /// Collect every item of a listing in server order.
    ///
    /// `fetch_page` receives the cursor to consume (`None` for the first page).
    /// The listing ends when the server returns no token, or returns the token
    /// that was just consumed (a cursor that does not advance). A token that
    /// repeats an older one, or a listing longer than `max_pages`, fails with
    /// [`GmailError::PaginationStall`].
    pub async fn collect<T, F, Fut>(&self, resource: &str, mut fetch_page: F) -> Result<Vec<T>>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<Page<T>>>,
    {
        let mut items = Vec::new();
        let mut current: Option<String> = None;
        let mut seen: HashSet<String> = HashSet::new();
        let mut pages = 0usize;

        loop {
            let page = fetch_page(current.clone()).await?;
            pages += 1;
            debug!(
                "Listed page {} of {}: {} items",
                pages,
                resource,
                page.items.len()
            );
            items.extend(page.items);

            let next = match page.next_page_token {
                None => break,
                Some(next) => next,
            };

            if current.as_deref() == Some(next.as_str()) {
                warn!(
                    "{} listing returned the cursor it was given ('{}'), treating as end of results",
                    resource, next
                );
                break;
            }

            if !seen.insert(next.clone()) || pages >= self.max_pages {
                return Err(GmailError::PaginationStall { token: next, pages });
            }

            current = Some(next);
        }

        debug!("Listed {} {} across {} pages", items.len(), resource, pages);
        Ok(items)
    }
}
