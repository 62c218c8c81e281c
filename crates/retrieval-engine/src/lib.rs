//! Retrieval protocol shared by every target: encoded queries, ordered
//! candidate operations, pagination and record extraction.

pub mod capture;
pub mod extract;
pub mod fetcher;
pub mod query;
pub mod resolver;
pub mod transport;

pub use capture::{Observation, PageCapture, CAPTURE_SCRIPT};
pub use extract::{sys_id_from_href, RecordExtractor, ID_FIELD};
pub use fetcher::{
    EmptyResultPolicy, ListSource, PageSource, PaginatedFetcher, DEFAULT_MAX_RECORDS,
    DEFAULT_PAGE_SIZE,
};
pub use query::QueryBuilder;
pub use resolver::{MethodResolver, OperationTransport, Resolved};
pub use transport::BrowserOperationTransport;
