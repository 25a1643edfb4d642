pub mod record;
pub mod store;
pub mod query;
pub mod join;
pub mod derive;
pub mod aggregate;
pub mod resources;
pub mod config;
pub mod error;
pub mod util;

pub use config::Config;
pub use error::{Result, TourDbError};
pub use query::{Filter, Page, Pagination, QueryDescriptor, SortDirection, SortKey};
pub use record::Record;
pub use resources::Catalog;
pub use store::{RecordStore, Snapshot};
