//! Analysis passes over accumulated file records.
//!
//! - **Duplicate detection** - group files sharing a name and size
//!
//! ```rust,ignore
//! use storagepulse_analyze::DuplicateDetector;
//! use storagepulse_store::SqliteStore;
//!
//! let store = SqliteStore::open("storagepulse.sqlite")?;
//! let report = DuplicateDetector::new().run(&store)?;
//!
//! println!("Found {} duplicate groups", report.group_count());
//! println!("Wasted space: {} bytes", report.total_wasted_space);
//! ```

mod duplicates;

pub use duplicates::{DuplicateConfig, DuplicateConfigBuilder, DuplicateDetector, DuplicateReport};

// Re-export core types
pub use storagepulse_core::{DuplicateGroup, FileRecord};
