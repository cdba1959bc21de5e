#![forbid(unsafe_code)]

//! Azure DevOps endpoint catalog plus an aggregation engine for agile
//! metrics.
//!
//! The typical flow builds request URLs with [`endpoints`], loads the JSON
//! responses with [`io`], then derives metrics with [`Agile`]:
//!
//! ```no_run
//! use devops_agile::{Agile, FilterSpec, MetricRequest, Reference, io};
//!
//! # fn run(payload: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let items = io::read_work_items_json(payload, &io::FieldSelection::All)?;
//! let lead_time = Agile::new().avg(
//!     &items,
//!     &MetricRequest::new(Reference::date_diff_days("ClosedDate", "CreatedDate"), "LeadTime")
//!         .group_by(["IterationPath"])
//!         .filters(FilterSpec::new().equals("State", "Done")),
//! )?;
//! println!("{:?}", lead_time.aggregated);
//! # Ok(())
//! # }
//! ```

pub use da_agile::{
    AggFunc, Agile, AgileError, BinaryOp, Combine, DateRange, Detail, FilterSpec, FilterValue,
    JoinType, MetricRequest, NEGATION_MARKER, Reference, parse_relative_literal,
};
pub use da_columnar::{Column, ColumnError, ComparisonOp};
pub use da_endpoints::{EndpointError, ProjectContext};
pub use da_frame::{DataFrame, FrameError};
pub use da_types::{DType, NullKind, Scalar, TypeError};

/// Endpoint catalog.
pub mod endpoints {
    pub use da_endpoints::*;
}

/// Tabular loader.
pub mod io {
    pub use da_io::*;
}

/// Lower-level frame operations the engine is built on.
pub mod ops {
    pub use da_groupby::{GroupByError, GroupByOptions, groupby_agg};
    pub use da_join::{JoinError, MergeOptions, merge};
}
