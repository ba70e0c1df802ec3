//! Individual document types that a relay publishes or learns about.

pub mod routerdesc;
