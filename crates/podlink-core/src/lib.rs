//! Core types shared across the podlink crates.
//!
//! - **Identifiers**: validated names for pods and namespaces
//!
//! # Example
//!
//! ```
//! use podlink_core::{Namespace, PodId};
//!
//! let pod_id = PodId::parse("frontend-7d9c6b5f4-x2kq8").unwrap();
//! let namespace = Namespace::parse("default").unwrap();
//!
//! assert_eq!(pod_id.as_str(), "frontend-7d9c6b5f4-x2kq8");
//! assert_eq!(namespace.to_string(), "default");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;

pub use ids::{IdError, Namespace, PodId};
