//! 类型系统模块：定义查询、片段与出站事件等核心数据类型。
//!
//! # Types Module
//!
//! Core data types shared by the cache, the relay and the service.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Query`] | Book name plus a normalized tag set |
//! | [`Fragment`] | One incremental piece of generated text |
//! | [`OutboundEvent`] | Event emitted by the relay towards the caller |
//!
//! ## Example
//!
//! ```rust
//! use shelfcast::types::{OutboundEvent, Query};
//!
//! let query = Query::new("  Dune ", ["Sci-Fi", "sci-fi ", "Classics"]).unwrap();
//! assert_eq!(query.name(), "Dune");
//! assert_eq!(query.tags(), ["sci-fi", "classics"]);
//!
//! let frame = OutboundEvent::Done { text: "1. Hyperion".into() }.to_sse_frame();
//! assert_eq!(frame, "data: {\"done\":true,\"text\":\"1. Hyperion\"}\n\n");
//! ```

pub mod events;
pub mod fragment;
pub mod query;

pub use events::OutboundEvent;
pub use fragment::Fragment;
pub use query::{normalize_tags, parse_tag_list, Query};
