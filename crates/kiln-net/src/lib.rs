//! HTTP fetch transport for sector artifacts.
//!
//! Peers reach each other through the endpoints carried in
//! [`StorageInfo`](kiln_types::StorageInfo) URLs:
//!
//! - `GET  {base}/stat/{storage_id}` — JSON [`FsStat`](kiln_types::FsStat)
//! - `GET  {base}/{file_type}/{sector_name}` — artifact bytes, or a JSON
//!   directory listing for directory artifacts (cache dirs)
//! - `GET  {base}/{file_type}/{sector_name}/{entry…}` — one file inside a
//!   directory artifact
//! - `DELETE {base}/{file_type}/{sector_name}` — local removal
//!
//! [`HttpTransport`] is the client side, implementing the store's
//! [`FetchTransport`](kiln_store::FetchTransport) seam; [`fetch_router`]
//! is the server side, exposing a [`LocalStore`](kiln_store::LocalStore).

mod client;
mod server;

pub use client::HttpTransport;
pub use server::fetch_router;

/// Response header marking a JSON directory-listing body.
pub const DIRECTORY_HEADER: &str = "x-kiln-directory";
