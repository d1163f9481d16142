//! URL handling module
//!
//! This module provides URL normalization under a [`QueryPolicy`], host and
//! robots.txt location helpers, and PDF link recognition.

mod domain;
mod normalize;
mod pdf_link;

pub use domain::{extract_domain, robots_url, site_key};
pub use normalize::{normalize_parsed, normalize_url, QueryPolicy};
pub use pdf_link::{filename_from_url, is_pdf_link, is_pdf_path};
