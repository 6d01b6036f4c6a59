#![allow(clippy::missing_docs_in_private_items)]

pub mod error;
pub mod storage;
pub mod utils;
pub mod vector;
