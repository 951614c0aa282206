#![doc = include_str!("../README.md")]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]
#![deny(unsafe_code)]

mod core;
pub mod hl;
pub mod raw;
mod utils {
    pub mod dedup;
}

pub use crate::{
    core::{Key, KeyState, UnlockError},
    hl::table::LockTable,
};
