#![doc = include_str!("../README.md")]

mod buffer;
mod error;

pub mod codec;
pub mod config;
pub mod minicbf;
pub mod stream;

pub use buffer::Buffer;
pub use error::{Error, Result};
