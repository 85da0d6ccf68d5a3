pub mod http;
pub mod parsers;
pub mod postgres;
pub mod scratch;
