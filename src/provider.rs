pub mod raw;
pub mod request;
