pub mod candle;
pub mod domain;
pub mod extension;
pub mod range;
pub mod uid;
