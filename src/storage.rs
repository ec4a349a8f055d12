pub mod cursor;
pub mod event;
pub mod store;
