pub mod allocator;
pub mod error;
pub mod manager;
pub mod range;
