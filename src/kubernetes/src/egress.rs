pub mod allocation;
pub mod elector;
pub mod error;
pub mod resolver;
pub mod status;
pub mod validator;
