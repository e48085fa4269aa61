pub mod cmd;
pub mod controller;
