pub mod rest;

pub use rest::{status_for, RestApi};
