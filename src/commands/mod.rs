pub mod articles;
pub mod catalog;
pub mod components;
pub mod dedup;
pub mod reference;
mod stage;
pub mod status;
pub mod suggest;
