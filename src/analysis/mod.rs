pub mod articles;
pub mod catalog;
pub mod categorize;
pub mod components;
pub mod correlation;
pub mod dedup;
pub mod frequency;
pub mod mapping;
pub mod merge;
pub mod presence;
pub mod suggest;
