pub mod chunk;
pub mod fetch;
pub mod ron;
pub mod settings;
pub mod ui;
