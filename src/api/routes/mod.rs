pub mod health;
pub mod nodes;
pub mod properties;
pub mod status;
