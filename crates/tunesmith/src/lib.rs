pub mod agent;
pub mod credentials;
pub mod errors;
pub mod housekeeping;
pub mod models;
pub mod policy;
pub mod prompt_template;
pub mod providers;
pub mod registry;
pub mod systems;
