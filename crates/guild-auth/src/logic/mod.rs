pub mod audit;
pub mod auth_flow;
pub mod discord;
pub mod group_sync;
pub mod role_mapping;
pub mod settings;
pub mod username;
