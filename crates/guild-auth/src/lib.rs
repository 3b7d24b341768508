pub mod logic;
pub mod repository;
pub mod router;
pub mod service;
