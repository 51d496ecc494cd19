pub mod db;
pub mod domain;
pub mod entities;
pub mod error;
pub mod github;
pub mod repositories;
pub mod services;
pub mod settings;
pub mod storage;
