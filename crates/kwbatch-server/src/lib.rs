//! REST API server: routes, access logging, DTOs and error mapping.

pub mod access;
pub mod dto;
pub mod error;
pub mod routes;
pub mod state;
