//! REST API server: routes, team scoping, DTOs and OpenAPI documentation.

pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod team;
