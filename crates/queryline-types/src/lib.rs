//! Shared request, response, and batch envelope types for queryline.
//!
//! This crate is the leaf the other queryline crates build on. It has **no
//! internal queryline dependencies** and no behavior beyond construction,
//! inspection, and serde.
//!
//! # Key Types
//!
//! |------------------------|-----------------------------------------------|
//! | Type                   | Purpose                                       |
//! |------------------------|-----------------------------------------------|
//! | [`BatchId`]            | Opaque identifier of one logical batch        |
//! | [`Method`]             | HTTP verb of an outbound request              |
//! | [`RequestInit`]        | Method, headers, and optional body            |
//! | [`HttpRequest`]        | Target address plus [`RequestInit`]           |
//! | [`HttpResponse`]       | Status, headers, and optional body            |
//! | [`AggregateRequest`]   | Wire envelope grouping many requests          |
//! | [`AggregateResponse`]  | Wire envelope grouping many responses         |
//! |------------------------|-----------------------------------------------|

pub mod http;
pub mod ids;
pub mod wire;

pub use http::{Headers, HttpRequest, HttpResponse, Method, RequestInit, header_value};
pub use ids::BatchId;
pub use wire::{AggregateRequest, AggregateResponse, RequestFragment, ResponseFragment, WireError};
