//! API module for HTTP and WebSocket endpoints
//!
//! This module provides the sync WebSocket endpoint and a health check.

pub mod http;
pub mod websocket;
