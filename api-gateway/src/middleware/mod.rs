// ==============================================================================
// middleware/mod.rs - API Gateway Middleware Modules
// ==============================================================================
// Description: Request extractors shared by the handlers
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

pub mod auth;

pub use auth::AuthUser;
