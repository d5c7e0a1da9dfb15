//! Client-side session and data layer for the postpulse sentiment dashboard.
//!
//! The [`dashboard::Dashboard`] composes everything else: the persisted
//! [`session`], the [`api`] gateway, the [`cache`] of backend responses, and
//! the [`theme`] controller. The `postpulse` binary is a thin CLI over it.

pub mod api;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod preferences;
pub mod render;
pub mod session;
pub mod storage;
pub mod theme;
pub mod util;
