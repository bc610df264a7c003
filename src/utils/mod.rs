//! The `utils` module provides the pieces shared by every other module of
//! `notifsub`: the error types and the logging setup.

pub mod error;
pub mod logging;
