//! The `service` module implements the client-facing protocol.
//!
//! [`WebsocketService`] owns the topic validators and drives the channel
//! registry from decoded client requests. It is also the only surface
//! business logic uses: `register`, `publish`, `publish_local` and
//! `broadcast`.

pub mod validator;
pub mod websocket_service;

pub use validator::{AllowAuthenticated, SubscriptionRequest, SubscriptionValidator, TopicValidators};
pub use websocket_service::WebsocketService;
