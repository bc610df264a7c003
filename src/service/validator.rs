//! Per-topic subscription validators.
//!
//! Each topic is owned by one business-logic module, which registers exactly
//! one [`SubscriptionValidator`] for it. A validator decides whether an
//! identity may subscribe to a channel of that topic.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::client::Identity;
use crate::utils::error::{BrokerError, BrokerResult, NotifError};

/// Input handed to a validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Unscoped channel name, as sent by the client.
    pub channel: String,
    pub identity: Identity,
}

#[async_trait]
pub trait SubscriptionValidator: Send + Sync {
    /// `Ok(())` admits the subscription. Any error is sent back to the client.
    async fn validate(&self, request: SubscriptionRequest) -> Result<(), NotifError>;
}

#[async_trait]
impl<F, Fut> SubscriptionValidator for F
where
    F: Fn(SubscriptionRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), NotifError>> + Send,
{
    async fn validate(&self, request: SubscriptionRequest) -> Result<(), NotifError> {
        (self)(request).await
    }
}

/// Admits every authenticated identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAuthenticated;

#[async_trait]
impl SubscriptionValidator for AllowAuthenticated {
    async fn validate(&self, _request: SubscriptionRequest) -> Result<(), NotifError> {
        Ok(())
    }
}

/// Topic name → validator. A topic can be registered once.
#[derive(Default)]
pub struct TopicValidators {
    validators: RwLock<HashMap<String, Arc<dyn SubscriptionValidator>>>,
}

impl TopicValidators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if `topic` already has a validator; the existing one is kept.
    pub fn register<V>(&self, topic: &str, validator: V) -> BrokerResult<()>
    where
        V: SubscriptionValidator + 'static,
    {
        let mut validators = self
            .validators
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if validators.contains_key(topic) {
            return Err(BrokerError::TopicAlreadyRegistered(topic.to_string()));
        }
        validators.insert(topic.to_string(), Arc::new(validator));
        Ok(())
    }

    pub fn get(&self, topic: &str) -> Option<Arc<dyn SubscriptionValidator>> {
        self.validators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.validators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(topic)
    }
}

impl fmt::Debug for TopicValidators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let validators = self
            .validators
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("TopicValidators")
            .field("topics", &validators.keys().collect::<Vec<_>>())
            .finish()
    }
}
