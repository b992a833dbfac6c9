//! Subscription domain

mod entity;
mod repository;

pub use entity::{Subscription, SubscriptionId, SubscriptionStatus};
pub use repository::{SubscriptionChange, SubscriptionRepository};
