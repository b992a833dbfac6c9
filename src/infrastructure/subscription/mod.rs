//! Subscription infrastructure

mod repository;
mod service;

pub use repository::StorageSubscriptionRepository;
pub use service::{SubscribeRequest, SubscriptionService};
