//! Card payment gateway seam.
//!
//! Only the verdict and the intent id cross this boundary; the processor's own
//! protocol stays behind the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::value_objects::Money;
use crate::{MarketplaceError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus { Pending, Succeeded, Failed }

impl IntentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" | "processing" | "requires_payment_method" => Some(Self::Pending),
            "succeeded" | "paid" => Some(Self::Succeeded),
            "failed" | "canceled" | "declined" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    /// Integer minor units.
    pub amount: i64,
    pub currency: String,
    pub status: IntentStatus,
    /// Our order id.
    pub reference: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;
    async fn create_intent(&self, amount: &Money, reference: &str) -> Result<PaymentIntent>;
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent>;
}

/// In-process gateway for development and tests. Intents stay pending until
/// `set_status` settles them.
#[derive(Default)]
pub struct SandboxGateway {
    intents: Mutex<HashMap<String, PaymentIntent>>,
}

impl SandboxGateway {
    pub fn new() -> Self { Self::default() }

    pub async fn set_status(&self, intent_id: &str, status: IntentStatus) -> Result<()> {
        let mut intents = self.intents.lock().await;
        let intent = intents.get_mut(intent_id).ok_or_else(|| MarketplaceError::not_found("payment intent", intent_id))?;
        intent.status = status;
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn name(&self) -> &'static str { "sandbox" }

    async fn create_intent(&self, amount: &Money, reference: &str) -> Result<PaymentIntent> {
        let minor = amount.minor_units();
        if minor <= 0 {
            return Err(MarketplaceError::PaymentFailed("Amount must be positive".into()));
        }
        let id = format!("pi_{}", Uuid::new_v4().simple());
        let intent = PaymentIntent {
            client_secret: format!("{}_secret_{}", id, Uuid::new_v4().simple()),
            id: id.clone(),
            amount: minor,
            currency: amount.currency().to_lowercase(),
            status: IntentStatus::Pending,
            reference: reference.to_string(),
        };
        self.intents.lock().await.insert(id, intent.clone());
        tracing::debug!(intent_id = %intent.id, amount = minor, "Created sandbox payment intent");
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        self.intents.lock().await
            .get(intent_id)
            .cloned()
            .ok_or_else(|| MarketplaceError::not_found("payment intent", intent_id))
    }
}
