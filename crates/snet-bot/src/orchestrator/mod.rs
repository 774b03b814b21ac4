//! Conversational call orchestration.
//!
//! Per `(room, sender)` a call moves through
//!
//! ```text
//! command → AwaitingPayment → CollectingInputs → dispatch
//!                  └─ timeout / reverted → expired
//! ```
//!
//! Replies only count as inputs when they thread to the latest prompt.

mod command;
mod dispatch;
mod payment_watch;
mod probes;

pub use command::{parse_command, Command, ParseError};
pub use dispatch::{
    invoke_failure, payment_failure, render_outputs, AiRequest, CallDispatcher, Dispatcher,
    PAYMENT_REJECTED, SERVICE_UNAVAILABLE,
};
pub use payment_watch::{PAYMENT_EXPIRED, PAYMENT_FAILED};
pub use probes::{ChainConfirmer, GrpcHealthProbe, HealthProbe, PaymentConfirmer};

use crate::catalog::ServiceCatalog;
use crate::config::Config;
use crate::messenger::Messenger;
use call_store::{CallState, CallStore, CallTarget, InputField, SessionKey};
use grpc_invoke::MethodSchema;
use matrix_client::BotMessage;
use mpe_payments::{PaymentKey, PaymentStateStore, PaymentUri};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub bot_name: String,
    pub uri_scheme: String,
    pub token_address: String,
    pub gateway_domain: String,
    pub payment_timeout: Duration,
    pub poll_interval: Duration,
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bot_name: config.bot.name.clone(),
            uri_scheme: config.payments.uri_scheme.clone(),
            token_address: config.payments.token_address.clone(),
            gateway_domain: config.payments.gateway_domain.clone(),
            payment_timeout: config.payments.payment_timeout,
            poll_interval: config.payments.poll_interval,
        }
    }
}

/// Collaborators behind trait objects.
pub struct Services {
    pub catalog: Arc<dyn ServiceCatalog>,
    pub health: Arc<dyn HealthProbe>,
    pub confirmer: Arc<dyn PaymentConfirmer>,
    pub messenger: Arc<dyn Messenger>,
    pub dispatcher: Arc<dyn Dispatcher>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    sessions: CallStore,
    payments: Arc<PaymentStateStore>,
    services: Services,
}

enum ReplyProgress {
    Ignored,
    Next(InputField),
    Complete,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        sessions: CallStore,
        payments: Arc<PaymentStateStore>,
        services: Services,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions,
            payments,
            services,
        })
    }

    pub fn sessions(&self) -> &CallStore {
        &self.sessions
    }

    /// Route one incoming chat message.
    #[instrument(skip(self, message), fields(room = %message.room_id, sender = %message.sender))]
    pub async fn handle(self: &Arc<Self>, message: BotMessage) {
        if let Some(parent) = message.in_reply_to.as_deref() {
            if self.handle_reply(&message, parent).await {
                return;
            }
        }

        match parse_command(message.text(), message.is_direct, &self.config.bot_name) {
            Ok(command) => self.start_call(&message, command.target).await,
            Err(e) => debug!("Not a command: {}", e),
        }
    }

    /// Returns `true` only when the reply was taken as the awaited input.
    async fn handle_reply(self: &Arc<Self>, message: &BotMessage, parent: &str) -> bool {
        let key = SessionKey::new(&message.room_id, &message.sender);

        let Some(state) = self.sessions.get(&key).await else {
            return false;
        };
        if !state.accepts_reply_to(parent) {
            debug!("Reply to {} does not answer the current prompt", parent);
            return false;
        }

        let value = message.text().to_string();
        let progress = self
            .sessions
            .update(&key, |state| {
                if !state.accepts_reply_to(parent) {
                    return ReplyProgress::Ignored;
                }
                state.record_input(value);
                match state.current_field().cloned() {
                    Some(field) => ReplyProgress::Next(field),
                    None => ReplyProgress::Complete,
                }
            })
            .await;

        match progress {
            Ok(ReplyProgress::Next(field)) => self.prompt(&key, &field).await,
            Ok(ReplyProgress::Complete) => {
                if let Some(state) = self.sessions.remove(&key).await {
                    self.dispatch(&key, state).await;
                }
            }
            Ok(ReplyProgress::Ignored) => return false,
            Err(e) => {
                debug!("Session {} vanished: {}", key, e);
                return false;
            }
        }
        true
    }

    async fn start_call(self: &Arc<Self>, message: &BotMessage, target: CallTarget) {
        let Some(entry) = self
            .services
            .catalog
            .lookup(&target.snet_id, &target.descriptor)
        else {
            info!("Unknown service {}/{}", target.snet_id, target.descriptor);
            self.reply(message, SERVICE_UNAVAILABLE).await;
            return;
        };

        let schema = match MethodSchema::resolve(
            &entry.schema,
            Some(target.service.as_str()),
            &target.method,
        ) {
            Ok(schema) => schema,
            Err(e) => {
                warn!("{}: {}", target, e);
                let body = format!("Unknown method {}.{}.", target.service, target.method);
                self.reply(message, &body).await;
                return;
            }
        };

        if !self.services.health.is_serving(&entry.service.url).await {
            warn!("{} is not serving, ignoring {}", entry.service.url, target);
            return;
        }

        let uri = PaymentUri {
            scheme: self.config.uri_scheme.clone(),
            token: self.config.token_address.clone(),
            recipient: entry.service.payment_address.to_string(),
            amount: entry.service.price,
        };
        let payment_key = PaymentKey {
            room_id: message.room_id.clone(),
            sender: message.sender.clone(),
            command: target.to_string(),
        };
        let payment = match self.payments.create(payment_key, uri).await {
            Ok(payment) => payment,
            Err(e) => {
                error!("Failed to create payment: {}", e);
                self.reply(message, "Sorry, something went wrong.").await;
                return;
            }
        };

        let fields = schema
            .inputs
            .iter()
            .map(|field| InputField::new(&field.name, field.kind.to_string()))
            .collect();
        let key = SessionKey::new(&message.room_id, &message.sender);

        if let Some(previous) = self
            .sessions
            .insert(key.clone(), CallState::new(target.clone(), fields, payment.id))
            .await
        {
            // Ends the replaced call's watcher
            if let Err(e) = self.payments.mark_expired(previous.payment_id).await {
                debug!("Replaced payment {} not expired: {}", previous.payment_id, e);
            }
        }

        let notice = format!(
            "To call {} send {} cogs:\n{}\nPayment page: http://{}?id={}",
            target, entry.service.price, payment.uri, self.config.gateway_domain, payment.id
        );
        self.reply(message, &notice).await;

        info!("Awaiting payment {} for {}", payment.id, target);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.watch_payment(key, payment.id).await;
        });
    }

    /// Ask for `field` and remember the prompt's event.
    async fn prompt(&self, key: &SessionKey, field: &InputField) {
        let body = format!("Reply to this message with {} ({}).", field.name, field.kind);
        match self.services.messenger.send(&key.room_id, &body).await {
            Ok(event_id) => {
                if let Err(e) = self.sessions.update(key, |state| state.set_prompt(event_id)).await {
                    debug!("Session {} vanished before prompt: {}", key, e);
                }
            }
            Err(e) => error!("Failed to prompt for {}: {}", field.name, e),
        }
    }

    async fn dispatch(&self, key: &SessionKey, state: CallState) {
        info!("Dispatching {} for {}", state.target, key);
        let request = AiRequest::new(&key.room_id, &key.sender, state.target, state.values);
        self.services.dispatcher.dispatch(request).await;
    }

    async fn reply(&self, message: &BotMessage, body: &str) {
        if let Err(e) = self.services.messenger.reply(message, body).await {
            error!("Failed to send reply: {}", e);
        }
    }
}
